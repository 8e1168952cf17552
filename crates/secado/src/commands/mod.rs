pub mod consolidate;
pub mod curves;
