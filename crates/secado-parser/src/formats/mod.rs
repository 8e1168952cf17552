mod common;
mod jpv_variable_log;
mod rb_channel_table;

pub use common::sensor_label_from_name;
pub use jpv_variable_log::JpvVariableLogParser;
pub use rb_channel_table::RbChannelTableParser;

pub(crate) use common::{compact_lower, decode_text, field_at, find_column};
