pub mod errors;
pub mod formats;
pub mod model;
mod registry;

pub use errors::{ParserAttempt, ParserError};
pub use formats::sensor_label_from_name;
pub use model::{ParsedRow, ParsedSensorFile, SensorFileFormat};
pub use registry::{parse_as, parse_sensor_file, parser_for, sniff_format, SensorFileParser};
