use crate::errors::{ParserAttempt, ParserError};
use crate::formats::{compact_lower, decode_text, JpvVariableLogParser, RbChannelTableParser};
use crate::model::{ParsedSensorFile, SensorFileFormat};

pub trait SensorFileParser {
    fn name(&self) -> &'static str;
    fn parse(&self, content: &[u8]) -> Result<ParsedSensorFile, ParserError>;
}

static JPV_VARIABLE_LOG: JpvVariableLogParser = JpvVariableLogParser;
static RB_CHANNEL_TABLE: RbChannelTableParser = RbChannelTableParser;

const SNIFFER: &str = "HEADER_SNIFF";

/// The parser that reads `format`.
pub fn parser_for(format: SensorFileFormat) -> &'static dyn SensorFileParser {
    match format {
        SensorFileFormat::JpvVariableLog => &JPV_VARIABLE_LOG,
        SensorFileFormat::RbChannelTable => &RB_CHANNEL_TABLE,
    }
}

/// Recognizes an export from its first non-blank line. A variable log names both `VarName`
/// and `VarValue`; a channel table has a date column next to at least one voltage channel.
pub fn sniff_format(content: &[u8]) -> Result<SensorFileFormat, ParserError> {
    let text = decode_text(content, SNIFFER)?;
    let header = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let tokens: Vec<String> = header
        .split(['\t', ';', ','])
        .map(compact_lower)
        .filter(|token| !token.is_empty())
        .collect();
    let has = |names: &[&str]| tokens.iter().any(|token| names.contains(&token.as_str()));

    if has(&["varname"]) && has(&["varvalue"]) {
        return Ok(SensorFileFormat::JpvVariableLog);
    }
    if has(RbChannelTableParser::DATE_COLUMNS) && has(RbChannelTableParser::CHANNEL_COLUMNS) {
        return Ok(SensorFileFormat::RbChannelTable);
    }

    Err(ParserError::NoMatchingParser {
        attempts: vec![
            ParserAttempt::new(
                JPV_VARIABLE_LOG.name(),
                format!("header {tokens:?} lacks VarName/VarValue"),
            ),
            ParserAttempt::new(
                RB_CHANNEL_TABLE.name(),
                format!("header {tokens:?} lacks a date column or a voltage channel"),
            ),
        ],
    })
}

/// Sniffs the layout of a raw sensor export and parses it with the matching parser.
pub fn parse_sensor_file(content: &[u8]) -> Result<ParsedSensorFile, ParserError> {
    let format = sniff_format(content)?;
    parse_as(format, content)
}

/// Parses `content` as `format` without sniffing, for callers that already know the plant.
pub fn parse_as(format: SensorFileFormat, content: &[u8]) -> Result<ParsedSensorFile, ParserError> {
    parser_for(format).parse(content)
}
