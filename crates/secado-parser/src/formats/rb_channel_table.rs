use crate::errors::ParserError;
use crate::model::{ParsedRow, ParsedSensorFile, SensorFileFormat};
use crate::registry::SensorFileParser;

use super::{compact_lower, decode_text, field_at, find_column};

/// Channel-table exports: a date column, a local-time column and one column per voltage
/// channel. Each data line becomes one long row per channel.
pub struct RbChannelTableParser;

impl Default for RbChannelTableParser {
    fn default() -> Self {
        Self
    }
}

impl RbChannelTableParser {
    const NAME: &'static str = "RB_CHANNEL_TABLE";
    pub(crate) const DATE_COLUMNS: &'static [&'static str] = &["date", "fecha"];
    const TIME_COLUMNS: &'static [&'static str] =
        &["time", "hora", "loctime", "localtime", "localtiempo"];
    pub(crate) const CHANNEL_COLUMNS: &'static [&'static str] = &["vhum", "vtem", "vtemp"];

    fn reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes())
    }

    /// `;` is the usual separator; a single resulting column means the file uses `,`.
    fn open(text: &str) -> Result<(csv::Reader<&[u8]>, csv::StringRecord), ParserError> {
        let mut reader = Self::reader(text, b';');
        let headers = Self::headers(&mut reader)?;
        if headers.len() > 1 {
            return Ok((reader, headers));
        }
        let mut reader = Self::reader(text, b',');
        let headers = Self::headers(&mut reader)?;
        Ok((reader, headers))
    }

    fn headers(reader: &mut csv::Reader<&[u8]>) -> Result<csv::StringRecord, ParserError> {
        reader
            .headers()
            .map(|headers| headers.clone())
            .map_err(|err| ParserError::Csv {
                parser: Self::NAME,
                source: err,
            })
    }
}

impl SensorFileParser for RbChannelTableParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(&self, content: &[u8]) -> Result<ParsedSensorFile, ParserError> {
        let text = decode_text(content, Self::NAME)?;
        let (mut reader, headers) = Self::open(&text)?;

        let date_col = find_column(&headers, Self::DATE_COLUMNS).ok_or(
            ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: "missing date column".to_string(),
            },
        )?;
        let time_col = find_column(&headers, Self::TIME_COLUMNS);

        let channels: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| Self::CHANNEL_COLUMNS.contains(&compact_lower(header).as_str()))
            .map(|(idx, header)| (idx, header.trim().to_string()))
            .collect();
        if channels.is_empty() {
            return Err(ParserError::FormatMismatch {
                parser: Self::NAME,
                reason: format!(
                    "no voltage channel columns among {:?}",
                    headers.iter().collect::<Vec<_>>()
                ),
            });
        }

        let mut rows = Vec::new();
        let mut skipped_rows = 0;

        for record in reader.records() {
            let Ok(record) = record else {
                skipped_rows += 1;
                continue;
            };

            let date = field_at(&record, Some(date_col));
            let time = field_at(&record, time_col);
            let timestamp_text = match (date.is_empty(), time.is_empty()) {
                (true, _) => None,
                (false, true) => Some(date.clone()),
                (false, false) => Some(format!("{date} {time}")),
            };

            for (idx, variable) in &channels {
                rows.push(ParsedRow {
                    timestamp_text: timestamp_text.clone(),
                    variable: variable.clone(),
                    value_text: field_at(&record, Some(*idx)),
                    raw_fields: vec![
                        ("Date_raw".to_string(), date.clone()),
                        ("LOC_time_raw".to_string(), time.clone()),
                    ],
                });
            }
        }

        if rows.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        Ok(ParsedSensorFile {
            format: SensorFileFormat::RbChannelTable,
            rows,
            skipped_rows,
        })
    }
}
