use crate::errors::ParserError;
use crate::model::{ParsedRow, ParsedSensorFile, SensorFileFormat};
use crate::registry::SensorFileParser;

use super::{decode_text, field_at, find_column};

/// Variable-log exports: one row per (variable, timestamp) with the variable name in `VarName`.
pub struct JpvVariableLogParser;

impl Default for JpvVariableLogParser {
    fn default() -> Self {
        Self
    }
}

impl JpvVariableLogParser {
    const NAME: &'static str = "JPV_VARIABLE_LOG";
    const SYSTEM_VARIABLE_PREFIX: &'static str = "$RT_";

    /// `12_VOLT_HUME` is exported as `VOLT_HUME`; the numeric prefix is a tag slot.
    fn strip_slot_prefix(name: &str) -> &str {
        let digits = name.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 && name[digits..].starts_with('_') {
            &name[digits + 1..]
        } else {
            name
        }
    }
}

impl SensorFileParser for JpvVariableLogParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(&self, content: &[u8]) -> Result<ParsedSensorFile, ParserError> {
        let text = decode_text(content, Self::NAME)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|err| ParserError::Csv {
                parser: Self::NAME,
                source: err,
            })?
            .clone();

        let var_name = find_column(&headers, &["varname"]).ok_or(ParserError::FormatMismatch {
            parser: Self::NAME,
            reason: "missing VarName column".to_string(),
        })?;
        let var_value = find_column(&headers, &["varvalue"]).ok_or(ParserError::FormatMismatch {
            parser: Self::NAME,
            reason: "missing VarValue column".to_string(),
        })?;
        let time_string = find_column(&headers, &["timestring"]);
        let validity = find_column(&headers, &["validity"]);
        let time_ms = find_column(&headers, &["timems"]);

        let mut rows = Vec::new();
        let mut skipped_rows = 0;

        for record in reader.records() {
            let Ok(record) = record else {
                skipped_rows += 1;
                continue;
            };

            let original = field_at(&record, Some(var_name));
            if original.is_empty() {
                skipped_rows += 1;
                continue;
            }
            if original.starts_with(Self::SYSTEM_VARIABLE_PREFIX) {
                continue;
            }

            let timestamp = field_at(&record, time_string);
            let value = field_at(&record, Some(var_value));

            let mut raw_fields = vec![
                ("VarName_original".to_string(), original.clone()),
                ("TimeString".to_string(), timestamp.clone()),
                ("VarValue".to_string(), value.clone()),
            ];
            if validity.is_some() {
                raw_fields.push(("Validity".to_string(), field_at(&record, validity)));
            }
            if time_ms.is_some() {
                raw_fields.push(("Time_ms".to_string(), field_at(&record, time_ms)));
            }

            rows.push(ParsedRow {
                timestamp_text: (!timestamp.is_empty()).then_some(timestamp),
                variable: Self::strip_slot_prefix(&original).to_string(),
                value_text: value,
                raw_fields,
            });
        }

        if rows.is_empty() {
            return Err(ParserError::EmptyData { parser: Self::NAME });
        }

        Ok(ParsedSensorFile {
            format: SensorFileFormat::JpvVariableLog,
            rows,
            skipped_rows,
        })
    }
}
