use csv::StringRecord;

use crate::errors::ParserError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decodes raw export bytes. JPV exports are UTF-16 (with or without BOM); everything else is
/// UTF-8. Undecodable UTF-8 sequences are replaced rather than rejected.
pub(crate) fn decode_text(content: &[u8], parser: &'static str) -> Result<String, ParserError> {
    let text = match content {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes, parser)?,
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes, parser)?,
        _ if content.starts_with(UTF8_BOM) => {
            String::from_utf8_lossy(&content[UTF8_BOM.len()..]).into_owned()
        }
        _ if looks_like_utf16le(content) => decode_utf16(content, u16::from_le_bytes, parser)?,
        _ => String::from_utf8_lossy(content).into_owned(),
    };
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn decode_utf16(
    bytes: &[u8],
    to_unit: fn([u8; 2]) -> u16,
    parser: &'static str,
) -> Result<String, ParserError> {
    if bytes.len() % 2 != 0 {
        return Err(ParserError::Encoding {
            parser,
            message: format!("odd byte length {} for UTF-16 content", bytes.len()),
        });
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|err| ParserError::Encoding {
        parser,
        message: err.to_string(),
    })
}

// ASCII text encoded as UTF-16LE without a BOM has a zero in every odd byte.
fn looks_like_utf16le(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(64)];
    sample.len() >= 4
        && sample.len() % 2 == 0
        && sample.iter().skip(1).step_by(2).all(|byte| *byte == 0)
}

/// Lowercases and removes separators so `LOC_time`, `Loc Time` and `loctime` compare equal.
pub(crate) fn compact_lower(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '_' | '-' | ' ' | '.' | '(' | ')' | '\t'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub(crate) fn find_column(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let compact = compact_lower(header);
        candidates.iter().any(|candidate| compact == *candidate)
    })
}

pub(crate) fn field_at(record: &StringRecord, index: Option<usize>) -> String {
    index
        .and_then(|idx| record.get(idx))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Extracts the number following `SENSOR` in a file or folder name, e.g. `JPV_SENSOR30_x.txt`
/// gives `30`. The raw label is returned; mapping it to a dryer number is plant-specific.
pub fn sensor_label_from_name(name: &str) -> Option<u32> {
    let upper = name.to_ascii_uppercase();
    let mut search_from = 0;
    while let Some(found) = upper[search_from..].find("SENSOR") {
        let after = search_from + found + "SENSOR".len();
        let digits: String = upper[after..]
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(number) = digits.parse::<u32>() {
            return Some(number);
        }
        search_from = after;
    }
    None
}
