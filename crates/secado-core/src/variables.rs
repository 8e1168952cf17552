use std::collections::HashSet;

use crate::config::ChannelAliasConfig;

/// Output channel a raw variable feeds, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelClass {
    VoltHum,
    VoltTem,
    /// Known channel that is intentionally not pivoted.
    Drop,
    Unknown,
}

impl ChannelClass {
    pub fn column_name(&self) -> Option<&'static str> {
        match self {
            ChannelClass::VoltHum => Some("VOLT_HUM"),
            ChannelClass::VoltTem => Some("VOLT_TEM"),
            ChannelClass::Drop | ChannelClass::Unknown => None,
        }
    }
}

/// Uppercases a channel name and strips whitespace, `_`, `.` and `-`, so `Volt_Hume`,
/// `VOLT HUME` and `volt-hume` all become `VOLTHUME`.
pub fn canonical_variable(name: &str) -> String {
    name.chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '_' | '.' | '-'))
        .flat_map(char::to_uppercase)
        .collect()
}

/// Lookup table from canonical channel names to output channels. Built once per run from
/// [`ChannelAliasConfig`].
#[derive(Debug, Clone)]
pub struct ChannelAliases {
    humidity: HashSet<String>,
    temperature: HashSet<String>,
    drop: HashSet<String>,
}

impl ChannelAliases {
    pub fn from_config(config: &ChannelAliasConfig) -> Self {
        let canonical_set =
            |items: &[String]| items.iter().map(|item| canonical_variable(item)).collect();
        Self {
            humidity: canonical_set(&config.humidity),
            temperature: canonical_set(&config.temperature),
            drop: canonical_set(&config.drop),
        }
    }

    pub fn classify(&self, variable: &str) -> ChannelClass {
        let canonical = canonical_variable(variable);
        if self.humidity.contains(&canonical) {
            ChannelClass::VoltHum
        } else if self.temperature.contains(&canonical) {
            ChannelClass::VoltTem
        } else if self.drop.contains(&canonical) {
            ChannelClass::Drop
        } else {
            ChannelClass::Unknown
        }
    }
}

impl Default for ChannelAliases {
    fn default() -> Self {
        Self::from_config(&ChannelAliasConfig::default())
    }
}

/// Parses a numeric cell that may use a decimal comma (`45,2`). Thousands separators are not
/// interpreted; `1,234,5` is rejected.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if is_comma_decimal(trimmed) {
        trimmed.replacen(',', ".", 1)
    } else {
        trimmed.to_string()
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn is_comma_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    match unsigned.split_once(',') {
        Some((whole, fraction)) => {
            !whole.is_empty()
                && !fraction.is_empty()
                && whole.chars().all(|ch| ch.is_ascii_digit())
                && fraction.chars().all(|ch| ch.is_ascii_digit())
        }
        None => false,
    }
}
