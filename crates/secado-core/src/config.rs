use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::curves::DRYER_COUNT;
use crate::types::Plant;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("volt_scale for {plant} must be a positive finite number, got {value}")]
    InvalidScale { plant: Plant, value: f64 },
}

/// How a plant labels its sensors relative to the dryer they sit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorNumbering {
    /// Labels are dryer number times ten (`10`, `20`, ... `60`). Lab sheets sometimes write
    /// the dryer number itself, so `1`..`6` are accepted too; anything else names no dryer.
    Tens,
    /// Labels are the dryer number.
    Direct,
    /// Multiples of ten from `10` upward are divided by ten, anything else is used as-is.
    Inferred,
}

impl SensorNumbering {
    /// Dryer a sensor label refers to, or `None` when the label cannot name one.
    pub fn dryer_number(self, label: u32) -> Option<u32> {
        let dryers = 1..=DRYER_COUNT as u32;
        match self {
            SensorNumbering::Direct => Some(label),
            SensorNumbering::Tens => {
                if label % 10 == 0 && dryers.contains(&(label / 10)) {
                    Some(label / 10)
                } else if dryers.contains(&label) {
                    Some(label)
                } else {
                    None
                }
            }
            SensorNumbering::Inferred => {
                if label >= 10 && label % 10 == 0 {
                    Some(label / 10)
                } else {
                    Some(label)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantSettings {
    /// Multiplier applied to raw voltages before pivoting.
    pub volt_scale: f64,
    pub sensor_numbering: SensorNumbering,
}

/// A `[plants.<plant>]` section as written. Omitted keys keep that plant's own defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlantOverrides {
    volt_scale: Option<f64>,
    sensor_numbering: Option<SensorNumbering>,
}

impl PlantOverrides {
    fn apply(self, base: PlantSettings) -> PlantSettings {
        PlantSettings {
            volt_scale: self.volt_scale.unwrap_or(base.volt_scale),
            sensor_numbering: self.sensor_numbering.unwrap_or(base.sensor_numbering),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlantTableOverrides {
    jpv: Option<PlantOverrides>,
    rb: Option<PlantOverrides>,
}

impl From<PlantTableOverrides> for PlantTable {
    fn from(overrides: PlantTableOverrides) -> Self {
        let defaults = PlantTable::default();
        Self {
            jpv: overrides.jpv.unwrap_or_default().apply(defaults.jpv),
            rb: overrides.rb.unwrap_or_default().apply(defaults.rb),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PlantTableOverrides")]
pub struct PlantTable {
    pub jpv: PlantSettings,
    pub rb: PlantSettings,
}

impl Default for PlantTable {
    fn default() -> Self {
        Self {
            jpv: PlantSettings {
                volt_scale: 1.0,
                sensor_numbering: SensorNumbering::Tens,
            },
            rb: PlantSettings {
                volt_scale: 0.01,
                sensor_numbering: SensorNumbering::Direct,
            },
        }
    }
}

/// Channel-name aliases, written in canonical form (uppercase, no separators).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelAliasConfig {
    pub humidity: Vec<String>,
    pub temperature: Vec<String>,
    /// Channels recognized but never pivoted (already-calibrated values, offsets, labels).
    pub drop: Vec<String>,
}

impl Default for ChannelAliasConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|item| item.to_string()).collect();
        Self {
            humidity: owned(&["VOLTHUM", "VOLTHUME", "VHUM"]),
            temperature: owned(&["VOLTTEM", "VOLTTEMP", "VTEM", "VTEMP"]),
            drop: owned(&["HUMEDAD", "TEMPERATURA", "OFFSET", "VARIEDAD"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VarietyConfig {
    /// Each group lists spellings that refer to the same humidity sheet.
    pub alias_groups: Vec<Vec<String>>,
    /// Sheets tried in order when a lab variety has no sheet of its own.
    pub defaults: Vec<String>,
}

impl Default for VarietyConfig {
    fn default() -> Self {
        let group = |items: &[&str]| items.iter().map(|item| item.to_string()).collect();
        Self {
            alias_groups: vec![
                group(&["merin", "l5903"]),
                group(&["slio9193", "sli9193", "9193"]),
                group(&["inov", "innov", "inovacion"]),
            ],
            defaults: group(&["guri", "el paso", "merin"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA zone the plants' local clocks follow.
    pub timezone: String,
    /// Whether ambiguous slash dates such as `03/04/2024` read as day first.
    pub day_first: bool,
    pub plants: PlantTable,
    pub channels: ChannelAliasConfig,
    pub varieties: VarietyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Montevideo".to_string(),
            day_first: true,
            plants: PlantTable::default(),
            channels: ChannelAliasConfig::default(),
            varieties: VarietyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn plant(&self, plant: Plant) -> &PlantSettings {
        match plant {
            Plant::Jpv => &self.plants.jpv,
            Plant::Rb => &self.plants.rb,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;
        for plant in Plant::ALL {
            let value = self.plant(plant).volt_scale;
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidScale { plant, value });
            }
        }
        Ok(())
    }
}
