use std::{fmt, str::FromStr};

use thiserror::Error;

/// Bearer token for the device cloud. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "AccessToken({visible}…)")
    }
}

/// Where a field's current value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Exposed as a cloud variable of its own.
    Variable(&'static str),
    /// Only reachable through the variable cursor.
    Cursor(&'static str),
}

/// Scalar settings of the clock that can be read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Power,
    Timezone,
    Brightness,
    ClockOrientation,
    Red,
    Green,
    Blue,
    NoiseSpeedX,
    NoiseSpeedY,
    NoiseSpeedZ,
    NoiseScale,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Power,
        Field::Timezone,
        Field::Brightness,
        Field::ClockOrientation,
        Field::Red,
        Field::Green,
        Field::Blue,
        Field::NoiseSpeedX,
        Field::NoiseSpeedY,
        Field::NoiseSpeedZ,
        Field::NoiseScale,
    ];

    /// Key used in the `<key>:<value>` argument of the set function.
    pub fn set_key(self) -> &'static str {
        match self {
            Field::Power => "pwr",
            Field::Timezone => "tz",
            Field::Brightness => "brt",
            Field::ClockOrientation => "flpclk",
            Field::Red => "r",
            Field::Green => "g",
            Field::Blue => "b",
            Field::NoiseSpeedX => "nsx",
            Field::NoiseSpeedY => "nsy",
            Field::NoiseSpeedZ => "nsz",
            Field::NoiseScale => "nsc",
        }
    }

    pub fn read_source(self) -> ReadSource {
        match self {
            Field::Power => ReadSource::Variable("power"),
            Field::Timezone => ReadSource::Variable("timezone"),
            Field::Brightness => ReadSource::Variable("brightness"),
            Field::ClockOrientation => ReadSource::Variable("flipClock"),
            other => ReadSource::Cursor(other.set_key()),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Power => "power",
            Field::Timezone => "time zone",
            Field::Brightness => "brightness",
            Field::ClockOrientation => "clock orientation",
            Field::Red => "red",
            Field::Green => "green",
            Field::Blue => "blue",
            Field::NoiseSpeedX => "noise speed x",
            Field::NoiseSpeedY => "noise speed y",
            Field::NoiseSpeedZ => "noise speed z",
            Field::NoiseScale => "noise scale",
        }
    }

    pub(crate) fn loaded_status(self) -> String {
        format!("Loaded {}", self.label())
    }

    pub(crate) fn confirmed_status(self, value: i64) -> String {
        match self {
            Field::Power if value != 0 => "Turned on".to_string(),
            Field::Power => "Turned off".to_string(),
            other => {
                let mut text = other.label().to_string();
                if let Some(first) = text.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                format!("{text} set")
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown field {0:?}")]
pub struct ParseFieldError(pub String);

impl FromStr for Field {
    type Err = ParseFieldError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        let field = match normalized.as_str() {
            "power" | "pwr" => Field::Power,
            "timezone" | "time-zone" | "tz" => Field::Timezone,
            "brightness" | "brt" => Field::Brightness,
            "clock-orientation" | "flip-clock" | "flipclock" | "flpclk" => Field::ClockOrientation,
            "red" | "r" => Field::Red,
            "green" | "g" => Field::Green,
            "blue" | "b" => Field::Blue,
            "noise-speed-x" | "nsx" => Field::NoiseSpeedX,
            "noise-speed-y" | "nsy" => Field::NoiseSpeedY,
            "noise-speed-z" | "nsz" => Field::NoiseSpeedZ,
            "noise-scale" | "nsc" => Field::NoiseScale,
            _ => return Err(ParseFieldError(input.to_string())),
        };
        Ok(field)
    }
}

pub(crate) fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
