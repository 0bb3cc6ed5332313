use thiserror::Error;

use crate::domain::Rgb;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid colour {input:?}: expected #rrggbb")]
pub struct ColorParseError {
    pub input: String,
}

/// Parses `#rrggbb` (leading `#` optional, hex digits case-insensitive).
pub fn parse_hex(input: &str) -> Result<Rgb, ColorParseError> {
    let invalid = || ColorParseError {
        input: input.to_string(),
    };
    let digits = input.trim();
    let digits = digits.strip_prefix('#').unwrap_or(digits);
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .map(i32::from)
            .map_err(|_| invalid())
    };
    Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

pub fn to_hex(rgb: Rgb) -> String {
    let clamp = |value: i32| value.clamp(0, 255);
    format!(
        "#{:02x}{:02x}{:02x}",
        clamp(rgb.r),
        clamp(rgb.g),
        clamp(rgb.b)
    )
}
