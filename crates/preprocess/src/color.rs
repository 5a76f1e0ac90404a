//! Hex literal decoding shared by the preprocessor's color sub-state and by
//! live external-value updates.
//!
//! Digits are consumed in pairs; each pair becomes one channel normalised to
//! `[0, 1]`. Six digits describe an opaque RGB color, eight digits carry an
//! explicit alpha pair.
use std::fmt;

/// Longest hex run a color literal may carry (`RRGGBBAA`).
pub const MAX_HEX_DIGITS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiteralError {
    #[error("invalid hex digit '{0}' in color literal")]
    InvalidDigit(char),
    #[error("color literal must have 6 or 8 hex digits, found {0}")]
    Length(usize),
}

/// Normalised RGBA color decoded from a hex literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub rgba: [f32; 4],
}

impl Color {
    /// Decodes `RRGGBB` or `RRGGBBAA`, with or without a leading `#`.
    pub fn from_hex(input: &str) -> Result<Self, LiteralError> {
        let digits = input.strip_prefix('#').unwrap_or(input);
        if digits.len() > MAX_HEX_DIGITS {
            return Err(LiteralError::Length(digits.len()));
        }
        let channels = decode_channels(digits)?;
        match channels.as_slice() {
            [r, g, b] => Ok(Self {
                rgba: [*r, *g, *b, 1.0],
            }),
            [r, g, b, a] => Ok(Self {
                rgba: [*r, *g, *b, *a],
            }),
            _ => Err(LiteralError::Length(digits.len())),
        }
    }

    /// Renders the color as a GLSL `vec4` constructor with six decimals.
    pub fn to_glsl(&self) -> String {
        let [r, g, b, a] = self.rgba;
        format!("vec4({r:.6}, {g:.6}, {b:.6}, {a:.6})")
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_glsl())
    }
}

/// Decodes a run of hex digit pairs into normalised channel values.
///
/// Digits are validated before the length so that `#GG0000` reports the bad
/// digit rather than a length problem.
pub fn decode_channels(digits: &str) -> Result<Vec<f32>, LiteralError> {
    let mut nibbles = Vec::with_capacity(digits.len());
    for ch in digits.chars() {
        let value = ch.to_digit(16).ok_or(LiteralError::InvalidDigit(ch))?;
        nibbles.push(value);
    }
    if nibbles.len() % 2 != 0 {
        return Err(LiteralError::Length(nibbles.len()));
    }
    Ok(nibbles
        .chunks_exact(2)
        .map(|pair| (pair[0] * 16 + pair[1]) as f32 / 255.0)
        .collect())
}

pub(crate) fn is_hex_digit(byte: u8) -> bool {
    byte.is_ascii_hexdigit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_digits_carry_alpha() {
        let color = Color::from_hex("#FF0000FF").unwrap();
        assert_eq!(
            color.to_glsl(),
            "vec4(1.000000, 0.000000, 0.000000, 1.000000)"
        );

        let translucent = Color::from_hex("00ff0080").unwrap();
        assert!((translucent.rgba[3] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(translucent.rgba[1], 1.0);
    }

    #[test]
    fn six_digits_are_opaque() {
        let color = Color::from_hex("3366b2").unwrap();
        assert_eq!(color.rgba[3], 1.0);
        assert!((color.rgba[0] - 0.2).abs() < 1e-6);
        assert!((color.rgba[1] - 0.4).abs() < 1e-6);
        assert_eq!(
            color.to_glsl(),
            "vec4(0.200000, 0.400000, 0.698039, 1.000000)"
        );
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(
            Color::from_hex("#AbCdEf").unwrap(),
            Color::from_hex("#abcdef").unwrap()
        );
    }

    #[test]
    fn rejects_bad_digits_and_lengths() {
        assert_eq!(
            Color::from_hex("#GG0000"),
            Err(LiteralError::InvalidDigit('G'))
        );
        assert_eq!(Color::from_hex("#FFF"), Err(LiteralError::Length(3)));
        assert_eq!(Color::from_hex("#FFFF"), Err(LiteralError::Length(4)));
        assert_eq!(
            Color::from_hex("#FF00FF00FF"),
            Err(LiteralError::Length(10))
        );
    }
}
