//! Weight frame decoding.
//!
//! Most scales emit an ASCII line per reading, for example:
//! ```text
//! ST,GS,+  2.350kg
//! W=1200g
//! ```
//! Decoding never fails: a frame without a number is reported with
//! `weight_kg == None` so the caller can skip it.

use std::sync::LazyLock;

use regex::Regex;

/// Grams per kilogram.
const GRAMS_PER_KG: f64 = 1000.0;

/// First signed decimal token in a frame, e.g. `+2.350`, `-0.5`, `1200`.
static WEIGHT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:\.\d+)?").expect("weight pattern is valid"));

/// Unit inferred from the frame text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightUnit {
    /// The frame contains `kg`.
    Kilograms,
    /// The frame ends with `g` or contains ` g`.
    Grams,
    /// No unit marker; the value is taken as kilograms.
    Unspecified,
}

impl WeightUnit {
    /// Infers the unit from frame text (case-insensitive).
    ///
    /// This is a heuristic: `mg`, `lb` and similar suffixes are not
    /// recognised, and anything ending in `g` counts as grams.
    #[must_use]
    pub fn infer(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("kg") {
            Self::Kilograms
        } else if lower.contains(" g") || lower.ends_with('g') {
            Self::Grams
        } else {
            Self::Unspecified
        }
    }

    /// Converts a value in this unit to kilograms.
    #[must_use]
    pub fn to_kg(self, value: f64) -> f64 {
        match self {
            Self::Grams => value / GRAMS_PER_KG,
            Self::Kilograms | Self::Unspecified => value,
        }
    }
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    /// Printable rendering of the frame, trimmed.
    pub text: String,
    /// Weight in kilograms, if a number was found.
    pub weight_kg: Option<f64>,
    /// Unit the number was interpreted in.
    pub unit: WeightUnit,
}

impl DecodedReading {
    /// Returns true if the frame carried no usable number.
    #[must_use]
    pub const fn is_noise(&self) -> bool {
        self.weight_kg.is_none()
    }
}

/// Renders frame bytes as text.
///
/// Every byte maps to the Latin-1 character with the same code. Control
/// characters (C0, DEL and C1) are dropped, except ASCII whitespace.
#[must_use]
pub fn frame_text(frame: &[u8]) -> String {
    let text: String = frame
        .iter()
        .map(|&b| char::from(b))
        .filter(|c| !c.is_control() || c.is_ascii_whitespace())
        .collect();
    text.trim().to_owned()
}

/// Extracts a weight in kilograms from frame text.
#[must_use]
pub fn parse_weight(text: &str) -> (Option<f64>, WeightUnit) {
    let unit = WeightUnit::infer(text);
    let value = WEIGHT_TOKEN
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| unit.to_kg(v));
    (value, unit)
}

/// Decodes one raw frame.
#[must_use]
pub fn decode(frame: &[u8]) -> DecodedReading {
    let text = frame_text(frame);
    let (weight_kg, unit) = parse_weight(&text);
    DecodedReading {
        text,
        weight_kg,
        unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_decode_kilograms() {
        let reading = decode(b"ST,GS,+  2.350kg");
        assert_eq!(reading.text, "ST,GS,+  2.350kg");
        assert!(approx(reading.weight_kg, 2.35));
        assert_eq!(reading.unit, WeightUnit::Kilograms);
    }

    #[test]
    fn test_decode_grams() {
        let reading = decode(b"W=1200g");
        assert!(approx(reading.weight_kg, 1.2));
        assert_eq!(reading.unit, WeightUnit::Grams);

        let reading = decode(b"NET 450 G");
        assert!(approx(reading.weight_kg, 0.45));
    }

    #[test]
    fn test_decode_no_unit_assumes_kg() {
        let reading = decode(b"W=1.200");
        assert!(approx(reading.weight_kg, 1.2));
        assert_eq!(reading.unit, WeightUnit::Unspecified);
    }

    #[test]
    fn test_decode_noise() {
        let reading = decode(b"no numbers here");
        assert_eq!(reading.text, "no numbers here");
        assert!(reading.is_noise());
    }

    #[test]
    fn test_decode_strips_zero_and_control_bytes() {
        let reading = decode(b"\x00\x02 -0.015kg\r\n\x00\x00");
        assert_eq!(reading.text, "-0.015kg");
        assert!(approx(reading.weight_kg, -0.015));
    }

    #[test]
    fn test_decode_empty() {
        let reading = decode(&[]);
        assert!(reading.text.is_empty());
        assert!(reading.is_noise());

        let reading = decode(&[0, 0, 0]);
        assert!(reading.text.is_empty());
        assert!(reading.is_noise());
    }

    #[test]
    fn test_first_token_wins() {
        let reading = decode(b"12.5kg tare 0.3");
        assert!(approx(reading.weight_kg, 12.5));
    }

    #[test]
    fn test_high_bytes_map_to_latin1() {
        assert_eq!(frame_text(&[b'5', 0xB0]), "5\u{b0}");
    }

    #[test]
    fn test_c1_and_del_bytes_are_dropped() {
        assert_eq!(frame_text(b"1.5\x85\x9b\x7fkg"), "1.5kg");
        assert_eq!(decode(b"\x80 2.000kg \x9f").text, "2.000kg");
    }
}
