use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("size key {0:?} is not of the form WIDTHxHEIGHT")]
    Malformed(String),
    #[error("size key {0:?} has an invalid width")]
    InvalidWidth(String),
    #[error("size key {0:?} has an invalid height")]
    InvalidHeight(String),
}

/// A requested output dimension. Both sides are at least 1.
///
/// The canonical text form is `WIDTHxHEIGHT`, which is also how a size is
/// serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Returns `None` when either side is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }

        Some(Self { width, height })
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn from_key(key: &str) -> Result<Self, SizeError> {
        key.parse()
    }
}

// only plain ascii digits, so "+5" and "-5" are rejected like "Z"
fn parse_side(side: &str) -> Option<u32> {
    if side.is_empty() || !side.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    side.parse::<u32>().ok().filter(|n| *n > 0)
}

impl FromStr for Size {
    type Err = SizeError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let (width, height) = key
            .split_once('x')
            .ok_or_else(|| SizeError::Malformed(key.to_string()))?;

        let width = parse_side(width).ok_or_else(|| SizeError::InvalidWidth(key.to_string()))?;
        let height = parse_side(height).ok_or_else(|| SizeError::InvalidHeight(key.to_string()))?;

        Ok(Self { width, height })
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<Size> for String {
    fn from(size: Size) -> Self {
        size.to_string()
    }
}

impl TryFrom<String> for Size {
    type Error = SizeError;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        key.parse()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_size_from_key() {
        let size = Size::from_key("15x15").unwrap();

        assert_eq!(size.width, 15);
        assert_eq!(size.height, 15);
    }

    #[test]
    fn test_size_from_bad_key() {
        let bad_keys = ["Zx15", "-12x-12", "-12x12", "asdf", "x", "nxnull", "", "0x10", "10x0", "+5x5", "5x5x5"];

        for key in bad_keys {
            let result = Size::from_key(key);
            assert!(result.is_err(), "expected an error parsing {key:?}, got {result:?}");
        }
    }

    #[test]
    fn test_key() {
        let size = Size {
            width: 15,
            height: 15,
        };

        assert_eq!(size.key(), "15x15");
    }

    #[test]
    fn test_key_round_trip() {
        for (width, height) in [(1, 1), (100, 50), (4096, 1), (u32::MAX, 7)] {
            let size = Size::new(width, height).unwrap();
            assert_eq!(Size::from_key(&size.key()), Ok(size));
        }
    }

    #[test]
    fn test_new_rejects_zero() {
        assert_eq!(Size::new(0, 10), None);
        assert_eq!(Size::new(10, 0), None);
    }

    #[test]
    fn test_serialize_as_key() {
        let size = Size::new(100, 50).unwrap();

        assert_eq!(serde_json::to_string(&size).unwrap(), r#""100x50""#);
        assert_eq!(serde_json::from_str::<Size>(r#""100x50""#).unwrap(), size);
        assert!(serde_json::from_str::<Size>(r#""100xfifty""#).is_err());
    }
}
