//! Vehicle Identification Number: normalization and structural validation.
//!
//! Validation is structural only (length and character set). Check-digit
//! verification is not performed because many fleet exports carry VINs
//! from non-North-American markets where position 9 is not a check digit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Required VIN length.
pub const VIN_LENGTH: usize = 17;

/// Structural VIN validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VinError {
    #[error("VIN is required")]
    Empty,

    #[error("VIN has {found} characters, need exactly {VIN_LENGTH}")]
    WrongLength { found: usize },

    #[error("VIN contains invalid characters: {chars} (VINs cannot contain I, O or Q)")]
    InvalidCharacters { chars: String },
}

/// A structurally valid, normalized VIN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vin(String);

impl Vin {
    /// Normalize and validate a raw VIN.
    pub fn parse(raw: &str) -> Result<Self, VinError> {
        let normalized = normalize(raw);
        validate(&normalized)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Vin {
    type Err = VinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Vin {
    type Error = VinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Vin> for String {
    fn from(vin: Vin) -> Self {
        vin.0
    }
}

impl AsRef<str> for Vin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Uppercase and strip separators (whitespace, `-`).
///
/// Other characters are kept so that validation can report them.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q'))
}

/// Validate an already-normalized VIN.
pub fn validate(normalized: &str) -> Result<(), VinError> {
    if normalized.is_empty() {
        return Err(VinError::Empty);
    }

    let found = normalized.chars().count();
    if found != VIN_LENGTH {
        return Err(VinError::WrongLength { found });
    }

    let mut bad: Vec<char> = normalized.chars().filter(|c| !is_allowed(*c)).collect();
    if !bad.is_empty() {
        bad.sort_unstable();
        bad.dedup();
        let chars = bad
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(VinError::InvalidCharacters { chars });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_vin() {
        let vin = Vin::parse("1FTFW1ET1EFA00001").unwrap();
        assert_eq!(vin.as_str(), "1FTFW1ET1EFA00001");
    }

    #[test]
    fn normalizes_case_and_separators() {
        let vin = Vin::parse(" 1ftfw1et1-efa00001 ").unwrap();
        assert_eq!(vin.as_str(), "1FTFW1ET1EFA00001");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Vin::parse("   "), Err(VinError::Empty));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(Vin::parse("BADVIN"), Err(VinError::WrongLength { found: 6 }));
        assert_eq!(
            Vin::parse("1FTFW1ET1EFA000012"),
            Err(VinError::WrongLength { found: 18 })
        );
    }

    #[test]
    fn rejects_i_o_q() {
        match Vin::parse("1FTFW1ET1EFA0000Q") {
            Err(VinError::InvalidCharacters { chars }) => assert_eq!(chars, "Q"),
            other => panic!("expected InvalidCharacters, got {other:?}"),
        }
        assert!(Vin::parse("IOQFW1ET1EFA00001").is_err());
    }

    #[test]
    fn rejects_punctuation() {
        assert!(matches!(
            Vin::parse("1FTFW1ET1EFA0000*"),
            Err(VinError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn serde_roundtrip_validates() {
        let json = serde_json::to_string(&Vin::parse("1FTFW1ET1EFA00001").unwrap()).unwrap();
        assert_eq!(json, "\"1FTFW1ET1EFA00001\"");
        assert!(serde_json::from_str::<Vin>("\"BADVIN\"").is_err());
    }
}
