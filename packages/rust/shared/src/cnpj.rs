//! CNPJ registry identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProspectorError;

/// Number of digits in a CNPJ.
pub const CNPJ_LEN: usize = 14;

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// A validated, digits-only CNPJ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cnpj(String);

impl Cnpj {
    /// Parse a CNPJ written with or without punctuation.
    ///
    /// Accepts digits plus the separators `.`, `/`, `-` and spaces. Returns
    /// `None` for anything that is not exactly 14 digits with valid check
    /// digits, and for repeated-digit placeholders like `00000000000000`.
    pub fn parse(input: &str) -> Option<Self> {
        let mut digits = String::with_capacity(CNPJ_LEN);
        for c in input.trim().chars() {
            match c {
                '0'..='9' => digits.push(c),
                '.' | '/' | '-' | ' ' => {}
                _ => return None,
            }
        }
        Self::from_digits(digits)
    }

    /// Build a CNPJ from its 12-digit base (root + branch), computing the
    /// two check digits.
    pub fn from_base(base: &str) -> Option<Self> {
        if base.len() != 12 || !base.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let first = check_digit(base, &FIRST_WEIGHTS);
        let with_first = format!("{base}{first}");
        let second = check_digit(&with_first, &SECOND_WEIGHTS);
        Self::from_digits(format!("{with_first}{second}"))
    }

    fn from_digits(digits: String) -> Option<Self> {
        if digits.len() != CNPJ_LEN {
            return None;
        }
        let bytes = digits.as_bytes();
        if bytes.iter().all(|b| *b == bytes[0]) {
            return None;
        }
        let first = check_digit(&digits[..12], &FIRST_WEIGHTS);
        let second = check_digit(&digits[..13], &SECOND_WEIGHTS);
        if bytes[12] - b'0' != first || bytes[13] - b'0' != second {
            return None;
        }
        Some(Self(digits))
    }

    /// The 14 digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Conventional punctuated form, `12.345.678/0001-95`.
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..]
        )
    }
}

fn check_digit(digits: &str, weights: &[u32]) -> u8 {
    let sum: u32 = digits
        .bytes()
        .zip(weights)
        .map(|(b, w)| u32::from(b - b'0') * w)
        .sum();
    match sum % 11 {
        0 | 1 => 0,
        r => (11 - r) as u8,
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cnpj {
    type Err = ProspectorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ProspectorError::validation(format!("invalid CNPJ: {s}")))
    }
}

impl TryFrom<String> for Cnpj {
    type Error = ProspectorError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cnpj> for String {
    fn from(value: Cnpj) -> Self {
        value.0
    }
}
