//! Korean license plate grammar
//!
//! Accepted shapes: `12가3456`, `123가4567`, and regional plates such as
//! `서울12가3456`. The three capture groups (prefix, Hangul class character,
//! 4-digit serial) partition confirmed evidence storage; the serial is the
//! suffix the vendor location service is queried with.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

static PLATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{2,3}|[가-힣]{2}[0-9]{1,2})([가-힣])([0-9]{4})$").expect("plate pattern is valid")
});

/// Returns true if `text` matches the plate grammar
pub fn is_valid_plate(text: &str) -> bool {
    PLATE_PATTERN.is_match(text)
}

/// A plate string that passed the grammar check
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plate(String);

/// The three storage segments of a plate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateSegments<'a> {
    pub prefix: &'a str,
    pub class: &'a str,
    pub serial: &'a str,
}

impl Plate {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if is_valid_plate(text) {
            Ok(Self(text.to_string()))
        } else {
            Err(Error::InvalidInput(format!("plate text does not match grammar: {text:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four digits, used as the vendor lookup key
    pub fn suffix(&self) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(i, _)| i);
        &self.0[start..]
    }

    pub fn segments(&self) -> PlateSegments<'_> {
        match PLATE_PATTERN.captures(&self.0) {
            Some(caps) => PlateSegments {
                prefix: caps.get(1).map_or("", |m| m.as_str()),
                class: caps.get(2).map_or("", |m| m.as_str()),
                serial: caps.get(3).map_or("", |m| m.as_str()),
            },
            // unreachable for a parsed Plate
            None => PlateSegments {
                prefix: "",
                class: "",
                serial: self.suffix(),
            },
        }
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Plate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Plate::parse(&value)
    }
}

impl From<Plate> for String {
    fn from(plate: Plate) -> Self {
        plate.0
    }
}

impl AsRef<str> for Plate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
