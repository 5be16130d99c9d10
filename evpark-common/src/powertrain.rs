//! Powertrain classification codes
//!
//! The known-vehicle table stores a one-byte type code; evidence filenames
//! carry only the coarse `ev` / `ice` tag produced by the camera pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Drivetrain type as stored in `car_info.powertrain_type_code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowertrainType {
    /// Battery electric
    Bev,
    /// Plug-in hybrid
    Phev,
    /// Hybrid
    Hev,
    /// Fuel cell
    Fcev,
    /// Extended-range electric
    Erev,
    /// Internal combustion
    Ice,
    Unknown,
}

impl PowertrainType {
    pub fn code(self) -> u8 {
        match self {
            PowertrainType::Bev => 0x00,
            PowertrainType::Phev => 0x01,
            PowertrainType::Hev => 0x02,
            PowertrainType::Fcev => 0x03,
            PowertrainType::Erev => 0x04,
            PowertrainType::Ice => 0x10,
            PowertrainType::Unknown => 0x99,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(PowertrainType::Bev),
            0x01 => Some(PowertrainType::Phev),
            0x02 => Some(PowertrainType::Hev),
            0x03 => Some(PowertrainType::Fcev),
            0x04 => Some(PowertrainType::Erev),
            0x10 => Some(PowertrainType::Ice),
            0x99 => Some(PowertrainType::Unknown),
            _ => None,
        }
    }

    /// True for every electrified drivetrain (counted as EV in summaries)
    pub fn is_electric(self) -> bool {
        matches!(
            self,
            PowertrainType::Bev
                | PowertrainType::Phev
                | PowertrainType::Hev
                | PowertrainType::Fcev
                | PowertrainType::Erev
        )
    }

    /// Coarse tag this type collapses to, if any
    pub fn tag(self) -> Option<PowertrainTag> {
        if self.is_electric() {
            Some(PowertrainTag::Ev)
        } else if self == PowertrainType::Ice {
            Some(PowertrainTag::Ice)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowertrainType::Bev => "BEV",
            PowertrainType::Phev => "PHEV",
            PowertrainType::Hev => "HEV",
            PowertrainType::Fcev => "FCEV",
            PowertrainType::Erev => "EREV",
            PowertrainType::Ice => "ICE",
            PowertrainType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PowertrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse EV / combustion tag embedded in evidence filenames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowertrainTag {
    Ev,
    Ice,
}

impl PowertrainTag {
    pub fn from_is_ev(is_ev: bool) -> Self {
        if is_ev {
            PowertrainTag::Ev
        } else {
            PowertrainTag::Ice
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowertrainTag::Ev => "ev",
            PowertrainTag::Ice => "ice",
        }
    }

    /// Type registered for a first-ever sighting carrying this tag
    pub fn powertrain_type(self) -> PowertrainType {
        match self {
            PowertrainTag::Ev => PowertrainType::Bev,
            PowertrainTag::Ice => PowertrainType::Ice,
        }
    }

    /// Top-level folder name in confirmed storage
    pub fn folder(self) -> &'static str {
        match self {
            PowertrainTag::Ev => "EV",
            PowertrainTag::Ice => "ICE",
        }
    }
}

impl fmt::Display for PowertrainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowertrainTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ev" => Ok(PowertrainTag::Ev),
            "ice" => Ok(PowertrainTag::Ice),
            other => Err(Error::InvalidInput(format!("unknown powertrain tag: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip_for_all_types() {
        for ty in [
            PowertrainType::Bev,
            PowertrainType::Phev,
            PowertrainType::Hev,
            PowertrainType::Fcev,
            PowertrainType::Erev,
            PowertrainType::Ice,
            PowertrainType::Unknown,
        ] {
            assert_eq!(PowertrainType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(PowertrainType::from_code(0x42), None);
    }

    #[test]
    fn test_electric_family() {
        assert!(PowertrainType::Phev.is_electric());
        assert!(!PowertrainType::Ice.is_electric());
        assert!(!PowertrainType::Unknown.is_electric());
        assert_eq!(PowertrainType::Unknown.tag(), None);
        assert_eq!(PowertrainType::Hev.tag(), Some(PowertrainTag::Ev));
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!("ev".parse::<PowertrainTag>().unwrap(), PowertrainTag::Ev);
        assert_eq!("ice".parse::<PowertrainTag>().unwrap(), PowertrainTag::Ice);
        assert!("EV".parse::<PowertrainTag>().is_err());
        assert_eq!(PowertrainTag::Ev.powertrain_type(), PowertrainType::Bev);
        assert_eq!(PowertrainTag::Ice.folder(), "ICE");
    }
}
