//! Infrastructure device hardware addresses

use macaddr::MacAddr6;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hardware address identifying a managed device.
///
/// Accepts dash, colon and dotted notations on input. Always renders as
/// lowercase dash-separated octets (`11-22-33-44-55-66`), which is the form
/// used for store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfraMac(MacAddr6);

impl InfraMac {
    pub fn new(addr: MacAddr6) -> Self {
        Self(addr)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0.into_array()
    }
}

impl fmt::Display for InfraMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for InfraMac {
    type Err = macaddr::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddr6::from_str(s.trim()).map(Self)
    }
}

impl From<MacAddr6> for InfraMac {
    fn from(addr: MacAddr6) -> Self {
        Self(addr)
    }
}

impl Serialize for InfraMac {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InfraMac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        InfraMac::from_str(&s).map_err(serde::de::Error::custom)
    }
}
