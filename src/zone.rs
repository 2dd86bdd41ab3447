//! Network topology: regions, zones and shards
//!
//! Every address belongs to exactly one zone, decided by its first byte:
//! the high nibble selects the region and the low nibble the zone within it.
//! Whether an address lives on the Qi (UTXO) or Quai (account) ledger is
//! decided by the top bit of its second byte.

use crate::address::Address;
use crate::error::WalletError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Cyprus,
    Paxos,
    Hydra,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Cyprus, Region::Paxos, Region::Hydra];

    pub fn index(&self) -> u8 {
        match self {
            Region::Cyprus => 0,
            Region::Paxos => 1,
            Region::Hydra => 2,
        }
    }

    pub fn from_index(index: u8) -> Result<Self, WalletError> {
        match index {
            0 => Ok(Region::Cyprus),
            1 => Ok(Region::Paxos),
            2 => Ok(Region::Hydra),
            other => Err(WalletError::InvalidZone(format!(
                "Unknown region index {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Region::Cyprus => "Cyprus",
            Region::Paxos => "Paxos",
            Region::Hydra => "Hydra",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Zone {
    Cyprus1,
    Cyprus2,
    Cyprus3,
    Paxos1,
    Paxos2,
    Paxos3,
    Hydra1,
    Hydra2,
    Hydra3,
}

impl Zone {
    pub const ALL: [Zone; 9] = [
        Zone::Cyprus1,
        Zone::Cyprus2,
        Zone::Cyprus3,
        Zone::Paxos1,
        Zone::Paxos2,
        Zone::Paxos3,
        Zone::Hydra1,
        Zone::Hydra2,
        Zone::Hydra3,
    ];

    /// Canonical first address byte for this zone.
    pub fn byte_prefix(&self) -> u8 {
        (self.region().index() << 4) | self.index_in_region()
    }

    pub fn from_byte(byte: u8) -> Result<Self, WalletError> {
        let region = Region::from_index(byte >> 4)
            .map_err(|_| WalletError::InvalidZone(format!("Unknown zone prefix 0x{:02x}", byte)))?;
        Zone::from_parts(region, byte & 0x0f)
            .map_err(|_| WalletError::InvalidZone(format!("Unknown zone prefix 0x{:02x}", byte)))
    }

    fn from_parts(region: Region, index: u8) -> Result<Self, WalletError> {
        let zone = match (region, index) {
            (Region::Cyprus, 0) => Zone::Cyprus1,
            (Region::Cyprus, 1) => Zone::Cyprus2,
            (Region::Cyprus, 2) => Zone::Cyprus3,
            (Region::Paxos, 0) => Zone::Paxos1,
            (Region::Paxos, 1) => Zone::Paxos2,
            (Region::Paxos, 2) => Zone::Paxos3,
            (Region::Hydra, 0) => Zone::Hydra1,
            (Region::Hydra, 1) => Zone::Hydra2,
            (Region::Hydra, 2) => Zone::Hydra3,
            (region, index) => {
                return Err(WalletError::InvalidZone(format!(
                    "Unknown zone {} in region {}",
                    index,
                    region.name()
                )))
            }
        };
        Ok(zone)
    }

    pub fn region(&self) -> Region {
        match self {
            Zone::Cyprus1 | Zone::Cyprus2 | Zone::Cyprus3 => Region::Cyprus,
            Zone::Paxos1 | Zone::Paxos2 | Zone::Paxos3 => Region::Paxos,
            Zone::Hydra1 | Zone::Hydra2 | Zone::Hydra3 => Region::Hydra,
        }
    }

    pub fn index_in_region(&self) -> u8 {
        match self {
            Zone::Cyprus1 | Zone::Paxos1 | Zone::Hydra1 => 0,
            Zone::Cyprus2 | Zone::Paxos2 | Zone::Hydra2 => 1,
            Zone::Cyprus3 | Zone::Paxos3 | Zone::Hydra3 => 2,
        }
    }

    /// Human readable name, e.g. "Cyprus One".
    pub fn name(&self) -> String {
        let ordinal = match self.index_in_region() {
            0 => "One",
            1 => "Two",
            _ => "Three",
        };
        format!("{} {}", self.region().name(), ordinal)
    }

    /// Lowercase nickname, e.g. "cyprus1".
    pub fn nickname(&self) -> String {
        format!(
            "{}{}",
            self.region().name().to_lowercase(),
            self.index_in_region() + 1
        )
    }

    /// Hex shard identifier, e.g. "0x00".
    pub fn as_hex(&self) -> String {
        format!("0x{:02x}", self.byte_prefix())
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nickname())
    }
}

impl FromStr for Zone {
    type Err = WalletError;

    /// Accepts the nickname ("cyprus1"), the full name ("Cyprus One")
    /// or the hex prefix ("0x00").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(hex_part) = trimmed.strip_prefix("0x") {
            if hex_part.len() == 2 {
                let byte = u8::from_str_radix(hex_part, 16)
                    .map_err(|_| WalletError::InvalidZone(trimmed.to_string()))?;
                return Zone::from_byte(byte);
            }
            return Err(WalletError::InvalidZone(trimmed.to_string()));
        }
        Zone::ALL
            .iter()
            .copied()
            .find(|zone| {
                zone.nickname().eq_ignore_ascii_case(trimmed)
                    || zone.name().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| WalletError::InvalidZone(trimmed.to_string()))
    }
}

impl Serialize for Zone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for Zone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Zone::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Any chain of the hierarchy a connection can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shard {
    Prime,
    Region(Region),
    Zone(Zone),
}

impl Shard {
    /// Hex identifier: "0x" for prime, "0x0" for a region, "0x00" for a zone.
    pub fn as_hex(&self) -> String {
        match self {
            Shard::Prime => "0x".to_string(),
            Shard::Region(region) => format!("0x{:x}", region.index()),
            Shard::Zone(zone) => zone.as_hex(),
        }
    }

    /// Parses a running-chain location: `[]` is prime, `[r]` a region and
    /// `[r, z]` a zone.
    pub fn from_location(location: &[u8]) -> Result<Self, WalletError> {
        match location {
            [] => Ok(Shard::Prime),
            [region] => Ok(Shard::Region(Region::from_index(*region)?)),
            [region, zone] => Ok(Shard::Zone(Zone::from_parts(
                Region::from_index(*region)?,
                *zone,
            )?)),
            other => Err(WalletError::InvalidZone(format!(
                "Invalid location {:?}",
                other
            ))),
        }
    }

    /// Default WebSocket port of a local node for this shard.
    pub fn default_ws_port(&self) -> u16 {
        match self {
            Shard::Prime => 8001,
            Shard::Region(region) => 8002 + u16::from(region.index()),
            Shard::Zone(zone) => {
                8200 + 20 * u16::from(zone.region().index()) + u16::from(zone.index_in_region())
            }
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shard::Prime => f.write_str("prime"),
            Shard::Region(region) => f.write_str(&region.name().to_lowercase()),
            Shard::Zone(zone) => write!(f, "{}", zone),
        }
    }
}

impl From<Zone> for Shard {
    fn from(zone: Zone) -> Self {
        Shard::Zone(zone)
    }
}

/// The two parallel ledgers of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ledger {
    Quai,
    Qi,
}

/// Classifies an address into its zone. Unknown prefixes are an error.
pub fn zone_from_address(address: &Address) -> Result<Zone, WalletError> {
    Zone::from_byte(address.as_bytes()[0])
}

pub fn ledger_from_address(address: &Address) -> Ledger {
    if address.as_bytes()[1] & 0x80 != 0 {
        Ledger::Qi
    } else {
        Ledger::Quai
    }
}

pub fn is_valid_address_for_zone(address: &Address, zone: Zone, ledger: Ledger) -> bool {
    matches!(zone_from_address(address), Ok(z) if z == zone) && ledger_from_address(address) == ledger
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_with_prefix(first: u8, second: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        bytes[1] = second;
        Address::from_bytes(bytes)
    }

    #[test]
    fn test_zone_prefixes_round_trip() {
        for zone in Zone::ALL {
            assert_eq!(Zone::from_byte(zone.byte_prefix()).unwrap(), zone);
        }
        assert_eq!(Zone::Paxos2.byte_prefix(), 0x11);
        assert_eq!(Zone::Hydra3.as_hex(), "0x22");
    }

    #[test]
    fn test_unknown_prefix_is_error() {
        assert!(Zone::from_byte(0x03).is_err());
        assert!(Zone::from_byte(0x30).is_err());
        let address = address_with_prefix(0xff, 0x00);
        assert!(matches!(
            zone_from_address(&address),
            Err(WalletError::InvalidZone(_))
        ));
    }

    #[test]
    fn test_names_and_parsing() {
        assert_eq!(Zone::Cyprus1.name(), "Cyprus One");
        assert_eq!(Zone::Hydra3.nickname(), "hydra3");
        assert_eq!("paxos2".parse::<Zone>().unwrap(), Zone::Paxos2);
        assert_eq!("Cyprus Three".parse::<Zone>().unwrap(), Zone::Cyprus3);
        assert_eq!("0x21".parse::<Zone>().unwrap(), Zone::Hydra2);
        assert!("atlantis1".parse::<Zone>().is_err());
    }

    #[test]
    fn test_ledger_bit() {
        assert_eq!(ledger_from_address(&address_with_prefix(0x00, 0x80)), Ledger::Qi);
        assert_eq!(ledger_from_address(&address_with_prefix(0x00, 0x7f)), Ledger::Quai);
        assert!(is_valid_address_for_zone(
            &address_with_prefix(0x10, 0x81),
            Zone::Paxos1,
            Ledger::Qi
        ));
        assert!(!is_valid_address_for_zone(
            &address_with_prefix(0x10, 0x01),
            Zone::Paxos1,
            Ledger::Qi
        ));
    }

    #[test]
    fn test_shard_locations() {
        assert_eq!(Shard::from_location(&[]).unwrap(), Shard::Prime);
        assert_eq!(
            Shard::from_location(&[1]).unwrap(),
            Shard::Region(Region::Paxos)
        );
        assert_eq!(
            Shard::from_location(&[2, 1]).unwrap(),
            Shard::Zone(Zone::Hydra2)
        );
        assert!(Shard::from_location(&[3, 0]).is_err());
        assert_eq!(Shard::Zone(Zone::Paxos3).default_ws_port(), 8222);
        assert_eq!(Shard::Prime.as_hex(), "0x");
    }
}
