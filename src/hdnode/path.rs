/// Derivation path parsing and BIP-44 helpers
use crate::error::WalletError;
use std::fmt;
use std::str::FromStr;

pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// BIP-44 purpose used for ordinary addresses.
pub const BIP44_PURPOSE: u32 = 44;
/// BIP-47 purpose used for payment codes.
pub const BIP47_PURPOSE: u32 = 47;

/// Coin types registered for the two ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoinType {
    Quai,
    Qi,
}

impl CoinType {
    pub fn value(&self) -> u32 {
        match self {
            CoinType::Quai => 994,
            CoinType::Qi => 969,
        }
    }

    pub fn from_value(value: u32) -> Result<Self, WalletError> {
        match value {
            994 => Ok(CoinType::Quai),
            969 => Ok(CoinType::Qi),
            other => Err(WalletError::InvalidCoinType(other.to_string())),
        }
    }

    /// Reads the coin type from the second segment of a BIP-44 path.
    pub fn from_path(path: &str) -> Result<Self, WalletError> {
        let parsed = DerivationPath::from_str(path)?;
        if !parsed.is_absolute() {
            return Err(WalletError::InvalidPath(format!(
                "Coin type requires an absolute path, got {}",
                path
            )));
        }
        let segments = parsed.segments();
        if segments.len() < 2 || segments[0] != ChildIndex::hardened(BIP44_PURPOSE)? {
            return Err(WalletError::InvalidPath(format!(
                "Path {} is not a BIP-44 path",
                path
            )));
        }
        if !segments[1].is_hardened() {
            return Err(WalletError::InvalidPath(format!(
                "Coin type segment must be hardened in {}",
                path
            )));
        }
        CoinType::from_value(segments[1].number())
    }

    /// `m/44'/<coin>'`
    pub fn base_path(&self) -> String {
        format!("m/{}'/{}'", BIP44_PURPOSE, self.value())
    }
}

/// One segment of a derivation path. The top bit marks a hardened child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildIndex(u32);

impl ChildIndex {
    pub fn normal(index: u32) -> Result<Self, WalletError> {
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidArgument(format!(
                "Index {} out of range for a normal child",
                index
            )));
        }
        Ok(ChildIndex(index))
    }

    pub fn hardened(index: u32) -> Result<Self, WalletError> {
        if index >= HARDENED_OFFSET {
            return Err(WalletError::InvalidArgument(format!(
                "Index {} out of range for a hardened child",
                index
            )));
        }
        Ok(ChildIndex(index | HARDENED_OFFSET))
    }

    pub fn from_raw(raw: u32) -> Self {
        ChildIndex(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// The index without the hardened bit.
    pub fn number(&self) -> u32 {
        self.0 & !HARDENED_OFFSET
    }

    pub fn is_hardened(&self) -> bool {
        self.0 & HARDENED_OFFSET != 0
    }
}

impl fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.number())
        } else {
            write!(f, "{}", self.number())
        }
    }
}

impl FromStr for ChildIndex {
    type Err = WalletError;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        let (digits, hardened) = match segment.strip_suffix('\'') {
            Some(rest) => (rest, true),
            None => (segment, false),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(WalletError::InvalidPath(format!(
                "Invalid path segment '{}'",
                segment
            )));
        }
        let index: u32 = digits.parse().map_err(|_| {
            WalletError::InvalidPath(format!("Path segment '{}' out of range", segment))
        })?;
        let child = if hardened {
            ChildIndex::hardened(index)
        } else {
            ChildIndex::normal(index)
        };
        child.map_err(|_| WalletError::InvalidPath(format!("Path segment '{}' out of range", segment)))
    }
}

/// A parsed slash-separated path, either absolute (`m/...`) or relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    absolute: bool,
    segments: Vec<ChildIndex>,
}

impl DerivationPath {
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[ChildIndex] {
        &self.segments
    }

    /// `m/44'/<coin>'/<account>'/<change>`
    pub fn bip44_change(coin: CoinType, account: u32, change: bool) -> Result<Self, WalletError> {
        Ok(DerivationPath {
            absolute: true,
            segments: vec![
                ChildIndex::hardened(BIP44_PURPOSE)?,
                ChildIndex::hardened(coin.value())?,
                ChildIndex::hardened(account)?,
                ChildIndex::normal(u32::from(change))?,
            ],
        })
    }

    /// `m/47'/<coin>'/<account>'`
    pub fn bip47_account(coin: CoinType, account: u32) -> Result<Self, WalletError> {
        Ok(DerivationPath {
            absolute: true,
            segments: vec![
                ChildIndex::hardened(BIP47_PURPOSE)?,
                ChildIndex::hardened(coin.value())?,
                ChildIndex::hardened(account)?,
            ],
        })
    }

    pub fn child(&self, index: ChildIndex) -> Self {
        let mut segments = self.segments.clone();
        segments.push(index);
        DerivationPath {
            absolute: self.absolute,
            segments,
        }
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.segments.iter().map(|s| s.to_string()).collect();
        match (self.absolute, rendered.is_empty()) {
            (true, true) => f.write_str("m"),
            (true, false) => write!(f, "m/{}", rendered.join("/")),
            (false, _) => f.write_str(&rendered.join("/")),
        }
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(WalletError::InvalidPath("Empty path".to_string()));
        }
        let mut parts = trimmed.split('/').peekable();
        let absolute = parts.peek() == Some(&"m");
        if absolute {
            parts.next();
        }
        let segments = parts
            .map(|segment| {
                if segment == "m" {
                    return Err(WalletError::InvalidPath(format!(
                        "Root segment may only appear first in {}",
                        trimmed
                    )));
                }
                ChildIndex::from_str(segment)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !absolute && segments.is_empty() {
            return Err(WalletError::InvalidPath(format!("Invalid path {}", trimmed)));
        }
        Ok(DerivationPath { absolute, segments })
    }
}
