use crate::settings::NetworkKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calendar year of the chain checkpoint a wallet is recovered from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChainYear(pub u16);

impl ChainYear {
    /// Most recent checkpoint year available on `network`.
    pub fn latest(network: NetworkKind) -> Self {
        *selectable_years(network)
            .last()
            .unwrap_or(&ChainYear(FIRST_TESTNET_YEAR))
    }
}

impl std::fmt::Display for ChainYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const FIRST_MAIN_YEAR: u16 = 2017;
const FIRST_TESTNET_YEAR: u16 = 2021;
const LAST_CHECKPOINT_YEAR: u16 = 2023;

pub fn selectable_years(network: NetworkKind) -> Vec<ChainYear> {
    let first = match network {
        NetworkKind::Main => FIRST_MAIN_YEAR,
        NetworkKind::Testnet => FIRST_TESTNET_YEAR,
    };
    (first..=LAST_CHECKPOINT_YEAR).map(ChainYear).collect()
}

/// HD derivation source of an address. Only the receive kinds are shown to users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AddressKind {
    Legacy0,
    Legacy0Change,
    Legacy44,
    Legacy44Change,
    LegacySegwit,
    LegacySegwitChange,
    Segwit0,
    Segwit0Change,
    Segwit,
    SegwitChange,
    Taproot,
    TaprootChange,
}

impl AddressKind {
    pub fn is_receive(self) -> bool {
        matches!(
            self,
            AddressKind::LegacySegwit | AddressKind::Segwit | AddressKind::Taproot
        )
    }

    /// String placed in a QR code. Bech32 addresses are uppercased for the
    /// denser alphanumeric QR mode; base58 addresses are case-sensitive.
    pub fn qr_encoding(self, address: &str) -> String {
        match self {
            AddressKind::Segwit | AddressKind::Taproot => address.to_uppercase(),
            _ => address.to_owned(),
        }
    }
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddressKind::Legacy0 => "legacy0",
            AddressKind::Legacy0Change => "legacy0-change",
            AddressKind::Legacy44 => "legacy44",
            AddressKind::Legacy44Change => "legacy44-change",
            AddressKind::LegacySegwit => "legacy-segwit",
            AddressKind::LegacySegwitChange => "legacy-segwit-change",
            AddressKind::Segwit0 => "segwit0",
            AddressKind::Segwit0Change => "segwit0-change",
            AddressKind::Segwit => "segwit",
            AddressKind::SegwitChange => "segwit-change",
            AddressKind::Taproot => "taproot",
            AddressKind::TaprootChange => "taproot-change",
        };
        f.write_str(name)
    }
}

/// Fee rates in sat/vB.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeEstimate {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletSeed {
    pub words: Vec<String>,
    pub language: String,
}

impl std::fmt::Debug for WalletSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSeed")
            .field("words", &format_args!("<{} redacted>", self.words.len()))
            .field("language", &self.language)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScriptPubKey(pub Vec<u8>);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    pub tx_id: String,
    pub index: u32,
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub tx_id: String,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: Outpoint,
    pub value: u64,
    /// Transaction spending this coin while the spend is still unconfirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_spend: Option<Transaction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoinTally {
    pub available: Vec<Coin>,
    pub pending_receive: Vec<Coin>,
    pub pending_spend: Vec<Coin>,
}

impl CoinTally {
    fn sum(coins: &[Coin]) -> u64 {
        coins.iter().map(|c| c.value).sum()
    }

    pub fn available_total(&self) -> u64 {
        Self::sum(&self.available)
    }

    pub fn pending_receive_total(&self) -> u64 {
        Self::sum(&self.pending_receive)
    }

    pub fn pending_spend_total(&self) -> u64 {
        Self::sum(&self.pending_spend)
    }

    /// Every outpoint the node must watch.
    pub fn outpoints(&self) -> Vec<Outpoint> {
        self.available
            .iter()
            .chain(&self.pending_receive)
            .chain(&self.pending_spend)
            .map(|c| c.outpoint.clone())
            .collect()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending_spend
            .iter()
            .filter_map(|c| c.pending_spend.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub direction: Direction,
    pub pending: bool,
    pub tx_id: String,
    pub address: String,
    pub amount: u64,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
    /// Block timestamp (unix seconds) keyed by height.
    pub timestamps: BTreeMap<u32, u32>,
}

impl History {
    pub fn timestamp_of(&self, height: u32) -> Option<DateTime<Utc>> {
        self.timestamps
            .get(&height)
            .and_then(|secs| DateTime::from_timestamp(i64::from(*secs), 0))
    }

    pub fn pending(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(|e| e.pending)
    }
}

/// Published wallet state as seen by a UI binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSnapshot {
    pub background: bool,
    pub running: bool,
    pub suspended: bool,
    pub synched: bool,
    pub active: u64,
    pub pending: u64,
    pub estimated_height: i64,
    pub tip: i64,
}

impl Default for ModelSnapshot {
    fn default() -> Self {
        Self {
            background: false,
            running: false,
            suspended: false,
            synched: false,
            active: 0,
            pending: 0,
            estimated_height: -1,
            tip: -1,
        }
    }
}

impl ModelSnapshot {
    pub fn total(&self) -> u64 {
        self.active.saturating_add(self.pending)
    }
}
