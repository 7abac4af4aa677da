//! Settings, domain types, and the user-facing error taxonomy for glew.
//!
//! This crate defines the schema layer shared by every other crate: TOML
//! settings parsing (`Settings`), the wallet value types exchanged with the
//! engine (`ChainYear`, `AddressKind`, `FeeEstimate`, `History`, `CoinTally`),
//! the published model snapshot (`ModelSnapshot`), and the `WalletApiError`
//! projection that reaches end users.

pub mod api_error;
pub mod settings;
pub mod types;

pub use api_error::{KeyChainError, PaymentError, WalletApiError};
pub use settings::{
    load_settings, parse_settings_str, BackgroundSection, EngineSection, FeesSection,
    LoggingSection, NetworkKind, NetworkSection, Settings, SettingsError,
};
pub use types::{
    selectable_years, AddressKind, ChainYear, Coin, CoinTally, Direction, FeeEstimate, History,
    HistoryEntry, ModelSnapshot, Outpoint, ScriptPubKey, Transaction, WalletSeed,
};
