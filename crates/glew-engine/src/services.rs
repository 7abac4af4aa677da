//! Opaque wallet services the launcher drives.
//!
//! The vault owns keys, coins and transaction construction; the node owns peer
//! networking and chain sync. Both are reached only through these traits.

use crate::deps::RuntimeHandles;
use crate::EngineError;
use async_trait::async_trait;
use glew_schema::{
    AddressKind, ChainYear, CoinTally, HistoryEntry, Outpoint, ScriptPubKey, Transaction,
    WalletSeed,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    Synched,
    Tracking,
}

/// Funds change reported by the vault after it committed coin state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyEvent {
    ReceiveUnconfirmed(u64),
    ReceivePromoted(u64),
    ReceiveConfirmed(u64),
    SpentUnconfirmed(u64),
    SpentConfirmed(u64),
    SpentPromoted,
    /// Coin state was rolled back; totals must be re-read.
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    ScriptPubKey(ScriptPubKey),
    Tally(TallyEvent),
}

#[async_trait]
pub trait Vault: Send + Sync {
    /// Load wallet properties from storage.
    async fn load(&self) -> Result<(), EngineError>;

    async fn script_pub_keys(&self) -> Result<Vec<ScriptPubKey>, EngineError>;

    async fn available_coins(&self) -> Result<CoinTally, EngineError>;

    async fn last_address(&self, kind: AddressKind) -> Result<String, EngineError>;

    async fn estimate_cost(&self, amount: u64, to: &str, cost_rate: f64)
        -> Result<u64, EngineError>;

    /// Build and sign a payment; the transaction is published through the
    /// event sink the vault was created with.
    async fn pay(&self, amount: u64, to: &str, cost_rate: f64, height: u32)
        -> Result<(), EngineError>;

    async fn history(&self) -> Result<Vec<HistoryEntry>, EngineError>;

    async fn rollback(&self, height: u32) -> Result<(), EngineError>;

    async fn load_private_key(&self) -> Result<WalletSeed, EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn add_script_pub_keys(&self, keys: Vec<ScriptPubKey>) -> Result<(), EngineError>;

    async fn add_outpoints(&self, outpoints: Vec<Outpoint>) -> Result<(), EngineError>;

    /// Queue a transaction for rebroadcast once the node is running.
    fn add_transaction(&self, tx: Transaction) -> Result<(), EngineError>;

    /// Broadcast `tx`, returning its id.
    async fn send_transaction(&self, tx: Transaction) -> Result<String, EngineError>;

    /// Header timestamp (unix seconds) of the block at `height`.
    async fn block_timestamp(&self, height: u32) -> Result<Option<u32>, EngineError>;

    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;
}

/// Receives chain notifications from a running node.
#[async_trait]
pub trait NodeDelegate: Send + Sync {
    /// Returning `Ok` commits the tip on the node side.
    fn new_tip(&self, height: i64) -> Result<(), EngineError>;

    /// Completes once the vault has rolled back to `height`.
    async fn rollback(&self, height: u32);

    fn estimated_height(&self, height: i64);

    fn sync_event(&self, event: SyncEvent);

    fn filter_event(&self, height: u32);
}

/// Receives transactions and wallet events emitted by a vault.
#[async_trait]
pub trait WalletEventSink: Send + Sync {
    async fn transaction(&self, tx: Transaction) -> Result<(), EngineError>;

    async fn event(&self, event: WalletEvent) -> Result<(), EngineError>;
}

/// Builds the services of one engine instance.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn create_vault(
        &self,
        handles: RuntimeHandles,
        events: Arc<dyn WalletEventSink>,
    ) -> Result<Arc<dyn Vault>, EngineError>;

    fn create_node(&self, handles: &RuntimeHandles, delegate: Arc<dyn NodeDelegate>)
        -> Arc<dyn Node>;

    /// Reset wallet storage and create a wallet, from `entropy` when
    /// recovering. Returns the seed words.
    async fn initialize_wallet(
        &self,
        handles: RuntimeHandles,
        entropy: Option<Vec<u8>>,
        year: ChainYear,
    ) -> Result<Vec<String>, EngineError>;
}
