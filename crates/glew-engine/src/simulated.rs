//! In-memory vault and node used by the `launcher` backend and by tests.
//!
//! The simulated chain syncs instantly after a short delay. Seed words are
//! placeholders derived from entropy bytes; nothing here is cryptographic.

use crate::deps::RuntimeHandles;
use crate::services::{
    Node, NodeDelegate, ServiceFactory, SyncEvent, TallyEvent, Vault, WalletEvent,
    WalletEventSink,
};
use crate::EngineError;
use async_trait::async_trait;
use glew_schema::{
    AddressKind, ChainYear, Coin, CoinTally, Direction, HistoryEntry, Outpoint, PaymentError,
    ScriptPubKey, Transaction, WalletSeed,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

const DUST_LIMIT: u64 = 546;
const ESTIMATED_VSIZE: f64 = 141.0;
const BLOCK_INTERVAL_SECS: u32 = 600;
const CHAIN_START_TIME: u32 = 1_600_000_000;
const DEFAULT_TIP: i64 = 2_500_000;
const DEFAULT_SYNC_DELAY: Duration = Duration::from_millis(20);

const WORDS: [&str; 32] = [
    "abandon", "badge", "cabin", "dairy", "eager", "fabric", "galaxy", "habit", "icon", "jacket",
    "kangaroo", "label", "machine", "napkin", "oak", "paddle", "quantum", "rabbit", "saddle",
    "table", "umbrella", "vacuum", "wagon", "xylophone", "yard", "zebra", "anchor", "border",
    "canvas", "desert", "ember", "frost",
];

/// A call made into the simulated services, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    VaultCreate,
    VaultLoad,
    VaultRollback(u32),
    VaultStop,
    NodeCreate,
    AddScriptPubKeys(usize),
    AddOutpoints(usize),
    AddTransaction(String),
    SendTransaction(String),
    NodeStart,
    NodeStop,
    InitializeWallet { recovered: bool, year: ChainYear },
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    vault_create: bool,
    node_start: bool,
    node_stop: bool,
    vault_stop: bool,
}

#[derive(Debug, Clone)]
struct WalletRecord {
    words: Vec<String>,
    year: ChainYear,
    tally: CoinTally,
    history: Vec<HistoryEntry>,
    next_address: u32,
}

impl WalletRecord {
    fn from_entropy(entropy: &[u8], year: ChainYear) -> Self {
        Self {
            words: derive_words(entropy),
            year,
            tally: CoinTally::default(),
            history: Vec::new(),
            next_address: 0,
        }
    }

    fn address(&self, kind: AddressKind) -> String {
        let prefix = match kind {
            AddressKind::LegacySegwit | AddressKind::LegacySegwitChange => "2N",
            AddressKind::Taproot | AddressKind::TaprootChange => "tb1p",
            AddressKind::Segwit
            | AddressKind::SegwitChange
            | AddressKind::Segwit0
            | AddressKind::Segwit0Change => "tb1q",
            _ => "m",
        };
        format!("{prefix}glew{}{:06}", self.words[0], self.next_address)
    }

    /// Total to select for paying `amount` at `cost`, if the wallet covers it.
    fn check_funds(&self, amount: u64, cost: u64) -> Result<u64, EngineError> {
        let available = self.tally.available_total();
        if cost >= available {
            return Err(PaymentError::TransactionCostGreaterThanFunds.into());
        }
        match amount.checked_add(cost) {
            Some(target) if target <= available => Ok(target),
            _ => Err(PaymentError::NotEnoughFunds(cost).into()),
        }
    }

    fn spend(
        &mut self,
        amount: u64,
        cost: u64,
        to: &str,
        height: u32,
    ) -> Result<Transaction, EngineError> {
        let target = self.check_funds(amount, cost)?;
        let tx = Transaction {
            tx_id: random_tx_id(),
            raw: to.as_bytes().to_vec(),
        };

        let mut selected: u64 = 0;
        let mut keep = Vec::new();
        for mut coin in std::mem::take(&mut self.tally.available) {
            if selected < target {
                selected = selected.saturating_add(coin.value);
                coin.pending_spend = Some(tx.clone());
                self.tally.pending_spend.push(coin);
            } else {
                keep.push(coin);
            }
        }
        self.tally.available = keep;

        let change = selected - target;
        if change > 0 {
            self.tally.available.push(Coin {
                outpoint: Outpoint {
                    tx_id: tx.tx_id.clone(),
                    index: 1,
                },
                value: change,
                pending_spend: None,
            });
        }
        self.history.push(HistoryEntry {
            direction: Direction::Outgoing,
            pending: true,
            tx_id: tx.tx_id.clone(),
            address: to.to_owned(),
            amount,
            height,
        });
        self.next_address += 1;
        Ok(tx)
    }
}

fn derive_words(entropy: &[u8]) -> Vec<String> {
    let seed: Vec<u8> = if entropy.is_empty() {
        vec![0]
    } else {
        entropy.to_vec()
    };
    (0..12)
        .map(|i| {
            let byte = usize::from(seed[i % seed.len()]);
            WORDS[(byte + i * 7) % WORDS.len()].to_owned()
        })
        .collect()
}

fn random_tx_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:032x}{:032x}", rng.gen::<u128>(), rng.gen::<u128>())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    journal: Mutex<Vec<ServiceCall>>,
    wallet: Mutex<Option<WalletRecord>>,
    faults: Mutex<Faults>,
    tip: AtomicI64,
    sync_delay: Mutex<Duration>,
}

impl Shared {
    fn record(&self, call: ServiceCall) {
        trace!("simulated service call {call:?}");
        lock(&self.journal).push(call);
    }

    fn faults(&self) -> Faults {
        *lock(&self.faults)
    }

    fn with_wallet<T>(
        &self,
        f: impl FnOnce(&mut WalletRecord) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match lock(&self.wallet).as_mut() {
            Some(wallet) => f(wallet),
            None => Err(EngineError::Internal("no wallet initialized".to_owned())),
        }
    }
}

/// Factory for simulated vaults and nodes sharing one in-memory wallet.
#[derive(Clone)]
pub struct SimulatedServices {
    shared: Arc<Shared>,
}

impl Default for SimulatedServices {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedServices {
    /// Services over an empty wallet.
    pub fn new() -> Self {
        let services = Self::without_wallet();
        *lock(&services.shared.wallet) = Some(WalletRecord::from_entropy(&[0; 16], ChainYear(2021)));
        services
    }

    /// Services with no wallet on "disk"; loading a vault fails until a wallet
    /// is initialized.
    pub fn without_wallet() -> Self {
        Self {
            shared: Arc::new(Shared {
                journal: Mutex::new(Vec::new()),
                wallet: Mutex::new(None),
                faults: Mutex::new(Faults::default()),
                tip: AtomicI64::new(DEFAULT_TIP),
                sync_delay: Mutex::new(DEFAULT_SYNC_DELAY),
            }),
        }
    }

    pub fn journal(&self) -> Vec<ServiceCall> {
        lock(&self.shared.journal).clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.shared.journal).clear();
    }

    pub fn fail_vault_create(&self, fail: bool) {
        lock(&self.shared.faults).vault_create = fail;
    }

    pub fn fail_node_start(&self, fail: bool) {
        lock(&self.shared.faults).node_start = fail;
    }

    pub fn fail_node_stop(&self, fail: bool) {
        lock(&self.shared.faults).node_stop = fail;
    }

    pub fn fail_vault_stop(&self, fail: bool) {
        lock(&self.shared.faults).vault_stop = fail;
    }

    pub fn set_tip(&self, tip: i64) {
        self.shared.tip.store(tip, Ordering::SeqCst);
    }

    /// Delay between node start and the synched notification.
    pub fn set_sync_delay(&self, delay: Duration) {
        *lock(&self.shared.sync_delay) = delay;
    }

    pub fn wallet_words(&self) -> Option<Vec<String>> {
        lock(&self.shared.wallet).as_ref().map(|w| w.words.clone())
    }

    pub fn wallet_year(&self) -> Option<ChainYear> {
        lock(&self.shared.wallet).as_ref().map(|w| w.year)
    }

    /// Credit a confirmed coin of `value` at `height`.
    pub fn deposit(&self, value: u64, height: u32) -> Result<Outpoint, EngineError> {
        self.shared.with_wallet(|wallet| {
            let outpoint = Outpoint {
                tx_id: random_tx_id(),
                index: 0,
            };
            wallet.tally.available.push(Coin {
                outpoint: outpoint.clone(),
                value,
                pending_spend: None,
            });
            let address = wallet.address(AddressKind::Segwit);
            wallet.history.push(HistoryEntry {
                direction: Direction::Incoming,
                pending: false,
                tx_id: outpoint.tx_id.clone(),
                address,
                amount: value,
                height,
            });
            Ok(outpoint)
        })
    }

    /// Vault and node wired to no-op listeners.
    pub fn standalone_pair(&self, handles: &RuntimeHandles) -> (Arc<dyn Node>, Arc<dyn Vault>) {
        let node = self.create_node(handles, Arc::new(Unobserved));
        let vault: Arc<dyn Vault> = Arc::new(SimulatedVault {
            shared: Arc::clone(&self.shared),
            handles: handles.clone(),
            events: Arc::new(Unobserved),
        });
        (node, vault)
    }
}

#[async_trait]
impl ServiceFactory for SimulatedServices {
    async fn create_vault(
        &self,
        handles: RuntimeHandles,
        events: Arc<dyn WalletEventSink>,
    ) -> Result<Arc<dyn Vault>, EngineError> {
        self.shared.record(ServiceCall::VaultCreate);
        if self.shared.faults().vault_create {
            return Err(EngineError::StartupFailure(
                "simulated vault creation failure".to_owned(),
            ));
        }
        Ok(Arc::new(SimulatedVault {
            shared: Arc::clone(&self.shared),
            handles,
            events,
        }))
    }

    fn create_node(
        &self,
        handles: &RuntimeHandles,
        delegate: Arc<dyn NodeDelegate>,
    ) -> Arc<dyn Node> {
        self.shared.record(ServiceCall::NodeCreate);
        Arc::new(SimulatedNode {
            shared: Arc::clone(&self.shared),
            handles: handles.clone(),
            delegate,
            running: Arc::new(AtomicBool::new(false)),
            sync_task: Mutex::new(None),
            mempool: Mutex::new(Vec::new()),
        })
    }

    async fn initialize_wallet(
        &self,
        handles: RuntimeHandles,
        entropy: Option<Vec<u8>>,
        year: ChainYear,
    ) -> Result<Vec<String>, EngineError> {
        self.shared.record(ServiceCall::InitializeWallet {
            recovered: entropy.is_some(),
            year,
        });
        let shared = Arc::clone(&self.shared);
        handles
            .thread_pool
            .spawn_blocking(move || {
                let entropy = match entropy {
                    Some(bytes) if bytes.is_empty() => {
                        return Err(EngineError::Internal("empty recovery entropy".to_owned()))
                    }
                    Some(bytes) => bytes,
                    None => rand::thread_rng().gen::<[u8; 16]>().to_vec(),
                };
                let record = WalletRecord::from_entropy(&entropy, year);
                let words = record.words.clone();
                *lock(&shared.wallet) = Some(record);
                Ok(words)
            })
            .await
            .map_err(|e| EngineError::Runtime(e.to_string()))?
    }
}

struct SimulatedVault {
    shared: Arc<Shared>,
    handles: RuntimeHandles,
    events: Arc<dyn WalletEventSink>,
}

impl SimulatedVault {
    fn validate(amount: u64, to: &str, cost_rate: f64) -> Result<u64, PaymentError> {
        if to.trim().is_empty() || to.contains(char::is_whitespace) {
            return Err(PaymentError::IllegalAddress);
        }
        if !cost_rate.is_finite() || cost_rate <= 0.0 {
            return Err(PaymentError::IllegalCostRate);
        }
        if amount < DUST_LIMIT {
            return Err(PaymentError::DustAmount);
        }
        Ok((cost_rate * ESTIMATED_VSIZE).ceil() as u64)
    }

}

#[async_trait]
impl Vault for SimulatedVault {
    async fn load(&self) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::VaultLoad);
        let shared = Arc::clone(&self.shared);
        self.handles
            .thread_pool
            .spawn_blocking(move || shared.with_wallet(|_| Ok(())))
            .await
            .map_err(|e| EngineError::Runtime(e.to_string()))?
    }

    async fn script_pub_keys(&self) -> Result<Vec<ScriptPubKey>, EngineError> {
        self.shared.with_wallet(|w| {
            Ok((0..=w.next_address)
                .map(|i| ScriptPubKey(i.to_be_bytes().to_vec()))
                .collect())
        })
    }

    async fn available_coins(&self) -> Result<CoinTally, EngineError> {
        self.shared.with_wallet(|w| Ok(w.tally.clone()))
    }

    async fn last_address(&self, kind: AddressKind) -> Result<String, EngineError> {
        self.shared.with_wallet(|w| Ok(w.address(kind)))
    }

    async fn estimate_cost(
        &self,
        amount: u64,
        to: &str,
        cost_rate: f64,
    ) -> Result<u64, EngineError> {
        let cost = Self::validate(amount, to, cost_rate)?;
        self.shared.with_wallet(|w| w.check_funds(amount, cost))?;
        Ok(cost)
    }

    async fn pay(
        &self,
        amount: u64,
        to: &str,
        cost_rate: f64,
        height: u32,
    ) -> Result<(), EngineError> {
        let cost = Self::validate(amount, to, cost_rate)?;
        let tx = self
            .shared
            .with_wallet(|w| w.spend(amount, cost, to, height))?;
        debug!("simulated vault paying {amount} to {to}, cost {cost}");
        self.events.transaction(tx).await?;
        self.events
            .event(WalletEvent::Tally(TallyEvent::SpentUnconfirmed(
                amount.saturating_add(cost),
            )))
            .await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, EngineError> {
        self.shared.with_wallet(|w| Ok(w.history.clone()))
    }

    async fn rollback(&self, height: u32) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::VaultRollback(height));
        self.shared.with_wallet(|w| {
            w.history.retain(|e| e.height <= height);
            Ok(())
        })?;
        self.events
            .event(WalletEvent::Tally(TallyEvent::Rollback))
            .await
    }

    async fn load_private_key(&self) -> Result<WalletSeed, EngineError> {
        self.shared.with_wallet(|w| {
            Ok(WalletSeed {
                words: w.words.clone(),
                language: "english".to_owned(),
            })
        })
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::VaultStop);
        if self.shared.faults().vault_stop {
            return Err(EngineError::Internal("simulated vault stop failure".to_owned()));
        }
        Ok(())
    }
}

struct SimulatedNode {
    shared: Arc<Shared>,
    handles: RuntimeHandles,
    delegate: Arc<dyn NodeDelegate>,
    running: Arc<AtomicBool>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    mempool: Mutex<Vec<Transaction>>,
}

#[async_trait]
impl Node for SimulatedNode {
    async fn add_script_pub_keys(&self, keys: Vec<ScriptPubKey>) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::AddScriptPubKeys(keys.len()));
        Ok(())
    }

    async fn add_outpoints(&self, outpoints: Vec<Outpoint>) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::AddOutpoints(outpoints.len()));
        Ok(())
    }

    fn add_transaction(&self, tx: Transaction) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::AddTransaction(tx.tx_id.clone()));
        lock(&self.mempool).push(tx);
        Ok(())
    }

    async fn send_transaction(&self, tx: Transaction) -> Result<String, EngineError> {
        self.shared.record(ServiceCall::SendTransaction(tx.tx_id.clone()));
        let tx_id = tx.tx_id.clone();
        lock(&self.mempool).push(tx);
        Ok(tx_id)
    }

    async fn block_timestamp(&self, height: u32) -> Result<Option<u32>, EngineError> {
        let tip = self.shared.tip.load(Ordering::SeqCst);
        if i64::from(height) > tip {
            return Ok(None);
        }
        Ok(Some(
            CHAIN_START_TIME.saturating_add(height.saturating_mul(BLOCK_INTERVAL_SECS)),
        ))
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::NodeStart);
        if self.shared.faults().node_start {
            return Err(EngineError::StartupFailure(
                "simulated node start failure".to_owned(),
            ));
        }
        self.running.store(true, Ordering::SeqCst);

        let delegate = Arc::clone(&self.delegate);
        let running = Arc::clone(&self.running);
        let tip = self.shared.tip.load(Ordering::SeqCst);
        let delay = *lock(&self.shared.sync_delay);
        let task = self.handles.event_loop.spawn(async move {
            tokio::time::sleep(delay).await;
            if !running.load(Ordering::SeqCst) {
                return;
            }
            delegate.estimated_height(tip);
            if let Err(e) = delegate.new_tip(tip) {
                debug!("tip {tip} not committed: {e}");
            }
            delegate.sync_event(SyncEvent::Synched);
        });
        *lock(&self.sync_task) = Some(task);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.shared.record(ServiceCall::NodeStop);
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = lock(&self.sync_task).take() {
            task.abort();
        }
        if self.shared.faults().node_stop {
            return Err(EngineError::Internal("simulated node stop failure".to_owned()));
        }
        Ok(())
    }
}

/// Listener that accepts and drops everything.
struct Unobserved;

#[async_trait]
impl NodeDelegate for Unobserved {
    fn new_tip(&self, _height: i64) -> Result<(), EngineError> {
        Ok(())
    }

    async fn rollback(&self, _height: u32) {}

    fn estimated_height(&self, _height: i64) {}

    fn sync_event(&self, _event: SyncEvent) {}

    fn filter_event(&self, _height: u32) {}
}

#[async_trait]
impl WalletEventSink for Unobserved {
    async fn transaction(&self, _tx: Transaction) -> Result<(), EngineError> {
        Ok(())
    }

    async fn event(&self, _event: WalletEvent) -> Result<(), EngineError> {
        Ok(())
    }
}
