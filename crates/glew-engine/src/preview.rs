use crate::backend::WalletEngine;
use crate::completion::Completion;
use crate::observer::WalletObserver;
use crate::EngineError;
use glew_schema::{
    selectable_years, AddressKind, ChainYear, Direction, FeeEstimate, History, HistoryEntry,
    NetworkKind, WalletSeed,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const PREVIEW_WORDS: [&str; 12] = [
    "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "zoo", "wrong",
];
const PREVIEW_COST: u64 = 500;
const PREVIEW_TIME_BASE: u32 = 1_635_508_070;

/// Engine with canned answers for UI previews and demos.
pub struct PreviewEngine {
    network: NetworkKind,
    latency: Duration,
}

impl PreviewEngine {
    pub fn new(network: NetworkKind) -> Self {
        Self {
            network,
            latency: Duration::ZERO,
        }
    }

    /// Delay every completion by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn deliver<T: Send + 'static>(&self, done: Completion<T>, value: T) {
        if self.latency.is_zero() {
            return done.complete_later(value);
        }
        let latency = self.latency;
        let spawned = std::thread::Builder::new()
            .name("glew-preview".to_owned())
            .spawn(move || {
                std::thread::sleep(latency);
                done.complete(value);
            });
        if let Err(e) = spawned {
            warn!("cannot spawn preview thread: {e}");
        }
    }

    fn address(kind: AddressKind) -> Option<&'static str> {
        match kind {
            AddressKind::LegacySegwit => Some("2N79iuGdaQ1wFVUg7WYp3zCR6zAz321rzda"),
            AddressKind::Segwit => Some("tb1qhrkymgvsw9sjq2zvhjyjpc746kemvdywv46a57"),
            AddressKind::Taproot => {
                Some("tb1pkqzpezwsxug0l359k6xg9tklavjwmkdla426wnjpzgyy55r45gdsyxv8de")
            }
            _ => None,
        }
    }

    fn random_history() -> History {
        let mut rng = rand::thread_rng();
        let entries = (0..10)
            .map(|_| HistoryEntry {
                direction: if rng.gen() {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                },
                pending: rng.gen(),
                tx_id: format!("{:016x}", rng.gen::<u64>()),
                address: "tb1p".to_owned(),
                amount: rng.gen_range(9_000..=100_000),
                height: rng.gen_range(1..=10),
            })
            .collect();
        let timestamps: BTreeMap<u32, u32> =
            (1..=10).map(|h| (h, PREVIEW_TIME_BASE + h)).collect();
        History {
            entries,
            timestamps,
        }
    }

    fn words() -> Vec<String> {
        PREVIEW_WORDS.iter().map(|w| (*w).to_owned()).collect()
    }
}

impl WalletEngine for PreviewEngine {
    fn name(&self) -> &str {
        "preview"
    }

    fn start(&self, observer: Arc<dyn WalletObserver>, done: Completion<Result<(), EngineError>>) {
        debug!("preview engine start");
        observer.running_changed(true);
        observer.suspended_changed(false);
        self.deliver(done, Ok(()));
    }

    fn stop(&self, done: Completion<()>) {
        debug!("preview engine stop");
        self.deliver(done, ());
    }

    fn suspend(&self, done: Completion<()>) {
        self.deliver(done, ());
    }

    fn new_wallet(&self, _year: ChainYear, done: Completion<Result<Vec<String>, EngineError>>) {
        self.deliver(done, Ok(Self::words()));
    }

    fn recover_wallet(
        &self,
        _entropy: Vec<u8>,
        _year: ChainYear,
        done: Completion<Result<Vec<String>, EngineError>>,
    ) {
        self.deliver(done, Ok(Self::words()));
    }

    fn fees(&self, done: Completion<Result<FeeEstimate, EngineError>>) {
        self.deliver(
            done,
            Ok(FeeEstimate {
                low: 11.11,
                medium: 22.22,
                high: 33.33,
            }),
        );
    }

    fn load_latest_address(&self, kind: AddressKind, done: Completion<Result<String, EngineError>>) {
        let result = Self::address(kind)
            .map(str::to_owned)
            .ok_or_else(|| EngineError::Internal(format!("{kind} is not a receive address kind")));
        self.deliver(done, result);
    }

    fn pay(
        &self,
        _amount: u64,
        _to: String,
        _cost_rate: f64,
        done: Completion<Result<(), EngineError>>,
    ) {
        self.deliver(done, Ok(()));
    }

    fn estimate_cost(
        &self,
        _amount: u64,
        _to: String,
        _cost_rate: f64,
        done: Completion<Result<u64, EngineError>>,
    ) {
        self.deliver(done, Ok(PREVIEW_COST));
    }

    fn load_private_key(&self, done: Completion<Result<WalletSeed, EngineError>>) {
        self.deliver(
            done,
            Ok(WalletSeed {
                words: Self::words(),
                language: "english".to_owned(),
            }),
        );
    }

    fn history(&self, done: Completion<Result<History, EngineError>>) {
        self.deliver(done, Ok(Self::random_history()));
    }

    fn selectable_years(&self) -> Vec<ChainYear> {
        selectable_years(self.network)
    }
}
