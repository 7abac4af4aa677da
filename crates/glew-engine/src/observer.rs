use glew_schema::ModelSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Relative change of wallet funds reported by the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsMovement {
    ReceiveUnconfirmed(u64),
    /// Previously pending value confirmed.
    ReceivePromoted(u64),
    ReceiveConfirmed(u64),
    SpentUnconfirmed(u64),
    SpentConfirmed(u64),
    /// Nothing moved but listeners should refresh.
    SpentPromoted,
}

/// Notification interface the engine publishes wallet state through.
///
/// The consumer owns dispatch: implementations must be cheap and must not call
/// back into the engine.
pub trait WalletObserver: Send + Sync {
    fn running_changed(&self, running: bool);

    fn suspended_changed(&self, suspended: bool);

    fn sync_state_changed(&self, synched: bool);

    fn funds_changed(&self, active: u64, pending: u64);

    fn funds_moved(&self, movement: FundsMovement);

    fn tip_changed(&self, tip: i64);

    fn estimated_height_changed(&self, height: i64);

    fn background_changed(&self, background: bool);

    fn snapshot(&self) -> ModelSnapshot;
}

type SyncListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    synched: Mutex<Vec<(u64, SyncListener)>>,
}

/// In-process wallet model: the published state plus synched-flag listeners.
#[derive(Default)]
pub struct WalletModel {
    state: Mutex<ModelSnapshot>,
    listeners: Arc<Listeners>,
}

/// Keeps a listener registered until dropped or cancelled.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut synched) = listeners.synched.lock() {
                synched.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl WalletModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ModelSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            listeners: Arc::default(),
        }
    }

    /// Register `listener` for every published change of the synched flag.
    pub fn on_synched(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        match self.listeners.synched.lock() {
            Ok(mut synched) => synched.push((id, Arc::new(listener))),
            Err(e) => warn!("synched listeners poisoned: {e}"),
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ModelSnapshot)) {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(e) => warn!("wallet model poisoned: {e}"),
        }
    }

    fn notify_synched(&self, value: bool) {
        let listeners: Vec<SyncListener> = match self.listeners.synched.lock() {
            Ok(synched) => synched.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(value);
        }
    }
}

impl WalletObserver for WalletModel {
    fn running_changed(&self, running: bool) {
        self.update(|s| s.running = running);
    }

    fn suspended_changed(&self, suspended: bool) {
        self.update(|s| s.suspended = suspended);
    }

    fn sync_state_changed(&self, synched: bool) {
        self.update(|s| s.synched = synched);
        self.notify_synched(synched);
    }

    fn funds_changed(&self, active: u64, pending: u64) {
        self.update(|s| {
            s.active = active;
            s.pending = pending;
        });
    }

    fn funds_moved(&self, movement: FundsMovement) {
        self.update(|s| match movement {
            FundsMovement::ReceiveUnconfirmed(value) => s.pending += value,
            FundsMovement::ReceivePromoted(value) => {
                if s.pending < value {
                    warn!("promoted {value} exceeds pending {}", s.pending);
                }
                s.pending = s.pending.saturating_sub(value);
                s.active += value;
            }
            FundsMovement::ReceiveConfirmed(value) => s.active += value,
            FundsMovement::SpentUnconfirmed(value) | FundsMovement::SpentConfirmed(value) => {
                if s.active < value {
                    warn!("spent {value} exceeds active {}", s.active);
                }
                s.active = s.active.saturating_sub(value);
            }
            FundsMovement::SpentPromoted => {}
        });
    }

    fn tip_changed(&self, tip: i64) {
        self.update(|s| s.tip = tip);
    }

    fn estimated_height_changed(&self, height: i64) {
        self.update(|s| s.estimated_height = height);
    }

    fn background_changed(&self, background: bool) {
        self.update(|s| s.background = background);
    }

    fn snapshot(&self) -> ModelSnapshot {
        self.state.lock().map(|s| *s).unwrap_or_default()
    }
}

impl std::fmt::Display for WalletModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.snapshot();
        write!(
            f,
            "Model(background launch({}), estimatedHeight({}), suspended({}), tip({}), \
             pending tally ({}), active tally({}), ready({}))",
            s.background, s.estimated_height, s.suspended, s.tip, s.pending, s.active, s.synched
        )
    }
}
