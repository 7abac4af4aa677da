use crate::backend::WalletEngine;
use crate::completion::{take_pending, Completion};
use crate::deps::{EngineDependencies, RuntimeHandles};
use crate::events::LauncherEvents;
use crate::fees::HttpFeeProvider;
use crate::observer::WalletObserver;
use crate::services::{Node, ServiceFactory, Vault};
use crate::teardown::{self, TeardownListener, TeardownPlan, TeardownStep};
use crate::{EngineError, IllegalState};
use glew_schema::{
    selectable_years, AddressKind, ChainYear, FeeEstimate, FeesSection, History, NetworkKind,
    Settings, WalletSeed,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub network: NetworkKind,
    pub worker_threads: usize,
    pub shutdown_timeout: Duration,
    pub fees: FeesSection,
}

impl LauncherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            network: settings.network.kind,
            worker_threads: settings.engine.worker_threads,
            shutdown_timeout: settings.shutdown_timeout(),
            fees: settings.fees.clone(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Vault and concurrency resources kept across a suspend.
pub struct SuspendedState {
    pub vault: Arc<dyn Vault>,
    pub observer: Arc<dyn WalletObserver>,
    pub deps: EngineDependencies,
}

pub struct StartedState {
    pub suspended: SuspendedState,
    pub node: Arc<dyn Node>,
}

pub(crate) struct StartingState {
    observer: Arc<dyn WalletObserver>,
    deps: EngineDependencies,
}

pub(crate) enum LauncherState {
    Initialized,
    Starting(StartingState),
    Started(StartedState),
    Suspending(Arc<dyn WalletObserver>),
    Suspended(SuspendedState),
    Stopping(Arc<dyn WalletObserver>),
    Failed(String),
    Stopped,
}

impl LauncherState {
    fn name(&self) -> &'static str {
        match self {
            LauncherState::Initialized => "initialized",
            LauncherState::Starting(_) => "starting",
            LauncherState::Started(_) => "started",
            LauncherState::Suspending(_) => "suspending",
            LauncherState::Suspended(_) => "suspended",
            LauncherState::Stopping(_) => "stopping",
            LauncherState::Failed(_) => "failed",
            LauncherState::Stopped => "stopped",
        }
    }
}

/// Services of a started engine.
pub(crate) struct Live {
    pub node: Arc<dyn Node>,
    pub vault: Arc<dyn Vault>,
    pub observer: Arc<dyn WalletObserver>,
    pub handles: RuntimeHandles,
}

pub(crate) struct LauncherInner {
    config: LauncherConfig,
    services: Arc<dyn ServiceFactory>,
    fees: HttpFeeProvider,
    state: Mutex<LauncherState>,
    teardown_listener: Mutex<Option<TeardownListener>>,
}

impl LauncherInner {
    fn state(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listener(&self) -> Option<TeardownListener> {
        self.teardown_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observer that node and wallet notifications are published to.
    pub(crate) fn observer(&self) -> Result<Arc<dyn WalletObserver>, EngineError> {
        match &*self.state() {
            LauncherState::Starting(s) => Ok(Arc::clone(&s.observer)),
            LauncherState::Started(s) => Ok(Arc::clone(&s.suspended.observer)),
            LauncherState::Suspended(s) => Ok(Arc::clone(&s.observer)),
            LauncherState::Suspending(o) | LauncherState::Stopping(o) => Ok(Arc::clone(o)),
            LauncherState::Failed(e) => Err(EngineError::StartupFailure(e.clone())),
            LauncherState::Initialized => Err(IllegalState::Initialized.into()),
            LauncherState::Stopped => Err(IllegalState::Stopped.into()),
        }
    }

    pub(crate) fn update_model(
        &self,
        update: impl FnOnce(&dyn WalletObserver),
    ) -> Result<(), EngineError> {
        let observer = self.observer()?;
        update(observer.as_ref());
        Ok(())
    }

    pub(crate) fn vault(&self) -> Option<(Arc<dyn Vault>, RuntimeHandles)> {
        match &*self.state() {
            LauncherState::Started(s) => {
                Some((Arc::clone(&s.suspended.vault), s.suspended.deps.handles()))
            }
            LauncherState::Suspended(s) => Some((Arc::clone(&s.vault), s.deps.handles())),
            _ => None,
        }
    }

    pub(crate) fn live(&self) -> Option<Live> {
        match &*self.state() {
            LauncherState::Started(s) => Some(Live {
                node: Arc::clone(&s.node),
                vault: Arc::clone(&s.suspended.vault),
                observer: Arc::clone(&s.suspended.observer),
                handles: s.suspended.deps.handles(),
            }),
            _ => None,
        }
    }

    /// Best known chain height: the higher of tip and peer estimate while
    /// started, the estimate while suspended.
    pub(crate) fn estimated_height(&self) -> Option<i64> {
        match &*self.state() {
            LauncherState::Started(s) => {
                let model = s.suspended.observer.snapshot();
                match (model.tip, model.estimated_height) {
                    (-1, -1) => None,
                    (tip, estimated) if tip < estimated => Some(estimated),
                    (tip, _) => Some(tip),
                }
            }
            LauncherState::Suspended(s) => {
                let estimated = s.observer.snapshot().estimated_height;
                (estimated != -1).then_some(estimated)
            }
            _ => None,
        }
    }

    fn commit_start(
        self: &Arc<Self>,
        outcome: Result<(Arc<dyn Vault>, Arc<dyn Node>), (EngineError, Option<Arc<dyn Vault>>)>,
        done: Completion<Result<(), EngineError>>,
    ) {
        let mut state = self.state();
        let starting = match std::mem::replace(&mut *state, LauncherState::Stopped) {
            LauncherState::Starting(s) => s,
            other => {
                let name = other.name();
                *state = other;
                drop(state);
                error!("node/vault start finished while {name}");
                done.complete(Err(EngineError::Internal(format!(
                    "start finished while {name}"
                ))));
                return;
            }
        };

        match outcome {
            Ok((vault, node)) => {
                let observer = Arc::clone(&starting.observer);
                *state = LauncherState::Started(StartedState {
                    suspended: SuspendedState {
                        vault,
                        observer: starting.observer,
                        deps: starting.deps,
                    },
                    node,
                });
                drop(state);
                observer.running_changed(true);
                observer.suspended_changed(false);
                info!("node/vault engine started");
                done.complete(Ok(()));
            }
            Err((e, vault)) => {
                let reason = match e {
                    EngineError::StartupFailure(reason) => reason,
                    other => other.to_string(),
                };
                error!("failure starting node/vault engine: {reason}");
                *state = LauncherState::Failed(reason.clone());
                drop(state);

                let plan = TeardownPlan {
                    event_loop: starting.deps.handles().event_loop,
                    node: None,
                    vault,
                    deps: Some(starting.deps),
                    shutdown_timeout: self.config.shutdown_timeout,
                };
                let listener = self.listener();
                teardown::spawn(
                    plan,
                    move |step, result| {
                        if let Some(listener) = &listener {
                            listener(step, result);
                        }
                    },
                    move || done.complete(Err(EngineError::StartupFailure(reason))),
                );
            }
        }
    }

    /// Release `suspended` (and `node` when present) and commit `Stopped`.
    fn stop_all(
        self: &Arc<Self>,
        node: Option<Arc<dyn Node>>,
        suspended: SuspendedState,
        done: Completion<()>,
    ) {
        let SuspendedState {
            vault,
            observer,
            deps,
        } = suspended;
        let plan = TeardownPlan {
            event_loop: deps.handles().event_loop,
            node,
            vault: Some(vault),
            deps: Some(deps),
            shutdown_timeout: self.config.shutdown_timeout,
        };
        let inner = Arc::clone(self);
        teardown::spawn(
            plan,
            self.step_publisher(observer),
            move || {
                *inner.state() = LauncherState::Stopped;
                done.complete(());
            },
        );
    }

    fn step_publisher(
        &self,
        observer: Arc<dyn WalletObserver>,
    ) -> impl Fn(TeardownStep, &Result<(), EngineError>) + Send + 'static {
        let listener = self.listener();
        move |step, result| {
            if result.is_ok() {
                match step {
                    TeardownStep::NodeStop => {
                        observer.sync_state_changed(false);
                        observer.suspended_changed(true);
                        observer.tip_changed(-1);
                    }
                    TeardownStep::VaultStop => {
                        observer.running_changed(false);
                        observer.suspended_changed(false);
                        observer.tip_changed(-1);
                    }
                    TeardownStep::WorkerPoolShutdown | TeardownStep::EventLoopShutdown => {}
                }
            }
            if let Some(listener) = &listener {
                listener(step, result);
            }
        }
    }
}

async fn start_sequence(
    inner: &Arc<LauncherInner>,
    handles: &RuntimeHandles,
    resumed: Option<Arc<dyn Vault>>,
    observer: &Arc<dyn WalletObserver>,
) -> Result<(Arc<dyn Vault>, Arc<dyn Node>), (EngineError, Option<Arc<dyn Vault>>)> {
    let vault = match resumed {
        Some(vault) => vault,
        None => inner
            .services
            .create_vault(handles.clone(), Arc::new(LauncherEvents::new(inner)))
            .await
            .map_err(|e| (e, None))?,
    };
    let fail = |e: EngineError| (e, Some(Arc::clone(&vault)));

    vault.load().await.map_err(fail)?;
    let keys = vault.script_pub_keys().await.map_err(fail)?;
    let tally = vault.available_coins().await.map_err(fail)?;
    observer.funds_changed(tally.available_total(), tally.pending_receive_total());

    let node = inner
        .services
        .create_node(handles, Arc::new(LauncherEvents::new(inner)));
    node.add_script_pub_keys(keys).await.map_err(fail)?;
    node.add_outpoints(tally.outpoints()).await.map_err(fail)?;
    for tx in tally.pending_transactions() {
        debug!("resubmitting pending transaction {}", tx.tx_id);
        node.add_transaction(tx).map_err(fail)?;
    }
    node.start().await.map_err(fail)?;
    Ok((vault, node))
}

fn spawn_query<T, F>(handles: &RuntimeHandles, done: Completion<Result<T, EngineError>>, query: F)
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    handles.event_loop.spawn(async move {
        done.complete(query.await);
    });
}

/// The production engine: a vault plus a peer node over owned runtimes.
pub struct NodeVaultLauncher {
    inner: Arc<LauncherInner>,
}

impl NodeVaultLauncher {
    pub fn new(config: LauncherConfig, services: Arc<dyn ServiceFactory>) -> Self {
        let fees = HttpFeeProvider::new(&config.fees);
        Self {
            inner: Arc::new(LauncherInner {
                config,
                services,
                fees,
                state: Mutex::new(LauncherState::Initialized),
                teardown_listener: Mutex::new(None),
            }),
        }
    }

    /// Observe every teardown step this launcher runs.
    pub fn set_teardown_listener(&self, listener: TeardownListener) {
        *self
            .inner
            .teardown_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn state_name(&self) -> &'static str {
        self.inner.state().name()
    }

    pub fn estimated_height(&self) -> Option<i64> {
        self.inner.estimated_height()
    }

    fn first_run(
        &self,
        entropy: Option<Vec<u8>>,
        year: ChainYear,
        done: Completion<Result<Vec<String>, EngineError>>,
    ) {
        let services = Arc::clone(&self.inner.services);
        let worker_threads = self.inner.config.worker_threads;
        let timeout = self.inner.config.shutdown_timeout;
        let slot = Arc::new(Mutex::new(Some(done)));
        let thread_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("glew-first-run".to_owned())
            .spawn(move || {
                let Some(done) = take_pending(&thread_slot) else {
                    return;
                };
                info!(
                    "initializing {} wallet from {year}",
                    if entropy.is_some() { "recovered" } else { "new" }
                );
                let deps = match EngineDependencies::new(worker_threads) {
                    Ok(deps) => deps,
                    Err(e) => return done.complete(Err(e)),
                };
                let handles = deps.handles();
                let result = handles.event_loop.block_on(services.initialize_wallet(
                    handles.clone(),
                    entropy,
                    year,
                ));
                let _ = deps.shutdown_gracefully(timeout);
                if let Err(e) = &result {
                    error!("wallet initialization failed: {e}");
                }
                done.complete(result);
            });
        if let Err(e) = spawned {
            error!("cannot spawn first-run thread: {e}");
            if let Some(done) = take_pending(&slot) {
                done.complete_later(Err(EngineError::Runtime(format!(
                    "cannot spawn first-run thread: {e}"
                ))));
            }
        }
    }
}

impl WalletEngine for NodeVaultLauncher {
    fn name(&self) -> &str {
        "launcher"
    }

    fn start(
        &self,
        observer: Arc<dyn WalletObserver>,
        done: Completion<Result<(), EngineError>>,
    ) {
        let mut state = self.inner.state();
        let (handles, resumed) = match std::mem::replace(&mut *state, LauncherState::Stopped) {
            LauncherState::Initialized => {
                let deps = match EngineDependencies::new(self.inner.config.worker_threads) {
                    Ok(deps) => deps,
                    Err(e) => {
                        *state = LauncherState::Failed(e.to_string());
                        drop(state);
                        return done.complete_later(Err(e));
                    }
                };
                let handles = deps.handles();
                *state = LauncherState::Starting(StartingState {
                    observer: Arc::clone(&observer),
                    deps,
                });
                (handles, None)
            }
            LauncherState::Suspended(s) => {
                let handles = s.deps.handles();
                let vault = Arc::clone(&s.vault);
                *state = LauncherState::Starting(StartingState {
                    observer: Arc::clone(&observer),
                    deps: s.deps,
                });
                (handles, Some(vault))
            }
            other => {
                let err = match &other {
                    LauncherState::Failed(e) => EngineError::StartupFailure(e.clone()),
                    LauncherState::Stopped => IllegalState::Stopped.into(),
                    running => EngineError::Internal(format!("start while {}", running.name())),
                };
                *state = other;
                drop(state);
                warn!("refusing start: {err}");
                return done.complete_later(Err(err));
            }
        };
        drop(state);

        info!(
            "starting node/vault engine{}",
            if resumed.is_some() { " from suspended state" } else { "" }
        );
        let inner = Arc::clone(&self.inner);
        let event_loop = handles.event_loop.clone();
        event_loop.spawn(async move {
            let outcome = start_sequence(&inner, &handles, resumed, &observer).await;
            inner.commit_start(outcome, done);
        });
    }

    fn stop(&self, done: Completion<()>) {
        let mut state = self.inner.state();
        match std::mem::replace(&mut *state, LauncherState::Stopped) {
            LauncherState::Started(s) => {
                *state = LauncherState::Stopping(Arc::clone(&s.suspended.observer));
                drop(state);
                info!("stopping node/vault engine");
                self.inner.stop_all(Some(s.node), s.suspended, done);
            }
            LauncherState::Suspended(s) => {
                *state = LauncherState::Stopping(Arc::clone(&s.observer));
                drop(state);
                info!("stopping suspended vault");
                self.inner.stop_all(None, s, done);
            }
            LauncherState::Failed(e) => {
                *state = LauncherState::Failed(e.clone());
                drop(state);
                error!("already stopped with error {e}");
                done.complete_later(());
            }
            other => {
                let name = other.name();
                *state = other;
                drop(state);
                info!("already stopped ({name})");
                done.complete_later(());
            }
        }
    }

    fn suspend(&self, done: Completion<()>) {
        let mut state = self.inner.state();
        match std::mem::replace(&mut *state, LauncherState::Stopped) {
            LauncherState::Started(s) => {
                let StartedState { suspended, node } = s;
                *state = LauncherState::Suspending(Arc::clone(&suspended.observer));
                drop(state);
                info!("suspending node");

                let plan = TeardownPlan {
                    event_loop: suspended.deps.handles().event_loop,
                    node: Some(node),
                    vault: None,
                    deps: None,
                    shutdown_timeout: self.inner.config.shutdown_timeout,
                };
                let publish = self.inner.step_publisher(Arc::clone(&suspended.observer));
                let inner = Arc::clone(&self.inner);
                teardown::spawn(plan, publish, move || {
                    *inner.state() = LauncherState::Suspended(suspended);
                    done.complete(());
                });
            }
            LauncherState::Failed(e) => {
                *state = LauncherState::Failed(e.clone());
                drop(state);
                error!("in error state {e}");
                done.complete_later(());
            }
            other => {
                *state = other;
                drop(state);
                info!("already suspended");
                done.complete_later(());
            }
        }
    }

    fn new_wallet(&self, year: ChainYear, done: Completion<Result<Vec<String>, EngineError>>) {
        self.first_run(None, year, done);
    }

    fn recover_wallet(
        &self,
        entropy: Vec<u8>,
        year: ChainYear,
        done: Completion<Result<Vec<String>, EngineError>>,
    ) {
        self.first_run(Some(entropy), year, done);
    }

    fn fees(&self, done: Completion<Result<FeeEstimate, EngineError>>) {
        let Some((_, handles)) = self.inner.vault() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        let provider = self.inner.fees.clone();
        handles.thread_pool.spawn_blocking(move || done.complete(provider.fetch()));
    }

    fn load_latest_address(
        &self,
        kind: AddressKind,
        done: Completion<Result<String, EngineError>>,
    ) {
        if !kind.is_receive() {
            return done.complete_later(Err(EngineError::Internal(format!(
                "{kind} is not a receive address kind"
            ))));
        }
        let Some((vault, handles)) = self.inner.vault() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        spawn_query(&handles, done, async move { vault.last_address(kind).await });
    }

    fn pay(
        &self,
        amount: u64,
        to: String,
        cost_rate: f64,
        done: Completion<Result<(), EngineError>>,
    ) {
        let Some((vault, handles)) = self.inner.vault() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        let Some(height) = self
            .inner
            .estimated_height()
            .and_then(|h| u32::try_from(h).ok())
        else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        spawn_query(&handles, done, async move {
            vault.pay(amount, &to, cost_rate, height).await
        });
    }

    fn estimate_cost(
        &self,
        amount: u64,
        to: String,
        cost_rate: f64,
        done: Completion<Result<u64, EngineError>>,
    ) {
        let Some((vault, handles)) = self.inner.vault() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        spawn_query(&handles, done, async move {
            vault.estimate_cost(amount, &to, cost_rate).await
        });
    }

    fn load_private_key(&self, done: Completion<Result<WalletSeed, EngineError>>) {
        if let LauncherState::Failed(e) = &*self.inner.state() {
            let err = EngineError::StartupFailure(e.clone());
            return done.complete_later(Err(err));
        }
        let Some(live) = self.inner.live() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        let vault = live.vault;
        spawn_query(&live.handles, done, async move {
            vault.load_private_key().await
        });
    }

    fn history(&self, done: Completion<Result<History, EngineError>>) {
        let Some(live) = self.inner.live() else {
            return done.complete_later(Err(EngineError::ServiceUnavailable));
        };
        let Live { node, vault, .. } = live;
        spawn_query(&live.handles, done, async move {
            let entries = vault.history().await?;
            let heights: BTreeSet<u32> = entries.iter().map(|e| e.height).collect();
            let mut timestamps = BTreeMap::new();
            for height in heights {
                if let Some(ts) = node.block_timestamp(height).await? {
                    timestamps.insert(height, ts);
                }
            }
            Ok(History {
                entries,
                timestamps,
            })
        });
    }

    fn selectable_years(&self) -> Vec<ChainYear> {
        selectable_years(self.inner.config.network)
    }
}
