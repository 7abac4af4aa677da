//! The lifecycle state machine driving one wallet engine at a time.
//!
//! Public operations take the control lock only long enough to commit the next
//! state; every engine call and every caller completion runs after the lock is
//! released. Engine completions re-enter through the [`ControlQueue`] and
//! commit the settled state there (`evaluate_after_start`,
//! `evaluate_after_stop`). At most one engine start, stop or suspend call is
//! outstanding at any time.

use crate::concurrency::ControlQueue;
use crate::lifecycle::{validate_transition, LifecyclePhase, OrchestratorState};
use crate::CoreError;
use glew_engine::{Completion, EngineError, EngineFactory, WalletEngine, WalletObserver};
use glew_schema::{AddressKind, ChainYear, FeeEstimate, History, WalletSeed};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Invoked for conditions the orchestrator cannot recover from: engine startup
/// failures and completions arriving in an unexpected state.
pub type FatalHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Log the condition and abort the process.
pub fn abort_on_fatal() -> FatalHandler {
    Arc::new(|reason| {
        error!("fatal lifecycle condition: {reason}");
        std::process::abort();
    })
}

type StartCompletion = Completion<Result<(), CoreError>>;

#[derive(Clone)]
struct Session {
    id: u64,
    engine: Arc<dyn WalletEngine>,
    client: Arc<dyn WalletObserver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Full,
    Suspend,
}

enum Slot {
    Idle,
    Starting(Session),
    StopRequestedWhileStarting(Session),
    Running(Session),
    Stopping(Session, StopKind),
    StartRequestedWhileStopping {
        session: Session,
        kind: StopKind,
        client: Arc<dyn WalletObserver>,
    },
}

impl Slot {
    fn kind(&self) -> OrchestratorState {
        match self {
            Slot::Idle => OrchestratorState::Idle,
            Slot::Starting(_) => OrchestratorState::Starting,
            Slot::StopRequestedWhileStarting(_) => OrchestratorState::StopRequestedWhileStarting,
            Slot::Running(_) => OrchestratorState::Running,
            Slot::Stopping(..) => OrchestratorState::Stopping,
            Slot::StartRequestedWhileStopping { .. } => {
                OrchestratorState::StartRequestedWhileStopping
            }
        }
    }

    fn session(&self) -> Option<&Session> {
        match self {
            Slot::Idle => None,
            Slot::Starting(s)
            | Slot::StopRequestedWhileStarting(s)
            | Slot::Running(s)
            | Slot::Stopping(s, _)
            | Slot::StartRequestedWhileStopping { session: s, .. } => Some(s),
        }
    }
}

enum EngineCall {
    Start(Session),
    Stop(Session, StopKind),
}

#[derive(Debug, Clone)]
enum StartOutcome {
    Started,
    Superseded,
    Failed(String),
}

impl StartOutcome {
    fn into_result(self) -> Result<(), CoreError> {
        match self {
            StartOutcome::Started => Ok(()),
            StartOutcome::Superseded => Err(CoreError::Superseded),
            StartOutcome::Failed(reason) => Err(CoreError::StartupFailure(reason)),
        }
    }
}

/// Work collected under the control lock and run after it is released.
#[derive(Default)]
struct Effects {
    fatal: Option<String>,
    stopped: Vec<Completion<()>>,
    started: Vec<(StartCompletion, StartOutcome)>,
    call: Option<EngineCall>,
}

impl Effects {
    fn fatal(&mut self, reason: String) {
        if self.fatal.is_none() {
            self.fatal = Some(reason);
        }
    }
}

struct Control {
    slot: Slot,
    parked: Option<Session>,
    full_stop_after_suspend: bool,
    stop_callbacks: VecDeque<Completion<()>>,
    start_callbacks: VecDeque<StartCompletion>,
}

impl Control {
    fn commit(&mut self, from: OrchestratorState, next: Slot, effects: &mut Effects) {
        let to = next.kind();
        match validate_transition(from, to) {
            Ok(()) => debug!("lifecycle {from} -> {to}"),
            Err(e) => effects.fatal(e.to_string()),
        }
        self.slot = next;
    }

    fn settle_stops(&mut self, effects: &mut Effects) {
        effects.stopped.extend(self.stop_callbacks.drain(..));
    }

    fn settle_starts(&mut self, outcome: &StartOutcome, effects: &mut Effects) {
        effects.started.extend(
            self.start_callbacks
                .drain(..)
                .map(|done| (done, outcome.clone())),
        );
    }
}

struct Shared {
    factory: EngineFactory,
    control: Mutex<Control>,
    settled: Condvar,
    queue: ControlQueue,
    fatal: RwLock<FatalHandler>,
    next_session: AtomicU64,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_session(&self, control: &mut Control, client: Arc<dyn WalletObserver>) -> Session {
        let engine = match control.parked.take() {
            Some(parked) => {
                info!("resuming suspended {} engine", parked.engine.name());
                parked.engine
            }
            None => (self.factory)(),
        };
        Session {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            engine,
            client,
        }
    }

    fn run(self: &Arc<Self>, effects: Effects) {
        self.settled.notify_all();
        if let Some(reason) = effects.fatal {
            error!("{reason}");
            let handler = Arc::clone(&*self.fatal.read().unwrap_or_else(PoisonError::into_inner));
            handler(&reason);
        }
        for done in effects.stopped {
            done.complete(());
        }
        for (done, outcome) in effects.started {
            done.complete(outcome.into_result());
        }
        if let Some(call) = effects.call {
            self.issue(call);
        }
    }

    fn issue(self: &Arc<Self>, call: EngineCall) {
        let weak = Arc::downgrade(self);
        match call {
            EngineCall::Start(session) => {
                debug!("engine start ({})", session.engine.name());
                let id = session.id;
                let done = Completion::new(move |result: Result<(), EngineError>| {
                    Shared::reenter(&weak, move |shared| shared.evaluate_after_start(id, result));
                })
                .labelled("engine start");
                session.engine.start(session.client, done);
            }
            EngineCall::Stop(session, kind) => {
                debug!("engine {kind:?} stop ({})", session.engine.name());
                let id = session.id;
                let done = Completion::new(move |()| {
                    Shared::reenter(&weak, move |shared| shared.evaluate_after_stop(id));
                })
                .labelled("engine stop");
                match kind {
                    StopKind::Full => session.engine.stop(done),
                    StopKind::Suspend => session.engine.suspend(done),
                }
            }
        }
    }

    fn reenter(weak: &Weak<Shared>, job: impl FnOnce(&Arc<Shared>) + Send + 'static) {
        let Some(shared) = weak.upgrade() else {
            warn!("engine completion after the orchestrator was dropped");
            return;
        };
        let target = Arc::clone(&shared);
        if let Err(e) = shared.queue.post(move || job(&target)) {
            error!("cannot deliver engine completion: {e}");
        }
    }

    fn evaluate_after_start(self: &Arc<Self>, id: u64, result: Result<(), EngineError>) {
        let mut effects = Effects::default();
        {
            let mut control = self.control();
            let from = control.slot.kind();
            match (std::mem::replace(&mut control.slot, Slot::Idle), result) {
                (Slot::Starting(session), Ok(())) if session.id == id => {
                    control.commit(from, Slot::Running(session), &mut effects);
                    control.settle_starts(&StartOutcome::Started, &mut effects);
                    info!("wallet engine running");
                }
                (Slot::StopRequestedWhileStarting(session), Ok(())) if session.id == id => {
                    control.commit(from, Slot::Running(session.clone()), &mut effects);
                    control.settle_starts(&StartOutcome::Started, &mut effects);
                    info!("wallet engine running, replaying queued stop");
                    control.commit(
                        OrchestratorState::Running,
                        Slot::Stopping(session.clone(), StopKind::Full),
                        &mut effects,
                    );
                    effects.call = Some(EngineCall::Stop(session, StopKind::Full));
                }
                (Slot::Starting(session) | Slot::StopRequestedWhileStarting(session), Err(e))
                    if session.id == id =>
                {
                    let reason = match e {
                        EngineError::StartupFailure(reason) => reason,
                        other => other.to_string(),
                    };
                    effects.fatal(format!("cannot launch wallet engine: {reason}"));
                    control.commit(from, Slot::Idle, &mut effects);
                    control.full_stop_after_suspend = false;
                    control.settle_stops(&mut effects);
                    control.settle_starts(&StartOutcome::Failed(reason), &mut effects);
                }
                (other, _) => {
                    control.slot = other;
                    effects.fatal(format!("engine start completed while {from}"));
                }
            }
        }
        self.run(effects);
    }

    fn evaluate_after_stop(self: &Arc<Self>, id: u64) {
        let mut effects = Effects::default();
        {
            let mut control = self.control();
            let from = control.slot.kind();
            match std::mem::replace(&mut control.slot, Slot::Idle) {
                Slot::Stopping(session, StopKind::Suspend)
                    if session.id == id && control.full_stop_after_suspend =>
                {
                    control.full_stop_after_suspend = false;
                    control.commit(from, Slot::Idle, &mut effects);
                    debug!("stop requested during suspend, stopping suspended engine");
                    control.commit(
                        OrchestratorState::Idle,
                        Slot::Stopping(session.clone(), StopKind::Full),
                        &mut effects,
                    );
                    effects.call = Some(EngineCall::Stop(session, StopKind::Full));
                }
                Slot::Stopping(session, kind) if session.id == id => {
                    control.commit(from, Slot::Idle, &mut effects);
                    if kind == StopKind::Suspend {
                        info!("wallet engine suspended");
                        control.parked = Some(session);
                    } else {
                        info!("wallet engine stopped");
                    }
                    control.settle_stops(&mut effects);
                    control.settle_starts(&StartOutcome::Superseded, &mut effects);
                }
                Slot::StartRequestedWhileStopping {
                    session,
                    kind,
                    client,
                } if session.id == id => {
                    control.commit(from, Slot::Idle, &mut effects);
                    if kind == StopKind::Suspend {
                        control.parked = Some(session);
                    }
                    control.settle_stops(&mut effects);
                    debug!("replaying queued start");
                    let next = self.open_session(&mut control, client);
                    control.commit(
                        OrchestratorState::Idle,
                        Slot::Starting(next.clone()),
                        &mut effects,
                    );
                    effects.call = Some(EngineCall::Start(next));
                }
                other => {
                    control.slot = other;
                    effects.fatal(format!("engine stop completed while {from}"));
                }
            }
        }
        self.run(effects);
    }
}

/// Serializes start/stop/suspend of the wallet engine.
///
/// A request that arrives while the opposite operation is in flight is
/// queued and replayed once it settles; stop completions fire in arrival
/// order once `Idle` is reached.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    shared: Arc<Shared>,
}

impl LifecycleOrchestrator {
    pub fn new(factory: EngineFactory) -> Result<Self, CoreError> {
        let queue = ControlQueue::spawn("glew-control")?;
        Ok(Self {
            shared: Arc::new(Shared {
                factory,
                control: Mutex::new(Control {
                    slot: Slot::Idle,
                    parked: None,
                    full_stop_after_suspend: false,
                    stop_callbacks: VecDeque::new(),
                    start_callbacks: VecDeque::new(),
                }),
                settled: Condvar::new(),
                queue,
                fatal: RwLock::new(abort_on_fatal()),
                next_session: AtomicU64::new(1),
            }),
        })
    }

    /// Replace the default abort-on-fatal policy.
    pub fn set_fatal_handler(&self, handler: FatalHandler) {
        *self
            .shared
            .fatal
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub fn start(&self, client: Arc<dyn WalletObserver>, done: Completion<Result<(), CoreError>>) {
        let mut effects = Effects::default();
        {
            let mut control = self.shared.control();
            let from = control.slot.kind();
            match std::mem::replace(&mut control.slot, Slot::Idle) {
                Slot::Idle => {
                    control.start_callbacks.push_back(done);
                    let session = self.shared.open_session(&mut control, client);
                    control.commit(from, Slot::Starting(session.clone()), &mut effects);
                    effects.call = Some(EngineCall::Start(session));
                }
                Slot::StopRequestedWhileStarting(session) => {
                    control.start_callbacks.push_back(done);
                    control.commit(from, Slot::Starting(session), &mut effects);
                }
                Slot::Stopping(session, kind) => {
                    control.start_callbacks.push_back(done);
                    control.full_stop_after_suspend = false;
                    control.commit(
                        from,
                        Slot::StartRequestedWhileStopping {
                            session,
                            kind,
                            client,
                        },
                        &mut effects,
                    );
                }
                Slot::Running(session) => {
                    control.slot = Slot::Running(session);
                    effects.started.push((done, StartOutcome::Started));
                }
                other => {
                    debug!("start while {from}, already starting");
                    control.slot = other;
                    control.start_callbacks.push_back(done);
                }
            }
        }
        self.shared.run(effects);
    }

    /// Stop the engine; `done` fires once the orchestrator is `Idle`.
    pub fn stop(&self, done: Option<Completion<()>>) {
        let mut effects = Effects::default();
        {
            let mut control = self.shared.control();
            let from = control.slot.kind();
            if matches!(control.slot, Slot::Idle) && control.parked.is_none() {
                debug!("stop while idle");
                effects.stopped.extend(done);
            } else {
                control.stop_callbacks.extend(done);
                match std::mem::replace(&mut control.slot, Slot::Idle) {
                    Slot::Idle => {
                        if let Some(parked) = control.parked.take() {
                            control.commit(
                                from,
                                Slot::Stopping(parked.clone(), StopKind::Full),
                                &mut effects,
                            );
                            effects.call = Some(EngineCall::Stop(parked, StopKind::Full));
                        }
                    }
                    Slot::Running(session) => {
                        control.commit(
                            from,
                            Slot::Stopping(session.clone(), StopKind::Full),
                            &mut effects,
                        );
                        effects.call = Some(EngineCall::Stop(session, StopKind::Full));
                    }
                    Slot::StartRequestedWhileStopping { session, kind, .. } => {
                        if kind == StopKind::Suspend {
                            control.full_stop_after_suspend = true;
                        }
                        control.commit(from, Slot::Stopping(session, kind), &mut effects);
                    }
                    Slot::Starting(session) => {
                        control.commit(
                            from,
                            Slot::StopRequestedWhileStarting(session),
                            &mut effects,
                        );
                    }
                    Slot::Stopping(session, kind) => {
                        if kind == StopKind::Suspend {
                            control.full_stop_after_suspend = true;
                        }
                        control.slot = Slot::Stopping(session, kind);
                    }
                    other @ Slot::StopRequestedWhileStarting(_) => {
                        control.slot = other;
                    }
                }
            }
        }
        self.shared.run(effects);
    }

    /// Stop networking but keep the engine parked for a fast resume.
    ///
    /// Only meaningful while `Running`; in any other state `done` fires
    /// without an engine call.
    pub fn suspend(&self, done: Completion<()>) {
        let mut effects = Effects::default();
        {
            let mut control = self.shared.control();
            let from = control.slot.kind();
            match std::mem::replace(&mut control.slot, Slot::Idle) {
                Slot::Running(session) => {
                    control.stop_callbacks.push_back(done);
                    control.commit(
                        from,
                        Slot::Stopping(session.clone(), StopKind::Suspend),
                        &mut effects,
                    );
                    effects.call = Some(EngineCall::Stop(session, StopKind::Suspend));
                }
                other => {
                    debug!("suspend while {from}, nothing to do");
                    control.slot = other;
                    effects.stopped.push(done);
                }
            }
        }
        self.shared.run(effects);
    }

    pub fn phase(&self) -> LifecyclePhase {
        let control = self.shared.control();
        LifecyclePhase {
            state: control.slot.kind(),
            suspended: control.parked.is_some(),
        }
    }

    /// The live engine, for every state but `Idle`.
    pub fn engine(&self) -> Option<Arc<dyn WalletEngine>> {
        self.shared
            .control()
            .slot
            .session()
            .map(|s| Arc::clone(&s.engine))
    }

    /// A fresh engine for first-run operations, only while nothing is live or
    /// parked.
    pub(crate) fn idle_engine(&self) -> Option<Arc<dyn WalletEngine>> {
        let control = self.shared.control();
        if matches!(control.slot, Slot::Idle) && control.parked.is_none() {
            Some((self.shared.factory)())
        } else {
            None
        }
    }

    /// Block until `pred` holds for the current phase or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(LifecyclePhase) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control();
        loop {
            let phase = LifecyclePhase {
                state: control.slot.kind(),
                suspended: control.parked.is_some(),
            };
            if pred(phase) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            control = self
                .shared
                .settled
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, |phase| phase.is_idle())
    }

    fn with_engine<T>(
        &self,
        done: Completion<Result<T, EngineError>>,
        call: impl FnOnce(&dyn WalletEngine, Completion<Result<T, EngineError>>),
    ) {
        match self.engine() {
            Some(engine) => call(engine.as_ref(), done),
            None => done.complete(Err(EngineError::ServiceUnavailable)),
        }
    }

    pub fn fees(&self, done: Completion<Result<FeeEstimate, EngineError>>) {
        self.with_engine(done, |engine, done| engine.fees(done));
    }

    pub fn load_latest_address(
        &self,
        kind: AddressKind,
        done: Completion<Result<String, EngineError>>,
    ) {
        self.with_engine(done, |engine, done| engine.load_latest_address(kind, done));
    }

    pub fn pay(
        &self,
        amount: u64,
        to: String,
        cost_rate: f64,
        done: Completion<Result<(), EngineError>>,
    ) {
        self.with_engine(done, |engine, done| engine.pay(amount, to, cost_rate, done));
    }

    pub fn estimate_cost(
        &self,
        amount: u64,
        to: String,
        cost_rate: f64,
        done: Completion<Result<u64, EngineError>>,
    ) {
        self.with_engine(done, |engine, done| {
            engine.estimate_cost(amount, to, cost_rate, done);
        });
    }

    pub fn load_private_key(&self, done: Completion<Result<WalletSeed, EngineError>>) {
        self.with_engine(done, |engine, done| engine.load_private_key(done));
    }

    pub fn history(&self, done: Completion<Result<History, EngineError>>) {
        self.with_engine(done, |engine, done| engine.history(done));
    }

    pub fn selectable_years(&self) -> Vec<ChainYear> {
        self.engine()
            .unwrap_or_else(|| (self.shared.factory)())
            .selectable_years()
    }
}
