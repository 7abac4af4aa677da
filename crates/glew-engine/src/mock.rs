//! Scripted engine double for lifecycle tests.
//!
//! Start and stop completions are parked until the test releases them (or,
//! in auto mode, delivered after a short delay), and every call is journaled
//! together with the number of concurrently in-flight start/stop calls.

use crate::backend::{EngineFactory, WalletEngine};
use crate::completion::Completion;
use crate::observer::WalletObserver;
use crate::EngineError;
use glew_schema::{
    selectable_years, AddressKind, ChainYear, FeeEstimate, History, NetworkKind, WalletSeed,
};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Start,
    Stop,
    Suspend,
    NewWallet(ChainYear),
    RecoverWallet(ChainYear),
    Query(&'static str),
}

type StartCompletion = Completion<Result<(), EngineError>>;

struct JournalState {
    calls: Vec<EngineCall>,
    engines_created: usize,
    in_flight: usize,
    max_in_flight: usize,
    auto_delay: Option<Duration>,
    fail_start: Option<String>,
    pending_starts: VecDeque<StartCompletion>,
    pending_stops: VecDeque<Completion<()>>,
    observer: Option<Arc<dyn WalletObserver>>,
}

/// Shared journal and control surface of every [`ScriptedEngine`] built by
/// one factory.
#[derive(Clone)]
pub struct ScriptJournal {
    state: Arc<(Mutex<JournalState>, Condvar)>,
}

impl Default for ScriptJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptJournal {
    /// Manual mode: start and stop completions wait for `release_*`.
    pub fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(JournalState {
                    calls: Vec::new(),
                    engines_created: 0,
                    in_flight: 0,
                    max_in_flight: 0,
                    auto_delay: None,
                    fail_start: None,
                    pending_starts: VecDeque::new(),
                    pending_stops: VecDeque::new(),
                    observer: None,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Auto mode: completions are delivered after `delay` on helper threads.
    pub fn auto(delay: Duration) -> Self {
        let journal = Self::new();
        journal.lock().auto_delay = Some(delay);
        journal
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.state.1.notify_all();
    }

    pub fn factory(&self) -> EngineFactory {
        let journal = self.clone();
        Arc::new(move || {
            journal.lock().engines_created += 1;
            Arc::new(ScriptedEngine {
                journal: journal.clone(),
            }) as Arc<dyn WalletEngine>
        })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub fn engines_created(&self) -> usize {
        self.lock().engines_created
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Highest number of start/stop/suspend calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn pending_starts(&self) -> usize {
        self.lock().pending_starts.len()
    }

    pub fn pending_stops(&self) -> usize {
        self.lock().pending_stops.len()
    }

    /// Fail every subsequent start with `reason`; `None` restores success.
    pub fn fail_start(&self, reason: Option<&str>) {
        self.lock().fail_start = reason.map(str::to_owned);
    }

    /// Observer handed to the most recent start.
    pub fn observer(&self) -> Option<Arc<dyn WalletObserver>> {
        self.lock().observer.clone()
    }

    /// Block until `pred` holds or `timeout` elapses.
    pub fn wait_until(&self, timeout: Duration, pred: impl Fn(&ScriptJournal) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let guard = self.lock();
            let wait = (deadline - now).min(Duration::from_millis(10));
            let _ = self
                .state
                .1
                .wait_timeout(guard, wait)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn wait_for_pending_start(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |j| j.pending_starts() > 0)
    }

    pub fn wait_for_pending_stop(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |j| j.pending_stops() > 0)
    }

    /// Deliver the oldest parked start completion. Returns `false` if none.
    pub fn release_start(&self) -> bool {
        let (done, result) = {
            let mut state = self.lock();
            let Some(done) = state.pending_starts.pop_front() else {
                return false;
            };
            state.in_flight -= 1;
            let result = match &state.fail_start {
                Some(reason) => Err(EngineError::StartupFailure(reason.clone())),
                None => Ok(()),
            };
            (done, result)
        };
        self.notify();
        done.complete(result);
        true
    }

    /// Deliver the oldest parked stop or suspend completion.
    pub fn release_stop(&self) -> bool {
        let done = {
            let mut state = self.lock();
            let Some(done) = state.pending_stops.pop_front() else {
                return false;
            };
            state.in_flight -= 1;
            done
        };
        self.notify();
        done.complete(());
        true
    }

    fn begin(&self, call: EngineCall) -> Option<Duration> {
        let mut state = self.lock();
        trace!("scripted engine call {call:?}");
        state.calls.push(call);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.auto_delay
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
        self.notify();
    }
}

/// Engine whose start/stop/suspend are driven by a [`ScriptJournal`].
pub struct ScriptedEngine {
    journal: ScriptJournal,
}

impl ScriptedEngine {
    fn auto_complete<T: Send + 'static>(
        journal: ScriptJournal,
        delay: Duration,
        done: Completion<T>,
        value: impl FnOnce(&ScriptJournal) -> T + Send + 'static,
    ) {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let value = value(&journal);
            journal.lock().in_flight -= 1;
            journal.notify();
            done.complete(value);
        });
    }
}

impl WalletEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&self, observer: Arc<dyn WalletObserver>, done: Completion<Result<(), EngineError>>) {
        self.journal.lock().observer = Some(Arc::clone(&observer));
        let auto = self.journal.begin(EngineCall::Start);
        let done = done.map(move |result: Result<(), EngineError>| {
            if result.is_ok() {
                observer.running_changed(true);
            }
            result
        });
        match auto {
            Some(delay) => Self::auto_complete(self.journal.clone(), delay, done, |journal| {
                match &journal.lock().fail_start {
                    Some(reason) => Err(EngineError::StartupFailure(reason.clone())),
                    None => Ok(()),
                }
            }),
            None => {
                self.journal.lock().pending_starts.push_back(done);
                self.journal.notify();
            }
        }
    }

    fn stop(&self, done: Completion<()>) {
        let observer = self.journal.observer();
        let done = done.map(move |()| {
            if let Some(observer) = observer {
                observer.running_changed(false);
            }
        });
        match self.journal.begin(EngineCall::Stop) {
            Some(delay) => Self::auto_complete(self.journal.clone(), delay, done, |_| ()),
            None => {
                self.journal.lock().pending_stops.push_back(done);
                self.journal.notify();
            }
        }
    }

    fn suspend(&self, done: Completion<()>) {
        match self.journal.begin(EngineCall::Suspend) {
            Some(delay) => Self::auto_complete(self.journal.clone(), delay, done, |_| ()),
            None => {
                self.journal.lock().pending_stops.push_back(done);
                self.journal.notify();
            }
        }
    }

    fn new_wallet(&self, year: ChainYear, done: Completion<Result<Vec<String>, EngineError>>) {
        self.journal.record(EngineCall::NewWallet(year));
        done.complete_later(Ok(vec!["scripted".to_owned(); 12]));
    }

    fn recover_wallet(
        &self,
        entropy: Vec<u8>,
        year: ChainYear,
        done: Completion<Result<Vec<String>, EngineError>>,
    ) {
        self.journal.record(EngineCall::RecoverWallet(year));
        let words = entropy.iter().map(|b| format!("w{b}")).collect();
        done.complete_later(Ok(words));
    }

    fn fees(&self, done: Completion<Result<FeeEstimate, EngineError>>) {
        self.journal.record(EngineCall::Query("fees"));
        done.complete_later(Ok(FeeEstimate {
            low: 1.0,
            medium: 2.0,
            high: 3.0,
        }));
    }

    fn load_latest_address(&self, kind: AddressKind, done: Completion<Result<String, EngineError>>) {
        self.journal.record(EngineCall::Query("load_latest_address"));
        done.complete_later(Ok(format!("scripted-{kind}")));
    }

    fn pay(
        &self,
        _amount: u64,
        _to: String,
        _cost_rate: f64,
        done: Completion<Result<(), EngineError>>,
    ) {
        self.journal.record(EngineCall::Query("pay"));
        done.complete_later(Ok(()));
    }

    fn estimate_cost(
        &self,
        _amount: u64,
        _to: String,
        cost_rate: f64,
        done: Completion<Result<u64, EngineError>>,
    ) {
        self.journal.record(EngineCall::Query("estimate_cost"));
        done.complete_later(Ok((cost_rate * 100.0) as u64));
    }

    fn load_private_key(&self, done: Completion<Result<WalletSeed, EngineError>>) {
        self.journal.record(EngineCall::Query("load_private_key"));
        done.complete_later(Ok(WalletSeed {
            words: vec!["scripted".to_owned(); 12],
            language: "english".to_owned(),
        }));
    }

    fn history(&self, done: Completion<Result<History, EngineError>>) {
        self.journal.record(EngineCall::Query("history"));
        done.complete_later(Ok(History::default()));
    }

    fn selectable_years(&self) -> Vec<ChainYear> {
        selectable_years(NetworkKind::Testnet)
    }
}
