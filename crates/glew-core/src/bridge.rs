//! Maps application lifecycle signals onto the orchestrator.

use crate::orchestrator::LifecycleOrchestrator;
use crate::CoreError;
use glew_engine::{Completion, Subscription, WalletModel, WalletObserver};
use glew_schema::BackgroundSection;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handle for a platform grant of extra execution time in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskToken(pub u64);

/// A request for a future background-processing launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub identifier: String,
    pub earliest_begin: Duration,
    pub requires_network: bool,
}

pub type ExpirationHandler = Box<dyn FnOnce() + Send + 'static>;

/// Background-execution services of the host platform.
pub trait BackgroundPlatform: Send + Sync {
    /// Ask for time to finish work after entering the background.
    /// `expiration` runs if the grant runs out first.
    fn begin_background_task(&self, expiration: ExpirationHandler) -> TaskToken;

    fn end_background_task(&self, token: TaskToken);

    fn submit_refresh(&self, request: RefreshRequest) -> Result<(), CoreError>;

    fn cancel_all_refresh(&self);
}

/// A platform-launched background-processing task.
pub trait ProcessingTask: Send + Sync {
    fn set_expiration_handler(&self, handler: ExpirationHandler);

    fn set_completed(&self, success: bool);
}

struct BackgroundRun {
    subscription: Option<Subscription>,
    stopping: bool,
}

#[derive(Default)]
struct BridgeState {
    token: Option<TaskToken>,
    run: Option<BackgroundRun>,
}

struct Inner {
    orchestrator: LifecycleOrchestrator,
    platform: Arc<dyn BackgroundPlatform>,
    model: Arc<WalletModel>,
    settings: BackgroundSection,
    state: Mutex<BridgeState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_token(&self) {
        let token = self.state().token.take();
        if let Some(token) = token {
            debug!("ending background task {token:?}");
            self.platform.end_background_task(token);
        }
    }

    fn schedule_refresh(&self) {
        if !self.settings.enabled {
            return;
        }
        info!("scheduling background execution");
        self.platform.cancel_all_refresh();
        let request = RefreshRequest {
            identifier: self.settings.task_id.clone(),
            earliest_begin: Duration::from_secs(self.settings.earliest_begin_secs),
            requires_network: true,
        };
        if let Err(e) = self.platform.submit_refresh(request) {
            error!("cannot submit task for background execution: {e}");
        }
    }

    fn start_logged(&self, context: &'static str) {
        self.orchestrator.start(
            Arc::clone(&self.model) as Arc<dyn WalletObserver>,
            Completion::new(move |result: Result<(), CoreError>| match result {
                Ok(()) => debug!("{context} start completed"),
                Err(e) => warn!("{context} start failed: {e}"),
            })
            .labelled("bridge start"),
        );
    }

    /// Stop once for the current background run, then complete `task`.
    fn background_stop(self: &Arc<Self>, task: Arc<dyn ProcessingTask>) {
        {
            let mut state = self.state();
            match state.run.as_mut() {
                Some(run) if !run.stopping => run.stopping = true,
                _ => return,
            }
        }
        info!("background run finished, stopping engine");
        let weak = Arc::downgrade(self);
        self.orchestrator.stop(Some(
            Completion::new(move |()| match weak.upgrade() {
                Some(inner) => inner.finish_background_run(task),
                None => task.set_completed(true),
            })
            .labelled("background stop"),
        ));
    }

    fn finish_background_run(&self, task: Arc<dyn ProcessingTask>) {
        let run = self.state().run.take();
        drop(run);
        self.model.background_changed(false);

        let delay = Duration::from_secs(self.settings.completion_delay_secs);
        if delay.is_zero() {
            task.set_completed(true);
            return;
        }
        let spawned = std::thread::Builder::new()
            .name("glew-bg-complete".to_owned())
            .spawn(move || {
                std::thread::sleep(delay);
                task.set_completed(true);
            });
        if let Err(e) = spawned {
            error!("cannot spawn background completion thread: {e}");
        }
    }
}

/// Drives the orchestrator from foreground, background and terminate
/// signals, and from platform-launched background-processing tasks.
#[derive(Clone)]
pub struct AppLifecycleBridge {
    inner: Arc<Inner>,
}

impl AppLifecycleBridge {
    pub fn new(
        orchestrator: LifecycleOrchestrator,
        platform: Arc<dyn BackgroundPlatform>,
        model: Arc<WalletModel>,
        settings: BackgroundSection,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                platform,
                model,
                settings,
                state: Mutex::new(BridgeState::default()),
            }),
        }
    }

    pub fn model(&self) -> &Arc<WalletModel> {
        &self.inner.model
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.inner.orchestrator
    }

    /// Application launch: schedule the first background refresh.
    pub fn register(&self) {
        if self.inner.settings.enabled {
            info!(
                "registering background task {}",
                self.inner.settings.task_id
            );
        }
        self.inner.schedule_refresh();
    }

    pub fn schedule_refresh(&self) {
        self.inner.schedule_refresh();
    }

    pub fn entered_foreground(&self) {
        info!("entered foreground");
        self.inner.release_token();
        self.inner.start_logged("foreground");
    }

    pub fn entered_background(&self) {
        info!("entered background");
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let token = self
            .inner
            .platform
            .begin_background_task(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    warn!("background time expired before the engine stopped");
                    inner.release_token();
                }
            }));
        let previous = self.inner.state().token.replace(token);
        if let Some(previous) = previous {
            self.inner.platform.end_background_task(previous);
        }

        if self.inner.model.snapshot().background {
            debug!("background launch in progress, engine left running");
            self.inner.release_token();
        } else {
            let weak = Arc::downgrade(&self.inner);
            self.inner.orchestrator.stop(Some(
                Completion::new(move |()| {
                    if let Some(inner) = weak.upgrade() {
                        inner.release_token();
                    }
                })
                .labelled("background entry stop"),
            ));
        }
        self.inner.schedule_refresh();
    }

    /// Best-effort stop on process termination.
    pub fn terminate(&self) {
        info!("terminate requested");
        self.inner.orchestrator.stop(None);
    }

    /// Platform entry point of a background-processing launch.
    ///
    /// Runs the engine headless until it reports synched (or the task
    /// expires), then stops it and completes the task.
    pub fn background_task_fired(&self, task: Arc<dyn ProcessingTask>) {
        info!("begin executing background processing task");
        let inner = &self.inner;
        inner.model.background_changed(true);
        inner.schedule_refresh();

        let snapshot = inner.model.snapshot();
        let phase = inner.orchestrator.phase();
        {
            let mut state = inner.state();
            let busy = snapshot.running
                || snapshot.suspended
                || !phase.is_idle()
                || phase.suspended
                || state.run.is_some();
            if busy {
                drop(state);
                info!("background launch while in foreground ({phase}), refusing");
                inner.model.background_changed(false);
                task.set_completed(false);
                return;
            }
            state.run = Some(BackgroundRun {
                subscription: None,
                stopping: false,
            });
        }

        let weak = Arc::downgrade(inner);
        let stop_task = Arc::clone(&task);
        let background_stop = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.background_stop(Arc::clone(&stop_task));
            }
        });

        let on_expiration = Arc::clone(&background_stop);
        task.set_expiration_handler(Box::new(move || on_expiration()));
        let subscription = inner.model.on_synched(move |synched| {
            if synched {
                background_stop();
            }
        });
        if let Some(run) = inner.state().run.as_mut() {
            run.subscription = Some(subscription);
        }

        inner.start_logged("background");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::OrchestratorState;
    use glew_engine::mock::ScriptJournal;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct FakePlatform {
        next: AtomicU64,
        ended: Mutex<Vec<TaskToken>>,
        expirations: Mutex<Vec<ExpirationHandler>>,
        submitted: Mutex<Vec<RefreshRequest>>,
        cancels: AtomicUsize,
    }

    impl BackgroundPlatform for FakePlatform {
        fn begin_background_task(&self, expiration: ExpirationHandler) -> TaskToken {
            self.expirations.lock().unwrap().push(expiration);
            TaskToken(self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn end_background_task(&self, token: TaskToken) {
            self.ended.lock().unwrap().push(token);
        }

        fn submit_refresh(&self, request: RefreshRequest) -> Result<(), CoreError> {
            self.submitted.lock().unwrap().push(request);
            Ok(())
        }

        fn cancel_all_refresh(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeTask {
        expiration: Mutex<Option<ExpirationHandler>>,
        completed: Mutex<Option<bool>>,
    }

    impl ProcessingTask for FakeTask {
        fn set_expiration_handler(&self, handler: ExpirationHandler) {
            *self.expiration.lock().unwrap() = Some(handler);
        }

        fn set_completed(&self, success: bool) {
            *self.completed.lock().unwrap() = Some(success);
        }
    }

    fn wait_for(pred: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn bridge(journal: &ScriptJournal, enabled: bool) -> (AppLifecycleBridge, Arc<FakePlatform>) {
        let orchestrator = LifecycleOrchestrator::new(journal.factory()).unwrap();
        let platform = Arc::new(FakePlatform::default());
        let settings = BackgroundSection {
            enabled,
            completion_delay_secs: 0,
            ..BackgroundSection::default()
        };
        let bridge = AppLifecycleBridge::new(
            orchestrator,
            platform.clone(),
            Arc::new(WalletModel::new()),
            settings,
        );
        (bridge, platform)
    }

    fn is_running(bridge: &AppLifecycleBridge) -> bool {
        bridge.orchestrator().phase().state == OrchestratorState::Running
    }

    #[test]
    fn background_stops_and_releases_token() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, platform) = bridge(&journal, true);

        bridge.entered_foreground();
        assert!(wait_for(|| is_running(&bridge)));

        bridge.entered_background();
        assert!(wait_for(|| platform.ended.lock().unwrap().len() == 1));
        assert!(bridge.orchestrator().phase().is_idle());
        assert_eq!(*platform.ended.lock().unwrap(), vec![TaskToken(1)]);

        let submitted = platform.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].identifier, "app.fltr.Node");
        assert_eq!(submitted[0].earliest_begin, Duration::from_secs(30));
        assert_eq!(platform.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiration_releases_token_once() {
        let journal = ScriptJournal::new();
        let (bridge, platform) = bridge(&journal, false);

        bridge.entered_foreground();
        assert!(journal.release_start());
        assert!(wait_for(|| is_running(&bridge)));

        bridge.entered_background();
        assert!(journal.wait_for_pending_stop(WAIT));
        let expiration = platform.expirations.lock().unwrap().pop().unwrap();
        expiration();
        assert_eq!(*platform.ended.lock().unwrap(), vec![TaskToken(1)]);

        assert!(journal.release_stop());
        assert!(bridge.orchestrator().wait_idle(WAIT));
        assert_eq!(platform.ended.lock().unwrap().len(), 1);
        assert!(platform.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn background_task_stops_once_synched() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, _platform) = bridge(&journal, true);
        let task = Arc::new(FakeTask::default());

        bridge.background_task_fired(task.clone());
        assert!(bridge.model().snapshot().background);
        assert!(wait_for(|| is_running(&bridge)));

        let observer = journal.observer().unwrap();
        observer.sync_state_changed(true);
        assert!(wait_for(|| task.completed.lock().unwrap().is_some()));
        assert_eq!(*task.completed.lock().unwrap(), Some(true));
        assert!(bridge.orchestrator().phase().is_idle());
        assert!(!bridge.model().snapshot().background);

        // a second synched edge after the run is over changes nothing
        observer.sync_state_changed(true);
        assert_eq!(journal.count(&glew_engine::mock::EngineCall::Stop), 1);
    }

    #[test]
    fn background_task_expiration_stops_engine() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, _platform) = bridge(&journal, false);
        let task = Arc::new(FakeTask::default());

        bridge.background_task_fired(task.clone());
        let handler = task.expiration.lock().unwrap().take().unwrap();
        handler();
        assert!(wait_for(|| *task.completed.lock().unwrap() == Some(true)));
        assert!(bridge.orchestrator().phase().is_idle());
    }

    #[test]
    fn background_entry_during_background_launch_keeps_engine_running() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, platform) = bridge(&journal, false);
        let task = Arc::new(FakeTask::default());

        bridge.background_task_fired(task.clone());
        assert!(wait_for(|| is_running(&bridge)));

        bridge.entered_background();
        assert_eq!(*platform.ended.lock().unwrap(), vec![TaskToken(1)]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(journal.count(&glew_engine::mock::EngineCall::Stop), 0);
        assert!(is_running(&bridge));
        assert!(bridge.model().snapshot().background);
        assert!(task.completed.lock().unwrap().is_none());
    }

    #[test]
    fn background_task_refused_while_running() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, _platform) = bridge(&journal, false);
        bridge.entered_foreground();
        assert!(wait_for(|| is_running(&bridge)));

        let task = Arc::new(FakeTask::default());
        bridge.background_task_fired(task.clone());
        assert_eq!(*task.completed.lock().unwrap(), Some(false));
        assert!(!bridge.model().snapshot().background);
        assert!(is_running(&bridge));
    }

    #[test]
    fn terminate_stops_without_completion() {
        let journal = ScriptJournal::auto(Duration::from_millis(1));
        let (bridge, _platform) = bridge(&journal, false);
        bridge.entered_foreground();
        assert!(wait_for(|| is_running(&bridge)));

        bridge.terminate();
        assert!(bridge.orchestrator().wait_idle(WAIT));
        assert!(!bridge.model().snapshot().running);
    }
}
