//! `glew run`: replay application lifecycle signals against the bridge.

use super::{colorize_state, lock_data_dir, orchestrator, EXIT_SUCCESS, OPERATION_TIMEOUT};
use glew_core::{
    install_signal_handler, AppLifecycleBridge, BackgroundPlatform, CoreError, ExpirationHandler,
    OrchestratorState, ProcessingTask, RefreshRequest, TaskToken,
};
use glew_engine::{Completion, WalletModel, WalletObserver};
use glew_schema::Settings;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One line of a lifecycle script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Foreground,
    Background,
    Terminate,
    BackgroundTask,
    Expire,
    Suspend,
    Status,
    Sleep(Duration),
    Wait(OrchestratorState),
}

pub fn parse_state(name: &str) -> Option<OrchestratorState> {
    use OrchestratorState::{
        Idle, Running, StartRequestedWhileStopping, Starting, StopRequestedWhileStarting, Stopping,
    };
    [
        Idle,
        Starting,
        StopRequestedWhileStarting,
        Running,
        Stopping,
        StartRequestedWhileStopping,
    ]
    .into_iter()
    .find(|state| state.to_string() == name)
}

/// Parse one script line; blank lines and `#` comments yield `None`.
pub fn parse_signal(line: &str) -> Result<Option<Signal>, String> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let signal = match word {
        "foreground" => Signal::Foreground,
        "background" => Signal::Background,
        "terminate" => Signal::Terminate,
        "bg-task" => Signal::BackgroundTask,
        "expire" => Signal::Expire,
        "suspend" => Signal::Suspend,
        "status" => Signal::Status,
        "sleep" => {
            let ms = words
                .next()
                .and_then(|ms| ms.parse::<u64>().ok())
                .ok_or_else(|| "sleep expects milliseconds".to_owned())?;
            Signal::Sleep(Duration::from_millis(ms))
        }
        "wait" => {
            let name = words.next().unwrap_or_default();
            let state =
                parse_state(name).ok_or_else(|| format!("wait expects a state, got '{name}'"))?;
            Signal::Wait(state)
        }
        other => return Err(format!("unknown signal '{other}'")),
    };
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{extra}' for {word}"));
    }
    Ok(Some(signal))
}

/// Background services of a terminal session: grants never run out on their
/// own and refresh requests are only logged. `expire` fires the pending
/// expiration handlers by hand.
#[derive(Default)]
pub struct CliPlatform {
    next_token: AtomicU64,
    grants: Mutex<Vec<(TaskToken, ExpirationHandler)>>,
}

impl CliPlatform {
    fn grants(&self) -> MutexGuard<'_, Vec<(TaskToken, ExpirationHandler)>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outstanding(&self) -> usize {
        self.grants().len()
    }

    pub fn expire_all(&self) {
        let grants = std::mem::take(&mut *self.grants());
        for (token, expiration) in grants {
            info!("background task {} expired", token.0);
            expiration();
        }
    }
}

impl BackgroundPlatform for CliPlatform {
    fn begin_background_task(&self, expiration: ExpirationHandler) -> TaskToken {
        let token = TaskToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("background task {} granted", token.0);
        self.grants().push((token, expiration));
        token
    }

    fn end_background_task(&self, token: TaskToken) {
        debug!("background task {} ended", token.0);
        self.grants().retain(|(t, _)| *t != token);
    }

    fn submit_refresh(&self, request: RefreshRequest) -> Result<(), CoreError> {
        info!(
            "background refresh {} requested in {}s",
            request.identifier,
            request.earliest_begin.as_secs()
        );
        Ok(())
    }

    fn cancel_all_refresh(&self) {
        debug!("pending background refresh requests cancelled");
    }
}

/// A background-processing launch triggered by `bg-task`.
#[derive(Default)]
pub struct CliTask {
    expiration: Mutex<Option<ExpirationHandler>>,
    completed: Mutex<Option<bool>>,
}

impl CliTask {
    pub fn completed(&self) -> Option<bool> {
        *self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expire(&self) {
        let handler = self
            .expiration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handler) = handler {
            info!("background processing task expired");
            handler();
        }
    }
}

impl ProcessingTask for CliTask {
    fn set_expiration_handler(&self, handler: ExpirationHandler) {
        *self.expiration.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn set_completed(&self, success: bool) {
        info!("background processing task completed: {success}");
        *self.completed.lock().unwrap_or_else(PoisonError::into_inner) = Some(success);
    }
}

struct Session {
    bridge: AppLifecycleBridge,
    platform: Arc<CliPlatform>,
    task: Option<Arc<CliTask>>,
    json: bool,
}

impl Session {
    /// Returns `false` once the script asked to terminate.
    fn apply(&mut self, signal: Signal) -> Result<bool, String> {
        debug!("signal {signal:?}");
        match signal {
            Signal::Foreground => self.bridge.entered_foreground(),
            Signal::Background => self.bridge.entered_background(),
            Signal::Terminate => return Ok(false),
            Signal::BackgroundTask => {
                let task = Arc::new(CliTask::default());
                self.task = Some(Arc::clone(&task));
                self.bridge.background_task_fired(task);
            }
            Signal::Expire => {
                self.platform.expire_all();
                if let Some(task) = &self.task {
                    task.expire();
                }
            }
            Signal::Suspend => self.bridge.orchestrator().suspend(
                Completion::new(|()| info!("suspend settled")).labelled("cli suspend"),
            ),
            Signal::Status => self.print_status()?,
            Signal::Sleep(duration) => std::thread::sleep(duration),
            Signal::Wait(state) => {
                let reached = self
                    .bridge
                    .orchestrator()
                    .wait_for(OPERATION_TIMEOUT, |phase| phase.state == state);
                if !reached {
                    return Err(format!(
                        "orchestrator did not reach {state} within {}s (now {})",
                        OPERATION_TIMEOUT.as_secs(),
                        self.bridge.orchestrator().phase()
                    ));
                }
            }
        }
        Ok(true)
    }

    fn print_status(&self) -> Result<(), String> {
        let phase = self.bridge.orchestrator().phase();
        let model = self.bridge.model().snapshot();
        let task = self.task.as_ref().and_then(|t| t.completed());
        if self.json {
            let payload = serde_json::json!({
                "phase": phase,
                "model": model,
                "task_completed": task,
                "background_grants": self.platform.outstanding(),
            });
            let line = serde_json::to_string(&payload)
                .map_err(|e| format!("JSON serialization failed: {e}"))?;
            println!("{line}");
        } else {
            let suspended = if phase.suspended { " (suspended)" } else { "" };
            println!(
                "phase: {}{suspended}",
                colorize_state(&phase.state.to_string())
            );
            println!("model: {}", self.bridge.model());
            if let Some(task) = task {
                println!("background task completed: {task}");
            }
        }
        Ok(())
    }

    fn drive(&mut self, input: impl BufRead) -> Result<(), String> {
        for (n, line) in input.lines().enumerate() {
            let line = line.map_err(|e| format!("failed to read signal: {e}"))?;
            let Some(signal) = parse_signal(&line).map_err(|e| format!("line {}: {e}", n + 1))?
            else {
                continue;
            };
            if !self.apply(signal)? {
                break;
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.bridge.terminate();
        if !self.bridge.orchestrator().wait_idle(OPERATION_TIMEOUT) {
            warn!(
                "wallet engine still {} after {}s",
                self.bridge.orchestrator().phase(),
                OPERATION_TIMEOUT.as_secs()
            );
        }
    }
}

pub fn run(
    settings: &Settings,
    data_dir: &Path,
    script: Option<&Path>,
    backend: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let mut settings = settings.clone();
    if let Some(backend) = backend {
        settings.engine.backend = backend.to_owned();
        settings
            .validate()
            .map_err(|e| format!("settings error: {e}"))?;
    }
    let _lock = lock_data_dir(data_dir)?;

    let platform = Arc::new(CliPlatform::default());
    let bridge = AppLifecycleBridge::new(
        orchestrator(&settings)?,
        Arc::clone(&platform) as Arc<dyn BackgroundPlatform>,
        Arc::new(WalletModel::new()),
        settings.background.clone(),
    );
    info!(
        "driving {} engine on {}",
        settings.engine.backend, settings.network.kind
    );

    {
        let bridge = bridge.clone();
        install_signal_handler(move || {
            bridge.terminate();
            if !bridge.orchestrator().wait_idle(OPERATION_TIMEOUT) {
                warn!("wallet engine did not stop before exit");
            }
            std::process::exit(i32::from(EXIT_SUCCESS));
        });
    }
    bridge.register();

    let mut session = Session {
        bridge,
        platform,
        task: None,
        json,
    };
    let outcome = match script {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| format!("failed to open script {}: {e}", path.display()))?;
            session.drive(BufReader::new(file))
        }
        None => session.drive(std::io::stdin().lock()),
    };
    session.shutdown();
    outcome.map(|()| EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signals() {
        assert_eq!(parse_signal("foreground").unwrap(), Some(Signal::Foreground));
        assert_eq!(parse_signal("  bg-task  # launch").unwrap(), Some(Signal::BackgroundTask));
        assert_eq!(
            parse_signal("sleep 25").unwrap(),
            Some(Signal::Sleep(Duration::from_millis(25)))
        );
        assert_eq!(
            parse_signal("wait stop_requested_while_starting").unwrap(),
            Some(Signal::Wait(OrchestratorState::StopRequestedWhileStarting))
        );
        assert_eq!(parse_signal("").unwrap(), None);
        assert_eq!(parse_signal("# only a comment").unwrap(), None);
    }

    #[test]
    fn rejects_bad_signals() {
        assert!(parse_signal("launch").unwrap_err().contains("unknown signal"));
        assert!(parse_signal("sleep soon").is_err());
        assert!(parse_signal("wait paused").is_err());
        assert!(parse_signal("status now").is_err());
    }

    #[test]
    fn platform_expires_outstanding_grants() {
        let platform = CliPlatform::default();
        let fired = Arc::new(AtomicU64::new(0));
        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            platform.begin_background_task(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        platform.end_background_task(TaskToken(1));
        assert_eq!(platform.outstanding(), 1);

        platform.expire_all();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(platform.outstanding(), 0);
    }

    #[test]
    fn script_drives_preview_engine() {
        let data_dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.engine.backend = "preview".to_owned();
        let platform = Arc::new(CliPlatform::default());
        let bridge = AppLifecycleBridge::new(
            orchestrator(&settings).unwrap(),
            platform.clone(),
            Arc::new(WalletModel::new()),
            settings.background.clone(),
        );
        let _lock = lock_data_dir(data_dir.path()).unwrap();
        let mut session = Session {
            bridge: bridge.clone(),
            platform,
            task: None,
            json: true,
        };

        let script = "foreground\nwait running\nbackground\nwait idle\nterminate\nforeground\n";
        session.drive(script.as_bytes()).unwrap();
        // nothing after terminate is applied
        assert!(bridge.orchestrator().phase().is_idle());
        session.shutdown();
        assert!(bridge.orchestrator().phase().is_idle());
    }
}
