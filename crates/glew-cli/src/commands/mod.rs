pub mod completions;
pub mod man_pages;
pub mod new_wallet;
pub mod recover;
pub mod run;
pub mod years;

use glew_core::{DataDirLock, FirstRunController, LifecycleOrchestrator};
use glew_engine::{select_engine, Completion};
use glew_schema::{ChainYear, Settings};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SETTINGS_ERROR: u8 = 2;
pub const EXIT_LOCK_ERROR: u8 = 3;

/// Upper bound for a single engine operation issued by a command.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, mark: &str, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("{mark} {msg}"));
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, "✓", msg);
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, "✗", msg);
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" => Style::new().green().bold().apply_to(state).to_string(),
        "idle" => Style::new().dim().apply_to(state).to_string(),
        "starting" | "stopping" => Style::new().yellow().apply_to(state).to_string(),
        "stop_requested_while_starting" | "start_requested_while_stopping" => {
            Style::new().cyan().apply_to(state).to_string()
        }
        other => other.to_owned(),
    }
}

pub fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    match DataDirLock::try_acquire(data_dir) {
        Ok(Some(lock)) => Ok(lock),
        Ok(None) => Err(format!(
            "data dir lock: {} is in use by another glew process",
            data_dir.display()
        )),
        Err(e) => Err(format!("data dir lock: {e}")),
    }
}

pub fn orchestrator(settings: &Settings) -> Result<LifecycleOrchestrator, String> {
    let factory = select_engine(settings).map_err(|e| format!("settings error: {e}"))?;
    LifecycleOrchestrator::new(factory).map_err(|e| e.to_string())
}

/// Block on a completion-style call for at most `timeout`.
pub fn wait_for<T: Send + 'static>(
    what: &str,
    timeout: Duration,
    call: impl FnOnce(Completion<T>),
) -> Result<T, String> {
    let (tx, rx) = mpsc::channel();
    call(Completion::new(move |value| {
        let _ = tx.send(value);
    }));
    rx.recv_timeout(timeout)
        .map_err(|_| format!("{what} did not complete within {}s", timeout.as_secs()))
}

/// The requested year if selectable; the most recent one when none is given.
pub fn resolve_year(controller: &FirstRunController, year: Option<u16>) -> Result<ChainYear, String> {
    let years = controller.selectable_years();
    match year {
        Some(year) => {
            let year = ChainYear(year);
            if years.contains(&year) {
                Ok(year)
            } else {
                Err(format!(
                    "year {year} is not selectable, expected {}..={}",
                    years.first().map_or(0, |y| y.0),
                    years.last().map_or(0, |y| y.0)
                ))
            }
        }
        None => controller
            .default_year()
            .ok_or_else(|| "no selectable years".to_owned()),
    }
}

/// Print the words produced by a first-run operation.
pub fn print_words(year: ChainYear, words: &[String], json: bool) -> Result<(), String> {
    if json {
        let payload = serde_json::json!({
            "year": year.0,
            "words": words,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for (i, word) in words.iter().enumerate() {
            println!("{:>2}. {word}", i + 1);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_keeps_name() {
        for state in ["running", "idle", "starting", "stop_requested_while_starting", "other"] {
            assert!(colorize_state(state).contains(state));
        }
    }

    #[test]
    fn wait_for_reports_timeout() {
        let err = wait_for::<()>("engine call", Duration::from_millis(10), |done| drop(done)).unwrap_err();
        assert!(err.contains("engine call did not complete"));
    }

    #[test]
    fn resolve_year_defaults_to_latest() {
        let settings = Settings {
            engine: glew_schema::EngineSection {
                backend: "preview".to_owned(),
                ..glew_schema::EngineSection::default()
            },
            ..Settings::default()
        };
        let controller = FirstRunController::new(orchestrator(&settings).unwrap());
        let latest = ChainYear::latest(settings.network.kind);
        assert_eq!(resolve_year(&controller, None).unwrap(), latest);
        assert_eq!(resolve_year(&controller, Some(latest.0)).unwrap(), latest);
        assert!(resolve_year(&controller, Some(1999)).is_err());
    }

    #[test]
    fn second_lock_on_data_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _held = lock_data_dir(dir.path()).unwrap();
        let err = lock_data_dir(dir.path()).unwrap_err();
        assert!(err.starts_with("data dir lock:"));
    }
}
