use super::{
    lock_data_dir, orchestrator, print_words, resolve_year, spin_fail, spin_ok, spinner, wait_for,
    EXIT_SUCCESS, OPERATION_TIMEOUT,
};
use glew_core::{CoreError, FirstRunController};
use glew_engine::Completion;
use glew_schema::{ChainYear, Settings};
use std::path::Path;

type WordsCompletion = Completion<Result<Vec<String>, CoreError>>;

pub fn run(settings: &Settings, data_dir: &Path, year: Option<u16>, json: bool) -> Result<u8, String> {
    first_run(settings, data_dir, year, json, "creating", |controller, year, done| {
        controller.new_wallet(year, done);
    })
}

/// Shared driver of the first-run commands.
pub(super) fn first_run(
    settings: &Settings,
    data_dir: &Path,
    year: Option<u16>,
    json: bool,
    verb: &str,
    call: impl FnOnce(&FirstRunController, ChainYear, WordsCompletion),
) -> Result<u8, String> {
    let _lock = lock_data_dir(data_dir)?;
    let controller = FirstRunController::new(orchestrator(settings)?);
    let year = resolve_year(&controller, year)?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("{verb} wallet from {year}...")))
    };
    let result = wait_for("wallet first run", OPERATION_TIMEOUT, |done| {
        call(&controller, year, done);
    })
    .and_then(|words| words.map_err(|e| e.to_string()));

    let words = match result {
        Ok(words) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("wallet ready ({} words)", words.len()));
            }
            words
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "first run failed");
            }
            return Err(e);
        }
    };
    print_words(year, &words, json)?;
    Ok(EXIT_SUCCESS)
}
