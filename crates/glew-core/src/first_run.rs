use crate::orchestrator::LifecycleOrchestrator;
use crate::CoreError;
use glew_engine::{Completion, EngineError};
use glew_schema::ChainYear;
use tracing::{debug, info};

type WordsCompletion = Completion<Result<Vec<String>, CoreError>>;

/// Creates or recovers a wallet before the engine is ever started.
///
/// First-run calls go straight to a fresh engine while the orchestrator is
/// idle. Otherwise the orchestrator is stopped first and the call is retried
/// from the stop completion.
#[derive(Clone)]
pub struct FirstRunController {
    orchestrator: LifecycleOrchestrator,
}

impl FirstRunController {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn new_wallet(&self, year: ChainYear, done: WordsCompletion) {
        self.first_run(None, year, done);
    }

    pub fn recover_wallet(&self, entropy: Vec<u8>, year: ChainYear, done: WordsCompletion) {
        self.first_run(Some(entropy), year, done);
    }

    pub fn selectable_years(&self) -> Vec<ChainYear> {
        self.orchestrator.selectable_years()
    }

    /// Most recent selectable year, the default for a new wallet.
    pub fn default_year(&self) -> Option<ChainYear> {
        self.orchestrator.selectable_years().last().copied()
    }

    fn first_run(&self, entropy: Option<Vec<u8>>, year: ChainYear, done: WordsCompletion) {
        let Some(engine) = self.orchestrator.idle_engine() else {
            debug!(
                "first run while {}, stopping engine first",
                self.orchestrator.phase()
            );
            let retry = self.clone();
            self.orchestrator.stop(Some(
                Completion::new(move |()| retry.first_run(entropy, year, done))
                    .labelled("first run retry"),
            ));
            return;
        };

        let done = done.map(|result: Result<Vec<String>, EngineError>| {
            result.map_err(CoreError::from)
        });
        match entropy {
            Some(entropy) => {
                info!("recovering wallet from {year} on {} engine", engine.name());
                engine.recover_wallet(entropy, year, done);
            }
            None => {
                info!("creating new wallet from {year} on {} engine", engine.name());
                engine.new_wallet(year, done);
            }
        }
    }
}
