use crate::completion::Completion;
use crate::launcher::{LauncherConfig, NodeVaultLauncher};
use crate::observer::WalletObserver;
use crate::preview::PreviewEngine;
use crate::simulated::SimulatedServices;
use crate::EngineError;
use glew_schema::{AddressKind, ChainYear, FeeEstimate, History, Settings, WalletSeed};
use std::sync::Arc;

/// Handle onto a wallet/node backend.
///
/// Every operation is asynchronous: the completion is invoked exactly once,
/// from the engine's own threads, and never from inside the call itself.
/// `start` and `stop` are not safe to call concurrently with each other.
pub trait WalletEngine: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self, observer: Arc<dyn WalletObserver>, done: Completion<Result<(), EngineError>>);

    fn stop(&self, done: Completion<()>);

    /// Stop networking but keep the vault and runtimes for a fast resume.
    fn suspend(&self, done: Completion<()>);

    fn new_wallet(&self, year: ChainYear, done: Completion<Result<Vec<String>, EngineError>>);

    fn recover_wallet(
        &self,
        entropy: Vec<u8>,
        year: ChainYear,
        done: Completion<Result<Vec<String>, EngineError>>,
    );

    fn fees(&self, done: Completion<Result<FeeEstimate, EngineError>>);

    fn load_latest_address(&self, kind: AddressKind, done: Completion<Result<String, EngineError>>);

    fn pay(&self, amount: u64, to: String, cost_rate: f64, done: Completion<Result<(), EngineError>>);

    fn estimate_cost(
        &self,
        amount: u64,
        to: String,
        cost_rate: f64,
        done: Completion<Result<u64, EngineError>>,
    );

    fn load_private_key(&self, done: Completion<Result<WalletSeed, EngineError>>);

    fn history(&self, done: Completion<Result<History, EngineError>>);

    fn selectable_years(&self) -> Vec<ChainYear>;
}

/// Builds a fresh engine instance for each `Idle -> Starting` transition.
pub type EngineFactory = Arc<dyn Fn() -> Arc<dyn WalletEngine> + Send + Sync>;

pub fn select_engine(settings: &Settings) -> Result<EngineFactory, EngineError> {
    match settings.engine.backend.as_str() {
        "launcher" => {
            let config = LauncherConfig::from_settings(settings);
            let services = Arc::new(SimulatedServices::new());
            Ok(Arc::new(move || {
                Arc::new(NodeVaultLauncher::new(config.clone(), services.clone()))
                    as Arc<dyn WalletEngine>
            }))
        }
        "preview" => {
            let network = settings.network.kind;
            Ok(Arc::new(move || {
                Arc::new(PreviewEngine::new(network)) as Arc<dyn WalletEngine>
            }))
        }
        other => Err(EngineError::Internal(format!(
            "unknown engine backend '{other}'"
        ))),
    }
}
