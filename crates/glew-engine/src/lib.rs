//! Wallet engine contract and the node/vault launcher for glew.
//!
//! This crate implements the engine layer: the callback-based `WalletEngine`
//! trait consumed by the lifecycle orchestrator, the exactly-once `Completion`
//! type, the `WalletObserver` notification interface, `EngineDependencies`
//! (event-loop group and worker pool), the opaque `Vault` and `Node` service
//! traits, the `NodeVaultLauncher` with its ordered teardown, an HTTP fee
//! provider, and engine doubles (preview, simulated services, scripted engine).

pub mod backend;
pub mod completion;
pub mod deps;
pub mod events;
pub mod fees;
pub mod launcher;
pub mod mock;
pub mod observer;
pub mod preview;
pub mod services;
pub mod simulated;
pub mod teardown;

pub use backend::{select_engine, EngineFactory, WalletEngine};
pub use completion::Completion;
pub use deps::{EngineDependencies, RuntimeHandles};
pub use launcher::{LauncherConfig, NodeVaultLauncher};
pub use observer::{FundsMovement, Subscription, WalletModel, WalletObserver};
pub use services::{NodeDelegate, ServiceFactory, SyncEvent, Vault, WalletEvent, WalletEventSink};

use glew_schema::{KeyChainError, PaymentError, WalletApiError};
use thiserror::Error;

/// Data accessor called while the launcher has no live wallet.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IllegalState {
    #[error("IllegalState.initialized")]
    Initialized,
    #[error("IllegalState.stopped")]
    Stopped,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("illegal state: {0}")]
    IllegalState(#[from] IllegalState),
    #[error("engine startup failed: {0}")]
    StartupFailure(String),
    #[error("failed shutdown of {resource}: {reason}")]
    ShutdownFailure { resource: String, reason: String },
    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("keychain error: {0}")]
    KeyChain(#[from] KeyChainError),
    #[error("fee rate unavailable: {0}")]
    FeeRateUnavailable(String),
    #[error("engine I/O error: {0}")]
    Io(String),
    #[error("engine runtime error: {0}")]
    Runtime(String),
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<&EngineError> for WalletApiError {
    fn from(error: &EngineError) -> Self {
        match error {
            EngineError::ServiceUnavailable => WalletApiError::Unavailable,
            EngineError::Payment(payment) => WalletApiError::from(payment),
            EngineError::KeyChain(keychain) => WalletApiError::from(*keychain),
            EngineError::FeeRateUnavailable(_) => WalletApiError::FeeRateNil,
            _ => WalletApiError::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_project_to_api_errors() {
        assert_eq!(
            WalletApiError::from(&EngineError::ServiceUnavailable),
            WalletApiError::Unavailable
        );
        assert_eq!(
            WalletApiError::from(&EngineError::Payment(PaymentError::NotEnoughFunds(9))),
            WalletApiError::NotEnoughFunds(9)
        );
        assert_eq!(
            WalletApiError::from(&EngineError::FeeRateUnavailable("timeout".to_owned())),
            WalletApiError::FeeRateNil
        );
        assert_eq!(
            WalletApiError::from(&EngineError::IllegalState(IllegalState::Stopped)),
            WalletApiError::InternalError
        );
    }

    #[test]
    fn illegal_state_display() {
        assert_eq!(IllegalState::Initialized.to_string(), "IllegalState.initialized");
        assert_eq!(
            EngineError::from(IllegalState::Stopped).to_string(),
            "illegal state: IllegalState.stopped"
        );
    }
}
