//! Lifecycle orchestration for the glew wallet engine.
//!
//! This crate owns the `LifecycleOrchestrator`, the six-state machine that
//! serializes engine start/stop/suspend requests, queues conflicting intents
//! and replays them once the in-flight transition settles. On top of it sit the
//! `FirstRunController` (new/recovered wallets) and the `AppLifecycleBridge`
//! (foreground/background/terminate signals and platform background tasks).
//! It also provides the single control thread engine callbacks re-enter
//! through, the data-directory lock and Ctrl-C handling.

pub mod bridge;
pub mod concurrency;
pub mod first_run;
pub mod lifecycle;
pub mod orchestrator;

pub use bridge::{
    AppLifecycleBridge, BackgroundPlatform, ExpirationHandler, ProcessingTask, RefreshRequest,
    TaskToken,
};
pub use concurrency::{install_signal_handler, shutdown_requested, ControlQueue, DataDirLock};
pub use first_run::FirstRunController;
pub use lifecycle::{validate_transition, LifecyclePhase, OrchestratorState};
pub use orchestrator::{abort_on_fatal, FatalHandler, LifecycleOrchestrator};

use glew_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("engine startup failed: {0}")]
    StartupFailure(String),
    #[error("start superseded by a later stop")]
    Superseded,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("control queue closed")]
    ControlQueueClosed,
    #[error("settings error: {0}")]
    Settings(#[from] glew_schema::SettingsError),
    #[error("background platform error: {0}")]
    Platform(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock error: {0}")]
    Lock(String),
}
