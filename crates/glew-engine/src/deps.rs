use crate::EngineError;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{error, info};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Concurrency resources a wallet runs on: a single-threaded event-loop group
/// and a worker pool for storage work.
///
/// Both runtimes must be shut down from outside any async context, which is
/// why teardown happens on a dedicated thread.
pub struct EngineDependencies {
    event_loop: Runtime,
    thread_pool: Runtime,
}

/// Cloneable handles onto [`EngineDependencies`].
#[derive(Debug, Clone)]
pub struct RuntimeHandles {
    pub event_loop: Handle,
    pub thread_pool: Handle,
}

impl EngineDependencies {
    pub fn new(worker_threads: usize) -> Result<Self, EngineError> {
        let event_loop = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("glew-event-loop")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Runtime(format!("event loop group: {e}")))?;
        let thread_pool = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("glew-worker")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Runtime(format!("worker pool: {e}")))?;
        Ok(Self {
            event_loop,
            thread_pool,
        })
    }

    pub fn handles(&self) -> RuntimeHandles {
        RuntimeHandles {
            event_loop: self.event_loop.handle().clone(),
            thread_pool: self.thread_pool.handle().clone(),
        }
    }

    /// Shut down the worker pool, then the event-loop group.
    ///
    /// Returns one result per resource in that order. A resource that still has
    /// live tasks when `timeout` elapses is reported as a shutdown failure.
    pub fn shutdown_gracefully(
        self,
        timeout: Duration,
    ) -> (Result<(), EngineError>, Result<(), EngineError>) {
        let pool = shutdown_runtime("worker pool", self.thread_pool, timeout);
        let event_loop = shutdown_runtime("event loop group", self.event_loop, timeout);
        (pool, event_loop)
    }

    /// Drop both runtimes without waiting for their tasks. Safe to call from
    /// an async context.
    pub fn shutdown_now(self) {
        self.thread_pool.shutdown_background();
        self.event_loop.shutdown_background();
        info!("worker pool and event loop group shut down in background");
    }
}

fn shutdown_runtime(resource: &str, runtime: Runtime, timeout: Duration) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    let metrics = runtime.metrics();
    while metrics.num_alive_tasks() > 0 && Instant::now() < deadline {
        std::thread::sleep(DRAIN_POLL);
    }
    let alive = metrics.num_alive_tasks();
    runtime.shutdown_background();

    if alive == 0 {
        info!("{resource} stop successful");
        Ok(())
    } else {
        let reason = format!("{alive} tasks still alive after {}ms", timeout.as_millis());
        error!("failed shutdown of {resource}: {reason}");
        Err(EngineError::ShutdownFailure {
            resource: resource.to_owned(),
            reason,
        })
    }
}

impl std::fmt::Debug for EngineDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDependencies")
            .field(
                "worker_threads",
                &self.thread_pool.metrics().num_workers(),
            )
            .finish_non_exhaustive()
    }
}
