use crate::completion::take_pending;
use crate::deps::EngineDependencies;
use crate::services::{Node, Vault};
use crate::EngineError;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    NodeStop,
    VaultStop,
    WorkerPoolShutdown,
    EventLoopShutdown,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::NodeStop => "node stop",
            TeardownStep::VaultStop => "vault stop",
            TeardownStep::WorkerPoolShutdown => "worker pool shutdown",
            TeardownStep::EventLoopShutdown => "event loop group shutdown",
        };
        f.write_str(name)
    }
}

/// Observer of each finished teardown step and its outcome.
pub type TeardownListener = Arc<dyn Fn(TeardownStep, &Result<(), EngineError>) + Send + Sync>;

/// Resources released by one teardown, in dependency order.
///
/// Every present resource is released even when an earlier step fails; a
/// failure is logged and reported to the listener only.
pub struct TeardownPlan {
    pub event_loop: Handle,
    pub node: Option<Arc<dyn Node>>,
    pub vault: Option<Arc<dyn Vault>>,
    pub deps: Option<EngineDependencies>,
    pub shutdown_timeout: Duration,
}

impl TeardownPlan {
    pub fn steps(&self) -> Vec<TeardownStep> {
        let mut steps = Vec::with_capacity(4);
        if self.node.is_some() {
            steps.push(TeardownStep::NodeStop);
        }
        if self.vault.is_some() {
            steps.push(TeardownStep::VaultStop);
        }
        if self.deps.is_some() {
            steps.push(TeardownStep::WorkerPoolShutdown);
            steps.push(TeardownStep::EventLoopShutdown);
        }
        steps
    }

    fn run(self, on_step: &dyn Fn(TeardownStep, &Result<(), EngineError>)) {
        let report = |step: TeardownStep, result: Result<(), EngineError>| {
            match &result {
                Ok(()) => info!("{step} successful"),
                Err(e) => error!("{step} failed: {e}"),
            }
            on_step(step, &result);
        };

        if let Some(node) = self.node {
            report(TeardownStep::NodeStop, self.event_loop.block_on(node.stop()));
        }
        if let Some(vault) = self.vault {
            report(TeardownStep::VaultStop, self.event_loop.block_on(vault.stop()));
        }
        if let Some(deps) = self.deps {
            let (pool, event_loop) = deps.shutdown_gracefully(self.shutdown_timeout);
            report(TeardownStep::WorkerPoolShutdown, pool);
            report(TeardownStep::EventLoopShutdown, event_loop);
        }
    }

    /// Teardown without a dedicated thread.
    ///
    /// Outside any async context this is a regular [`run`](Self::run). Inside
    /// one nothing may block, so node and vault stops are abandoned (reported
    /// as failures) and both runtimes are shut down in the background.
    fn run_in_place(self, on_step: &dyn Fn(TeardownStep, &Result<(), EngineError>)) {
        if Handle::try_current().is_err() {
            return self.run(on_step);
        }
        let abandoned = |step: TeardownStep| {
            let result = Err(EngineError::Runtime(format!(
                "{step} abandoned, no teardown thread"
            )));
            error!("{step} failed: no teardown thread");
            on_step(step, &result);
        };
        if self.node.is_some() {
            abandoned(TeardownStep::NodeStop);
        }
        if self.vault.is_some() {
            abandoned(TeardownStep::VaultStop);
        }
        if let Some(deps) = self.deps {
            deps.shutdown_now();
            on_step(TeardownStep::WorkerPoolShutdown, &Ok(()));
            on_step(TeardownStep::EventLoopShutdown, &Ok(()));
        }
    }
}

struct TeardownJob<S, D> {
    plan: TeardownPlan,
    on_step: S,
    done: D,
}

/// Run `plan` on a dedicated teardown thread, then call `done`.
///
/// `done` is called exactly once: when the thread cannot be spawned the plan
/// runs on the caller instead.
pub fn spawn(
    plan: TeardownPlan,
    on_step: impl Fn(TeardownStep, &Result<(), EngineError>) + Send + 'static,
    done: impl FnOnce() + Send + 'static,
) {
    let slot = Arc::new(Mutex::new(Some(TeardownJob {
        plan,
        on_step,
        done,
    })));
    let thread_slot = Arc::clone(&slot);
    let spawned = std::thread::Builder::new()
        .name("glew-teardown".to_owned())
        .spawn(move || {
            if let Some(job) = take_pending(&thread_slot) {
                job.plan.run(&job.on_step);
                (job.done)();
            }
        });
    if let Err(e) = spawned {
        error!("cannot spawn teardown thread: {e}, tearing down in place");
        if let Some(job) = take_pending(&slot) {
            job.plan.run_in_place(&job.on_step);
            (job.done)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{ServiceCall, SimulatedServices};
    use std::sync::{mpsc, Mutex};

    #[test]
    fn full_plan_runs_in_dependency_order() {
        let services = SimulatedServices::new();
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);

        let plan = TeardownPlan {
            event_loop: handles.event_loop.clone(),
            node: Some(node),
            vault: Some(vault),
            deps: Some(deps),
            shutdown_timeout: Duration::from_millis(500),
        };
        assert_eq!(plan.steps().len(), 4);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let (tx, rx) = mpsc::channel();
        spawn(
            plan,
            move |step, result| s.lock().unwrap().push((step, result.is_ok())),
            move || tx.send(()).unwrap(),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (TeardownStep::NodeStop, true),
                (TeardownStep::VaultStop, true),
                (TeardownStep::WorkerPoolShutdown, true),
                (TeardownStep::EventLoopShutdown, true),
            ]
        );
        let journal = services.journal();
        let node_stop = journal.iter().position(|c| *c == ServiceCall::NodeStop);
        let vault_stop = journal.iter().position(|c| *c == ServiceCall::VaultStop);
        assert!(node_stop < vault_stop);
    }

    #[test]
    fn failing_step_does_not_stop_teardown() {
        let services = SimulatedServices::new();
        services.fail_node_stop(true);
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let (tx, rx) = mpsc::channel();
        spawn(
            TeardownPlan {
                event_loop: handles.event_loop.clone(),
                node: Some(node),
                vault: Some(vault),
                deps: Some(deps),
                shutdown_timeout: Duration::from_millis(500),
            },
            move |step, result| s.lock().unwrap().push((step, result.is_ok())),
            move || tx.send(()).unwrap(),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], (TeardownStep::NodeStop, false));
        assert!(seen[1..].iter().all(|(_, ok)| *ok));
    }

    #[test]
    fn node_only_plan_keeps_runtimes() {
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let services = SimulatedServices::new();
        let (node, _vault) = services.standalone_pair(&handles);
        let plan = TeardownPlan {
            event_loop: handles.event_loop.clone(),
            node: Some(node),
            vault: None,
            deps: None,
            shutdown_timeout: Duration::from_millis(100),
        };
        assert_eq!(plan.steps(), vec![TeardownStep::NodeStop]);

        let (tx, rx) = mpsc::channel();
        spawn(plan, |_, _| {}, move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(handles.event_loop.block_on(async { 1 }), 1);
        let (pool, event_loop) = deps.shutdown_gracefully(Duration::from_millis(500));
        assert!(pool.is_ok() && event_loop.is_ok());
    }

    #[test]
    fn in_place_teardown_outside_runtime_runs_every_step() {
        let services = SimulatedServices::new();
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);

        let seen = Mutex::new(Vec::new());
        TeardownPlan {
            event_loop: handles.event_loop.clone(),
            node: Some(node),
            vault: Some(vault),
            deps: Some(deps),
            shutdown_timeout: Duration::from_millis(500),
        }
        .run_in_place(&|step, result| seen.lock().unwrap().push((step, result.is_ok())));

        assert_eq!(seen.lock().unwrap().len(), 4);
        assert!(seen.lock().unwrap().iter().all(|(_, ok)| *ok));
        assert!(services.journal().contains(&ServiceCall::VaultStop));
    }

    #[test]
    fn in_place_teardown_inside_runtime_never_blocks() {
        let services = SimulatedServices::new();
        let deps = EngineDependencies::new(1).unwrap();
        let handles = deps.handles();
        let (node, vault) = services.standalone_pair(&handles);
        let plan = TeardownPlan {
            event_loop: handles.event_loop.clone(),
            node: Some(node),
            vault: Some(vault),
            deps: Some(deps),
            shutdown_timeout: Duration::from_millis(500),
        };

        let outer = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let seen = Mutex::new(Vec::new());
        outer.block_on(async {
            plan.run_in_place(&|step, result| seen.lock().unwrap().push((step, result.is_ok())));
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (TeardownStep::NodeStop, false),
                (TeardownStep::VaultStop, false),
                (TeardownStep::WorkerPoolShutdown, true),
                (TeardownStep::EventLoopShutdown, true),
            ]
        );
        assert!(!services.journal().contains(&ServiceCall::VaultStop));
    }
}
