use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single thread executing posted jobs in order.
///
/// Engine completions re-enter the orchestrator through this queue, so state
/// commits that follow an engine callback never run concurrently with each
/// other.
pub struct ControlQueue {
    sender: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ControlQueue {
    pub fn spawn(name: &str) -> Result<Self, CoreError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
                debug!("control queue drained");
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), CoreError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(CoreError::ControlQueueClosed);
        };
        sender
            .send(Box::new(job))
            .map_err(|_| CoreError::ControlQueueClosed)
    }

    /// True when called from the queue's own thread.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Stop accepting jobs, run the ones already posted and join the thread.
    pub fn close(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if self.is_current() {
            return;
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("control queue thread panicked");
            }
        }
    }
}

impl Drop for ControlQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// Exclusive advisory lock on a wallet data directory.
#[derive(Debug)]
pub struct DataDirLock {
    lock_file: File,
    path: PathBuf,
}

impl DataDirLock {
    pub const FILE_NAME: &'static str = ".glew.lock";

    fn open(data_dir: &Path) -> Result<(File, PathBuf), CoreError> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, path))
    }

    /// Block until the lock is held.
    pub fn acquire(data_dir: &Path) -> Result<Self, CoreError> {
        let (file, path) = Self::open(data_dir)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Lock(format!("{}: {e}", path.display())))?;
        Ok(Self {
            lock_file: file,
            path,
        })
    }

    /// Take the lock if nobody else holds it.
    pub fn try_acquire(data_dir: &Path) -> Result<Option<Self>, CoreError> {
        let (file, path) = Self::open(data_dir)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                lock_file: file,
                path,
            })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route the first Ctrl-C to `on_shutdown`; a second one exits immediately.
pub fn install_signal_handler(on_shutdown: impl Fn() + Send + 'static) {
    let result = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        eprintln!("\nshutdown requested, stopping wallet engine...");
        on_shutdown();
    });
    if let Err(e) = result {
        warn!("cannot install Ctrl-C handler: {e}");
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn queue_runs_jobs_in_order_on_its_thread() {
        let queue = ControlQueue::spawn("test-control").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            queue
                .post(move || {
                    let name = std::thread::current().name().map(str::to_owned);
                    seen.lock().unwrap().push((i, name));
                })
                .unwrap();
        }
        queue.close();

        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("test-control")));
    }

    #[test]
    fn closed_queue_rejects_jobs() {
        let queue = ControlQueue::spawn("test-control").unwrap();
        queue.close();
        assert!(matches!(
            queue.post(|| {}),
            Err(CoreError::ControlQueueClosed)
        ));
    }

    #[test]
    fn is_current_only_on_queue_thread() {
        let queue = Arc::new(ControlQueue::spawn("test-control").unwrap());
        assert!(!queue.is_current());
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&queue);
        queue.post(move || tx.send(inner.is_current()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("wallet");

        {
            let lock = DataDirLock::acquire(&data_dir).unwrap();
            assert!(lock.path().exists());
        }

        let lock2 = DataDirLock::try_acquire(&data_dir).unwrap();
        assert!(lock2.is_some());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();

        let _lock = DataDirLock::acquire(dir.path()).unwrap();
        let result = DataDirLock::try_acquire(dir.path()).unwrap();
        assert!(result.is_none());
    }
}
