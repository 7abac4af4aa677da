use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

type Callback<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// Take the value parked in `slot`, once.
pub(crate) fn take_pending<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// One-shot completion callback for an asynchronous engine operation.
///
/// `complete` consumes the value, so a completion fires at most once. Engines
/// deliver completions from their own threads and never from inside the call
/// that received the completion.
pub struct Completion<T> {
    callback: Option<Callback<T>>,
    label: &'static str,
}

impl<T> Completion<T> {
    pub fn new(f: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(f)),
            label: "completion",
        }
    }

    /// Name reported if the completion is dropped without firing.
    #[must_use]
    pub fn labelled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn complete(mut self, value: T) {
        if let Some(callback) = self.callback.take() {
            callback(value);
        }
    }

    /// Adapt the completion to accept a different value type.
    pub fn map<U: 'static>(self, f: impl FnOnce(U) -> T + Send + 'static) -> Completion<U>
    where
        T: 'static,
    {
        let label = self.label;
        Completion::new(move |value: U| self.complete(f(value))).labelled(label)
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Fire the completion from a helper thread.
    ///
    /// Used on paths that have no runtime to deliver on, such as an engine
    /// answering "already stopped" synchronously. When no thread can be
    /// spawned the completion fires on the caller.
    pub fn complete_later(self, value: T) {
        let slot = Arc::new(Mutex::new(Some((self, value))));
        let thread_slot = Arc::clone(&slot);
        let spawned = std::thread::Builder::new()
            .name("glew-completion".to_owned())
            .spawn(move || {
                if let Some((done, value)) = take_pending(&thread_slot) {
                    done.complete(value);
                }
            });
        if let Err(e) = spawned {
            warn!("cannot spawn completion thread: {e}, completing inline");
            if let Some((done, value)) = take_pending(&slot) {
                done.complete(value);
            }
        }
    }
}

impl Completion<()> {
    pub fn noop() -> Self {
        Self::new(|()| {}).labelled("noop")
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.callback.is_some() {
            warn!("{} dropped without being completed", self.label);
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("label", &self.label)
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
