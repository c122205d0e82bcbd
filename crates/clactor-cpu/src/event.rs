//! Events of the emulated device.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use clactor_core::backend::{CompletionCallback, EventStatus};

struct EventState {
    status: Option<EventStatus>,
    callbacks: Vec<CompletionCallback>,
}

struct EventInner {
    label: &'static str,
    state: Mutex<EventState>,
    done: Condvar,
}

/// Completion handle of one queued command.
///
/// Clones refer to the same event.
#[derive(Clone)]
pub struct CpuEvent {
    inner: Arc<EventInner>,
}

impl CpuEvent {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(EventInner {
                label,
                state: Mutex::new(EventState {
                    status: None,
                    callbacks: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Kind of command the event belongs to.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    /// Final status, or `None` while the command is pending.
    pub fn status(&self) -> Option<EventStatus> {
        self.inner.state.lock().status
    }

    /// Block until the command finished.
    pub fn wait(&self) -> EventStatus {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(status) = state.status {
                return status;
            }
            self.inner.done.wait(&mut state);
        }
    }

    /// Set the final status and fire callbacks. Later calls are ignored.
    pub(crate) fn complete(&self, status: EventStatus) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.status.is_some() {
                return;
            }
            state.status = Some(status);
            std::mem::take(&mut state.callbacks)
        };
        self.inner.done.notify_all();

        for callback in callbacks {
            callback(status);
        }
    }

    /// Register a callback; runs inline if the event already finished.
    pub(crate) fn on_complete(&self, callback: CompletionCallback) {
        let status = {
            let mut state = self.inner.state.lock();
            match state.status {
                Some(status) => status,
                None => {
                    state.callbacks.push(callback);
                    return;
                }
            }
        };
        callback(status);
    }

    /// Check if two handles refer to the same event.
    pub fn same_event(&self, other: &CpuEvent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CpuEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuEvent")
            .field("label", &self.inner.label)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clactor_core::status::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_callbacks_fire_once() {
        let event = CpuEvent::new("marker");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        event.on_complete(Box::new(move |status| {
            assert_eq!(status, EventStatus::Complete);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        event.complete(EventStatus::Complete);
        event.complete(EventStatus::Failed(Status::OUT_OF_RESOURCES));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(event.status(), Some(EventStatus::Complete));
    }

    #[test]
    fn test_late_callback_runs_inline() {
        let event = CpuEvent::new("read");
        event.complete(EventStatus::Failed(Status::INVALID_VALUE));

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        event.on_complete(Box::new(move |status| *slot.lock() = Some(status)));
        assert_eq!(
            *seen.lock(),
            Some(EventStatus::Failed(Status::INVALID_VALUE))
        );
    }

    #[test]
    fn test_wait_across_threads() {
        let event = CpuEvent::new("kernel");
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait())
        };
        event.complete(EventStatus::Complete);
        assert_eq!(waiter.join().unwrap(), EventStatus::Complete);
        assert!(event.same_event(&event.clone()));
    }
}
