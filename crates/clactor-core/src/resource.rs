//! Raise-on-failure helpers for backend calls.
//!
//! Backend handles (context, queue, program, kernel, buffer, event) are plain
//! owned values that release the underlying object on drop; shared handles
//! are wrapped in `Arc`. This module only adds the glue that turns a raw
//! [`Status`] into a [`ComputeError::Resource`] naming the failed call.

use crate::error::{ComputeError, Result};
use crate::status::Status;

/// Convert raw backend results into [`ComputeError`]s.
pub trait StatusExt<T> {
    /// Map a failed status to [`ComputeError::Resource`] for `call`.
    fn raise(self, call: &'static str) -> Result<T>;
}

impl<T> StatusExt<T> for std::result::Result<T, Status> {
    fn raise(self, call: &'static str) -> Result<T> {
        self.map_err(|status| ComputeError::resource(call, status))
    }
}

/// Borrow every event of a slice as a wait list.
pub fn wait_list<E>(events: &[E]) -> Vec<&E> {
    events.iter().collect()
}
