//! Scheduler error types.
//!
//! Failures inside submitted work never crash a worker thread or the
//! scheduler: a panic is captured as a [`PanicPayload`] and re-raised to
//! whoever joins the task's handle. Internal ordering-invariant violations
//! are programming errors and assert; they are not represented here.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Error returned when a submission is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The scheduler has been shut down and accepts no new work.
    #[error("scheduler is shut down")]
    Shutdown,
}

/// Error returned when joining a task's outcome fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The task was cancelled before it started running.
    #[error("task was cancelled")]
    Cancelled,

    /// The task's work panicked; the payload is re-raised here.
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),

    /// A bounded wait elapsed before the task reached a terminal state.
    ///
    /// The task itself is unaffected: it is still pending or running.
    #[error("timed out waiting for task outcome")]
    Timeout,
}

/// Printable capture of a panic value.
///
/// Panics carry `Box<dyn Any>`; the common `&str` and `String` payloads
/// are extracted, anything else is reported opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a message from a raw panic payload.
    #[must_use]
    pub fn from_any(payload: &(dyn Any + Send)) -> Self {
        if let Some(s) = payload.downcast_ref::<&'static str>() {
            Self::new(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::new(s.clone())
        } else {
            Self::new("opaque panic payload")
        }
    }

    /// Returns the captured panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_extracts_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(PanicPayload::from_any(boxed.as_ref()).message(), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("kaput"));
        assert_eq!(PanicPayload::from_any(boxed.as_ref()).message(), "kaput");

        let boxed: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(
            PanicPayload::from_any(boxed.as_ref()).message(),
            "opaque panic payload"
        );
    }

    #[test]
    fn join_error_display() {
        assert_eq!(JoinError::Cancelled.to_string(), "task was cancelled");
        assert_eq!(
            JoinError::Panicked(PanicPayload::new("boom")).to_string(),
            "task panicked: boom"
        );
        assert_eq!(
            ScheduleError::Shutdown.to_string(),
            "scheduler is shut down"
        );
    }
}
