//! Rail attempt bookkeeping of a payment.
//!
//! ```text
//! INITIAL --process--> IN_PROGRESS --complete--> COMPLETED
//!    |                   |    ^
//!    |                   |    | try_next / fail_current_plugin
//!    |                   +----+
//!    |                   |
//!    |                   +--fail (queue exhausted)--> FAILED
//!    +--cancel--> CANCELLED
//! ```
//!
//! At most one rail is in flight at a time: the `current_plugin` slot is the
//! only place an unconcluded attempt can live. Concluded attempts are appended
//! to `tried_plugins` and never touched again.
//!
//! Transitions here are pure; [`Payment`](crate::Payment) applies them to a
//! copy of its record and persists the result.

use crate::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Lifecycle status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Initial,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Completed, failed or cancelled.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt at sending a payment over a rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginAttempt {
    /// Handed to the rail, outcome unknown.
    #[serde(rename_all = "camelCase")]
    Submitted {
        name: String,
        start_at: DateTime<Utc>,
    },
    /// The rail reported failure.
    #[serde(rename_all = "camelCase")]
    Failed {
        name: String,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
    /// The rail delivered the payment.
    #[serde(rename_all = "camelCase")]
    Success {
        name: String,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    },
}

impl PluginAttempt {
    pub fn submitted(name: impl Into<String>, start_at: DateTime<Utc>) -> Self {
        Self::Submitted {
            name: name.into(),
            start_at,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Submitted { name, .. } | Self::Failed { name, .. } | Self::Success { name, .. } => {
                name
            }
        }
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        match self {
            Self::Submitted { start_at, .. }
            | Self::Failed { start_at, .. }
            | Self::Success { start_at, .. } => *start_at,
        }
    }

    pub fn end_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Submitted { .. } => None,
            Self::Failed { end_at, .. } | Self::Success { end_at, .. } => Some(*end_at),
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    fn conclude(self, success: bool, end_at: DateTime<Utc>) -> Self {
        let name = self.name().to_string();
        let start_at = self.start_at();
        if success {
            Self::Success {
                name,
                start_at,
                end_at,
            }
        } else {
            Self::Failed {
                name,
                start_at,
                end_at,
            }
        }
    }
}

/// Result of [`PaymentState::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A new attempt was started on the named rail.
    Started(String),
    /// The named rail is still in flight; wait for its report.
    AlreadyInFlight(String),
    /// No rails were left; the payment is now failed.
    Failed,
}

/// Attempt/fallback state embedded in a payment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentState {
    internal_state: PaymentStatus,
    #[serde(default)]
    pending_plugins: VecDeque<String>,
    #[serde(default)]
    tried_plugins: Vec<PluginAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_plugin: Option<PluginAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_by_plugin: Option<PluginAttempt>,
}

impl PaymentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal state of a payment delivered by `attempt` (incoming payments).
    pub fn completed_by(attempt: PluginAttempt) -> Self {
        Self {
            internal_state: PaymentStatus::Completed,
            pending_plugins: VecDeque::new(),
            tried_plugins: vec![attempt.clone()],
            current_plugin: None,
            completed_by_plugin: Some(attempt),
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.internal_state
    }

    pub fn pending_plugins(&self) -> &VecDeque<String> {
        &self.pending_plugins
    }

    pub fn tried_plugins(&self) -> &[PluginAttempt] {
        &self.tried_plugins
    }

    pub fn current_plugin(&self) -> Option<&PluginAttempt> {
        self.current_plugin.as_ref()
    }

    pub fn completed_by_plugin(&self) -> Option<&PluginAttempt> {
        self.completed_by_plugin.as_ref()
    }

    /// Rails not yet concluded: pending, tried and in flight.
    pub fn attempt_count(&self) -> usize {
        self.pending_plugins.len() + self.tried_plugins.len() + usize::from(self.current_plugin.is_some())
    }

    pub fn is_initial(&self) -> bool {
        self.internal_state == PaymentStatus::Initial
    }

    pub fn is_in_progress(&self) -> bool {
        self.internal_state == PaymentStatus::InProgress
    }

    pub fn is_completed(&self) -> bool {
        self.internal_state == PaymentStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.internal_state == PaymentStatus::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.internal_state == PaymentStatus::Cancelled
    }

    pub fn is_final(&self) -> bool {
        self.internal_state.is_final()
    }

    fn invalid(&self) -> PaymentError {
        PaymentError::InvalidState(self.internal_state.to_string())
    }

    /// Set the fallback queue, in priority order.
    pub fn assign_pending_plugins(&mut self, plugins: Vec<String>) -> Result<()> {
        if !self.is_initial() {
            return Err(self.invalid());
        }
        self.pending_plugins = plugins.into();
        Ok(())
    }

    /// Advance the payment as far as it can go without a rail report.
    pub fn process(&mut self, now: DateTime<Utc>) -> Result<ProcessOutcome> {
        match self.internal_state {
            PaymentStatus::Initial => self.internal_state = PaymentStatus::InProgress,
            PaymentStatus::InProgress => {}
            _ => return Err(self.invalid()),
        }

        if let Some(current) = &self.current_plugin {
            return Ok(ProcessOutcome::AlreadyInFlight(current.name().to_string()));
        }
        if self.pending_plugins.is_empty() {
            self.fail(now)?;
            return Ok(ProcessOutcome::Failed);
        }
        self.try_next(now)?;
        match &self.current_plugin {
            Some(current) => Ok(ProcessOutcome::Started(current.name().to_string())),
            None => Err(self.invalid()),
        }
    }

    /// Start an attempt on the next pending rail.
    ///
    /// Returns `false` if the queue is empty.
    pub fn try_next(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if !self.is_in_progress() || self.current_plugin.is_some() {
            return Err(self.invalid());
        }
        match self.pending_plugins.pop_front() {
            Some(name) => {
                self.current_plugin = Some(PluginAttempt::submitted(name, now));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Conclude the in-flight attempt as failed.
    pub fn fail_current_plugin(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_in_progress() {
            return Err(self.invalid());
        }
        let current = self.current_plugin.take().ok_or_else(|| self.invalid())?;
        self.tried_plugins.push(current.conclude(false, now));
        Ok(())
    }

    /// Give up on the payment.
    pub fn fail(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_in_progress() {
            return Err(self.invalid());
        }
        if self.current_plugin.is_some() {
            self.fail_current_plugin(now)?;
        }
        self.internal_state = PaymentStatus::Failed;
        Ok(())
    }

    /// Conclude the in-flight attempt as the one that delivered the payment.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_in_progress() {
            return Err(self.invalid());
        }
        let current = self.current_plugin.take().ok_or_else(|| self.invalid())?;
        let success = current.conclude(true, now);
        self.tried_plugins.push(success.clone());
        self.completed_by_plugin = Some(success);
        self.internal_state = PaymentStatus::Completed;
        Ok(())
    }

    /// Cancel a payment no rail was tried for.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.is_initial() || self.current_plugin.is_some() {
            return Err(self.invalid());
        }
        self.internal_state = PaymentStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn queued(rails: &[&str]) -> PaymentState {
        let mut state = PaymentState::new();
        state
            .assign_pending_plugins(rails.iter().map(|s| s.to_string()).collect())
            .unwrap();
        state
    }

    #[test]
    fn test_fallback_until_exhausted() {
        let t0 = Utc::now();
        let mut state = queued(&["p2sh", "p2tr"]);

        assert_eq!(state.process(t0).unwrap(), ProcessOutcome::Started("p2sh".into()));
        assert!(state.is_in_progress());
        assert_eq!(
            state.process(t0).unwrap(),
            ProcessOutcome::AlreadyInFlight("p2sh".into())
        );

        state.fail_current_plugin(t0 + Duration::seconds(1)).unwrap();
        assert_eq!(state.process(t0).unwrap(), ProcessOutcome::Started("p2tr".into()));
        assert_eq!(state.tried_plugins().len(), 1);
        assert_eq!(state.tried_plugins()[0].name(), "p2sh");
        assert!(matches!(state.tried_plugins()[0], PluginAttempt::Failed { .. }));

        state.fail_current_plugin(t0).unwrap();
        assert_eq!(state.process(t0).unwrap(), ProcessOutcome::Failed);
        assert!(state.is_failed());
        assert_eq!(state.tried_plugins().len(), 2);
        assert!(state
            .tried_plugins()
            .iter()
            .all(|a| matches!(a, PluginAttempt::Failed { .. })));
        assert!(state.current_plugin().is_none());
    }

    #[test]
    fn test_complete_records_winner() {
        let t0 = Utc::now();
        let mut state = queued(&["p2sh", "p2tr"]);
        state.process(t0).unwrap();
        state.fail_current_plugin(t0).unwrap();
        state.process(t0).unwrap();
        state.complete(t0).unwrap();

        assert!(state.is_completed());
        assert_eq!(state.completed_by_plugin().unwrap().name(), "p2tr");
        assert!(state.completed_by_plugin().unwrap().is_success());
        assert_eq!(state.tried_plugins().len(), 2);
    }

    #[test]
    fn test_invalid_transitions_leave_state_untouched() {
        let t0 = Utc::now();
        let mut state = queued(&["p2sh"]);
        let before = state.clone();

        assert!(matches!(state.try_next(t0), Err(PaymentError::InvalidState(ref s)) if s == "INITIAL"));
        assert!(state.fail(t0).is_err());
        assert!(state.complete(t0).is_err());
        assert!(state.fail_current_plugin(t0).is_err());
        assert_eq!(state, before);

        state.process(t0).unwrap();
        let before = state.clone();
        assert!(state.cancel().is_err());
        assert!(state.try_next(t0).is_err());
        assert!(state.assign_pending_plugins(vec!["x".into()]).is_err());
        assert_eq!(state, before);

        state.complete(t0).unwrap();
        let before = state.clone();
        assert!(state.process(t0).is_err());
        assert!(state.fail(t0).is_err());
        assert!(state.complete(t0).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_cancel_only_from_initial() {
        let mut state = queued(&["p2sh"]);
        state.cancel().unwrap();
        assert!(state.is_cancelled());
        assert!(state.is_final());
        assert!(matches!(state.cancel(), Err(PaymentError::InvalidState(ref s)) if s == "CANCELLED"));
    }

    #[test]
    fn test_empty_queue_fails_on_first_process() {
        let mut state = PaymentState::new();
        assert_eq!(state.process(Utc::now()).unwrap(), ProcessOutcome::Failed);
        assert!(state.is_failed());
    }

    #[test]
    fn test_wire_format() {
        let t0 = Utc::now();
        let mut state = queued(&["p2sh", "p2tr"]);
        state.process(t0).unwrap();

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["internalState"], "IN_PROGRESS");
        assert_eq!(value["pendingPlugins"], serde_json::json!(["p2tr"]));
        assert_eq!(value["currentPlugin"]["state"], "SUBMITTED");
        assert_eq!(value["currentPlugin"]["name"], "p2sh");
        assert!(value["currentPlugin"].get("startAt").is_some());

        let parsed: PaymentState = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, state);
    }
}
