//! Observable goal session state.
//!
//! A goal is a multi-step task driven by the control server. The agent only
//! mirrors its lifecycle from inbound notifications so a presentation layer
//! can show it; nothing here influences which actions are executed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the current goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// One reasoning + action unit reported for the running goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalStep {
    pub index: i64,
    pub action: String,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl GoalStep {
    pub fn new(index: i64, action: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            index,
            action: action.into(),
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of the goal session as seen by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSession {
    pub status: GoalStatus,
    pub goal: String,
    pub session_id: Option<String>,
    /// Steps in arrival order. Indices are whatever upstream sent; duplicates
    /// and gaps are kept as-is.
    pub steps: Vec<GoalStep>,
}

impl GoalSession {
    /// Begin a new session, discarding the previous session's steps.
    pub fn start(&mut self, goal: impl Into<String>, session_id: Option<String>) {
        self.steps.clear();
        self.goal = goal.into();
        self.session_id = session_id;
        self.status = GoalStatus::Running;
    }

    pub fn push_step(&mut self, step: GoalStep) {
        self.steps.push(step);
    }

    /// Mark the session finished; `success` picks `Completed` or `Failed`.
    pub fn complete(&mut self, success: bool) {
        self.status = if success {
            GoalStatus::Completed
        } else {
            GoalStatus::Failed
        };
    }

    pub fn fail(&mut self) {
        self.status = GoalStatus::Failed;
    }

    /// Return to the initial `Idle` state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
