//! Runtime execution types: workflow instances and step instances.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{AssigneeRole, StepType, TransitionTrigger};

// ---------------------------------------------------------------------------
// Workflow Instance
// ---------------------------------------------------------------------------

/// Overall status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    AwaitingApproval,
    Completed,
    Cancelled,
    Expired,
    /// A step finished but none of its outgoing transitions matched.
    Blocked,
}

impl InstanceStatus {
    /// Statuses with no open step.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed
                | InstanceStatus::Cancelled
                | InstanceStatus::Expired
                | InstanceStatus::Blocked
        )
    }

    pub const ACTIVE: [InstanceStatus; 3] = [
        InstanceStatus::Pending,
        InstanceStatus::InProgress,
        InstanceStatus::AwaitingApproval,
    ];
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::AwaitingApproval => "awaiting_approval",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Cancelled => "cancelled",
            InstanceStatus::Expired => "expired",
            InstanceStatus::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "in_progress" => Ok(InstanceStatus::InProgress),
            "awaiting_approval" => Ok(InstanceStatus::AwaitingApproval),
            "completed" => Ok(InstanceStatus::Completed),
            "cancelled" => Ok(InstanceStatus::Cancelled),
            "expired" => Ok(InstanceStatus::Expired),
            "blocked" => Ok(InstanceStatus::Blocked),
            other => Err(format!("invalid instance status: '{other}'")),
        }
    }
}

/// One running execution of a definition for a subject employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub definition_id: Uuid,
    /// Definition version captured at start.
    pub definition_version: i32,
    /// Human-facing reference (e.g. "WF-20260317-4F2A9C").
    pub reference_number: String,
    pub subject_employee_id: Uuid,
    /// Business event that started the instance (e.g. "training_request").
    pub source_type: String,
    pub source_id: String,
    pub status: InstanceStatus,
    /// Step id of the single open step; `None` once terminal.
    pub current_step_id: Option<String>,
    /// Append-only, duplicate-free history of finished step ids.
    pub completed_step_ids: Vec<String>,
    pub context_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped on every state write.
    pub revision: i64,
}

impl WorkflowInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append a finished step id. Returns `false` if it was already recorded.
    pub fn record_completed(&mut self, step_id: &str) -> bool {
        if self.completed_step_ids.iter().any(|s| s == step_id) {
            return false;
        }
        self.completed_step_ids.push(step_id.to_string());
        true
    }

    /// Order for the next step instance.
    pub fn next_step_order(&self) -> i32 {
        self.completed_step_ids.len() as i32 + 1
    }
}

/// Request to start an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstanceRequest {
    pub definition_id: Uuid,
    pub subject_employee_id: Uuid,
    pub source_type: String,
    pub source_id: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context_data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Step Instance
// ---------------------------------------------------------------------------

/// Status of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, StepStatus::Pending | StepStatus::InProgress)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(format!("invalid step status: '{other}'")),
        }
    }
}

/// Outcome of an approval step, kept apart from the generic step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(format!("invalid approval status: '{other}'")),
        }
    }
}

/// Runtime record of one step's execution within one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Matches `StepDefinition.id`.
    pub step_id: String,
    /// Denormalized for display.
    pub step_name: String,
    pub step_type: StepType,
    /// 1-based, monotonic within the instance.
    pub step_order: i32,
    pub assignee_role: AssigneeRole,
    /// `None` when the role could not be resolved; the step can be claimed.
    pub assignee_employee_id: Option<Uuid>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Child progress for parallel steps; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_employee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StepInstance {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Whether this step is open and past its due date at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.due_date.is_some_and(|due| due < now)
    }

    /// Mark every still-open parallel branch skipped.
    pub fn skip_open_branches(&mut self) {
        for branch in self.branches.iter_mut().filter(|b| b.status.is_open()) {
            branch.status = StepStatus::Skipped;
        }
    }
}

/// Progress of one child of a parallel step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchProgress {
    pub branch_id: String,
    pub name: String,
    pub assignee_role: AssigneeRole,
    pub assignee_employee_id: Option<Uuid>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<Uuid>,
}

/// How a step finished. Drives transition matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Form submitted or step acknowledged.
    Completed,
    Approved,
    Rejected,
    Skipped,
    /// A parallel step's completion policy was met.
    ParallelComplete,
    /// A conditional step evaluated its expression.
    ConditionEvaluated { result: bool },
    /// Fired by the external scheduler.
    Timer { trigger: TransitionTrigger },
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Completed => write!(f, "completed"),
            StepOutcome::Approved => write!(f, "approved"),
            StepOutcome::Rejected => write!(f, "rejected"),
            StepOutcome::Skipped => write!(f, "skipped"),
            StepOutcome::ParallelComplete => write!(f, "parallel_complete"),
            StepOutcome::ConditionEvaluated { result } => write!(f, "condition_{result}"),
            StepOutcome::Timer { trigger } => write!(f, "{trigger}"),
        }
    }
}

/// An instance together with its step history, ordered by `step_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDetail {
    pub instance: WorkflowInstance,
    pub steps: Vec<StepInstance>,
}

/// Dashboard aggregates for the calling user's tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Open steps assigned to the caller.
    pub pending_steps: Vec<StepInstance>,
    pub active_instance_count: i64,
    pub overdue_step_count: i64,
    pub completed_this_month: i64,
}
