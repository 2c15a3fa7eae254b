//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the data-defined blueprint of an HR process: an
//! ordered list of typed steps plus a table of trigger-guarded transitions.
//! The engine interprets it at runtime; nothing about a specific process is
//! hard-coded.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wildcard `from` endpoint: the transition leaves every step.
pub const ANY_STEP: &str = "any";

/// Sentinel `to` endpoint: following the transition finishes the instance.
pub const END_STEP: &str = "end";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A versioned workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned on create.
    pub id: Uuid,
    /// Owning tenant. `None` for global system templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub name: String,
    /// URL-safe slug, unique within the owning scope.
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Product module tag (e.g. "performance", "learning").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    /// Category tag (e.g. "review", "onboarding").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ordered steps. Position matters for implicit succession.
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    /// Fallback duration in hours per step id, used when the step itself
    /// declares none.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub default_durations: HashMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_policy: Option<ReminderPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub escalation_policies: Vec<EscalationPolicy>,
    /// Bumped on structural edits (steps or transitions) only.
    #[serde(default = "initial_version")]
    pub version: i32,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn initial_version() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Position of a step in the ordered step list.
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// The step immediately after `step_id` in declaration order.
    pub fn successor_of(&self, step_id: &str) -> Option<&StepDefinition> {
        self.step_index(step_id)
            .and_then(|idx| self.steps.get(idx + 1))
    }

    pub fn is_last_step(&self, step_id: &str) -> bool {
        self.steps.last().is_some_and(|s| s.id == step_id)
    }

    /// Transitions declared with this exact step as their source (wildcards
    /// excluded).
    pub fn explicit_transitions_from<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a TransitionDefinition> + 'a {
        self.transitions.iter().filter(move |t| t.from == step_id)
    }

    /// Default duration for a step: the step's own value, else the
    /// definition-level map.
    pub fn duration_hours_for(&self, step: &StepDefinition) -> Option<u32> {
        step.default_duration_hours
            .or_else(|| self.default_durations.get(&step.id).copied())
    }

    /// Owned by the platform rather than a tenant.
    pub fn is_global(&self) -> bool {
        self.tenant_id.is_none()
    }
}

/// Reminder schedule for open steps. Stored for an external scheduler; the
/// engine never sends reminders itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// First reminder this many hours before the due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_due_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_every_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reminders: Option<u32>,
}

/// Escalation rule for overdue steps. Stored only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Step the rule applies to, or [`ANY_STEP`].
    pub step_id: String,
    /// Hours past the due date before escalating.
    pub after_hours: u32,
    pub escalate_to: AssigneeRole,
    #[serde(default = "default_true")]
    pub notify: bool,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// One typed node in a definition's process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the owning definition (e.g. "manager-review").
    pub id: String,
    pub name: String,
    /// Who should act on the step, resolved per instance.
    #[serde(default)]
    pub assignee_role: AssigneeRole,
    /// Type-specific configuration; its tag is the step type.
    pub config: StepConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_duration_hours: Option<u32>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub notifications: NotificationToggles,
}

impl StepDefinition {
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }

    /// Optional or skippable steps may be skipped by their actor.
    pub fn can_skip(&self) -> bool {
        self.optional || self.skippable
    }
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Form,
    Approval,
    Review,
    Notification,
    Wait,
    Parallel,
    Conditional,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepType::Form => "form",
            StepType::Approval => "approval",
            StepType::Review => "review",
            StepType::Notification => "notification",
            StepType::Wait => "wait",
            StepType::Parallel => "parallel",
            StepType::Conditional => "conditional",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "form" => Ok(StepType::Form),
            "approval" => Ok(StepType::Approval),
            "review" => Ok(StepType::Review),
            "notification" => Ok(StepType::Notification),
            "wait" => Ok(StepType::Wait),
            "parallel" => Ok(StepType::Parallel),
            "conditional" => Ok(StepType::Conditional),
            other => Err(format!("invalid step type: '{other}'")),
        }
    }
}

/// Step-specific configuration payload.
///
/// Internally tagged by `type`:
/// ```yaml
/// config:
///   type: approval
///   require_comment: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Data capture by the assignee.
    Form {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form_key: Option<String>,
    },
    /// Approve/reject gate.
    Approval {
        /// Who takes over when the step escalates.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escalate_to: Option<AssigneeRole>,
        #[serde(default)]
        require_comment: bool,
    },
    /// Read-and-acknowledge review.
    Review {},
    /// Informational step acknowledged by its assignee.
    Notification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
    },
    /// Timer gate released by the external scheduler.
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_hours: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<DateTime<Utc>>,
        /// JEXL expression the scheduler may evaluate before releasing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    /// Fan-out to several assignees inside a single step.
    Parallel {
        branches: Vec<ParallelBranch>,
        #[serde(default)]
        completion: CompletionPolicy,
    },
    /// Automatic routing on a JEXL boolean over the instance context.
    Conditional {
        condition: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        then_step: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_step: Option<String>,
    },
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::Form { .. } => StepType::Form,
            StepConfig::Approval { .. } => StepType::Approval,
            StepConfig::Review {} => StepType::Review,
            StepConfig::Notification { .. } => StepType::Notification,
            StepConfig::Wait { .. } => StepType::Wait,
            StepConfig::Parallel { .. } => StepType::Parallel,
            StepConfig::Conditional { .. } => StepType::Conditional,
        }
    }
}

/// One child of a parallel step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelBranch {
    /// Unique within the parallel step.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub assignee_role: AssigneeRole,
}

/// When a parallel step counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    Any,
    #[default]
    All,
    Majority,
}

impl CompletionPolicy {
    /// Whether `done` finished branches out of `total` satisfy the policy.
    pub fn is_satisfied(&self, done: usize, total: usize) -> bool {
        match self {
            CompletionPolicy::Any => done >= 1,
            CompletionPolicy::All => done >= total,
            CompletionPolicy::Majority => done * 2 > total,
        }
    }
}

/// Per-step notification switches, read by the external notification layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationToggles {
    #[serde(default = "default_true")]
    pub on_assign: bool,
    #[serde(default)]
    pub on_complete: bool,
    #[serde(default = "default_true")]
    pub on_overdue: bool,
}

impl Default for NotificationToggles {
    fn default() -> Self {
        Self {
            on_assign: true,
            on_complete: false,
            on_overdue: true,
        }
    }
}

/// Abstract description of who acts on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeRole {
    /// The subject employee.
    #[default]
    Employee,
    /// The subject's direct manager.
    Manager,
    /// The manager's manager.
    SkipLevelManager,
    HrManager,
    HrAdmin,
    Peer,
    Custom,
}

impl fmt::Display for AssigneeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssigneeRole::Employee => "employee",
            AssigneeRole::Manager => "manager",
            AssigneeRole::SkipLevelManager => "skip_level_manager",
            AssigneeRole::HrManager => "hr_manager",
            AssigneeRole::HrAdmin => "hr_admin",
            AssigneeRole::Peer => "peer",
            AssigneeRole::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AssigneeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(AssigneeRole::Employee),
            "manager" => Ok(AssigneeRole::Manager),
            "skip_level_manager" => Ok(AssigneeRole::SkipLevelManager),
            "hr_manager" => Ok(AssigneeRole::HrManager),
            "hr_admin" => Ok(AssigneeRole::HrAdmin),
            "peer" => Ok(AssigneeRole::Peer),
            "custom" => Ok(AssigneeRole::Custom),
            other => Err(format!("invalid assignee role: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Directed, trigger-guarded edge between steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub id: String,
    /// Source step id or [`ANY_STEP`].
    pub from: String,
    /// Target step id or [`END_STEP`].
    pub to: String,
    pub trigger: TransitionTrigger,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combinator: ConditionCombinator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<TransitionUi>,
}

impl TransitionDefinition {
    /// Whether this transition leaves `step_id`, directly or via wildcard.
    pub fn leaves(&self, step_id: &str) -> bool {
        self.from == step_id || self.from == ANY_STEP
    }

    pub fn ends_workflow(&self) -> bool {
        self.to == END_STEP
    }
}

/// What fires a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    Manual,
    FormSubmitted,
    Approved,
    Rejected,
    DueDateReached,
    ConditionMet,
    AllParallelComplete,
    Escalation,
    Timeout,
}

impl TransitionTrigger {
    /// Triggers only the external scheduler may fire.
    pub fn is_timer(&self) -> bool {
        matches!(
            self,
            TransitionTrigger::DueDateReached
                | TransitionTrigger::Escalation
                | TransitionTrigger::Timeout
        )
    }
}

impl fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionTrigger::Manual => "manual",
            TransitionTrigger::FormSubmitted => "form_submitted",
            TransitionTrigger::Approved => "approved",
            TransitionTrigger::Rejected => "rejected",
            TransitionTrigger::DueDateReached => "due_date_reached",
            TransitionTrigger::ConditionMet => "condition_met",
            TransitionTrigger::AllParallelComplete => "all_parallel_complete",
            TransitionTrigger::Escalation => "escalation",
            TransitionTrigger::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// One guard on a transition, checked against the instance data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into `{context, payload, outcome, subject_employee_id}`.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    Exists,
    NotExists,
}

/// How a transition's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCombinator {
    #[default]
    And,
    Or,
}

/// Display hints for the definition editor. Ignored by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionUi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_style: Option<String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a definition in the caller's tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDefinitionRequest {
    pub name: String,
    /// Explicit slug. When absent one is derived from the name plus a random
    /// suffix.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    #[serde(default)]
    pub default_durations: HashMap<String, u32>,
    #[serde(default)]
    pub reminder_policy: Option<ReminderPolicy>,
    #[serde(default)]
    pub escalation_policies: Vec<EscalationPolicy>,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial update. Only provided fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDefinitionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub steps: Option<Vec<StepDefinition>>,
    #[serde(default)]
    pub transitions: Option<Vec<TransitionDefinition>>,
    #[serde(default)]
    pub default_durations: Option<HashMap<String, u32>>,
    #[serde(default)]
    pub reminder_policy: Option<ReminderPolicy>,
    #[serde(default)]
    pub escalation_policies: Option<Vec<EscalationPolicy>>,
    #[serde(default)]
    pub is_template: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Generate a URL-safe slug from a display name.
///
/// Rules:
/// - Lowercase
/// - Replace non-alphanumeric characters with hyphens
/// - Collapse consecutive hyphens into one
/// - Trim leading/trailing hyphens
///
/// # Examples
///
/// ```
/// use hrflow_types::workflow::slugify;
///
/// assert_eq!(slugify("Annual Performance Review"), "annual-performance-review");
/// assert_eq!(slugify("Salary  Change!"), "salary-change");
/// ```
pub fn slugify(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut prev_was_hyphen = true;
    for c in name.to_lowercase().chars() {
        if c.is_alphanumeric() {
            result.push(c);
            prev_was_hyphen = false;
        } else if !prev_was_hyphen {
            result.push('-');
            prev_was_hyphen = true;
        }
    }
    if result.ends_with('-') {
        result.pop();
    }
    result
}
