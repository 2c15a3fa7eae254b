//! Next-step lookup.
//!
//! Two phases: the transition table first, then positional succession.
//!
//! A transition is a candidate when it leaves the finished step (exactly or
//! via the `any` wildcard), its trigger is compatible with the step outcome
//! and its guard conditions hold. Compatible triggers are grouped into
//! priority tiers; within a tier declaration order decides.
//!
//! Positional succession only applies to steps without explicit outgoing
//! transitions. A step that declares exits of its own but matched none of
//! them is [`Route::Blocked`].

use hrflow_types::config::RejectionRouting;
use hrflow_types::instance::StepOutcome;
use hrflow_types::workflow::{
    StepDefinition, TransitionDefinition, TransitionTrigger, WorkflowDefinition,
};
use serde_json::Value;

use super::condition::conditions_hold;

use hrflow_types::workflow::TransitionTrigger::{
    AllParallelComplete, Approved, ConditionMet, FormSubmitted, Manual, Rejected,
};

/// Where an instance goes after a step finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Route<'a> {
    /// Open `step` next.
    Step {
        step: &'a StepDefinition,
        transition_id: Option<&'a str>,
    },
    /// Finish the instance.
    End { transition_id: Option<&'a str> },
    /// The step has explicit exits and none matched.
    Blocked,
}

impl Route<'_> {
    pub fn transition_id(&self) -> Option<&str> {
        match self {
            Route::Step { transition_id, .. } | Route::End { transition_id } => *transition_id,
            Route::Blocked => None,
        }
    }
}

/// Triggers compatible with `outcome`, highest priority tier first.
pub fn trigger_tiers(outcome: StepOutcome, routing: RejectionRouting) -> Vec<Vec<TransitionTrigger>> {
    match (outcome, routing) {
        (StepOutcome::Completed, _) => vec![vec![FormSubmitted, Manual]],
        (StepOutcome::Approved, RejectionRouting::PreferOutcome) => {
            vec![vec![Approved], vec![Manual, FormSubmitted]]
        }
        (StepOutcome::Approved, RejectionRouting::FirstMatch) => {
            vec![vec![Approved, Manual, FormSubmitted]]
        }
        (StepOutcome::Rejected, RejectionRouting::PreferOutcome) => {
            vec![vec![Rejected], vec![Manual, FormSubmitted]]
        }
        (StepOutcome::Rejected, RejectionRouting::FirstMatch) => {
            vec![vec![Rejected, Approved, Manual, FormSubmitted]]
        }
        (StepOutcome::Skipped, _) => vec![vec![Manual, FormSubmitted]],
        (StepOutcome::ParallelComplete, _) => vec![vec![AllParallelComplete, Manual]],
        (StepOutcome::ConditionEvaluated { result: true }, _) => {
            vec![vec![ConditionMet], vec![Manual]]
        }
        (StepOutcome::ConditionEvaluated { result: false }, _) => vec![vec![Manual]],
        (StepOutcome::Timer { trigger }, _) => vec![vec![trigger]],
    }
}

/// First matching transition leaving `from` for `outcome`.
///
/// `guard_doc` is the document transition conditions are checked against.
pub fn select_transition<'a>(
    def: &'a WorkflowDefinition,
    from: &str,
    outcome: StepOutcome,
    routing: RejectionRouting,
    guard_doc: &Value,
) -> Option<&'a TransitionDefinition> {
    trigger_tiers(outcome, routing).into_iter().find_map(|tier| {
        def.transitions.iter().find(|t| {
            t.leaves(from)
                && tier.contains(&t.trigger)
                && conditions_hold(&t.conditions, t.combinator, guard_doc)
        })
    })
}

/// Whether `step_id` declares outgoing transitions of its own that a
/// non-timer outcome could follow. Wildcard and timer-only exits do not
/// count.
pub fn has_explicit_exits(def: &WorkflowDefinition, step_id: &str) -> bool {
    def.explicit_transitions_from(step_id)
        .any(|t| !t.trigger.is_timer())
}

/// Resolve where the instance goes after `from` finished with `outcome`.
pub fn route<'a>(
    def: &'a WorkflowDefinition,
    from: &str,
    outcome: StepOutcome,
    routing: RejectionRouting,
    guard_doc: &Value,
) -> Route<'a> {
    if let Some(t) = select_transition(def, from, outcome, routing, guard_doc) {
        let transition_id = Some(t.id.as_str());
        if t.ends_workflow() {
            return Route::End { transition_id };
        }
        return match def.step(&t.to) {
            Some(step) => Route::Step { step, transition_id },
            None => Route::Blocked,
        };
    }

    if matches!(outcome, StepOutcome::Timer { .. }) || has_explicit_exits(def, from) {
        return Route::Blocked;
    }

    positional(def, from)
}

/// Implicit succession by declaration order.
pub fn positional<'a>(def: &'a WorkflowDefinition, from: &str) -> Route<'a> {
    match def.successor_of(from) {
        Some(step) => Route::Step {
            step,
            transition_id: None,
        },
        None => Route::End {
            transition_id: None,
        },
    }
}
