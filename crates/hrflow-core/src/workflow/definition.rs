//! Workflow definition validation and YAML import/export.
//!
//! Validates structural constraints (unique ids, resolvable transition
//! endpoints, branch references, positive durations) before a definition is
//! saved, and converts between YAML documents and definition requests.

use std::collections::HashSet;

use hrflow_types::error::EngineError;
use hrflow_types::workflow::{
    ANY_STEP, CreateDefinitionRequest, END_STEP, EscalationPolicy, StepConfig, StepDefinition,
    TransitionDefinition, WorkflowDefinition,
};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a stored or about-to-be-stored definition.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), EngineError> {
    if def.name.trim().is_empty() {
        return Err(invalid("workflow name must not be empty"));
    }
    validate_structure(&def.steps, &def.transitions)?;
    validate_durations(def.default_durations.iter(), &def.steps)?;
    validate_escalations(&def.escalation_policies, &def.steps)
}

/// Validate steps and transitions.
///
/// Checks:
/// - At least one step exists
/// - Step ids are unique and do not use the reserved `any` / `end` ids
/// - Transition ids are unique
/// - Every transition endpoint is a declared step, `any` (source only) or
///   `end` (target only)
/// - Conditional branch targets are declared steps
/// - Parallel steps have at least one branch and unique branch ids
/// - Step and wait durations are > 0
pub fn validate_structure(
    steps: &[StepDefinition],
    transitions: &[TransitionDefinition],
) -> Result<(), EngineError> {
    if steps.is_empty() {
        return Err(invalid("workflow must have at least one step"));
    }

    let mut step_ids = HashSet::new();
    for step in steps {
        if step.id.trim().is_empty() {
            return Err(invalid("step id must not be empty"));
        }
        if step.id == ANY_STEP || step.id == END_STEP {
            return Err(invalid(format!("step id '{}' is reserved", step.id)));
        }
        if !step_ids.insert(step.id.as_str()) {
            return Err(invalid(format!("duplicate step ID: '{}'", step.id)));
        }
        if step.default_duration_hours == Some(0) {
            return Err(invalid(format!(
                "step '{}' default duration must be > 0",
                step.id
            )));
        }
    }

    let mut transition_ids = HashSet::new();
    for t in transitions {
        if !transition_ids.insert(t.id.as_str()) {
            return Err(invalid(format!("duplicate transition ID: '{}'", t.id)));
        }
        if t.from != ANY_STEP && !step_ids.contains(t.from.as_str()) {
            return Err(invalid(format!(
                "transition '{}' starts at unknown step '{}'",
                t.id, t.from
            )));
        }
        if t.to != END_STEP && !step_ids.contains(t.to.as_str()) {
            return Err(invalid(format!(
                "transition '{}' targets unknown step '{}'",
                t.id, t.to
            )));
        }
    }

    for step in steps {
        match &step.config {
            StepConfig::Conditional {
                condition,
                then_step,
                else_step,
            } => {
                if condition.trim().is_empty() {
                    return Err(invalid(format!(
                        "conditional step '{}' has an empty condition",
                        step.id
                    )));
                }
                for target in then_step.iter().chain(else_step.iter()) {
                    if target != END_STEP && !step_ids.contains(target.as_str()) {
                        return Err(invalid(format!(
                            "conditional step '{}' references unknown step '{}'",
                            step.id, target
                        )));
                    }
                    if target == &step.id {
                        return Err(invalid(format!(
                            "conditional step '{}' routes to itself",
                            step.id
                        )));
                    }
                }
            }
            StepConfig::Parallel { branches, .. } => {
                if branches.is_empty() {
                    return Err(invalid(format!(
                        "parallel step '{}' must have at least one branch",
                        step.id
                    )));
                }
                let mut branch_ids = HashSet::new();
                for branch in branches {
                    if !branch_ids.insert(branch.id.as_str()) {
                        return Err(invalid(format!(
                            "parallel step '{}' has duplicate branch '{}'",
                            step.id, branch.id
                        )));
                    }
                }
            }
            StepConfig::Wait {
                duration_hours: Some(0),
                ..
            } => {
                return Err(invalid(format!(
                    "wait step '{}' duration must be > 0",
                    step.id
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn validate_durations<'a>(
    durations: impl Iterator<Item = (&'a String, &'a u32)>,
    steps: &[StepDefinition],
) -> Result<(), EngineError> {
    for (step_id, hours) in durations {
        if !steps.iter().any(|s| &s.id == step_id) {
            return Err(invalid(format!(
                "default duration given for unknown step '{step_id}'"
            )));
        }
        if *hours == 0 {
            return Err(invalid(format!(
                "default duration for step '{step_id}' must be > 0"
            )));
        }
    }
    Ok(())
}

fn validate_escalations(
    policies: &[EscalationPolicy],
    steps: &[StepDefinition],
) -> Result<(), EngineError> {
    for policy in policies {
        if policy.step_id != ANY_STEP && !steps.iter().any(|s| s.id == policy.step_id) {
            return Err(invalid(format!(
                "escalation policy references unknown step '{}'",
                policy.step_id
            )));
        }
    }
    Ok(())
}

/// Whether replacing steps/transitions changes the definition's structure
/// (and therefore its version).
pub fn structure_changed(
    def: &WorkflowDefinition,
    steps: Option<&Vec<StepDefinition>>,
    transitions: Option<&Vec<TransitionDefinition>>,
) -> bool {
    steps.is_some_and(|s| *s != def.steps) || transitions.is_some_and(|t| *t != def.transitions)
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

// ---------------------------------------------------------------------------
// YAML
// ---------------------------------------------------------------------------

/// Parse a YAML document into a validated definition request.
pub fn parse_definition_yaml(yaml: &str) -> Result<CreateDefinitionRequest, EngineError> {
    let request: CreateDefinitionRequest = serde_yaml_ng::from_str(yaml)
        .map_err(|e| EngineError::Validation(format!("parse error: {e}")))?;
    if request.name.trim().is_empty() {
        return Err(invalid("workflow name must not be empty"));
    }
    validate_structure(&request.steps, &request.transitions)?;
    validate_durations(request.default_durations.iter(), &request.steps)?;
    validate_escalations(&request.escalation_policies, &request.steps)?;
    Ok(request)
}

/// Export a definition as a YAML document (ids, ownership, and timestamps
/// are left out).
pub fn serialize_definition_yaml(def: &WorkflowDefinition) -> Result<String, EngineError> {
    let document = CreateDefinitionRequest {
        name: def.name.clone(),
        slug: Some(def.slug.clone()),
        description: def.description.clone(),
        module: def.module.clone(),
        category: def.category.clone(),
        tags: def.tags.clone(),
        steps: def.steps.clone(),
        transitions: def.transitions.clone(),
        default_durations: def.default_durations.clone(),
        reminder_policy: def.reminder_policy.clone(),
        escalation_policies: def.escalation_policies.clone(),
        is_template: def.is_template,
        is_active: def.is_active,
    };
    serde_yaml_ng::to_string(&document).map_err(|e| EngineError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{definition, form_step, transition};
    use hrflow_types::workflow::{
        AssigneeRole, CompletionPolicy, ParallelBranch, TransitionTrigger,
    };

    const REVIEW_YAML: &str = r#"
name: Annual Performance Review
module: performance
category: review
steps:
  - id: self-review
    name: Self review
    assignee_role: employee
    default_duration_hours: 168
    config:
      type: form
      form_key: self_review
  - id: manager-review
    name: Manager review
    assignee_role: manager
    config:
      type: review
  - id: calibration
    name: HR calibration
    assignee_role: skip_level_manager
    config:
      type: approval
      require_comment: true
transitions:
  - id: back-to-self
    from: calibration
    to: self-review
    trigger: rejected
  - id: done
    from: calibration
    to: end
    trigger: approved
"#;

    #[test]
    fn test_parse_valid_yaml() {
        let request = parse_definition_yaml(REVIEW_YAML).unwrap();
        assert_eq!(request.name, "Annual Performance Review");
        assert_eq!(request.steps.len(), 3);
        assert_eq!(request.steps[1].assignee_role, AssigneeRole::Manager);
        assert_eq!(request.transitions[0].trigger, TransitionTrigger::Rejected);
        assert!(request.is_active);
    }

    #[test]
    fn test_parse_rejects_unknown_transition_target() {
        let yaml = REVIEW_YAML.replace("to: self-review", "to: nowhere");
        let err = parse_definition_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown step 'nowhere'"));
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let err = parse_definition_yaml("name: [unclosed").unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn test_yaml_export_roundtrip() {
        let mut def = definition(vec![form_step("a"), form_step("b")]);
        def.transitions = vec![transition("t1", "a", "b", TransitionTrigger::FormSubmitted)];
        let yaml = serialize_definition_yaml(&def).unwrap();
        let request = parse_definition_yaml(&yaml).unwrap();
        assert_eq!(request.steps, def.steps);
        assert_eq!(request.transitions, def.transitions);
        assert_eq!(request.slug.as_deref(), Some(def.slug.as_str()));
    }

    #[test]
    fn test_validate_accepts_wildcard_and_end() {
        let mut def = definition(vec![form_step("a"), form_step("b")]);
        def.transitions = vec![
            transition("t1", ANY_STEP, END_STEP, TransitionTrigger::Rejected),
            transition("t2", "a", "b", TransitionTrigger::FormSubmitted),
        ];
        assert!(validate_definition(&def).is_ok());
    }

    #[test]
    fn test_validate_rejects_end_as_source() {
        let mut def = definition(vec![form_step("a")]);
        def.transitions = vec![transition("t1", END_STEP, "a", TransitionTrigger::Manual)];
        assert!(matches!(
            validate_definition(&def),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let def = definition(vec![form_step("a"), form_step("a")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));

        let mut def = definition(vec![form_step("a"), form_step("b")]);
        def.transitions = vec![
            transition("t1", "a", "b", TransitionTrigger::Manual),
            transition("t1", "b", END_STEP, TransitionTrigger::Manual),
        ];
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("duplicate transition ID"));
    }

    #[test]
    fn test_validate_rejects_empty_steps_and_reserved_ids() {
        let def = definition(Vec::new());
        assert!(validate_definition(&def).is_err());

        let def = definition(vec![form_step("end")]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_validate_conditional_and_parallel_references() {
        let mut bad_branch = form_step("check");
        bad_branch.config = StepConfig::Conditional {
            condition: "context.amount > 1000".to_string(),
            then_step: Some("ghost".to_string()),
            else_step: None,
        };
        let def = definition(vec![bad_branch, form_step("a")]);
        assert!(validate_definition(&def).is_err());

        let mut empty_parallel = form_step("fan");
        empty_parallel.config = StepConfig::Parallel {
            branches: Vec::new(),
            completion: CompletionPolicy::All,
        };
        let def = definition(vec![empty_parallel]);
        assert!(validate_definition(&def).is_err());

        let mut dup_parallel = form_step("fan");
        let branch = ParallelBranch {
            id: "x".to_string(),
            name: "X".to_string(),
            assignee_role: AssigneeRole::Manager,
        };
        dup_parallel.config = StepConfig::Parallel {
            branches: vec![branch.clone(), branch],
            completion: CompletionPolicy::Any,
        };
        let def = definition(vec![dup_parallel]);
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_validate_durations() {
        let mut def = definition(vec![form_step("a")]);
        def.default_durations.insert("a".to_string(), 0);
        assert!(validate_definition(&def).is_err());

        let mut def = definition(vec![form_step("a")]);
        def.default_durations.insert("zzz".to_string(), 4);
        assert!(validate_definition(&def).is_err());
    }

    #[test]
    fn test_structure_changed() {
        let def = definition(vec![form_step("a"), form_step("b")]);
        assert!(!structure_changed(&def, None, None));
        assert!(!structure_changed(&def, Some(&def.steps.clone()), None));
        assert!(structure_changed(&def, Some(&vec![form_step("a")]), None));
        let transitions = vec![transition("t", "a", "b", TransitionTrigger::Manual)];
        assert!(structure_changed(&def, None, Some(&transitions)));
    }
}
