//! JEXL expression evaluator for conditional steps.
//!
//! Wraps `jexl_eval::Evaluator` with a few string/collection transforms and
//! coerces results to booleans with JavaScript-like truthiness.
//!
//! Instance data is always passed as the evaluation context, never
//! interpolated into expression strings.

use serde_json::{Value, json};
use uuid::Uuid;

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// JEXL evaluator with the standard transforms registered.
///
/// Not `Send`; build one where it is used and drop it before any `.await`.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean. `context` must be a JSON object.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))?;

        Ok(value_to_bool(&result))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// The data a conditional step's expression sees:
/// `{ "context": <instance context>, "subject_employee_id": "<uuid>" }`.
pub fn instance_expression_context(context_data: &Value, subject_employee_id: &Uuid) -> Value {
    json!({
        "context": context_data,
        "subject_employee_id": subject_employee_id.to_string(),
    })
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub(crate) fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparison_over_context() {
        let evaluator = ConditionEvaluator::new();
        let ctx = instance_expression_context(&json!({"amount": 2500}), &Uuid::nil());
        assert!(evaluator.evaluate_bool("context.amount > 1000", &ctx).unwrap());
        assert!(!evaluator.evaluate_bool("context.amount > 5000", &ctx).unwrap());
    }

    #[test]
    fn test_string_transforms() {
        let evaluator = ConditionEvaluator::new();
        let ctx = json!({"context": {"dept": "Engineering", "tags": ["remote", "senior"]}});
        assert!(
            evaluator
                .evaluate_bool("context.dept|lower == 'engineering'", &ctx)
                .unwrap()
        );
        assert!(
            evaluator
                .evaluate_bool("context.tags|contains('senior')", &ctx)
                .unwrap()
        );
        assert!(evaluator.evaluate_bool("context.tags|length == 2", &ctx).unwrap());
    }

    #[test]
    fn test_missing_field_is_falsy() {
        let evaluator = ConditionEvaluator::new();
        let ctx = json!({"context": {}});
        assert!(!evaluator.evaluate_bool("context.flag", &ctx).unwrap());
    }

    #[test]
    fn test_non_object_context_rejected() {
        let evaluator = ConditionEvaluator::new();
        let err = evaluator.evaluate_bool("true", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!value_to_bool(&Value::Null));
        assert!(!value_to_bool(&json!(0)));
        assert!(!value_to_bool(&json!("")));
        assert!(value_to_bool(&json!("x")));
        assert!(value_to_bool(&json!([])));
    }
}
