//! Condition evaluation for triggers and transitions.
//!
//! Evaluation is pure and total: unresolvable paths read as null and
//! incomparable values fail closed instead of raising.

use std::cmp::Ordering;

use serde_json::Value;

use crate::context::{resolve_path, value_to_string};
use crate::model::{Condition, Operator};

/// Evaluates condition trees against a context value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an optional condition. An absent condition is always true.
    pub fn evaluate(&self, condition: Option<&Condition>, context: &Value) -> bool {
        match condition {
            None => true,
            Some(condition) => self.evaluate_condition(condition, context),
        }
    }

    /// Evaluate a condition tree.
    pub fn evaluate_condition(&self, condition: &Condition, context: &Value) -> bool {
        match condition {
            Condition::All(children) => children.iter().all(|c| self.evaluate_condition(c, context)),
            Condition::Any(children) => children.iter().any(|c| self.evaluate_condition(c, context)),
            Condition::Leaf { path, op, value } => {
                let left = resolve_path(context, path).unwrap_or(&Value::Null);
                apply_operator(*op, left, value)
            }
        }
    }
}

fn apply_operator(op: Operator, left: &Value, right: &Value) -> bool {
    match op {
        Operator::Eq => values_equal(left, right),
        Operator::Ne => !values_equal(left, right),
        Operator::In => match right {
            Value::Array(items) => items.iter().any(|item| values_equal(left, item)),
            _ => false,
        },
        Operator::Gt => compare(left, right) == Some(Ordering::Greater),
        Operator::Gte => matches!(compare(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare(left, right) == Some(Ordering::Less),
        Operator::Lte => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::Contains => match (left, right) {
            (Value::Null, _) => false,
            (_, Value::String(needle)) => value_to_string(left).contains(needle.as_str()),
            _ => false,
        },
    }
}

/// Structural equality where `1` and `1.0` are equal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Some(Ordering::Equal),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

/// Ordering between two values of the same kind; `None` when undefined.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                return Some(x.cmp(&y));
            }
            if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                return Some(x.cmp(&y));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(path: &str, op: Operator, value: Value) -> Condition {
        Condition::leaf(path, op, value)
    }

    fn eval(condition: &Condition, ctx: &Value) -> bool {
        ConditionEvaluator::new().evaluate(Some(condition), ctx)
    }

    #[test]
    fn test_empty_all_and_any() {
        let ctx = json!({});
        assert!(eval(&Condition::All(vec![]), &ctx));
        assert!(!eval(&Condition::Any(vec![]), &ctx));
    }

    #[test]
    fn test_absent_condition_is_true() {
        assert!(ConditionEvaluator::new().evaluate(None, &json!({})));
    }

    #[test]
    fn test_eq_and_ne() {
        let ctx = json!({"template_id": "contact", "n": 1});
        assert!(eval(&leaf("template_id", Operator::Eq, json!("contact")), &ctx));
        assert!(!eval(&leaf("template_id", Operator::Eq, json!("other")), &ctx));
        assert!(eval(&leaf("template_id", Operator::Ne, json!("other")), &ctx));
        // Integer and float forms compare equal
        assert!(eval(&leaf("n", Operator::Eq, json!(1.0)), &ctx));
    }

    #[test]
    fn test_eq_structural() {
        let ctx = json!({"tags": ["a", "b"], "meta": {"x": 1}});
        assert!(eval(&leaf("tags", Operator::Eq, json!(["a", "b"])), &ctx));
        assert!(eval(&leaf("meta", Operator::Eq, json!({"x": 1.0})), &ctx));
        assert!(!eval(&leaf("meta", Operator::Eq, json!({"x": 1, "y": 2})), &ctx));
    }

    #[test]
    fn test_absent_path_semantics() {
        let ctx = json!({"present": 1});
        let absent = |op, value| eval(&leaf("missing.deep", op, value), &ctx);

        assert!(!absent(Operator::Eq, json!("x")));
        assert!(absent(Operator::Ne, json!("x")));
        assert!(!absent(Operator::Gt, json!(0)));
        assert!(!absent(Operator::Gte, json!(0)));
        assert!(!absent(Operator::Lt, json!(0)));
        assert!(!absent(Operator::Lte, json!(0)));
        assert!(!absent(Operator::Contains, json!("x")));
    }

    #[test]
    fn test_in_operator() {
        let ctx = json!({"status": "open"});
        assert!(eval(&leaf("status", Operator::In, json!(["open", "new"])), &ctx));
        assert!(!eval(&leaf("status", Operator::In, json!(["closed"])), &ctx));
        // Non-list value is false, not an error
        assert!(!eval(&leaf("status", Operator::In, json!("open")), &ctx));
    }

    #[test]
    fn test_ordering_operators() {
        let ctx = json!({"count": 10, "name": "beta"});
        assert!(eval(&leaf("count", Operator::Gt, json!(5)), &ctx));
        assert!(eval(&leaf("count", Operator::Gte, json!(10)), &ctx));
        assert!(eval(&leaf("count", Operator::Lt, json!(10.5)), &ctx));
        assert!(eval(&leaf("count", Operator::Lte, json!(10)), &ctx));
        assert!(eval(&leaf("name", Operator::Gt, json!("alpha")), &ctx));
    }

    #[test]
    fn test_ordering_mismatched_types_fail_closed() {
        let ctx = json!({"count": 10, "flag": true});
        assert!(!eval(&leaf("count", Operator::Gt, json!("5")), &ctx));
        assert!(!eval(&leaf("count", Operator::Lte, json!("50")), &ctx));
        assert!(!eval(&leaf("flag", Operator::Gt, json!(0)), &ctx));
        assert!(!eval(&leaf("count", Operator::Gt, json!(null)), &ctx));
    }

    #[test]
    fn test_contains() {
        let ctx = json!({"message": "hello world", "code": 12345});
        assert!(eval(&leaf("message", Operator::Contains, json!("world")), &ctx));
        assert!(!eval(&leaf("message", Operator::Contains, json!("mars")), &ctx));
        // String form of non-string values
        assert!(eval(&leaf("code", Operator::Contains, json!("234")), &ctx));
        // Non-string needle fails closed
        assert!(!eval(&leaf("code", Operator::Contains, json!(234)), &ctx));
    }

    #[test]
    fn test_nested_all_any() {
        let ctx = json!({"form": {"type": "support", "priority": 3}});
        let condition = Condition::All(vec![
            leaf("form.type", Operator::Eq, json!("support")),
            Condition::Any(vec![
                leaf("form.priority", Operator::Gte, json!(5)),
                leaf("form.priority", Operator::In, json!([3, 4])),
            ]),
        ]);
        assert!(eval(&condition, &ctx));

        let ctx = json!({"form": {"type": "support", "priority": 1}});
        assert!(!eval(&condition, &ctx));
    }

    #[test]
    fn test_evaluate_is_shareable_across_threads() {
        let evaluator = ConditionEvaluator::new();
        let condition = leaf("n", Operator::Gt, json!(1));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let condition = condition.clone();
                std::thread::spawn(move || evaluator.evaluate(Some(&condition), &json!({"n": i})))
            })
            .collect();
        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![false, false, true, true]);
    }
}
