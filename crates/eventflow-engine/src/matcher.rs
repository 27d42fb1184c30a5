//! Trigger matching of events against workflow definitions.

use serde_json::{Map, Value};

use crate::condition::ConditionEvaluator;
use crate::model::WorkflowDefinition;

/// Selects the active definitions whose trigger matches an event.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowMatcher {
    evaluator: ConditionEvaluator,
}

impl WorkflowMatcher {
    /// Create a new workflow matcher.
    pub fn new() -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
        }
    }

    /// Return every active definition triggered by the event, in input order.
    ///
    /// All matches are independent; there is no priority or exclusivity.
    pub fn find_matching<'a>(
        &self,
        event_type: &str,
        payload: &Map<String, Value>,
        definitions: &'a [WorkflowDefinition],
    ) -> Vec<&'a WorkflowDefinition> {
        let context = trigger_context(event_type, payload);

        definitions
            .iter()
            .filter(|d| d.is_active)
            .filter(|d| d.trigger.event_type == event_type)
            .filter(|d| self.evaluator.evaluate(d.trigger.conditions.as_ref(), &context))
            .collect()
    }
}

/// Context trigger conditions are evaluated against: the payload plus the
/// reserved `event_type` key, which always carries the event's type.
pub fn trigger_context(event_type: &str, payload: &Map<String, Value>) -> Value {
    let mut context = payload.clone();
    context.insert("event_type".to_string(), Value::String(event_type.to_string()));
    Value::Object(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Operator, Trigger};
    use serde_json::json;

    fn definition(id: &str, event_type: &str, conditions: Option<Condition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            is_active: true,
            trigger: Trigger {
                event_type: event_type.to_string(),
                conditions,
            },
            initial_step_id: "s1".to_string(),
            steps: vec![],
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_matches_event_type_and_active() {
        let mut inactive = definition("inactive", "form_submitted", None);
        inactive.is_active = false;
        let definitions = vec![
            definition("a", "form_submitted", None),
            definition("b", "ticket_created", None),
            inactive,
        ];

        let matched = WorkflowMatcher::new().find_matching(
            "form_submitted",
            &payload(json!({})),
            &definitions,
        );
        let ids: Vec<&str> = matched.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_identical_triggers_all_match_in_order() {
        let definitions = vec![
            definition("first", "form_submitted", None),
            definition("second", "form_submitted", None),
        ];

        let matched =
            WorkflowMatcher::new().find_matching("form_submitted", &payload(json!({})), &definitions);
        let ids: Vec<&str> = matched.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_conditions_filter() {
        let definitions = vec![
            definition(
                "contact",
                "form_submitted",
                Some(Condition::leaf("template_id", Operator::Eq, json!("contact"))),
            ),
            definition(
                "support",
                "form_submitted",
                Some(Condition::leaf("template_id", Operator::Eq, json!("support"))),
            ),
        ];

        let matched = WorkflowMatcher::new().find_matching(
            "form_submitted",
            &payload(json!({"template_id": "support"})),
            &definitions,
        );
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "support");
    }

    #[test]
    fn test_event_type_key_is_reserved() {
        let definitions = vec![definition(
            "by_type",
            "form_submitted",
            Some(Condition::leaf("event_type", Operator::Eq, json!("form_submitted"))),
        )];

        // A payload key cannot override the reserved event_type
        let matched = WorkflowMatcher::new().find_matching(
            "form_submitted",
            &payload(json!({"event_type": "spoofed"})),
            &definitions,
        );
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_no_match() {
        let definitions = vec![definition("a", "form_submitted", None)];
        let matched =
            WorkflowMatcher::new().find_matching("order_placed", &payload(json!({})), &definitions);
        assert!(matched.is_empty());
    }
}
