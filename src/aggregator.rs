//! Document aggregation
//!
//! Folds one admitted event into a tracker's document.

use chrono::{DateTime, Utc};

use crate::model::{AdmittedEvent, StepTiming, TrackedDocument};
use crate::timing::compute_step_timings;

/// Merge `event` into `document` and hand the updated document back.
///
/// - `data` keys from the event overwrite, others are kept
/// - a step name already present keeps its first-seen time
/// - the event's step (or `None`) is always appended to `step_logs`
/// - step timings are recomputed from the full step set
pub fn merge(mut document: TrackedDocument, event: &AdmittedEvent, now: DateTime<Utc>) -> TrackedDocument {
    if let Some(ref data) = event.data {
        for (key, value) in data {
            document.data.insert(key.clone(), value.clone());
        }
    }

    if let Some(ref step) = event.step {
        document
            .steps
            .entry(step.name.clone())
            .or_insert_with(|| StepTiming::at(step.date));
    }

    document.step_logs.push(event.step.clone());

    document.updated_at = now;
    document.synced = false;
    document.steps = compute_step_timings(&document.steps);

    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventStep;
    use chrono::Duration;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        "2024-03-01T10:00:00Z".parse().unwrap()
    }

    fn event() -> AdmittedEvent {
        AdmittedEvent {
            application: "shop".into(),
            tracker_id: "0123456789abcdef0123456789abcdef".into(),
            flow: Some("checkout".into()),
            data: None,
            step: None,
        }
    }

    fn with_step(name: &str, offset_ms: i64) -> AdmittedEvent {
        AdmittedEvent {
            step: Some(EventStep::new(name, t0() + Duration::milliseconds(offset_ms))),
            ..event()
        }
    }

    fn with_data(value: serde_json::Value) -> AdmittedEvent {
        AdmittedEvent {
            data: value.as_object().cloned(),
            ..event()
        }
    }

    fn empty_doc() -> TrackedDocument {
        TrackedDocument::new("shop", "checkout", t0())
    }

    #[test]
    fn test_data_merge_precedence() {
        let doc = merge(empty_doc(), &with_data(json!({"x": 1})), Utc::now());
        let doc = merge(doc, &with_data(json!({"x": 2, "y": 3})), Utc::now());

        assert_eq!(serde_json::Value::Object(doc.data), json!({"x": 2, "y": 3}));
    }

    #[test]
    fn test_data_keys_retained() {
        let doc = merge(empty_doc(), &with_data(json!({"a": "kept"})), Utc::now());
        let doc = merge(doc, &with_data(json!({"b": true})), Utc::now());
        assert_eq!(doc.data["a"], "kept");
        assert_eq!(doc.data["b"], true);
    }

    #[test]
    fn test_first_step_time_wins() {
        let doc = merge(empty_doc(), &with_step("cart", 0), Utc::now());
        let doc = merge(doc, &with_step("cart", 5_000), Utc::now());

        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps["cart"].time, t0());
        assert_eq!(doc.step_logs.len(), 2);
        assert_eq!(doc.step_logs[1].as_ref().unwrap().date, t0() + Duration::milliseconds(5_000));
    }

    #[test]
    fn test_stepless_event_logs_none() {
        let doc = merge(empty_doc(), &event(), Utc::now());
        assert!(doc.steps.is_empty());
        assert_eq!(doc.step_logs, vec![None]);
    }

    #[test]
    fn test_step_logs_keep_arrival_order() {
        let mut doc = empty_doc();
        for (name, offset) in [("pay", 2_000), ("cart", 0), ("pay", 3_000)] {
            doc = merge(doc, &with_step(name, offset), Utc::now());
        }

        let names: Vec<&str> = doc
            .step_logs
            .iter()
            .map(|s| s.as_ref().unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["pay", "cart", "pay"]);
    }

    #[test]
    fn test_merge_marks_unsynced_and_updates_timestamp() {
        let mut doc = empty_doc();
        doc.synced = true;
        let now = t0() + Duration::hours(1);

        let doc = merge(doc, &event(), now);
        assert!(!doc.synced);
        assert_eq!(doc.updated_at, now);
        assert_eq!(doc.created_at, t0());
    }

    #[test]
    fn test_timings_independent_of_arrival_order() {
        let orders = [
            ["a", "b", "c"],
            ["a", "c", "b"],
            ["b", "a", "c"],
            ["b", "c", "a"],
            ["c", "a", "b"],
            ["c", "b", "a"],
        ];

        for order in orders {
            let mut doc = empty_doc();
            for name in order {
                let offset = match name {
                    "a" => 0,
                    "b" => 1_000,
                    _ => 2_000,
                };
                doc = merge(doc, &with_step(name, offset), Utc::now());
            }

            assert_eq!((doc.steps["a"].from_start, doc.steps["a"].from_prev), (0, 0), "{:?}", order);
            assert_eq!((doc.steps["b"].from_start, doc.steps["b"].from_prev), (1_000, 1_000), "{:?}", order);
            assert_eq!((doc.steps["c"].from_start, doc.steps["c"].from_prev), (2_000, 1_000), "{:?}", order);
        }
    }

    #[test]
    fn test_earliest_step_is_zero_even_when_late() {
        let doc = merge(empty_doc(), &with_step("late", 10_000), Utc::now());
        let doc = merge(doc, &with_step("early", 0), Utc::now());

        assert_eq!((doc.steps["early"].from_start, doc.steps["early"].from_prev), (0, 0));
        assert_eq!((doc.steps["late"].from_start, doc.steps["late"].from_prev), (10_000, 10_000));
    }
}
