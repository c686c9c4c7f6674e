//! Step timing derivation
//!
//! Recomputes `from_start` and `from_prev` for every step of a document.
//! Steps are ordered by their timestamp only, never by arrival, so the result
//! is the same for any insertion order of the same `(name, time)` pairs.

use std::collections::HashMap;

use crate::model::StepTiming;

/// Derive ordered timings from a document's step map.
///
/// Equal timestamps are ordered by step name so the output is deterministic.
pub fn compute_step_timings(steps: &HashMap<String, StepTiming>) -> HashMap<String, StepTiming> {
    let mut ordered: Vec<(&String, &StepTiming)> = steps.iter().collect();
    ordered.sort_by(|(a_name, a), (b_name, b)| a.time.cmp(&b.time).then_with(|| a_name.cmp(b_name)));

    let mut result = HashMap::with_capacity(ordered.len());
    let mut start = None;
    let mut prev = None;

    for (name, step) in ordered {
        let start_time = *start.get_or_insert(step.time);
        let prev_time = prev.unwrap_or(step.time);

        result.insert(
            name.clone(),
            StepTiming {
                time: step.time,
                from_start: (step.time - start_time).num_milliseconds(),
                from_prev: (step.time - prev_time).num_milliseconds(),
            },
        );

        prev = Some(step.time);
    }

    result
}
