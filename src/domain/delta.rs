// Delta engine - tolerance-bounded change over a lookback window
use crate::domain::observation::History;
use crate::domain::timeline::Timeline;
use serde::Serialize;
use std::fmt;

/// Rounding guard applied to the lower bound of the lookback window.
pub const WINDOW_EPSILON_MINUTES: f64 = 0.01;
pub const DEFAULT_TOLERANCE_MINUTES: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    /// The current timestamp is not on the timeline.
    UnknownTimestamp,
    /// No earlier position is at least one window away.
    InsufficientHistory,
    /// The nearest qualifying position is further back than window + tolerance.
    GapExceedsTolerance,
    /// The entity has no observation at the current or reference timestamp.
    MissingSample,
    /// One of the two observations lacks the metric.
    MissingMetric,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Unavailable::UnknownTimestamp => "timestamp is not on the timeline",
            Unavailable::InsufficientHistory => "not enough history for the window",
            Unavailable::GapExceedsTolerance => "reference sample is outside the tolerance band",
            Unavailable::MissingSample => "no sample for this entity",
            Unavailable::MissingMetric => "metric not reported",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delta {
    Available {
        value: f64,
        reference_timestamp: String,
        elapsed_minutes: f64,
    },
    Unavailable {
        reason: Unavailable,
    },
}

impl Delta {
    pub fn unavailable(reason: Unavailable) -> Self {
        Delta::Unavailable { reason }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Delta::Available { value, .. } => Some(*value),
            Delta::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Delta::Available { .. })
    }
}

/// Where the reference sample for a window sits on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub position: usize,
    pub elapsed_minutes: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DeltaEngine<'a> {
    timeline: &'a Timeline,
    tolerance_minutes: f64,
}

impl<'a> DeltaEngine<'a> {
    pub fn new(timeline: &'a Timeline, tolerance_minutes: f64) -> Self {
        Self {
            timeline,
            tolerance_minutes,
        }
    }

    /// Nearest position at least `window_minutes` before `timestamp`,
    /// rejected when it is more than `window_minutes + tolerance` away.
    pub fn reference(&self, timestamp: &str, window_minutes: f64) -> Result<Reference, Unavailable> {
        let current = self
            .timeline
            .position(timestamp)
            .ok_or(Unavailable::UnknownTimestamp)?;

        let lower = window_minutes - WINDOW_EPSILON_MINUTES;
        let reference = (0..current)
            .rev()
            .find_map(|position| {
                let elapsed = self.timeline.elapsed_minutes(current, position)?;
                (elapsed >= lower).then_some(Reference {
                    position,
                    elapsed_minutes: elapsed,
                })
            })
            .ok_or(Unavailable::InsufficientHistory)?;

        if reference.elapsed_minutes > window_minutes + self.tolerance_minutes {
            return Err(Unavailable::GapExceedsTolerance);
        }

        Ok(reference)
    }

    pub fn delta(&self, history: &History, metric: &str, timestamp: &str, window_minutes: f64) -> Delta {
        match self.try_delta(history, metric, timestamp, window_minutes) {
            Ok(delta) => delta,
            Err(reason) => Delta::unavailable(reason),
        }
    }

    fn try_delta(
        &self,
        history: &History,
        metric: &str,
        timestamp: &str,
        window_minutes: f64,
    ) -> Result<Delta, Unavailable> {
        let reference = self.reference(timestamp, window_minutes)?;
        let reference_timestamp = self
            .timeline
            .get(reference.position)
            .map(|entry| entry.timestamp.as_str())
            .ok_or(Unavailable::InsufficientHistory)?;

        let current = history.get(timestamp).ok_or(Unavailable::MissingSample)?;
        let earlier = history
            .get(reference_timestamp)
            .ok_or(Unavailable::MissingSample)?;

        let now = current.metric(metric).ok_or(Unavailable::MissingMetric)?;
        let then = earlier.metric(metric).ok_or(Unavailable::MissingMetric)?;

        Ok(Delta::Available {
            value: now - then,
            reference_timestamp: reference_timestamp.to_string(),
            elapsed_minutes: reference.elapsed_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::Observation;
    use std::collections::BTreeMap;

    fn history(samples: &[(&str, Option<f64>)]) -> History {
        let mut history = History::new();
        for (ts, qg) in samples {
            let mut metrics = BTreeMap::new();
            if let Some(value) = qg {
                metrics.insert("qg".to_string(), *value);
            }
            history.insert(Observation::new(ts.to_string(), metrics));
        }
        history
    }

    const T0: &str = "2025-06-01T10:00:00Z";
    const T10: &str = "2025-06-01T10:10:00Z";
    const T20: &str = "2025-06-01T10:20:00Z";

    #[test]
    fn test_delta_against_previous_window() {
        let r = history(&[(T0, Some(100.0)), (T10, Some(150.0)), (T20, Some(130.0))]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        let delta = engine.delta(&r, "qg", T20, 10.0);
        assert_eq!(
            delta,
            Delta::Available {
                value: -20.0,
                reference_timestamp: T10.to_string(),
                elapsed_minutes: 10.0,
            }
        );
    }

    #[test]
    fn test_gap_beyond_tolerance_is_unavailable() {
        let s = history(&[(T0, Some(100.0)), (T20, Some(130.0))]);
        let timeline = Timeline::build([&s]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(
            engine.delta(&s, "qg", T20, 10.0),
            Delta::unavailable(Unavailable::GapExceedsTolerance)
        );
        // The same gap is fine for a 20 minute window.
        assert_eq!(engine.delta(&s, "qg", T20, 20.0).value(), Some(30.0));
    }

    #[test]
    fn test_tolerance_bound_is_inclusive() {
        let at_bound = "2025-06-01T10:15:00Z";
        let past_bound = "2025-06-01T10:15:00.600Z";
        let s = history(&[(T0, Some(100.0)), (at_bound, Some(110.0))]);
        let timeline = Timeline::build([&s]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(
            engine.delta(&s, "qg", at_bound, 10.0),
            Delta::Available {
                value: 10.0,
                reference_timestamp: T0.to_string(),
                elapsed_minutes: 15.0,
            }
        );

        let late = history(&[(T0, Some(100.0)), (past_bound, Some(110.0))]);
        let timeline = Timeline::build([&late]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);
        let reference = engine.reference(past_bound, 10.0);

        assert_eq!(reference, Err(Unavailable::GapExceedsTolerance));
        assert_eq!(
            engine.delta(&late, "qg", past_bound, 10.0),
            Delta::unavailable(Unavailable::GapExceedsTolerance)
        );
    }

    #[test]
    fn test_reference_from_other_entity_tick_without_own_sample() {
        // S skips 10:10, but R reports it, so the timeline has a 10:10 tick.
        let r = history(&[(T0, Some(1.0)), (T10, Some(2.0)), (T20, Some(3.0))]);
        let s = history(&[(T0, Some(100.0)), (T20, Some(130.0))]);
        let timeline = Timeline::build([&r, &s]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(
            engine.delta(&s, "qg", T20, 10.0),
            Delta::unavailable(Unavailable::MissingSample)
        );
        assert_eq!(
            engine.delta(&s, "qg", T10, 10.0),
            Delta::unavailable(Unavailable::MissingSample)
        );
    }

    #[test]
    fn test_insufficient_history_and_unknown_timestamp() {
        let r = history(&[(T0, Some(1.0)), (T10, Some(2.0))]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(
            engine.delta(&r, "qg", T10, 30.0),
            Delta::unavailable(Unavailable::InsufficientHistory)
        );
        assert_eq!(
            engine.delta(&r, "qg", T0, 10.0),
            Delta::unavailable(Unavailable::InsufficientHistory)
        );
        assert_eq!(
            engine.delta(&r, "qg", "2025-06-01T11:00:00Z", 10.0),
            Delta::unavailable(Unavailable::UnknownTimestamp)
        );
    }

    #[test]
    fn test_missing_metric_is_unavailable_not_zero() {
        let r = history(&[(T0, None), (T10, Some(2.0))]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        let delta = engine.delta(&r, "qg", T10, 10.0);
        assert_eq!(delta, Delta::unavailable(Unavailable::MissingMetric));
        assert_eq!(delta.value(), None);
        assert_eq!(
            engine.delta(&r, "ff", T10, 10.0),
            Delta::unavailable(Unavailable::MissingMetric)
        );
    }

    #[test]
    fn test_epsilon_accepts_slightly_short_interval() {
        // 9 min 59.5 s is within the rounding guard of a 10 minute window.
        let r = history(&[("2025-06-01T10:00:00.5Z", Some(1.0)), (T10, Some(4.0))]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(engine.delta(&r, "qg", T10, 10.0).value(), Some(3.0));
    }

    #[test]
    fn test_nearest_qualifying_position_wins() {
        let r = history(&[
            (T0, Some(10.0)),
            ("2025-06-01T10:05:00Z", Some(20.0)),
            (T10, Some(30.0)),
            ("2025-06-01T10:15:00Z", Some(40.0)),
        ]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        let reference = engine.reference("2025-06-01T10:15:00Z", 10.0).unwrap();
        assert_eq!(reference.position, 1);
        assert_eq!(engine.delta(&r, "qg", "2025-06-01T10:15:00Z", 10.0).value(), Some(20.0));
    }

    #[test]
    fn test_degenerate_windows_never_panic() {
        let r = history(&[(T0, Some(1.0)), (T10, Some(2.0))]);
        let timeline = Timeline::build([&r]);
        let engine = DeltaEngine::new(&timeline, DEFAULT_TOLERANCE_MINUTES);

        assert_eq!(
            engine.delta(&r, "qg", T10, f64::NAN),
            Delta::unavailable(Unavailable::InsufficientHistory)
        );
        assert_eq!(
            engine.delta(&r, "qg", T10, 0.0),
            Delta::unavailable(Unavailable::GapExceedsTolerance)
        );
        assert_eq!(engine.delta(&r, "qg", T10, -10.0).value(), None);
        assert!(!engine.delta(&r, "qg", T10, f64::INFINITY).is_available());
        assert!(!engine.delta(&r, "qg", "", -5.0).is_available());

        let empty = Timeline::default();
        let engine = DeltaEngine::new(&empty, DEFAULT_TOLERANCE_MINUTES);
        assert_eq!(
            engine.delta(&History::new(), "qg", T10, 10.0),
            Delta::unavailable(Unavailable::UnknownTimestamp)
        );
    }

    #[test]
    fn test_unavailable_serializes_as_explicit_status() {
        let json = serde_json::to_value(Delta::unavailable(Unavailable::GapExceedsTolerance)).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "gap_exceeds_tolerance");
    }
}
