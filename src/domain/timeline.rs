// Global timeline merged from every entity's history
use crate::domain::observation::History;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// `%#z` takes `+hh:mm`, `+hhmm` and `+hh`.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

fn parse_naive(raw: &str) -> Option<DateTime<Utc>> {
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Parse an ISO-8601 timestamp. Strings without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Some(zulu) = raw.strip_suffix(['Z', 'z']) {
        return parse_naive(zulu);
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(raw, format).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|| parse_naive(raw))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub timestamp: String,
    pub instant: DateTime<Utc>,
}

/// Ascending, de-duplicated timestamp strings with a reverse index.
///
/// Distinct strings that parse to the same instant keep separate positions;
/// they are ordered by the raw string so rebuilding is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    positions: HashMap<String, usize>,
}

impl Timeline {
    pub fn build<'a, I>(histories: I) -> Self
    where
        I: IntoIterator<Item = &'a History>,
    {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut entries = Vec::new();

        for history in histories {
            for timestamp in history.timestamps() {
                if !seen.insert(timestamp) {
                    continue;
                }
                match parse_timestamp(timestamp) {
                    Some(instant) => entries.push(TimelineEntry {
                        timestamp: timestamp.to_string(),
                        instant,
                    }),
                    None => tracing::debug!("Dropping unparseable timestamp {}", timestamp),
                }
            }
        }

        entries.sort_by(|a, b| {
            a.instant
                .cmp(&b.instant)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        let positions = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.timestamp.clone(), idx))
            .collect();

        Self { entries, positions }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&TimelineEntry> {
        self.entries.get(position)
    }

    pub fn position(&self, timestamp: &str) -> Option<usize> {
        self.positions.get(timestamp).copied()
    }

    pub fn latest_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(1)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.timestamp.as_str())
    }

    /// Minutes elapsed from `earlier` to `later`.
    pub fn elapsed_minutes(&self, later: usize, earlier: usize) -> Option<f64> {
        let later = self.entries.get(later)?;
        let earlier = self.entries.get(earlier)?;
        let millis = (later.instant - earlier.instant).num_milliseconds();
        Some(millis as f64 / 60_000.0)
    }
}
