//! Typed read-side results.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::transport::{
    EntityRecord, EventRecord, EvidenceRecord, TimelineEvidenceRecord, UtteranceRecord,
};

const UNKNOWN: &str = "unknown";

/// Zone-less layouts, read as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One retrieved memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryItem {
    /// Memory text.
    pub text: String,
    /// Relevance score.
    pub score: f64,
    /// When the memory was recorded.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Origin label.
    pub source: String,
    /// Entity names mentioned.
    pub entities: Vec<String>,
}

impl MemoryItem {
    /// Convert a wire record; blank text yields `None`.
    pub(crate) fn from_evidence(record: EvidenceRecord) -> Option<Self> {
        let text = record.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            score: record.score.unwrap_or(0.0),
            timestamp: record.timestamp.as_deref().and_then(parse_timestamp),
            source: record
                .source
                .filter(|source| !source.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            entities: record.entities,
        })
    }
}

impl std::fmt::Display for MemoryItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.2}] {}", self.score, self.text)
    }
}

/// Search outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Original query.
    pub query: String,
    /// Ranked items.
    pub items: Vec<MemoryItem>,
    /// Round-trip latency.
    pub latency: Duration,
    /// Error text when the search failed silently.
    pub error: Option<String>,
}

impl SearchResult {
    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate items in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, MemoryItem> {
        self.items.iter()
    }

    /// Numbered list of the top `max_items` texts for prompt injection.
    #[must_use]
    pub fn to_prompt(&self, max_items: usize) -> String {
        self.items
            .iter()
            .take(max_items)
            .enumerate()
            .map(|(index, item)| format!("{}. {}", index + 1, item.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a MemoryItem;
    type IntoIter = std::slice::Iter<'a, MemoryItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Entity from the tenant graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    /// Entity id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Entity type.
    pub entity_type: String,
    /// Known aliases.
    pub aliases: Vec<String>,
}

impl Entity {
    pub(crate) fn from_record(record: EntityRecord, requested_name: &str) -> Self {
        Self {
            id: record.id.unwrap_or_default(),
            name: record
                .name
                .or(record.cluster_label)
                .unwrap_or_else(|| requested_name.to_string()),
            entity_type: record.entity_type.unwrap_or_else(|| UNKNOWN.to_string()),
            aliases: record.aliases,
        }
    }
}

/// Event from the tenant's temporal knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Event, evidence or utterance id.
    pub id: String,
    /// Short description.
    pub summary: String,
    /// When it happened.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Entity names involved.
    pub entities: Vec<String>,
    /// Supporting evidence text.
    pub evidence: Option<String>,
}

impl Event {
    pub(crate) fn from_timeline_evidence(record: TimelineEvidenceRecord, entity: &str) -> Self {
        Self {
            id: first_present([record.evidence_id, record.id]).unwrap_or_default(),
            summary: first_present([record.text, record.raw_text]).unwrap_or_default(),
            timestamp: first_present([record.t_media_start, record.timestamp])
                .as_deref()
                .and_then(parse_timestamp),
            entities: vec![entity.to_string()],
            evidence: None,
        }
    }

    pub(crate) fn from_utterance(record: UtteranceRecord, entity: &str) -> Self {
        Self {
            id: first_present([record.utterance_id, record.id]).unwrap_or_default(),
            summary: record.raw_text.unwrap_or_default(),
            timestamp: record.t_media_start.as_deref().and_then(parse_timestamp),
            entities: vec![entity.to_string()],
            evidence: None,
        }
    }

    /// `fallback_timestamp` fills in for events carrying no time of their own.
    pub(crate) fn from_record(record: EventRecord, fallback_timestamp: Option<&str>) -> Self {
        let timestamp = first_present([record.t_abs_start, record.timestamp])
            .or_else(|| fallback_timestamp.map(str::to_string));
        Self {
            id: record.id.unwrap_or_default(),
            summary: record.summary.unwrap_or_default(),
            timestamp: timestamp.as_deref().and_then(parse_timestamp),
            entities: record.involves,
            evidence: first_present([record.evidence, record.text]),
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.timestamp {
            Some(timestamp) => write!(f, "{}: {}", timestamp.to_rfc3339(), self.summary),
            None => f.write_str(&self.summary),
        }
    }
}

fn first_present<const N: usize>(values: [Option<String>; N]) -> Option<String> {
    values
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

/// RFC 3339, or ISO 8601 without a zone (read as UTC), or a plain date.
fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed);
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc().fixed_offset())
}
