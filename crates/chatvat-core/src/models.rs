//! Core data models that flow through the ingestion and query paths.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// The kind of ingestion origin. Fetch logic dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    StaticUrl,
    DynamicJson,
    LocalFile,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::StaticUrl => "static_url",
            SourceKind::DynamicJson => "dynamic_json",
            SourceKind::LocalFile => "local_file",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured ingestion origin. Immutable once loaded.
///
/// `headers` hold resolved values (environment substitution already
/// applied), so `Debug` prints header names only.
#[derive(Clone, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub target: String,
    pub headers: BTreeMap<String, String>,
}

impl Source {
    pub fn new(kind: SourceKind, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            id: format!("{}:{}", kind, target),
            kind,
            target,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fetched content for one source. Never persisted.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_id: String,
    /// UTF-8 text produced by the fetcher adapter.
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn from_text(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            bytes: text.into().into_bytes(),
            content_type: "text/plain".to_string(),
            fetched_at: Utc::now(),
        }
    }

    /// The document body as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// A bounded-size unit of text derived from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub fingerprint: Fingerprint,
}

/// The persisted unit of the knowledge base, keyed by fingerprint.
///
/// `embedding`, `text`, `source_id`, `metadata` and `first_seen_at` never
/// change after creation; a later identical chunk only advances
/// `last_confirmed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub fingerprint: Fingerprint,
    pub embedding: Vec<f32>,
    pub text: String,
    pub source_id: String,
    pub metadata: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Build a fresh entry for a chunk seen for the first time at `now`.
    pub fn from_chunk(
        chunk: &Chunk,
        kind: SourceKind,
        target: &str,
        embedding: Vec<f32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint: chunk.fingerprint.clone(),
            embedding,
            text: chunk.text.clone(),
            source_id: chunk.source_id.clone(),
            metadata: serde_json::json!({
                "source_kind": kind.as_str(),
                "target": target,
                "sequence_index": chunk.sequence_index,
            }),
            first_seen_at: now,
            last_confirmed_at: now,
        }
    }
}

/// Result of [`KnowledgeStore::upsert`](crate::store::KnowledgeStore::upsert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The fingerprint was absent and the entry was written.
    Inserted,
    /// The fingerprint existed; only `last_confirmed_at` was advanced.
    Confirmed,
}

/// Per-request query state.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub query_text: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub retrieved: Vec<KnowledgeEntry>,
    pub answer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_default_id() {
        let s = Source::new(SourceKind::LocalFile, "./notes.txt");
        assert_eq!(s.id, "local_file:./notes.txt");
    }

    #[test]
    fn test_source_debug_hides_header_values() {
        let s = Source::new(SourceKind::DynamicJson, "https://api.example.com")
            .with_header("Authorization", "Bearer super-secret");
        let dbg = format!("{:?}", s);
        assert!(dbg.contains("Authorization"));
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn test_source_kind_serde() {
        let kind: SourceKind = serde_json::from_str("\"dynamic_json\"").unwrap();
        assert_eq!(kind, SourceKind::DynamicJson);
        assert_eq!(serde_json::to_string(&SourceKind::StaticUrl).unwrap(), "\"static_url\"");
    }

    #[test]
    fn test_raw_document_lossy_text() {
        let doc = RawDocument {
            source_id: "s".into(),
            bytes: vec![b'o', b'k', 0xff],
            content_type: "text/plain".into(),
            fetched_at: Utc::now(),
        };
        assert!(doc.text().starts_with("ok"));
    }
}
