//! Record types flowing through the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::canonical::content_hash;

/// The lifecycle stage a record has reached in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Fresh from the source, untouched
    Raw,
    /// Passed validation
    Validated,
    /// Passed cleaning
    Cleaned,
    /// Passed enrichment
    Enriched,
    /// Failed validation or compliance; excluded from the storage flow
    Rejected,
}

impl Quality {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Quality::Raw => "raw",
            Quality::Validated => "validated",
            Quality::Cleaned => "cleaned",
            Quality::Enriched => "enriched",
            Quality::Rejected => "rejected",
        }
    }

    /// Parse the stable string form back into a quality level.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Quality::Raw),
            "validated" => Some(Quality::Validated),
            "cleaned" => Some(Quality::Cleaned),
            "enriched" => Some(Quality::Enriched),
            "rejected" => Some(Quality::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Required fields, types, ranges, formats, business rules
    Validation,
    /// Deterministic textual normalization
    Cleaning,
    /// Renames, coercions, value mappings, date canonicalization
    Transformation,
    /// Best-effort reference lookups
    Enrichment,
    /// Weighted quality scoring
    Quality,
    /// Content-hash duplicate detection
    Duplicate,
    /// Declared compliance rules
    Compliance,
    /// Record id assignment and quality finalization
    StoragePrep,
}

impl StageKind {
    /// All stages in their fixed execution order.
    pub const ORDERED: [StageKind; 8] = [
        StageKind::Validation,
        StageKind::Cleaning,
        StageKind::Transformation,
        StageKind::Enrichment,
        StageKind::Quality,
        StageKind::Duplicate,
        StageKind::Compliance,
        StageKind::StoragePrep,
    ];

    /// Stable string form used in config, errors and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StageKind::Validation => "validation",
            StageKind::Cleaning => "cleaning",
            StageKind::Transformation => "transformation",
            StageKind::Enrichment => "enrichment",
            StageKind::Quality => "quality",
            StageKind::Duplicate => "duplicate",
            StageKind::Compliance => "compliance",
            StageKind::StoragePrep => "storage_prep",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-record failure or annotation produced by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that produced the descriptor
    pub stage:   StageKind,
    /// Short machine-readable reason, e.g. `validation:amount>0`
    pub code:    String,
    /// Human-readable context
    pub message: String,
}

impl StageError {
    /// Create a new stage error descriptor.
    #[must_use]
    pub fn new(stage: StageKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// An opaque document as returned by a source, plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source that produced the record
    pub source_id:  String,
    /// The document itself, schemaless
    pub payload:    Value,
    /// When the fetch that produced it completed
    pub fetched_at: DateTime<Utc>,
    /// Page cursor the record arrived under, for provenance
    pub cursor:     Option<String>,
}

impl RawRecord {
    /// Create a raw record stamped with the current time.
    #[must_use]
    pub fn new(source_id: impl Into<String>, payload: Value) -> Self {
        Self {
            source_id:  source_id.into(),
            payload,
            fetched_at: Utc::now(),
            cursor:     None,
        }
    }

    /// Attach the cursor the record was fetched under.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

/// The canonical unit passed through the pipeline and stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRecord {
    /// Unique record identifier
    pub record_id:     Uuid,
    /// Source that produced the record
    pub source_id:     String,
    /// When the record entered the system; never rewritten
    pub ingested_at:   DateTime<Utc>,
    /// Advances on every successful mutation
    pub last_updated:  DateTime<Utc>,
    /// Structured content after transformation
    pub content:       Value,
    /// Stable hash of canonicalized content
    pub content_hash:  String,
    /// Lifecycle stage reached
    pub quality:       Quality,
    /// Weighted quality score in [0, 1], present once scoring has run
    pub quality_score: Option<f64>,
    /// Ordered tags accumulated by the pipeline
    pub tags:          Vec<String>,
    /// Ordered stage-error descriptors
    pub errors:        Vec<StageError>,
}

impl DataRecord {
    /// Promote a raw record into the canonical form.
    ///
    /// `ingested_at` is taken from the fetch timestamp so that records carry
    /// the time they entered the system, not the time a retry processed them.
    #[must_use]
    pub fn from_raw(raw: RawRecord) -> Self {
        let hash = content_hash(&raw.payload);
        Self {
            record_id:     Uuid::new_v4(),
            source_id:     raw.source_id,
            ingested_at:   raw.fetched_at,
            last_updated:  raw.fetched_at,
            content:       raw.payload,
            content_hash:  hash,
            quality:       Quality::Raw,
            quality_score: None,
            tags:          Vec::new(),
            errors:        Vec::new(),
        }
    }

    /// Replace the content and refresh the hash in one step.
    ///
    /// The hash must never be allowed to drift from the content; all content
    /// mutation goes through here.
    pub fn set_content(&mut self, content: Value) {
        self.content_hash = content_hash(&content);
        self.content = content;
    }

    /// Mark the record rejected with a reason descriptor.
    pub fn reject(&mut self, stage: StageKind, code: impl Into<String>, message: impl Into<String>) {
        self.quality = Quality::Rejected;
        self.errors.push(StageError::new(stage, code, message));
    }

    /// Append an annotation without changing quality.
    pub fn annotate(
        &mut self,
        stage: StageKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.errors.push(StageError::new(stage, code, message));
    }

    /// Returns true when the record has been rejected.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.quality, Quality::Rejected)
    }

    /// Set the quality score, clamped into [0, 1].
    pub fn set_quality_score(&mut self, score: f64) {
        self.quality_score = Some(score.clamp(0.0, 1.0));
    }

    /// Advance `last_updated` to now.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Check the record-level invariants; used by tests and storage asserts.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        let score_ok = self.quality_score.is_none_or(|s| (0.0..=1.0).contains(&s));
        let rejected_ok = !self.is_rejected() || !self.errors.is_empty();
        let hash_ok = self.content_hash == content_hash(&self.content);
        self.ingested_at <= self.last_updated && score_ok && rejected_ok && hash_ok
    }
}
