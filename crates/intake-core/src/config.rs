//! Per-source and per-table configuration.
//!
//! Everything here is plain serde data: sources are registered through the
//! admin surface with a [`SourceConfig`] document, and the storage layer is
//! driven by the embedded [`StorageTableConfig`]. Configuration is validated
//! once at registration; a source's config may only change while the source
//! is stopped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IntakeError, Result};
use crate::record::StageKind;

/// Which adapter variant serves this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// HTTP/REST API
    Rest,
    /// HTML web page
    Web,
    /// SQL database
    Sql,
}

impl SourceType {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SourceType::Rest => "rest",
            SourceType::Web => "web",
            SourceType::Sql => "sql",
        }
    }
}

/// How ticks are generated for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMode {
    /// One cycle per explicit admin trigger
    Batch,
    /// The next tick fires as soon as the previous cycle finishes
    Streaming,
    /// Interval or cron schedule
    Scheduled,
    /// Push-style; records arrive through the ingest entry point
    Realtime,
}

impl IngestionMode {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            IngestionMode::Batch => "batch",
            IngestionMode::Streaming => "streaming",
            IngestionMode::Scheduled => "scheduled",
            IngestionMode::Realtime => "realtime",
        }
    }
}

/// Fetch schedule; only consulted when `mode = scheduled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fixed interval measured from the last fetch
    Interval {
        /// Seconds between fetches
        seconds: u64,
    },
    /// Five-field cron expression, evaluated in UTC
    Cron {
        /// `min hour day-of-month month day-of-week`
        expression: String,
    },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Interval { seconds: 60 }
    }
}

/// Token-bucket rate limit applied before every outbound fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size)
    #[serde(default = "default_rate_capacity")]
    pub capacity:       u32,
    /// Tokens restored per second
    #[serde(default = "default_rate_refill")]
    pub refill_per_sec: f64,
}

const fn default_rate_capacity() -> u32 {
    10
}

const fn default_rate_refill() -> f64 {
    5.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity:       default_rate_capacity(),
            refill_per_sec: default_rate_refill(),
        }
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms:  u64,
    /// Jitter fraction in [0, 1]; the delay is scaled by a random factor in
    /// `[1 - jitter, 1]`
    #[serde(default = "default_retry_jitter")]
    pub jitter:        f64,
    /// Attempts before the failure is surfaced to the breaker as exhausted
    #[serde(default = "default_retry_attempts")]
    pub max_attempts:  u32,
}

const fn default_retry_base_ms() -> u64 {
    500
}

const fn default_retry_max_ms() -> u64 {
    60_000
}

const fn default_retry_jitter() -> f64 {
    0.2
}

const fn default_retry_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_ms(),
            max_delay_ms:  default_retry_max_ms(),
            jitter:        default_retry_jitter(),
            max_attempts:  default_retry_attempts(),
        }
    }
}

/// Per-source circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,
    /// Cooldown after a transient-failure open, in milliseconds; doubles on
    /// every reopen, capped at 16x
    #[serde(default = "default_breaker_cooldown_ms")]
    pub open_cooldown_ms:  u64,
    /// Cooldown after a permanent-error trip, in milliseconds; typically much
    /// longer since these need operator attention
    #[serde(default = "default_breaker_probe_ms")]
    pub probe_after_ms:    u64,
}

const fn default_breaker_threshold() -> u32 {
    5
}

const fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

const fn default_breaker_probe_ms() -> u64 {
    300_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_threshold(),
            open_cooldown_ms:  default_breaker_cooldown_ms(),
            probe_after_ms:    default_breaker_probe_ms(),
        }
    }
}

/// Which pipeline stages run for this source. Ordering is fixed; stages can
/// only be switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet {
    /// Validation stage
    #[serde(default = "enabled")]
    pub validation:     bool,
    /// Cleaning stage
    #[serde(default = "enabled")]
    pub cleaning:       bool,
    /// Transformation stage
    #[serde(default = "enabled")]
    pub transformation: bool,
    /// Enrichment stage
    #[serde(default = "enabled")]
    pub enrichment:     bool,
    /// Quality scoring stage
    #[serde(default = "enabled")]
    pub quality:        bool,
    /// Duplicate detection stage
    #[serde(default = "enabled")]
    pub duplicate:      bool,
    /// Compliance stage
    #[serde(default = "enabled")]
    pub compliance:     bool,
    /// Storage preparation stage
    #[serde(default = "enabled")]
    pub storage_prep:   bool,
}

const fn enabled() -> bool {
    true
}

impl StageSet {
    /// Every stage enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            validation:     true,
            cleaning:       true,
            transformation: true,
            enrichment:     true,
            quality:        true,
            duplicate:      true,
            compliance:     true,
            storage_prep:   true,
        }
    }

    /// Every stage disabled; the pipeline becomes the identity on content.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            validation:     false,
            cleaning:       false,
            transformation: false,
            enrichment:     false,
            quality:        false,
            duplicate:      false,
            compliance:     false,
            storage_prep:   false,
        }
    }

    /// Whether a given stage is enabled.
    #[must_use]
    pub const fn is_enabled(&self, stage: StageKind) -> bool {
        match stage {
            StageKind::Validation => self.validation,
            StageKind::Cleaning => self.cleaning,
            StageKind::Transformation => self.transformation,
            StageKind::Enrichment => self.enrichment,
            StageKind::Quality => self.quality,
            StageKind::Duplicate => self.duplicate,
            StageKind::Compliance => self.compliance,
            StageKind::StoragePrep => self.storage_prep,
        }
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Expected JSON type for validation and coercion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// JSON string
    String,
    /// JSON number
    Number,
    /// JSON boolean
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
}

impl ValueType {
    /// Whether `value` is of this JSON type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }
}

/// Comparison operator for numeric business rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Strictly greater
    Gt,
    /// Greater or equal
    Ge,
    /// Strictly less
    Lt,
    /// Less or equal
    Le,
    /// Equal
    Eq,
    /// Not equal
    Ne,
}

impl CompareOp {
    /// Apply the operator.
    #[must_use]
    pub fn eval(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CompareOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }

    /// Symbol used in reject reason codes, e.g. `amount>0`.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// A declarative validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// The field must be present and non-null
    Required {
        /// Field name
        field: String,
    },
    /// The field, when present, must have the given JSON type
    TypeIs {
        /// Field name
        field:    String,
        /// Expected type
        expected: ValueType,
    },
    /// The numeric field must fall inside the given bounds
    Range {
        /// Field name
        field: String,
        /// Inclusive lower bound
        min:   Option<f64>,
        /// Inclusive upper bound
        max:   Option<f64>,
    },
    /// The string field must match the given regex
    Format {
        /// Field name
        field:   String,
        /// Regex the whole value must match
        pattern: String,
    },
    /// The string field must be non-empty after trimming
    NonEmpty {
        /// Field name
        field: String,
    },
    /// Numeric comparison against a constant, e.g. `amount > 0`
    Compare {
        /// Field name
        field: String,
        /// Operator
        op:    CompareOp,
        /// Constant to compare against
        value: f64,
    },
}

impl ValidationRule {
    /// Short reason-code suffix, e.g. `amount>0` or `required:email`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ValidationRule::Required { field } => format!("required:{field}"),
            ValidationRule::TypeIs { field, .. } => format!("type:{field}"),
            ValidationRule::Range { field, .. } => format!("range:{field}"),
            ValidationRule::Format { field, .. } => format!("format:{field}"),
            ValidationRule::NonEmpty { field } => format!("non_empty:{field}"),
            ValidationRule::Compare { field, op, value } => {
                format!("{field}{}{value}", op.symbol())
            },
        }
    }
}

/// Cross-field consistency rule used by quality scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyRule {
    /// Left-hand field
    pub left:  String,
    /// Operator
    pub op:    CompareOp,
    /// Right-hand field
    pub right: String,
}

/// A declarative transformation rule, applied in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum TransformationRule {
    /// Rename a top-level field
    Rename {
        /// Current name
        from: String,
        /// New name
        to:   String,
    },
    /// Coerce a field into the given JSON type
    Coerce {
        /// Field name
        field: String,
        /// Target type
        into:  ValueType,
    },
    /// Replace enumerated values, e.g. `{"D": "debit", "C": "credit"}`
    MapValues {
        /// Field name
        field:   String,
        /// Value mapping; keys are the source string forms
        mapping: HashMap<String, Value>,
    },
    /// Parse the field as a date/time and rewrite it as ISO-8601 UTC
    CanonicalizeDate {
        /// Field name
        field: String,
    },
}

/// Best-effort lookup into a declared reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRule {
    /// Reference table name, e.g. `geo`, `customer`, `product`
    pub lookup:       String,
    /// Field whose value is the lookup key
    pub key_field:    String,
    /// Field the looked-up value is written to
    pub target_field: String,
}

/// A declarative compliance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ComplianceRule {
    /// Mask the field and record a `compliance:redacted` annotation
    RedactField {
        /// Field name
        field:       String,
        /// Replacement value
        #[serde(default = "default_redaction")]
        replacement: String,
    },
    /// Reject the record when the field is present
    ForbidField {
        /// Field name
        field: String,
    },
    /// Append a tag to every record passing through
    RequireTag {
        /// Tag value
        tag: String,
    },
}

fn default_redaction() -> String {
    "[REDACTED]".to_string()
}

/// Weights for the quality-score components. They are normalized at scoring
/// time, so they need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    /// Populated fraction of fields
    #[serde(default = "default_weight")]
    pub completeness: f64,
    /// Format conformance post-cleaning
    #[serde(default = "default_weight")]
    pub accuracy:     f64,
    /// Cross-field rule conformance
    #[serde(default = "default_weight")]
    pub consistency:  f64,
    /// Freshness against `ingested_at`
    #[serde(default = "default_weight")]
    pub timeliness:   f64,
}

const fn default_weight() -> f64 {
    0.25
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: default_weight(),
            accuracy:     default_weight(),
            consistency:  default_weight(),
            timeliness:   default_weight(),
        }
    }
}

/// Auth mode for HTTP-based adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication
    #[default]
    None,
    /// Static API key sent in a header
    ApiKey {
        /// Header name, e.g. `X-Api-Key`
        header: String,
        /// Key value
        key:    String,
    },
    /// HTTP basic auth
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// Static bearer token (JWT or opaque)
    Bearer {
        /// Token value
        token: String,
    },
    /// OAuth2 client-credentials flow; the token is fetched and cached until
    /// it expires
    Oauth2ClientCredentials {
        /// Token endpoint
        token_url:     String,
        /// Client id
        client_id:     String,
        /// Client secret
        client_secret: String,
        /// Optional scope
        scope:         Option<String>,
    },
}

/// Pagination mode for the REST adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaginationConfig {
    /// Single page; the first fetch is terminal
    #[default]
    None,
    /// `?offset=N&limit=M`
    OffsetLimit {
        /// Offset query parameter name
        offset_param: String,
        /// Limit query parameter name
        limit_param:  String,
    },
    /// `?page=N&per_page=M`, pages start at 1
    PageNumber {
        /// Page query parameter name
        page_param: String,
        /// Page-size query parameter name
        size_param: String,
    },
    /// Opaque cursor token round-tripped through a query parameter
    Cursor {
        /// Query parameter carrying the cursor
        cursor_param: String,
        /// `/`-separated path to the next-cursor token in the response body
        next_path:    String,
    },
    /// RFC 5988 `Link` header with `rel="next"`
    LinkHeader,
}

/// REST adapter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestSourceConfig {
    /// Request URL
    pub url:         String,
    /// HTTP method, `GET` or `POST`
    #[serde(default = "default_method")]
    pub method:      String,
    /// Extra request headers
    #[serde(default)]
    pub headers:     HashMap<String, String>,
    /// JSON body for POST requests
    #[serde(default)]
    pub body:        Option<Value>,
    /// Auth mode
    #[serde(default)]
    pub auth:        AuthConfig,
    /// Pagination mode
    #[serde(default)]
    pub pagination:  PaginationConfig,
    /// `/`-separated path to the records array in the response body; the
    /// whole body is one record when unset
    #[serde(default)]
    pub extract:     Option<String>,
    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size:   u32,
    /// Request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms:  u64,
}

fn default_method() -> String {
    "GET".to_string()
}

const fn default_page_size() -> u32 {
    100
}

const fn default_http_timeout_ms() -> u64 {
    30_000
}

/// Web (HTML) adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSourceConfig {
    /// Page URL
    pub url:             String,
    /// Extra request headers
    #[serde(default)]
    pub headers:         HashMap<String, String>,
    /// Cookies sent with every request
    #[serde(default)]
    pub cookies:         HashMap<String, String>,
    /// Record selector: a regex with named capture groups; every match is one
    /// record, every named group one field
    pub record_selector: String,
    /// Optional selector for the next page URL (first capture group)
    #[serde(default)]
    pub next_selector:   Option<String>,
    /// Minimum delay between requests to the same host, milliseconds
    #[serde(default = "default_crawl_delay_ms")]
    pub crawl_delay_ms:  u64,
    /// Honor robots.txt Disallow rules
    #[serde(default = "enabled")]
    pub respect_robots:  bool,
    /// User-agent header
    #[serde(default = "default_user_agent")]
    pub user_agent:      String,
}

const fn default_crawl_delay_ms() -> u64 {
    1_000
}

fn default_user_agent() -> String {
    concat!("intake/", env!("CARGO_PKG_VERSION")).to_string()
}

/// SQL adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlSourceConfig {
    /// Connection string of the upstream database
    pub url:              String,
    /// Extraction query. With a watermark column the query must take the
    /// last-seen watermark as `$1` and order by that column ascending.
    pub query:            String,
    /// Monotonic column driving incremental extraction
    #[serde(default)]
    pub watermark_column: Option<String>,
    /// Rows fetched per page
    #[serde(default = "default_batch_rows")]
    pub batch_rows:       u32,
}

const fn default_batch_rows() -> u32 {
    500
}

/// How the storage adapter reconciles new records with existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteStrategy {
    /// Plain append; a key collision fails the record
    InsertOnly,
    /// Insert, updating the non-identity columns on conflict
    #[default]
    UpsertOnConflict,
    /// Update by primary key, insert when absent
    MergeUpdate,
    /// Stage into a temp table, one set-based merge
    BulkLoad,
    /// Route to the child partition, then upsert
    Partitioned,
}

impl WriteStrategy {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WriteStrategy::InsertOnly => "insert_only",
            WriteStrategy::UpsertOnConflict => "upsert_on_conflict",
            WriteStrategy::MergeUpdate => "merge_update",
            WriteStrategy::BulkLoad => "bulk_load",
            WriteStrategy::Partitioned => "partitioned",
        }
    }
}

/// Partition interval for time-based partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionInterval {
    /// One partition per hour
    Hour,
    /// One partition per day
    Day,
    /// One partition per ISO week
    Week,
    /// One partition per month
    Month,
}

/// A declared bound for range partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBound {
    /// Partition suffix
    pub name: String,
    /// Inclusive lower bound literal
    pub from: String,
    /// Exclusive upper bound literal
    pub to:   String,
}

/// A declared value list for list partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPartition {
    /// Partition suffix
    pub name:   String,
    /// Values routed to this partition
    pub values: Vec<String>,
}

/// Partitioning strategy for a target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Range over a timestamp column; partitions auto-created on demand
    TimeBased {
        /// Partition width
        interval: PartitionInterval,
    },
    /// Fixed declared ranges
    RangeBased {
        /// Declared bounds
        ranges: Vec<RangeBound>,
    },
    /// Modulo over a hash of the partition column
    HashBased {
        /// Fixed partition count
        partitions: u32,
    },
    /// Enumerated discrete values
    ListBased {
        /// Declared value lists
        lists: Vec<ListPartition>,
    },
}

/// Partition declaration for a target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Column the table is partitioned by
    pub column:   String,
    /// Strategy and its parameters
    #[serde(flatten)]
    pub strategy: PartitionStrategy,
}

/// Index kind for declared indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Single-column btree
    Single,
    /// Multi-column btree
    Composite,
    /// Btree with a predicate
    Partial,
    /// Document-inverted (GIN) index over a JSON column
    DocumentInverted,
    /// Spatial (GiST) index
    Spatial,
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name
    pub name:      String,
    /// Index kind
    pub kind:      IndexKind,
    /// Indexed columns, in order
    pub columns:   Vec<String>,
    /// Predicate for partial indexes
    #[serde(default)]
    pub predicate: Option<String>,
}

/// Storage behavior for one source's records. Owned by the storage adapter;
/// other components consult it but never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTableConfig {
    /// Target table
    #[serde(default = "default_table_name")]
    pub table_name:          String,
    /// Write strategy
    #[serde(default)]
    pub strategy:            WriteStrategy,
    /// Primary key columns
    #[serde(default = "default_key_columns")]
    pub primary_key_columns: Vec<String>,
    /// Conflict target for upserts
    #[serde(default = "default_key_columns")]
    pub conflict_columns:    Vec<String>,
    /// Declared secondary indexes
    #[serde(default)]
    pub indexes:             Vec<IndexSpec>,
    /// Partition declaration, required when `strategy = partitioned`
    #[serde(default)]
    pub partition:           Option<PartitionSpec>,
    /// Records per storage sub-operation
    #[serde(default = "default_storage_batch")]
    pub batch_size:          usize,
    /// Time bound for one storage sub-operation, milliseconds
    #[serde(default = "default_storage_timeout_ms")]
    pub batch_timeout_ms:    u64,
}

fn default_table_name() -> String {
    "data_records".to_string()
}

fn default_key_columns() -> Vec<String> {
    vec!["record_id".to_string()]
}

const fn default_storage_batch() -> usize {
    500
}

const fn default_storage_timeout_ms() -> u64 {
    5_000
}

impl Default for StorageTableConfig {
    fn default() -> Self {
        Self {
            table_name:          default_table_name(),
            strategy:            WriteStrategy::default(),
            primary_key_columns: default_key_columns(),
            conflict_columns:    default_key_columns(),
            indexes:             Vec::new(),
            partition:           None,
            batch_size:          default_storage_batch(),
            batch_timeout_ms:    default_storage_timeout_ms(),
        }
    }
}

/// Everything the engine needs to know about one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier
    pub source_id:            String,
    /// Adapter variant
    pub source_type:          SourceType,
    /// Tick generator
    #[serde(default = "default_mode")]
    pub mode:                 IngestionMode,
    /// Fetch schedule; consulted only when `mode = scheduled`
    #[serde(default)]
    pub schedule:             Schedule,
    /// Token-bucket rate limit
    #[serde(default)]
    pub rate_limit:           RateLimitConfig,
    /// Retry policy for transient failures
    #[serde(default)]
    pub retry:                RetryConfig,
    /// Circuit breaker parameters
    #[serde(default)]
    pub breaker:              BreakerConfig,
    /// Stage enable-set
    #[serde(default)]
    pub stages:               StageSet,
    /// Validation rules
    #[serde(default)]
    pub validation_rules:     Vec<ValidationRule>,
    /// Transformation rules
    #[serde(default)]
    pub transformation_rules: Vec<TransformationRule>,
    /// Enrichment rules
    #[serde(default)]
    pub enrichment_rules:     Vec<EnrichmentRule>,
    /// Compliance rules
    #[serde(default)]
    pub compliance_rules:     Vec<ComplianceRule>,
    /// Cross-field consistency rules for quality scoring
    #[serde(default)]
    pub consistency_rules:    Vec<ConsistencyRule>,
    /// Quality-score component weights
    #[serde(default)]
    pub quality_weights:      QualityWeights,
    /// Persist rejected records for audit
    #[serde(default = "enabled")]
    pub audit_rejected:       bool,
    /// Storage behavior
    #[serde(default)]
    pub storage_table:        StorageTableConfig,
    /// REST adapter section; required when `source_type = rest`
    #[serde(default)]
    pub rest:                 Option<RestSourceConfig>,
    /// Web adapter section; required when `source_type = web`
    #[serde(default)]
    pub web:                  Option<WebSourceConfig>,
    /// SQL adapter section; required when `source_type = sql`
    #[serde(default)]
    pub sql:                  Option<SqlSourceConfig>,
}

const fn default_mode() -> IngestionMode {
    IngestionMode::Scheduled
}

impl SourceConfig {
    /// Validate the configuration at registration time.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError::InvalidConfig`] when the adapter section does
    /// not match the source type, a regex does not compile, weights are
    /// negative, or a partitioned strategy lacks a partition declaration.
    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(invalid("source_id must be non-empty"));
        }
        match self.source_type {
            SourceType::Rest if self.rest.is_none() => {
                return Err(invalid("source_type rest requires a [rest] section"));
            },
            SourceType::Web if self.web.is_none() => {
                return Err(invalid("source_type web requires a [web] section"));
            },
            SourceType::Sql if self.sql.is_none() => {
                return Err(invalid("source_type sql requires a [sql] section"));
            },
            _ => {},
        }
        if let Some(web) = &self.web {
            regex::Regex::new(&web.record_selector)
                .map_err(|e| invalid(format!("record_selector: {e}")))?;
            if let Some(next) = &web.next_selector {
                regex::Regex::new(next).map_err(|e| invalid(format!("next_selector: {e}")))?;
            }
        }
        for rule in &self.validation_rules {
            if let ValidationRule::Format { pattern, field } = rule {
                regex::Regex::new(pattern)
                    .map_err(|e| invalid(format!("format rule for {field}: {e}")))?;
            }
        }
        let w = &self.quality_weights;
        if [w.completeness, w.accuracy, w.consistency, w.timeliness]
            .iter()
            .any(|v| *v < 0.0)
        {
            return Err(invalid("quality weights must be non-negative"));
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.refill_per_sec <= 0.0 {
            return Err(invalid("rate limit capacity and refill must be positive"));
        }
        if matches!(self.storage_table.strategy, WriteStrategy::Partitioned)
            && self.storage_table.partition.is_none()
        {
            return Err(invalid("partitioned strategy requires a partition declaration"));
        }
        if let Schedule::Cron { expression } = &self.schedule {
            if expression.split_whitespace().count() != 5 {
                return Err(invalid("cron expression must have five fields"));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> IntakeError {
    IntakeError::InvalidConfig {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rest_config() -> SourceConfig {
        SourceConfig {
            source_id:            "filings".to_string(),
            source_type:          SourceType::Rest,
            mode:                 IngestionMode::Scheduled,
            schedule:             Schedule::default(),
            rate_limit:           RateLimitConfig::default(),
            retry:                RetryConfig::default(),
            breaker:              BreakerConfig::default(),
            stages:               StageSet::all(),
            validation_rules:     Vec::new(),
            transformation_rules: Vec::new(),
            enrichment_rules:     Vec::new(),
            compliance_rules:     Vec::new(),
            consistency_rules:    Vec::new(),
            quality_weights:      QualityWeights::default(),
            audit_rejected:       true,
            storage_table:        StorageTableConfig::default(),
            rest:                 Some(RestSourceConfig {
                url:        "https://api.example.test/filings".to_string(),
                method:     default_method(),
                headers:    HashMap::new(),
                body:       None,
                auth:       AuthConfig::None,
                pagination: PaginationConfig::default(),
                extract:    Some("data/items".to_string()),
                page_size:  50,
                timeout_ms: 5_000,
            }),
            web:                  None,
            sql:                  None,
        }
    }

    #[test]
    fn valid_rest_config_passes() {
        assert!(rest_config().validate().is_ok());
    }

    #[test]
    fn adapter_section_must_match_type() {
        let mut config = rest_config();
        config.rest = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_format_regex_is_rejected() {
        let mut config = rest_config();
        config.validation_rules.push(ValidationRule::Format {
            field:   "email".to_string(),
            pattern: "([".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn partitioned_strategy_needs_partition_spec() {
        let mut config = rest_config();
        config.storage_table.strategy = WriteStrategy::Partitioned;
        assert!(config.validate().is_err());

        config.storage_table.partition = Some(PartitionSpec {
            column:   "ingested_at".to_string(),
            strategy: PartitionStrategy::TimeBased {
                interval: PartitionInterval::Day,
            },
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stage_set_defaults_to_all_enabled() {
        let stages = StageSet::default();
        for stage in StageKind::ORDERED {
            assert!(stages.is_enabled(stage));
        }
    }

    #[test]
    fn compare_op_symbols_build_reason_codes() {
        let rule = ValidationRule::Compare {
            field: "amount".to_string(),
            op:    CompareOp::Gt,
            value: 0.0,
        };
        assert_eq!(rule.describe(), "amount>0");
    }

    #[test]
    fn source_config_deserializes_with_defaults() {
        let config: SourceConfig = serde_json::from_value(json!({
            "source_id": "filings",
            "source_type": "rest",
            "rest": {"url": "https://api.example.test/filings"}
        }))
        .expect("minimal config");

        assert_eq!(config.mode, IngestionMode::Scheduled);
        assert_eq!(config.schedule, Schedule::Interval { seconds: 60 });
        assert_eq!(config.storage_table.strategy, WriteStrategy::UpsertOnConflict);
        assert!(config.audit_rejected);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cron_schedule_is_shape_checked() {
        let mut config = rest_config();
        config.schedule = Schedule::Cron {
            expression: "0 * * *".to_string(),
        };
        assert!(config.validate().is_err());

        config.schedule = Schedule::Cron {
            expression: "0 6 * * 1".to_string(),
        };
        assert!(config.validate().is_ok());
    }
}
