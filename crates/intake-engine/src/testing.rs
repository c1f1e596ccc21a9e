//! Scripted test doubles for the engine.
//!
//! `ScriptedSource` plays back a queue of fetch results so coordinator
//! behavior (paging, backoff, breaker trips, partial storage) can be tested
//! without a network. The script is shared, so a test can append further
//! pages while the engine runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use intake_core::config::SourceConfig;
use intake_core::{IntakeError, RawRecord, Result};
use intake_sources::{FetchPage, SourceAdapter};
use parking_lot::Mutex;
use serde_json::Value;

use crate::factory::AdapterFactory;

/// One scripted fetch outcome.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    /// A page of payloads with an optional next cursor
    Page {
        /// Record payloads
        records: Vec<Value>,
        /// Cursor for the next page
        next:    Option<String>,
    },
    /// A typed failure
    Fail(IntakeError),
}

/// Shared playback state for one scripted source.
#[derive(Debug, Default)]
pub struct Script {
    fetches:      Mutex<VecDeque<ScriptedFetch>>,
    connects:     AtomicU32,
    fetch_calls:  AtomicU32,
    connect_fail: Mutex<VecDeque<IntakeError>>,
}

impl Script {
    /// An empty script; fetches return empty terminal pages.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a page of payloads.
    pub fn push_page(&self, records: Vec<Value>, next: Option<&str>) {
        self.fetches.lock().push_back(ScriptedFetch::Page {
            records,
            next: next.map(str::to_string),
        });
    }

    /// Append a failure.
    pub fn push_fail(&self, error: IntakeError) {
        self.fetches.lock().push_back(ScriptedFetch::Fail(error));
    }

    /// Make the next `connect` fail with the given error.
    pub fn fail_next_connect(&self, error: IntakeError) {
        self.connect_fail.lock().push_back(error);
    }

    /// Number of successful connects observed.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of fetch calls observed.
    #[must_use]
    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

/// A source adapter that plays back a [`Script`].
pub struct ScriptedSource {
    source_id: String,
    script:    Arc<Script>,
    connected: bool,
}

impl ScriptedSource {
    /// Wrap a script.
    #[must_use]
    pub fn new(source_id: impl Into<String>, script: Arc<Script>) -> Self {
        Self {
            source_id: source_id.into(),
            script,
            connected: false,
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(error) = self.script.connect_fail.lock().pop_front() {
            return Err(error);
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn fetch_page(&mut self, cursor: Option<&str>) -> Result<FetchPage> {
        if !self.connected {
            return Err(IntakeError::NotConnected);
        }
        self.script.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.fetches.lock().pop_front() {
            Some(ScriptedFetch::Page { records, next }) => Ok(FetchPage {
                records: records
                    .into_iter()
                    .map(|payload| {
                        let record = RawRecord::new(self.source_id.clone(), payload);
                        match cursor {
                            Some(c) => record.with_cursor(c),
                            None => record,
                        }
                    })
                    .collect(),
                next_cursor: next,
            }),
            Some(ScriptedFetch::Fail(error)) => Err(error),
            None => Ok(FetchPage::empty()),
        }
    }
}

/// Factory handing each source its registered script.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<std::collections::HashMap<String, Arc<Script>>>,
}

impl ScriptedFactory {
    /// An empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script a source id will play back.
    pub fn insert(&self, source_id: impl Into<String>, script: Arc<Script>) {
        self.scripts.lock().insert(source_id.into(), script);
    }
}

impl AdapterFactory for ScriptedFactory {
    fn build(&self, config: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        let script = self
            .scripts
            .lock()
            .get(&config.source_id)
            .cloned()
            .ok_or_else(|| IntakeError::SourceUnknown {
                source_id: config.source_id.clone(),
            })?;
        Ok(Box::new(ScriptedSource::new(&config.source_id, script)))
    }
}
