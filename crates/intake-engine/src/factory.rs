//! Config-driven construction of source adapters.

use intake_core::config::{SourceConfig, SourceType};
use intake_core::{IntakeError, Result};
use intake_sources::{RestSource, SourceAdapter, SqlSource, WebSource};

/// Builds the adapter a source configuration calls for. The engine owns one
/// factory; tests substitute a scripted one.
pub trait AdapterFactory: Send + Sync {
    /// Build an unconnected adapter for this source.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the adapter section is missing or malformed.
    fn build(&self, config: &SourceConfig) -> Result<Box<dyn SourceAdapter>>;
}

/// The production factory over the three adapter variants.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn build(&self, config: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        match config.source_type {
            SourceType::Rest => {
                let rest = config.rest.clone().ok_or_else(|| missing_section("rest"))?;
                Ok(Box::new(RestSource::new(
                    &config.source_id,
                    rest,
                    &config.rate_limit,
                )?))
            },
            SourceType::Web => {
                let web = config.web.clone().ok_or_else(|| missing_section("web"))?;
                Ok(Box::new(WebSource::new(&config.source_id, web)?))
            },
            SourceType::Sql => {
                let sql = config.sql.clone().ok_or_else(|| missing_section("sql"))?;
                Ok(Box::new(SqlSource::new(&config.source_id, sql)))
            },
        }
    }
}

fn missing_section(section: &str) -> IntakeError {
    IntakeError::InvalidConfig {
        message: format!("source requires a [{section}] section"),
    }
}
