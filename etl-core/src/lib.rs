//! Shared types, error kinds, and configuration for the nginx log ETL
//! pipeline. Every other `etl-*` crate depends on this one; it carries no
//! dependency on any of them.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

/// Stamped onto every [`FileState`] row this build produces, so a future
/// processor version can tell which rows predate a semantics change.
pub const PROCESSOR_VERSION: &str = env!("CARGO_PKG_VERSION");
pub use types::{
    AnomalyType, Compression, EfficiencyIndicators, EnrichedRecord, FileState, FileStatus,
    LogFile, LogFormat, PhaseTimings, RawRecord, TransferSpeeds,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        use validator::Validate;
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn raw_record_default_has_no_fields_set() {
        let record = RawRecord::default();
        assert!(record.timestamp.is_none());
        assert!(record.status.is_none());
        assert!(record.extras.is_empty());
    }
}
