//! Derives an [`EnrichedRecord`] from a parsed [`RawRecord`]: URI
//! normalization, platform/device/bot/API classification, HTTP-phase
//! decomposition, efficiency ratios, transfer speeds, and a data-quality
//! score.
//!
//! Classification rules are configuration, not code — the enricher
//! compiles the configured rule tables once and reuses them for every
//! record, rather than matching against a hardcoded list.

mod classify;
mod flags;
mod internal_ip;
mod phases;
mod uri;

use std::time::{Duration, Instant};

use chrono::Timelike;
use etl_core::config::Config;
use etl_core::types::{EnrichedRecord, RawRecord};
use etl_core::{Error, Result};

use classify::{CompiledApiRule, CompiledUaRule};

/// Per-batch timing, broken down the same way the rest of the pipeline's
/// phase metrics are — useful for spotting a slow classification rule
/// table or a runaway regex without profiling the whole run.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentMetrics {
    pub records_enriched: u64,
    pub classify_duration: Duration,
    pub phase_duration: Duration,
    pub total_duration: Duration,
}

pub struct Enricher {
    ua_rules: Vec<CompiledUaRule>,
    api_rules: Vec<CompiledApiRule>,
    slow_threshold_secs: f64,
    success_status_codes: std::collections::HashSet<String>,
}

impl Enricher {
    pub fn new(config: &Config) -> Self {
        Self {
            ua_rules: classify::compile_ua_rules(&config.user_agent_rules),
            api_rules: classify::compile_api_rules(&config.api_rules),
            slow_threshold_secs: config.slow_threshold_secs,
            success_status_codes: config.success_status_codes.clone(),
        }
    }

    /// Enriches one record. `id` is the caller-supplied deterministic
    /// `hash(path, byte_offset, content_digest_prefix)` — the enricher
    /// does not compute it, since it has no notion of file position.
    ///
    /// A record with no `timestamp` or no `status` fails rather than
    /// being enriched with substituted defaults: the parser is expected
    /// to have already rejected a missing-timestamp line, and a record
    /// whose method/URI parsed but whose `status` is absent is caught
    /// here as a second line of defense.
    pub fn enrich(&self, raw: RawRecord, id: String) -> Result<EnrichedRecord> {
        let timestamp = raw
            .timestamp
            .ok_or_else(|| Error::Enrichment("missing timestamp".to_string()))?;
        if raw.status.is_none() {
            return Err(Error::Enrichment("missing status".to_string()));
        }
        let date = timestamp.date_naive();

        let uri = raw.uri.clone().unwrap_or_default();
        let normalized_uri = uri::normalize(&uri);
        let referer_domain = raw.referer.as_deref().and_then(|r| uri::referer_domain(r));

        let ua = classify::classify_user_agent(raw.user_agent.as_deref(), &self.ua_rules);
        let api_category = classify::classify_api(&normalized_uri, &self.api_rules);

        let total = raw.total_request_duration.unwrap_or(0.0);
        let upstream_connect = raw.upstream_connect_time.unwrap_or(0.0);
        let upstream_header = raw.upstream_header_time.unwrap_or(0.0);
        let upstream_response = raw.upstream_response_time.unwrap_or(0.0);

        let phase_result = phases::decompose(total, upstream_connect, upstream_header, upstream_response);
        let efficiency = phases::efficiency(&phase_result.phases, total, upstream_response);
        let speed_result = phases::speeds(
            raw.response_body_size,
            raw.total_bytes_sent,
            &phase_result.phases,
        );

        let is_success = raw
            .status
            .as_deref()
            .is_some_and(|s| self.success_status_codes.contains(s));
        let is_error = raw
            .status
            .as_deref()
            .and_then(|s| s.parse::<u32>().ok())
            .is_some_and(|code| code >= 400);
        let is_slow = total > self.slow_threshold_secs;
        let is_internal_ip = raw
            .client_ip
            .as_deref()
            .is_some_and(internal_ip::is_internal);

        let anomaly_type = flags::anomaly_type(
            is_slow,
            is_error,
            phase_result.phase_inconsistency,
            speed_result.speed_outlier,
        );
        let has_anomaly = anomaly_type.is_some();

        let data_quality_score = flags::quality_score(flags::QualityInputs {
            has_user_agent: raw.user_agent.is_some(),
            has_referer: raw.referer.is_some(),
            referer_domain_is_same_origin: referer_domain
                .as_deref()
                .zip(raw.server_name.as_deref())
                .is_some_and(|(r, s)| r == s),
            is_success,
            has_upstream_timings: raw.upstream_response_time.is_some(),
            phase_inconsistency: phase_result.phase_inconsistency,
            platform_known: ua.platform != "Unknown",
        });

        Ok(EnrichedRecord {
            id,
            timestamp,
            date,
            hour: timestamp.hour(),
            minute: timestamp.minute(),
            second: timestamp.second(),
            server_name: raw.server_name,
            client_ip: raw.client_ip,
            method: raw.method,
            uri: raw.uri,
            normalized_uri,
            protocol: raw.protocol,
            status: raw.status,
            response_body_size: raw.response_body_size,
            total_bytes_sent: raw.total_bytes_sent,
            referer: raw.referer,
            referer_domain,
            user_agent: raw.user_agent,
            upstream_addr: raw.upstream_addr,
            platform: ua.platform,
            platform_version: None,
            device_type: ua.device_type,
            browser_type: ua.browser_type,
            os_type: ua.os_type,
            bot_type: ua.bot_type,
            entry_source: None,
            api_category,
            application_name: raw.application_name,
            phases: phase_result.phases,
            efficiency,
            speeds: speed_result.speeds,
            is_success,
            is_slow,
            is_error,
            is_internal_ip,
            has_anomaly,
            anomaly_type,
            data_quality_score,
            trace_id: raw.trace_id,
            cache_status: raw.cache_status,
            cluster_node: raw.cluster_node,
        })
    }

    /// Enriches a batch, dropping records that fail a precondition (no
    /// timestamp, no status) rather than propagating the error — callers
    /// that need per-record failure counts should call [`Self::enrich`]
    /// directly and fold the `Err` into their own failure tally.
    pub fn enrich_batch(
        &self,
        records: impl IntoIterator<Item = (RawRecord, String)>,
        metrics: &mut EnrichmentMetrics,
    ) -> Vec<EnrichedRecord> {
        let start = Instant::now();
        let mut out = Vec::new();
        for (raw, id) in records {
            if let Ok(enriched) = self.enrich(raw, id) {
                out.push(enriched);
            }
            metrics.records_enriched += 1;
        }
        metrics.total_duration = start.elapsed();
        out
    }
}
