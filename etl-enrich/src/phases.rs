use etl_core::types::{EfficiencyIndicators, PhaseTimings, TransferSpeeds};

/// Minimum denominator used in speed calculations, matching nginx's own
/// sub-millisecond phase resolution floor.
const EPSILON_SECS: f64 = 0.001;

/// Speeds above this are treated as measurement noise (clock skew, a
/// phase collapsing to ~0) rather than a real gigabit-plus transfer.
const SANITY_CAP_KBS: f64 = 1_048_576.0; // 1 GB/s in KB/s

pub struct PhaseResult {
    pub phases: PhaseTimings,
    pub phase_inconsistency: bool,
}

/// Decomposes `total_request_duration` into backend/network/transfer
/// phases given the three upstream sub-timings. Any phase that would go
/// negative (clock skew, partial upstream data) is clamped to zero and
/// reported via `phase_inconsistency`.
pub fn decompose(total: f64, upstream_connect: f64, upstream_header: f64, upstream_response: f64) -> PhaseResult {
    let mut inconsistent = false;

    let mut clamp = |value: f64| -> f64 {
        if value < 0.0 {
            inconsistent = true;
            0.0
        } else {
            value
        }
    };

    let backend_connect = clamp(upstream_connect);
    let backend_process = clamp(upstream_header - upstream_connect);
    let backend_transfer = clamp(upstream_response - upstream_header);
    let backend_total = clamp(upstream_response);

    let nginx_transfer = if upstream_response > 0.0 {
        clamp(total - upstream_response)
    } else {
        total.max(0.0)
    };

    let network = backend_connect + nginx_transfer;
    let processing = backend_process;
    let transfer = backend_transfer + nginx_transfer;

    PhaseResult {
        phases: PhaseTimings {
            backend_connect,
            backend_process,
            backend_transfer,
            backend_total,
            nginx_transfer,
            network,
            processing,
            transfer,
        },
        phase_inconsistency: inconsistent,
    }
}

/// Percentage efficiency indicators, computed only when `total > 0`;
/// otherwise all indicators are zero.
pub fn efficiency(phases: &PhaseTimings, total: f64, upstream_response: f64) -> EfficiencyIndicators {
    if total <= 0.0 {
        return EfficiencyIndicators::default();
    }

    let backend_efficiency = 100.0 * phases.backend_process / total;
    let network_overhead = 100.0 * phases.network / total;
    let transfer_ratio = 100.0 * phases.transfer / total;
    let connection_cost_ratio = 100.0 * phases.backend_connect / total;

    let denominator = upstream_response.max(total);
    let processing_efficiency_index = if denominator > 0.0 {
        (100.0 * phases.backend_process / denominator).min(100.0)
    } else {
        0.0
    };

    EfficiencyIndicators {
        backend_efficiency,
        network_overhead,
        transfer_ratio,
        connection_cost_ratio,
        processing_efficiency_index,
    }
}

pub struct SpeedResult {
    pub speeds: TransferSpeeds,
    pub speed_outlier: bool,
}

fn speed_kbs(size_bytes: Option<u64>, phase_secs: f64) -> (f64, bool) {
    let kb = size_bytes.unwrap_or(0) as f64 / 1024.0;
    let denominator = phase_secs.max(EPSILON_SECS);
    let raw = kb / denominator;
    if raw > SANITY_CAP_KBS {
        (SANITY_CAP_KBS, true)
    } else {
        (raw, false)
    }
}

/// Derives response/total/nginx transfer speeds in KB/s, clamped at a
/// sanity cap and flagged as an anomaly when the raw value exceeds it.
pub fn speeds(
    response_body_size: Option<u64>,
    total_bytes_sent: Option<u64>,
    phases: &PhaseTimings,
) -> SpeedResult {
    let (response_kbs, response_outlier) = speed_kbs(response_body_size, phases.backend_transfer);
    let (total_kbs, total_outlier) = speed_kbs(total_bytes_sent, phases.backend_total);
    let (nginx_kbs, nginx_outlier) = speed_kbs(response_body_size, phases.nginx_transfer);

    SpeedResult {
        speeds: TransferSpeeds {
            response_kbs,
            total_kbs,
            nginx_kbs,
        },
        speed_outlier: response_outlier || total_outlier || nginx_outlier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decomposes_a_well_formed_request() {
        let result = decompose(0.150, 0.010, 0.060, 0.120);
        assert!(!result.phase_inconsistency);
        assert!((result.phases.backend_connect - 0.010).abs() < 1e-9);
        assert!((result.phases.backend_process - 0.050).abs() < 1e-9);
        assert!((result.phases.backend_transfer - 0.060).abs() < 1e-9);
        assert!((result.phases.nginx_transfer - 0.030).abs() < 1e-9);
    }

    #[test]
    fn clock_skew_clamps_to_zero_and_flags_inconsistency() {
        // upstream_header < upstream_connect: impossible under normal operation.
        let result = decompose(0.100, 0.050, 0.020, 0.080);
        assert!(result.phase_inconsistency);
        assert_eq!(result.phases.backend_process, 0.0);
    }

    #[test]
    fn no_upstream_response_falls_back_to_total_as_nginx_transfer() {
        let result = decompose(0.200, 0.0, 0.0, 0.0);
        assert!((result.phases.nginx_transfer - 0.200).abs() < 1e-9);
        assert_eq!(result.phases.backend_total, 0.0);
    }

    #[test]
    fn efficiency_is_zero_when_total_is_zero() {
        let phases = PhaseTimings::default();
        let eff = efficiency(&phases, 0.0, 0.0);
        assert_eq!(eff.backend_efficiency, 0.0);
    }

    #[test]
    fn extreme_speed_is_clamped_and_flagged() {
        let phases = PhaseTimings {
            backend_transfer: 0.0000001,
            ..Default::default()
        };
        let result = speeds(Some(100_000_000), None, &phases);
        assert_eq!(result.speeds.response_kbs, SANITY_CAP_KBS);
        assert!(result.speed_outlier);
    }
}
