/// Picks the single anomaly tag for a record, in the priority order the
/// flags are evaluated — `is_error` and `is_slow` are condition-coded
/// rather than artifacts of measurement, so they are checked first.
pub fn anomaly_type(
    is_slow: bool,
    is_error: bool,
    phase_inconsistency: bool,
    speed_outlier: bool,
) -> Option<String> {
    if is_error {
        Some("error".to_string())
    } else if phase_inconsistency {
        Some("phase_inconsistency".to_string())
    } else if speed_outlier {
        Some("speed_outlier".to_string())
    } else if is_slow {
        Some("slow".to_string())
    } else {
        None
    }
}

pub struct QualityInputs {
    pub has_user_agent: bool,
    pub has_referer: bool,
    pub referer_domain_is_same_origin: bool,
    pub is_success: bool,
    pub has_upstream_timings: bool,
    pub phase_inconsistency: bool,
    pub platform_known: bool,
}

/// Starts at 1.0 and deducts for each data-quality concern observed,
/// floored at 0. Deductions are independent — a record can be dinged for
/// more than one concern at once.
pub fn quality_score(inputs: QualityInputs) -> f64 {
    let mut score: f64 = 1.0;

    if !inputs.has_user_agent {
        score -= 0.1;
    }
    if !inputs.has_referer && !inputs.referer_domain_is_same_origin {
        score -= 0.05;
    }
    if inputs.is_success && !inputs.has_upstream_timings {
        score -= 0.2;
    }
    if inputs.phase_inconsistency {
        score -= 0.3;
    }
    if !inputs.platform_known {
        score -= 0.05;
    }

    score.max(0.0)
}
