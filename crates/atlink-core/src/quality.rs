//! # Signal Quality Assessment
//!
//! Coarse label from the serving cell's RF metrics. Thresholds follow the
//! usual LTE field guidance:
//!
//! | Label     | RSRP (dBm) | Extra condition          |
//! |-----------|------------|--------------------------|
//! | excellent | ≥ −90      | SINR ≥ 10 dB             |
//! | good      | ≥ −105     | RSRQ ≥ −14 dB or unknown |
//! | fair      | ≥ −115     |                          |
//! | weak      | < −115     |                          |
//!
//! Rows are evaluated top to bottom; the first match wins. Without RSRP the
//! label is `unknown`.

use crate::models::SignalQuality;

/// RSRP floor for "excellent" (dBm).
pub const EXCELLENT_RSRP_DBM: f64 = -90.0;
/// SINR floor for "excellent" (dB).
pub const EXCELLENT_SINR_DB: f64 = 10.0;
/// RSRP floor for "good" (dBm).
pub const GOOD_RSRP_DBM: f64 = -105.0;
/// RSRQ floor for "good" (dB).
pub const GOOD_RSRQ_DB: f64 = -14.0;
/// RSRP floor for "fair" (dBm).
pub const FAIR_RSRP_DBM: f64 = -115.0;

/// Classify from unit-qualified display strings (`-88dBm`, `-9dB`, `12dB`).
pub fn assess(rsrp_display: &str, rsrq_display: &str, sinr_display: &str) -> SignalQuality {
    assess_values(
        parse_display(rsrp_display, "dBm"),
        parse_display(rsrq_display, "dB"),
        parse_display(sinr_display, "dB"),
    )
}

/// Classify from numeric metrics.
pub fn assess_values(rsrp: Option<f64>, rsrq: Option<f64>, sinr: Option<f64>) -> SignalQuality {
    let Some(rsrp) = rsrp else {
        return SignalQuality::Unknown;
    };

    if rsrp >= EXCELLENT_RSRP_DBM && sinr.is_some_and(|s| s >= EXCELLENT_SINR_DB) {
        SignalQuality::Excellent
    } else if rsrp >= GOOD_RSRP_DBM && rsrq.is_none_or(|q| q >= GOOD_RSRQ_DB) {
        SignalQuality::Good
    } else if rsrp >= FAIR_RSRP_DBM {
        SignalQuality::Fair
    } else {
        SignalQuality::Weak
    }
}

/// Parse `<number><unit>`; the unit suffix is required (case-insensitive).
fn parse_display(display: &str, unit: &str) -> Option<f64> {
    let trimmed = display.trim();
    let split = trimmed.len().checked_sub(unit.len())?;
    if !trimmed.is_char_boundary(split) {
        return None;
    }
    let (number, suffix) = trimmed.split_at(split);
    if !suffix.eq_ignore_ascii_case(unit) {
        return None;
    }
    number.trim_end().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Display parsing ────────────────────────────────────────────────

    #[test]
    fn parses_unit_suffix() {
        assert_eq!(parse_display("-88dBm", "dBm"), Some(-88.0));
        assert_eq!(parse_display("-9.5dB", "dB"), Some(-9.5));
        assert_eq!(parse_display("12 dB", "dB"), Some(12.0));
        assert_eq!(parse_display("-88DBM", "dBm"), Some(-88.0));
    }

    #[test]
    fn rejects_missing_or_wrong_unit() {
        assert_eq!(parse_display("-88", "dBm"), None);
        assert_eq!(parse_display("-", "dBm"), None);
        assert_eq!(parse_display("", "dB"), None);
        assert_eq!(parse_display("N/A", "dB"), None);
        assert_eq!(parse_display("abcdBm", "dBm"), None);
        assert_eq!(parse_display("-88dBm", "dB"), None);
    }

    // ─── Classification ─────────────────────────────────────────────────

    #[test]
    fn excellent_needs_strong_rsrp_and_sinr() {
        assert_eq!(assess("-88dBm", "-9dB", "12dB"), SignalQuality::Excellent);
        assert_eq!(assess("-90dBm", "-", "10dB"), SignalQuality::Excellent);
    }

    #[test]
    fn strong_rsrp_with_low_sinr_is_good() {
        assert_eq!(assess("-85dBm", "-10dB", "5dB"), SignalQuality::Good);
        assert_eq!(assess("-85dBm", "-", "-"), SignalQuality::Good);
    }

    #[test]
    fn poor_rsrq_drops_to_fair() {
        assert_eq!(assess("-100dBm", "-16dB", "3dB"), SignalQuality::Fair);
    }

    #[test]
    fn rsrq_threshold_is_inclusive() {
        assert_eq!(assess("-105dBm", "-14dB", "0dB"), SignalQuality::Good);
    }

    #[test]
    fn fair_band() {
        assert_eq!(assess("-110dBm", "-10dB", "0dB"), SignalQuality::Fair);
        assert_eq!(assess("-115dBm", "-", "-"), SignalQuality::Fair);
    }

    #[test]
    fn weak_below_fair_floor() {
        assert_eq!(assess("-120dBm", "-10dB", "20dB"), SignalQuality::Weak);
    }

    #[test]
    fn unknown_without_rsrp() {
        assert_eq!(assess("-", "-9dB", "12dB"), SignalQuality::Unknown);
        assert_eq!(assess("-88", "-9dB", "12dB"), SignalQuality::Unknown);
    }

    #[test]
    fn values_match_display_path() {
        assert_eq!(
            assess_values(Some(-88.0), Some(-9.0), Some(12.0)),
            assess("-88dBm", "-9dB", "12dB")
        );
    }
}
