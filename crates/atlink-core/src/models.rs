//! Telemetry models produced by the parser.
//!
//! Everything here is owned output: the parser builds these from borrowed
//! text and hands them to the caller with no back-references. Absent values
//! stay `None` until the display boundary, where they become `"-"` (snapshot
//! level) or `"N/A"` (per-cell metrics).

use serde::{Deserialize, Serialize};

/// Placeholder used for absent snapshot-level values.
pub const ABSENT: &str = "-";

/// Placeholder used for absent per-cell metrics.
pub const NOT_AVAILABLE: &str = "N/A";

// ── Cell classification ─────────────────────────────────────────────

/// Radio access technology of a serving cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technology {
    #[serde(rename = "LTE")]
    Lte,
    #[serde(rename = "NR")]
    Nr,
}

impl std::fmt::Display for Technology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Technology::Lte => write!(f, "LTE"),
            Technology::Nr => write!(f, "NR"),
        }
    }
}

/// Whether a cell is the anchor carrier or an aggregated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    Primary,
    Secondary,
}

// ── Cell detail ─────────────────────────────────────────────────────

/// One signal metric of a finalized cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Technology-specific label (`RSRP` for LTE, `SS-RSRP` for NR).
    pub label: String,
    /// Rounded to one decimal.
    pub value: Option<f64>,
    /// Unit-qualified value, e.g. `-95dBm`, or `N/A`.
    pub display: String,
}

/// Per-antenna receive level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Antenna {
    pub label: String,
    pub value: Option<f64>,
    pub display: String,
}

/// A finalized serving-cell block (primary or carrier-aggregation secondary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDetail {
    pub technology: Technology,
    pub role: CellRole,
    /// Secondary carrier number; `None` for primaries.
    pub ca_index: Option<u32>,
    /// Human-readable heading, e.g. `LTE Secondary (SCC1)`.
    pub title: String,
    /// Band as reported by the modem.
    pub band: Option<String>,
    /// `B3` / `n78`, or `-`.
    pub band_display: String,
    pub bandwidth: Option<String>,
    pub channel: Option<String>,
    pub pci: Option<String>,
    pub metrics: Vec<Metric>,
    pub antennas: Vec<Antenna>,
    pub tx_power: Option<f64>,
    pub tx_power_display: String,
    pub rx_diversity: Option<String>,
}

impl CellDetail {
    /// Look up a metric by label.
    pub fn metric(&self, label: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.label == label)
    }
}

// ── Identity ────────────────────────────────────────────────────────

/// Modem identity as printed by `ATI`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModemIdentity {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
    pub imei: Option<String>,
}

impl ModemIdentity {
    pub fn is_empty(&self) -> bool {
        self.manufacturer.is_none()
            && self.model.is_none()
            && self.revision.is_none()
            && self.imei.is_none()
    }
}

// ── Quality ─────────────────────────────────────────────────────────

/// Coarse signal classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Weak,
    Unknown,
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalQuality::Excellent => write!(f, "excellent"),
            SignalQuality::Good => write!(f, "good"),
            SignalQuality::Fair => write!(f, "fair"),
            SignalQuality::Weak => write!(f, "weak"),
            SignalQuality::Unknown => write!(f, "unknown"),
        }
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Structured telemetry parsed from modem diagnostic output.
///
/// Top-level fields hold the first value seen in the text; later cells
/// repeating a key do not overwrite them. Numeric fields carry a display
/// shadow (`rsrp` ↔ `rsrp_display`) that is `"-"` when the value is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub identity: ModemIdentity,
    /// Radio access technology name as reported (e.g. `LTE`, `NR5G-NSA`).
    pub technology: Option<String>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub cell_id: Option<String>,
    pub tac: Option<String>,
    pub band: Option<String>,
    pub channel: Option<String>,
    pub pci: Option<String>,
    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
    pub sinr: Option<f64>,
    pub rssi: Option<f64>,
    pub rsrp_display: String,
    pub rsrq_display: String,
    pub sinr_display: String,
    pub rssi_display: String,
    pub cells: Vec<CellDetail>,
    /// Deduplicated band list, e.g. `3+7+n78`.
    pub band_display: String,
    /// Channel list with bands, e.g. `1300 (3) / 3050 (7)`.
    pub channel_display: String,
    pub quality: SignalQuality,
}

impl SignalSnapshot {
    /// `MCC-MNC` when both halves are known.
    pub fn plmn(&self) -> Option<String> {
        match (&self.mcc, &self.mnc) {
            (Some(mcc), Some(mnc)) => Some(format!("{mcc}-{mnc}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technology_serializes_uppercase() {
        let json = serde_json::to_string(&Technology::Nr).unwrap();
        assert_eq!(json, "\"NR\"");
        let back: Technology = serde_json::from_str("\"LTE\"").unwrap();
        assert_eq!(back, Technology::Lte);
    }

    #[test]
    fn quality_serializes_lowercase() {
        let json = serde_json::to_string(&SignalQuality::Excellent).unwrap();
        assert_eq!(json, "\"excellent\"");
        assert_eq!(SignalQuality::Weak.to_string(), "weak");
    }

    #[test]
    fn identity_empty_by_default() {
        assert!(ModemIdentity::default().is_empty());
        let id = ModemIdentity {
            imei: Some("123".into()),
            ..Default::default()
        };
        assert!(!id.is_empty());
    }
}
