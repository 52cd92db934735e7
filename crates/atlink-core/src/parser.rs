//! # Vendor Diagnostic Parser
//!
//! Turns the free-form text a modem prints in answer to diagnostic AT
//! commands into a [`SignalSnapshot`]. The text has no schema: it is a run of
//! `key:value`, `key,value` and `key value` fragments whose meaning depends
//! on which serving-cell block is open.
//!
//! The parser is a single-pass state machine:
//!
//! ```text
//!            pcell / scellN          nr_band
//!   Idle ──────────────────► Lte ◄──────────► Nr
//!     ▲                       │  header: finalize + open
//!     └─────── finish ────────┘
//! ```
//!
//! - A header line finalizes the open cell and opens a new one.
//! - Antenna, RX-diversity and TX-power lines are printed *before* the header
//!   they describe, so they are buffered per technology and consumed by the
//!   next header of that technology.
//! - Top-level fields (RAT, PLMN, TAC, cell id, identity, first band/channel/
//!   PCI/metrics) keep their first value. Secondary cells repeat some keys
//!   with less authoritative values.
//! - Unknown lines are ignored and malformed numbers become absent values.
//!
//! ```
//! use atlink_core::parser::parse;
//!
//! let snap = parse("pcell: lte_band:3 lte_band_width:20MHz\nchannel:1300 pci:55\nlte_rsrp:-95 rsrq:-10");
//! assert_eq!(snap.cells.len(), 1);
//! assert_eq!(snap.band_display, "3");
//! assert_eq!(snap.rsrp_display, "-95dBm");
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{
    Antenna, CellDetail, CellRole, Metric, ModemIdentity, SignalSnapshot, Technology, ABSENT,
    NOT_AVAILABLE,
};
use crate::quality;

// ─── Patterns ───────────────────────────────────────────────────────────────

/// Separator and value token. The value lands in the first group after an
/// explicit `:`/`,`/`=` and in the second after bare whitespace.
const SEPARATED_VALUE: &str = r"(?:\s*[:,=]\s*([^\s,;]+)|\s+([^\s,;]+))";

/// `key` at line start or after a non-word character, then a separated value.
fn field(keys: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)(?:^|[^a-z0-9_])(?:{keys}){SEPARATED_VALUE}"
    ))
    .expect("field pattern must compile")
}

/// Matches of a pattern ending in [`SEPARATED_VALUE`] (groups `first` and
/// `first + 1`), paired with their value.
///
/// A bare-whitespace token holding `:` or `=` is the next key, not a value;
/// that match is skipped and the search resumes just before the token.
fn separated_captures<'a>(
    re: &'a Regex,
    line: &'a str,
    first: usize,
) -> impl Iterator<Item = (Captures<'a>, &'a str)> + 'a {
    let mut pos = 0;
    std::iter::from_fn(move || loop {
        let caps = re.captures_at(line, pos)?;
        let end = caps.get(0)?.end();
        if let Some(value) = caps.get(first) {
            pos = end;
            return Some((caps, value.as_str()));
        }
        let value = caps.get(first + 1)?;
        if !value.as_str().contains([':', '=']) {
            pos = end;
            return Some((caps, value.as_str()));
        }
        pos = line[..value.start()]
            .char_indices()
            .next_back()
            .map_or(value.start(), |(i, _)| i);
    })
}

static LTE_PRIMARY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:pcell|pcc)\b").expect("header pattern must compile"));
static LTE_SECONDARY_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:scell|scc)_?(\d*)\b").expect("header pattern must compile")
});
static NR_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:nr_band|nr5g_band)\b").expect("header pattern must compile"));

static IDENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(manufacturer|model|revision|imei)\s*:\s*(.+)$")
        .expect("identity pattern must compile")
});

static RAT: Lazy<Regex> = Lazy::new(|| field("rat|sys_mode|network_mode|access_technology"));
static PLMN: Lazy<Regex> = Lazy::new(|| field("mcc_mnc|mccmnc|plmn"));
static MCC: Lazy<Regex> = Lazy::new(|| field("mcc"));
static MNC: Lazy<Regex> = Lazy::new(|| field("mnc"));
static TAC: Lazy<Regex> = Lazy::new(|| field("lte_tac|nr_tac|tracking_area_code|tac"));
static CELL_ID: Lazy<Regex> =
    Lazy::new(|| field("lte_cell_id|nr_cell_id|global_cell_id|cell_id|cellid"));

static BAND: Lazy<Regex> = Lazy::new(|| field("lte_band|nr_band|nr5g_band|band"));
static BANDWIDTH: Lazy<Regex> = Lazy::new(|| {
    field("lte_band_width|nr_band_width|band_width|bandwidth|lte_bw|nr_bw|bw")
});
static CHANNEL: Lazy<Regex> =
    Lazy::new(|| field("lte_earfcn|nr_arfcn|nr_channel|earfcn|arfcn|channel"));
static PCI: Lazy<Regex> = Lazy::new(|| field("lte_pci|nr_pci|phy_cell_id|pci"));

static ANTENNA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        &format!(r"(?i)(?:^|[^a-z0-9_])(lte|nr)_(?:ant|rx)(\d+)(?:_rssi)?{SEPARATED_VALUE}"),
    )
    .expect("antenna pattern must compile")
});
static RX_DIVERSITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)(?:^|[^a-z0-9_])(lte|nr)_rx_diversity{SEPARATED_VALUE}"))
        .expect("diversity pattern must compile")
});
static TX_POWER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)(?:^|[^a-z0-9_])(lte|nr)_tx_?power{SEPARATED_VALUE}"))
        .expect("tx power pattern must compile")
});

/// Key variants for one metric: unprefixed, and per technology.
struct MetricPatterns {
    generic: Regex,
    lte: Regex,
    nr: Regex,
}

impl MetricPatterns {
    fn new(generic: &str, lte: &str, nr: &str) -> Self {
        MetricPatterns {
            generic: field(generic),
            lte: field(lte),
            nr: field(nr),
        }
    }

    fn for_technology(&self, technology: Technology) -> &Regex {
        match technology {
            Technology::Lte => &self.lte,
            Technology::Nr => &self.nr,
        }
    }
}

static RSRP: Lazy<MetricPatterns> =
    Lazy::new(|| MetricPatterns::new("rsrp", "lte_rsrp", "nr_rsrp|nr5g_rsrp|ss_rsrp"));
static RSRQ: Lazy<MetricPatterns> =
    Lazy::new(|| MetricPatterns::new("rsrq", "lte_rsrq", "nr_rsrq|nr5g_rsrq|ss_rsrq"));
static RSSI: Lazy<MetricPatterns> =
    Lazy::new(|| MetricPatterns::new("rssi", "lte_rssi", "nr_rssi|nr5g_rssi"));
static SINR: Lazy<MetricPatterns> = Lazy::new(|| {
    MetricPatterns::new("sinr|snr", "lte_sinr|lte_snr", "nr_sinr|nr_snr|nr5g_sinr|ss_sinr")
});

/// The four signal metrics, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Rsrp,
    Rsrq,
    Rssi,
    Sinr,
}

impl MetricKind {
    const ALL: [MetricKind; 4] = [
        MetricKind::Rsrp,
        MetricKind::Rsrq,
        MetricKind::Rssi,
        MetricKind::Sinr,
    ];

    fn patterns(self) -> &'static MetricPatterns {
        match self {
            MetricKind::Rsrp => &RSRP,
            MetricKind::Rsrq => &RSRQ,
            MetricKind::Rssi => &RSSI,
            MetricKind::Sinr => &SINR,
        }
    }

    fn unit(self) -> &'static str {
        match self {
            MetricKind::Rsrp | MetricKind::Rssi => "dBm",
            MetricKind::Rsrq | MetricKind::Sinr => "dB",
        }
    }

    /// NR reports synchronization-signal measurements under different names.
    fn label(self, technology: Technology) -> &'static str {
        match (technology, self) {
            (Technology::Lte, MetricKind::Rsrp) => "RSRP",
            (Technology::Lte, MetricKind::Rsrq) => "RSRQ",
            (Technology::Lte, MetricKind::Rssi) => "RSSI",
            (Technology::Lte, MetricKind::Sinr) => "SINR",
            (Technology::Nr, MetricKind::Rsrp) => "SS-RSRP",
            (Technology::Nr, MetricKind::Rsrq) => "SS-RSRQ",
            (Technology::Nr, MetricKind::Rssi) => "RSSI",
            (Technology::Nr, MetricKind::Sinr) => "SS-SINR",
        }
    }
}

// ─── Value helpers ──────────────────────────────────────────────────────────

/// Largest accepted numeric magnitude. Keeps rounding finite.
pub const MAX_MAGNITUDE: f64 = 1e6;

/// Parse a numeric token with an optional `dBm`/`dB` suffix.
///
/// Anything unparseable or beyond [`MAX_MAGNITUDE`] is `None`; the parser
/// never fails on bad numbers.
pub fn parse_number(token: &str) -> Option<f64> {
    let lower = token.trim().trim_matches('"').to_ascii_lowercase();
    let number = lower
        .strip_suffix("dbm")
        .or_else(|| lower.strip_suffix("db"))
        .unwrap_or(&lower);
    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() <= MAX_MAGNITUDE)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn format_value(value: f64, unit: &str) -> String {
    format!("{value}{unit}")
}

fn display_or(value: Option<f64>, unit: &str, placeholder: &str) -> String {
    value
        .map(|v| format_value(v, unit))
        .unwrap_or_else(|| placeholder.to_string())
}

fn clean_text(token: &str) -> Option<String> {
    let cleaned = token.trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn first_value<'a>(re: &'a Regex, line: &'a str) -> Option<&'a str> {
    separated_captures(re, line, 1).next().map(|(_, value)| value)
}

/// First `(lte|nr)`-prefixed match on the line with its value.
fn tagged_value<'a>(re: &'a Regex, line: &'a str) -> Option<(Technology, &'a str)> {
    separated_captures(re, line, 2)
        .next()
        .map(|(caps, value)| (technology_of(&caps[1]), value))
}

fn set_if_absent<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Split `222-10`, `222/10` or `22210` into MCC and MNC.
fn split_plmn(value: &str) -> Option<(String, String)> {
    let value = value.trim_matches('"');
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if let Some((mcc, mnc)) = value.split_once(['-', '/']) {
        return (numeric(mcc) && numeric(mnc)).then(|| (mcc.to_string(), mnc.to_string()));
    }
    if numeric(value) && (5..=6).contains(&value.len()) {
        return Some((value[..3].to_string(), value[3..].to_string()));
    }
    None
}

/// Strip surrounding whitespace and a leading `output:` marker.
fn normalize(raw: &str) -> Option<&str> {
    let mut line = raw.trim();
    if line
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("output:"))
    {
        line = line[7..].trim();
    }
    (!line.is_empty()).then_some(line)
}

fn technology_of(prefix: &str) -> Technology {
    if prefix.eq_ignore_ascii_case("nr") {
        Technology::Nr
    } else {
        Technology::Lte
    }
}

/// Per-cell band label: `B3` for LTE, `n78` for NR.
fn cell_band_label(technology: Technology, band: &str) -> String {
    let digits_after = |prefix: char| {
        band.strip_prefix(prefix)
            .or_else(|| band.strip_prefix(prefix.to_ascii_lowercase()))
            .filter(|rest| !rest.is_empty())
    };
    match technology {
        Technology::Lte => match digits_after('B') {
            Some(rest) => format!("B{rest}"),
            None if band.chars().all(|c| c.is_ascii_digit()) => format!("B{band}"),
            None => band.to_string(),
        },
        Technology::Nr => aggregate_band_label(technology, band),
    }
}

/// Band as it appears in the snapshot-wide band list: NR bands carry an `n`.
fn aggregate_band_label(technology: Technology, band: &str) -> String {
    match technology {
        Technology::Lte => band.to_string(),
        Technology::Nr if band.starts_with(['n', 'N']) => format!("n{}", &band[1..]),
        Technology::Nr => format!("n{band}"),
    }
}

// ─── Cell entries ───────────────────────────────────────────────────────────

/// Lines buffered ahead of the header they describe.
#[derive(Debug, Clone, Default)]
struct Pending {
    antennas: Vec<(String, Option<f64>)>,
    rx_diversity: Option<String>,
    tx_power: Option<f64>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.antennas.is_empty() && self.rx_diversity.is_none() && self.tx_power.is_none()
    }
}

/// A serving-cell block being accumulated.
#[derive(Debug, Clone)]
struct CellEntry {
    technology: Technology,
    role: CellRole,
    ca_index: Option<u32>,
    band: Option<String>,
    bandwidth: Option<String>,
    channel: Option<String>,
    pci: Option<String>,
    rsrp: Option<f64>,
    rsrq: Option<f64>,
    rssi: Option<f64>,
    sinr: Option<f64>,
    antennas: Vec<(String, Option<f64>)>,
    tx_power: Option<f64>,
    rx_diversity: Option<String>,
}

impl CellEntry {
    fn new(technology: Technology, role: CellRole, ca_index: Option<u32>) -> Self {
        CellEntry {
            technology,
            role,
            ca_index,
            band: None,
            bandwidth: None,
            channel: None,
            pci: None,
            rsrp: None,
            rsrq: None,
            rssi: None,
            sinr: None,
            antennas: Vec::new(),
            tx_power: None,
            rx_diversity: None,
        }
    }

    fn metric_mut(&mut self, kind: MetricKind) -> &mut Option<f64> {
        match kind {
            MetricKind::Rsrp => &mut self.rsrp,
            MetricKind::Rsrq => &mut self.rsrq,
            MetricKind::Rssi => &mut self.rssi,
            MetricKind::Sinr => &mut self.sinr,
        }
    }

    fn metric(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Rsrp => self.rsrp,
            MetricKind::Rsrq => self.rsrq,
            MetricKind::Rssi => self.rssi,
            MetricKind::Sinr => self.sinr,
        }
    }

    /// Fill absent fields from buffered lines.
    fn absorb(&mut self, pending: Pending) {
        if self.antennas.is_empty() {
            self.antennas = pending.antennas;
        }
        set_if_absent(&mut self.rx_diversity, pending.rx_diversity);
        set_if_absent(&mut self.tx_power, pending.tx_power);
    }

    /// Apply the fields on `line` that belong to a cell. First value wins.
    fn capture(&mut self, line: &str) {
        set_if_absent(&mut self.band, first_value(&BAND, line).and_then(clean_text));
        set_if_absent(
            &mut self.bandwidth,
            first_value(&BANDWIDTH, line).and_then(clean_text),
        );
        set_if_absent(
            &mut self.channel,
            first_value(&CHANNEL, line).and_then(clean_text),
        );
        set_if_absent(&mut self.pci, first_value(&PCI, line).and_then(clean_text));

        let technology = self.technology;
        for kind in MetricKind::ALL {
            let patterns = kind.patterns();
            let value = first_value(patterns.for_technology(technology), line)
                .and_then(parse_number)
                .or_else(|| first_value(&patterns.generic, line).and_then(parse_number));
            set_if_absent(self.metric_mut(kind), value);
        }
    }

    fn title(&self) -> String {
        let secondary = |name: &str| match self.ca_index {
            Some(idx) => format!("{name} Secondary (SCC{idx})"),
            None => format!("{name} Secondary"),
        };
        match (self.technology, self.role) {
            (Technology::Lte, CellRole::Primary) => "LTE Primary (PCC)".to_string(),
            (Technology::Lte, CellRole::Secondary) => secondary("LTE"),
            (Technology::Nr, CellRole::Primary) => "5G NR Primary".to_string(),
            (Technology::Nr, CellRole::Secondary) => secondary("5G NR"),
        }
    }

    fn finalize(self) -> CellDetail {
        let technology = self.technology;
        let metrics = MetricKind::ALL
            .iter()
            .map(|&kind| {
                let value = self.metric(kind).map(round1);
                Metric {
                    label: kind.label(technology).to_string(),
                    value,
                    display: display_or(value, kind.unit(), NOT_AVAILABLE),
                }
            })
            .collect();
        let antennas = self
            .antennas
            .iter()
            .map(|(label, value)| {
                let value = value.map(round1);
                Antenna {
                    label: label.clone(),
                    value,
                    display: display_or(value, "dBm", NOT_AVAILABLE),
                }
            })
            .collect();
        let tx_power = self.tx_power.map(round1);
        let band_display = self
            .band
            .as_deref()
            .map(|band| cell_band_label(technology, band))
            .unwrap_or_else(|| ABSENT.to_string());

        CellDetail {
            title: self.title(),
            technology,
            role: self.role,
            ca_index: self.ca_index,
            band_display,
            band: self.band,
            bandwidth: self.bandwidth,
            channel: self.channel,
            pci: self.pci,
            metrics,
            antennas,
            tx_power,
            tx_power_display: display_or(tx_power, "dBm", NOT_AVAILABLE),
            rx_diversity: self.rx_diversity,
        }
    }
}

// ─── State machine ──────────────────────────────────────────────────────────

/// Which kind of cell block is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Lte,
    Nr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    LtePrimary,
    LteSecondary(Option<u32>),
    Nr,
}

impl Header {
    fn recognize(line: &str) -> Option<Header> {
        if LTE_PRIMARY_HEADER.is_match(line) {
            return Some(Header::LtePrimary);
        }
        if let Some(caps) = LTE_SECONDARY_HEADER.captures(line) {
            let index = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            return Some(Header::LteSecondary(index));
        }
        if NR_HEADER.is_match(line) {
            return Some(Header::Nr);
        }
        None
    }
}

/// Snapshot-wide fields, first occurrence wins.
#[derive(Debug, Clone, Default)]
struct TopLevel {
    identity: ModemIdentity,
    technology: Option<String>,
    mcc: Option<String>,
    mnc: Option<String>,
    cell_id: Option<String>,
    tac: Option<String>,
    band: Option<String>,
    channel: Option<String>,
    pci: Option<String>,
    rsrp: Option<f64>,
    rsrq: Option<f64>,
    rssi: Option<f64>,
    sinr: Option<f64>,
}

impl TopLevel {
    fn metric_mut(&mut self, kind: MetricKind) -> &mut Option<f64> {
        match kind {
            MetricKind::Rsrp => &mut self.rsrp,
            MetricKind::Rsrq => &mut self.rsrq,
            MetricKind::Rssi => &mut self.rssi,
            MetricKind::Sinr => &mut self.sinr,
        }
    }

    fn capture(&mut self, line: &str) {
        if let Some(caps) = IDENTITY.captures(line) {
            let value = caps.get(2).and_then(|m| clean_text(m.as_str()));
            let key = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
            let slot = match key.as_deref() {
                Some("manufacturer") => &mut self.identity.manufacturer,
                Some("model") => &mut self.identity.model,
                Some("revision") => &mut self.identity.revision,
                _ => &mut self.identity.imei,
            };
            set_if_absent(slot, value);
            return;
        }

        set_if_absent(
            &mut self.technology,
            first_value(&RAT, line).and_then(clean_text),
        );
        if let Some((mcc, mnc)) = first_value(&PLMN, line).and_then(split_plmn) {
            set_if_absent(&mut self.mcc, Some(mcc));
            set_if_absent(&mut self.mnc, Some(mnc));
        }
        set_if_absent(&mut self.mcc, first_value(&MCC, line).and_then(clean_text));
        set_if_absent(&mut self.mnc, first_value(&MNC, line).and_then(clean_text));
        set_if_absent(&mut self.tac, first_value(&TAC, line).and_then(clean_text));
        set_if_absent(
            &mut self.cell_id,
            first_value(&CELL_ID, line).and_then(clean_text),
        );

        set_if_absent(&mut self.band, first_value(&BAND, line).and_then(clean_text));
        set_if_absent(
            &mut self.channel,
            first_value(&CHANNEL, line).and_then(clean_text),
        );
        set_if_absent(&mut self.pci, first_value(&PCI, line).and_then(clean_text));

        for kind in MetricKind::ALL {
            let patterns = kind.patterns();
            let value = [&patterns.lte, &patterns.nr, &patterns.generic]
                .into_iter()
                .find_map(|re| first_value(re, line).and_then(parse_number));
            set_if_absent(self.metric_mut(kind), value);
        }
    }
}

/// Line-by-line parser. Use [`parse`] for whole outputs.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    top: TopLevel,
    current: Option<CellEntry>,
    pending_lte: Pending,
    pending_nr: Pending,
    lte_secondaries: u32,
    nr_cells: u32,
    cells: Vec<CellDetail>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Which kind of cell is open after the lines fed so far.
    pub fn state(&self) -> ParserState {
        match self.current.as_ref().map(|entry| entry.technology) {
            None => ParserState::Idle,
            Some(Technology::Lte) => ParserState::Lte,
            Some(Technology::Nr) => ParserState::Nr,
        }
    }

    /// Cells finalized so far (the open one is not included).
    pub fn finalized(&self) -> &[CellDetail] {
        &self.cells
    }

    /// Whether antenna/diversity/TX-power lines are waiting for a header.
    pub fn has_pending(&self, technology: Technology) -> bool {
        match technology {
            Technology::Lte => !self.pending_lte.is_empty(),
            Technology::Nr => !self.pending_nr.is_empty(),
        }
    }

    /// Advance over one physical line.
    pub fn feed_line(&mut self, raw: &str) {
        let Some(line) = normalize(raw) else {
            return;
        };

        self.buffer_pending(line);
        if let Some(header) = Header::recognize(line) {
            self.open(header);
        }
        self.top.capture(line);
        if let Some(entry) = self.current.as_mut() {
            entry.capture(line);
        }
    }

    /// Finalize the open cell and build the snapshot.
    pub fn finish(mut self) -> SignalSnapshot {
        if let Some(mut entry) = self.current.take() {
            let leftover = std::mem::take(self.pending_mut(entry.technology));
            entry.absorb(leftover);
            self.cells.push(entry.finalize());
        }

        let top = self.top;
        let mut snapshot = SignalSnapshot {
            identity: top.identity,
            technology: top.technology,
            mcc: top.mcc,
            mnc: top.mnc,
            cell_id: top.cell_id,
            tac: top.tac,
            band: top.band,
            channel: top.channel,
            pci: top.pci,
            rsrp: top.rsrp.map(round1),
            rsrq: top.rsrq.map(round1),
            sinr: top.sinr.map(round1),
            rssi: top.rssi.map(round1),
            rsrp_display: String::new(),
            rsrq_display: String::new(),
            sinr_display: String::new(),
            rssi_display: String::new(),
            cells: self.cells,
            band_display: String::new(),
            channel_display: String::new(),
            quality: crate::models::SignalQuality::Unknown,
        };
        snapshot.refresh_derived();
        snapshot
    }

    fn pending_mut(&mut self, technology: Technology) -> &mut Pending {
        match technology {
            Technology::Lte => &mut self.pending_lte,
            Technology::Nr => &mut self.pending_nr,
        }
    }

    fn buffer_pending(&mut self, line: &str) {
        for (caps, token) in separated_captures(&ANTENNA, line, 3) {
            let technology = technology_of(&caps[1]);
            let label = format!("ANT{}", &caps[2]);
            self.pending_mut(technology)
                .antennas
                .push((label, parse_number(token)));
        }
        if let Some((technology, token)) = tagged_value(&RX_DIVERSITY, line) {
            set_if_absent(
                &mut self.pending_mut(technology).rx_diversity,
                clean_text(token),
            );
        }
        if let Some((technology, token)) = tagged_value(&TX_POWER, line) {
            set_if_absent(
                &mut self.pending_mut(technology).tx_power,
                parse_number(token),
            );
        }
    }

    fn open(&mut self, header: Header) {
        if let Some(entry) = self.current.take() {
            self.cells.push(entry.finalize());
        }

        let (technology, role, ca_index) = match header {
            Header::LtePrimary => (Technology::Lte, CellRole::Primary, None),
            Header::LteSecondary(index) => {
                self.lte_secondaries += 1;
                (
                    Technology::Lte,
                    CellRole::Secondary,
                    Some(index.unwrap_or(self.lte_secondaries)),
                )
            }
            Header::Nr => {
                self.nr_cells += 1;
                if self.nr_cells == 1 {
                    (Technology::Nr, CellRole::Primary, None)
                } else {
                    (Technology::Nr, CellRole::Secondary, Some(self.nr_cells - 1))
                }
            }
        };

        let mut entry = CellEntry::new(technology, role, ca_index);
        entry.absorb(std::mem::take(self.pending_mut(technology)));
        self.current = Some(entry);
    }
}

/// Parse one command output.
pub fn parse(text: &str) -> SignalSnapshot {
    let mut parser = Parser::new();
    for line in text.lines() {
        parser.feed_line(line);
    }
    parser.finish()
}

/// Parse several command outputs and merge them in order.
pub fn parse_all<'a>(outputs: impl IntoIterator<Item = &'a str>) -> SignalSnapshot {
    outputs
        .into_iter()
        .map(parse)
        .reduce(SignalSnapshot::merge)
        .unwrap_or_else(|| Parser::new().finish())
}

// ─── Aggregate displays ─────────────────────────────────────────────────────

/// `3+7+n78`: bands of all cells in order, deduplicated.
pub fn band_display(cells: &[CellDetail]) -> String {
    let mut bands: Vec<String> = Vec::new();
    for cell in cells {
        let Some(band) = cell.band.as_deref() else {
            continue;
        };
        let label = aggregate_band_label(cell.technology, band);
        if !bands.contains(&label) {
            bands.push(label);
        }
    }
    if bands.is_empty() {
        ABSENT.to_string()
    } else {
        bands.join("+")
    }
}

/// `1300 (3) / 3050 (7)`: each carrier's channel with its band.
pub fn channel_display(cells: &[CellDetail]) -> String {
    let channels: Vec<String> = cells
        .iter()
        .filter_map(|cell| {
            let channel = cell.channel.as_deref()?;
            Some(match cell.band.as_deref() {
                Some(band) => format!(
                    "{channel} ({})",
                    aggregate_band_label(cell.technology, band)
                ),
                None => channel.to_string(),
            })
        })
        .collect();
    if channels.is_empty() {
        ABSENT.to_string()
    } else {
        channels.join(" / ")
    }
}

// ─── Merging ────────────────────────────────────────────────────────────────

impl SignalSnapshot {
    /// Combine with the parse of a later command output.
    ///
    /// Top-level fields keep the first present value; cells are appended.
    pub fn merge(mut self, other: SignalSnapshot) -> SignalSnapshot {
        let identity = &mut self.identity;
        set_if_absent(&mut identity.manufacturer, other.identity.manufacturer);
        set_if_absent(&mut identity.model, other.identity.model);
        set_if_absent(&mut identity.revision, other.identity.revision);
        set_if_absent(&mut identity.imei, other.identity.imei);

        set_if_absent(&mut self.technology, other.technology);
        set_if_absent(&mut self.mcc, other.mcc);
        set_if_absent(&mut self.mnc, other.mnc);
        set_if_absent(&mut self.cell_id, other.cell_id);
        set_if_absent(&mut self.tac, other.tac);
        set_if_absent(&mut self.band, other.band);
        set_if_absent(&mut self.channel, other.channel);
        set_if_absent(&mut self.pci, other.pci);
        set_if_absent(&mut self.rsrp, other.rsrp);
        set_if_absent(&mut self.rsrq, other.rsrq);
        set_if_absent(&mut self.sinr, other.sinr);
        set_if_absent(&mut self.rssi, other.rssi);

        self.cells.extend(other.cells);
        self.refresh_derived();
        self
    }

    /// Recompute display strings, aggregate band/channel lists and quality.
    fn refresh_derived(&mut self) {
        self.rsrp_display = display_or(self.rsrp, "dBm", ABSENT);
        self.rsrq_display = display_or(self.rsrq, "dB", ABSENT);
        self.sinr_display = display_or(self.sinr, "dB", ABSENT);
        self.rssi_display = display_or(self.rssi, "dBm", ABSENT);
        self.band_display = band_display(&self.cells);
        self.channel_display = channel_display(&self.cells);
        self.quality = quality::assess(&self.rsrp_display, &self.rsrq_display, &self.sinr_display);
    }
}
