//! Text rendering of signal snapshots.

use std::fmt;

use atlink_core::models::{CellDetail, SignalSnapshot, ABSENT};

pub fn summary(snapshot: &SignalSnapshot) -> String {
    Summary(snapshot).to_string()
}

struct Summary<'a>(&'a SignalSnapshot);

fn or_absent(value: Option<&str>) -> &str {
    value.unwrap_or(ABSENT)
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.0;
        let id = &snap.identity;

        if !id.is_empty() {
            let name: Vec<&str> = [id.manufacturer.as_deref(), id.model.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            writeln!(
                f,
                "Modem      {}",
                if name.is_empty() {
                    ABSENT.to_string()
                } else {
                    name.join(" ")
                }
            )?;
            if let Some(revision) = &id.revision {
                writeln!(f, "Revision   {revision}")?;
            }
            if let Some(imei) = &id.imei {
                writeln!(f, "IMEI       {imei}")?;
            }
        }

        let plmn = snap.plmn();
        writeln!(
            f,
            "Network    {}  PLMN {}  TAC {}  Cell {}",
            or_absent(snap.technology.as_deref()),
            or_absent(plmn.as_deref()),
            or_absent(snap.tac.as_deref()),
            or_absent(snap.cell_id.as_deref()),
        )?;
        writeln!(f, "Bands      {}", snap.band_display)?;
        writeln!(f, "Channels   {}", snap.channel_display)?;
        writeln!(
            f,
            "Signal     RSRP {}  RSRQ {}  SINR {}  RSSI {}",
            snap.rsrp_display, snap.rsrq_display, snap.sinr_display, snap.rssi_display
        )?;
        writeln!(f, "Quality    {}", snap.quality)?;

        for cell in &snap.cells {
            writeln!(f)?;
            write_cell(f, cell)?;
        }
        Ok(())
    }
}

fn write_cell(f: &mut fmt::Formatter<'_>, cell: &CellDetail) -> fmt::Result {
    writeln!(
        f,
        "{}  band {}  bw {}  ch {}  pci {}",
        cell.title,
        cell.band_display,
        or_absent(cell.bandwidth.as_deref()),
        or_absent(cell.channel.as_deref()),
        or_absent(cell.pci.as_deref()),
    )?;

    let metrics: Vec<String> = cell
        .metrics
        .iter()
        .map(|m| format!("{} {}", m.label, m.display))
        .collect();
    writeln!(f, "  {}", metrics.join("  "))?;

    if !cell.antennas.is_empty() {
        let antennas: Vec<String> = cell
            .antennas
            .iter()
            .map(|a| format!("{} {}", a.label, a.display))
            .collect();
        writeln!(f, "  {}", antennas.join("  "))?;
    }
    if cell.tx_power.is_some() || cell.rx_diversity.is_some() {
        writeln!(
            f,
            "  TX power {}  RX diversity {}",
            cell.tx_power_display,
            or_absent(cell.rx_diversity.as_deref())
        )?;
    }
    Ok(())
}
