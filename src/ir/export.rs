//! CSV and JSON writers for the IR
//!
//! Parent directories are created as needed; any write failure is returned.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::vgm_parser::samples_to_seconds;
use crate::{create_parent_dir, Result};

use super::{Event, GateSlice, IrDocument, Note, OpllGate};

fn csv_writer(path: &Path) -> Result<csv::Writer<File>> {
    create_parent_dir(path)?;
    Ok(csv::Writer::from_path(path)?)
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Events CSV: time_s, samples, chip, channel, kind, address_hex, value, extras_json
pub fn write_events_csv(path: &Path, events: &[Event]) -> Result<()> {
    let mut w = csv_writer(path)?;
    w.write_record([
        "time_s",
        "samples",
        "chip",
        "channel",
        "kind",
        "address_hex",
        "value",
        "extras_json",
    ])?;
    for e in events {
        w.write_record([
            format!("{:.9}", e.time_s),
            e.samples.to_string(),
            e.chip.label().to_string(),
            opt(e.channel),
            e.kind.label().to_string(),
            opt(e.address.map(|a| format!("0x{a:04X}"))),
            opt(e.value),
            serde_json::to_string(&e.detail)?,
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Notes CSV: chip, channel, t_on, t_off, duration_s, pitch_hz, volume, cause,
/// onset_cause, on/off samples
pub fn write_notes_csv(path: &Path, notes: &[Note]) -> Result<()> {
    let mut w = csv_writer(path)?;
    w.write_record([
        "chip",
        "channel",
        "t_on",
        "t_off",
        "duration_s",
        "pitch_hz",
        "volume",
        "cause",
        "onset_cause",
        "on_samples",
        "off_samples",
    ])?;
    for n in notes {
        w.write_record([
            n.chip.label().to_string(),
            n.channel.to_string(),
            format!("{:.9}", n.t_on),
            format!("{:.9}", n.t_off),
            format!("{:.9}", n.duration_s()),
            opt(n.pitch_hz.map(|hz| format!("{hz:.6}"))),
            opt(n.volume),
            n.cause.label().to_string(),
            n.onset_cause.label().to_string(),
            n.on_samples.to_string(),
            n.off_samples.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// YM2413 gates CSV
pub fn write_opll_gates_csv(path: &Path, gates: &[OpllGate], sample_rate: u32) -> Result<()> {
    let mut w = csv_writer(path)?;
    w.write_record([
        "ch",
        "gate_index",
        "on_samples",
        "off_samples",
        "on_time_s",
        "off_time_s",
        "dur_samples",
        "fnum0",
        "block0",
        "inst0",
        "vol0",
    ])?;
    for g in gates {
        w.write_record([
            g.channel.to_string(),
            g.index.to_string(),
            g.on_samples.to_string(),
            g.off_samples.to_string(),
            format!("{:.9}", samples_to_seconds(g.on_samples, sample_rate)),
            format!("{:.9}", samples_to_seconds(g.off_samples, sample_rate)),
            g.off_samples.saturating_sub(g.on_samples).to_string(),
            g.fnum0.to_string(),
            g.block0.to_string(),
            g.inst0.to_string(),
            g.vol0.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// YM2413 gate slices CSV
pub fn write_opll_slices_csv(path: &Path, slices: &[GateSlice], sample_rate: u32) -> Result<()> {
    let mut w = csv_writer(path)?;
    w.write_record([
        "ch",
        "gate_index",
        "kind",
        "start_samples",
        "end_samples",
        "start_time_s",
        "end_time_s",
        "fnum",
        "block",
        "inst",
        "vol",
    ])?;
    for s in slices {
        w.write_record([
            s.channel.to_string(),
            s.gate_index.to_string(),
            s.kind.label().to_string(),
            s.start_samples.to_string(),
            s.end_samples.to_string(),
            format!("{:.9}", samples_to_seconds(s.start_samples, sample_rate)),
            format!("{:.9}", samples_to_seconds(s.end_samples, sample_rate)),
            s.fnum.to_string(),
            s.block.to_string(),
            s.instrument.to_string(),
            s.volume.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Whole IR document as pretty JSON
pub fn write_ir_json(path: &Path, ir: &IrDocument) -> Result<()> {
    create_parent_dir(path)?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), ir)?;
    Ok(())
}
