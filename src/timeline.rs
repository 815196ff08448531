//! Tick quantizer
//!
//! Frequency and volume changes are pulled out of the raw Events into one
//! stream per (chip, channel, kind). The tick is the GCD of every positive
//! sample delta inside those streams, so each delta is a whole number of
//! ticks. Frequency and volume changes of a channel that land on the same
//! tick merge into a single `fV` record.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::chips::{ChipUpdate, OpllUpdate, PsgUpdate, SccUpdate};
use crate::ir::{EventDetail, IrDocument};
use crate::vgm_parser::ChipId;
use crate::{create_parent_dir, Result};

/// Record kind after merging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickKind {
    /// Frequency change only
    #[serde(rename = "f")]
    Freq,
    /// Volume change only
    #[serde(rename = "v")]
    Vol,
    /// Frequency and volume on the same tick
    #[serde(rename = "fV")]
    FreqVol,
}

impl TickKind {
    /// CSV label
    pub fn label(&self) -> &'static str {
        match self {
            TickKind::Freq => "f",
            TickKind::Vol => "v",
            TickKind::FreqVol => "fV",
        }
    }

    fn has_freq(&self) -> bool {
        matches!(self, TickKind::Freq | TickKind::FreqVol)
    }

    fn has_vol(&self) -> bool {
        matches!(self, TickKind::Vol | TickKind::FreqVol)
    }
}

/// One quantized record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineItem {
    /// Chip family
    pub chip: ChipId,
    /// Channel
    pub channel: u8,
    /// Tick index
    pub tick: u64,
    /// Tick start in seconds
    pub time_s: f64,
    /// What changed
    pub kind: TickKind,
    /// Raw frequency word (PSG period, SCC divider, OPLL `block << 9 | fnum`)
    pub reg16: Option<u16>,
    /// Frequency in Hz
    pub pitch_hz: Option<f64>,
    /// Loudness 0-15
    pub vol4: Option<u8>,
    /// Ticks until the next frequency record of this channel
    pub dur_f_ticks: Option<u64>,
    /// Ticks until the next volume record of this channel
    pub dur_v_ticks: Option<u64>,
    /// Original sample position
    pub samples: u64,
}

/// Quantized timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    /// Samples per tick
    pub tick_samples: u64,
    /// Ticks per second, rounded
    pub ticks_per_second: u64,
    /// Records sorted by (chip, channel, tick)
    pub items: Vec<TimelineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StreamKind {
    Freq,
    Vol,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StreamValue {
    Freq { reg16: u16, hz: f64 },
    Vol(u8),
}

type StreamKey = (ChipId, u8, StreamKind);

fn stream_point(detail: &EventDetail) -> Option<(ChipId, u8, StreamValue)> {
    let EventDetail::Chip(update) = detail else {
        return None;
    };
    let point = match *update {
        ChipUpdate::Psg(PsgUpdate::Tone {
            channel,
            period,
            hz,
        }) => (ChipId::Psg, channel, StreamValue::Freq { reg16: period, hz }),
        ChipUpdate::Psg(PsgUpdate::Volume { channel, level, .. }) => {
            (ChipId::Psg, channel, StreamValue::Vol(level))
        }
        ChipUpdate::Scc(SccUpdate::Frequency {
            channel,
            divider,
            hz,
        }) => (
            ChipId::Scc,
            channel,
            StreamValue::Freq { reg16: divider, hz },
        ),
        ChipUpdate::Scc(SccUpdate::Volume { channel, level, .. }) => {
            (ChipId::Scc, channel, StreamValue::Vol(level))
        }
        ChipUpdate::Opll(OpllUpdate::FnumLow {
            channel,
            fnum,
            block,
            hz,
        })
        | ChipUpdate::Opll(OpllUpdate::Control {
            channel,
            fnum,
            block,
            hz,
            ..
        }) => (
            ChipId::Opll,
            channel,
            StreamValue::Freq {
                reg16: (u16::from(block) << 9) | fnum,
                hz,
            },
        ),
        ChipUpdate::Opll(OpllUpdate::InstVol {
            channel, volume, ..
        }) => (ChipId::Opll, channel, StreamValue::Vol(15 - (volume & 0x0F))),
        _ => return None,
    };
    Some(point)
}

fn same_value(a: &StreamValue, b: &StreamValue) -> bool {
    match (a, b) {
        (StreamValue::Freq { reg16: x, .. }, StreamValue::Freq { reg16: y, .. }) => x == y,
        (StreamValue::Vol(x), StreamValue::Vol(y)) => x == y,
        _ => false,
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Quantize the frequency/volume changes of an IR document onto a tick grid
pub fn quantize(ir: &IrDocument) -> Timeline {
    let sample_rate = ir.header.sample_rate.max(1);

    let mut streams: BTreeMap<StreamKey, Vec<(u64, StreamValue)>> = BTreeMap::new();
    for event in &ir.events {
        let Some((chip, channel, value)) = stream_point(&event.detail) else {
            continue;
        };
        let kind = match value {
            StreamValue::Freq { .. } => StreamKind::Freq,
            StreamValue::Vol(_) => StreamKind::Vol,
        };
        let stream = streams.entry((chip, channel, kind)).or_default();
        if stream.last().is_some_and(|(_, last)| same_value(last, &value)) {
            continue;
        }
        stream.push((event.samples, value));
    }

    let tick_samples = streams
        .values()
        .flat_map(|s| s.windows(2).map(|w| w[1].0 - w[0].0))
        .filter(|&d| d > 0)
        .fold(0, gcd)
        .max(1);
    let ticks_per_second = (f64::from(sample_rate) / tick_samples as f64).round() as u64;
    let to_tick = |samples: u64| (samples as f64 / tick_samples as f64).round() as u64;

    // Merge per (chip, channel); BTreeMap keeps the output order
    let mut channels: BTreeMap<(ChipId, u8), BTreeMap<u64, TimelineItem>> = BTreeMap::new();
    for ((chip, channel, _), points) in &streams {
        let slots = channels.entry((*chip, *channel)).or_default();
        for &(samples, value) in points {
            let tick = to_tick(samples);
            let item = slots.entry(tick).or_insert_with(|| TimelineItem {
                chip: *chip,
                channel: *channel,
                tick,
                time_s: (tick * tick_samples) as f64 / f64::from(sample_rate),
                kind: TickKind::Freq,
                reg16: None,
                pitch_hz: None,
                vol4: None,
                dur_f_ticks: None,
                dur_v_ticks: None,
                samples,
            });
            item.samples = item.samples.min(samples);
            match value {
                StreamValue::Freq { reg16, hz } => {
                    item.reg16 = Some(reg16);
                    item.pitch_hz = Some(hz);
                }
                StreamValue::Vol(level) => item.vol4 = Some(level),
            }
            item.kind = match (item.reg16.is_some(), item.vol4.is_some()) {
                (true, true) => TickKind::FreqVol,
                (false, true) => TickKind::Vol,
                _ => TickKind::Freq,
            };
        }
    }

    let mut items = Vec::new();
    for (_, slots) in channels {
        let mut row: Vec<TimelineItem> = slots.into_values().collect();
        fill_durations(&mut row, TickKind::has_freq, |item, d| item.dur_f_ticks = d);
        fill_durations(&mut row, TickKind::has_vol, |item, d| item.dur_v_ticks = d);
        items.extend(row);
    }

    Timeline {
        tick_samples,
        ticks_per_second,
        items,
    }
}

fn fill_durations(
    row: &mut [TimelineItem],
    carries: impl Fn(&TickKind) -> bool,
    mut set: impl FnMut(&mut TimelineItem, Option<u64>),
) {
    let mut next_tick: Option<u64> = None;
    for item in row.iter_mut().rev() {
        if !carries(&item.kind) {
            continue;
        }
        set(item, next_tick.map(|next| next.saturating_sub(item.tick).max(1)));
        next_tick = Some(item.tick);
    }
}

/// Timeline CSV: a `# tick_samples=N,ticks_per_second=M` row, the column
/// header, then one row per record
pub fn write_timeline_csv(path: &Path, timeline: &Timeline) -> Result<()> {
    create_parent_dir(path)?;
    let mut w = csv::WriterBuilder::new().flexible(true).from_path(path)?;
    w.write_record([
        format!("# tick_samples={}", timeline.tick_samples),
        format!("ticks_per_second={}", timeline.ticks_per_second),
    ])?;
    w.write_record([
        "chip",
        "ch",
        "tick",
        "time_s",
        "kind",
        "reg16",
        "pitch_hz",
        "vol4",
        "dur_f_ticks",
        "dur_v_ticks",
        "samples",
    ])?;
    let opt = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_default();
    for item in &timeline.items {
        w.write_record([
            item.chip.label().to_string(),
            item.channel.to_string(),
            item.tick.to_string(),
            format!("{:.6}", item.time_s),
            item.kind.label().to_string(),
            opt(item.reg16.map(u64::from)),
            item.pitch_hz
                .map(|hz| format!("{hz:.6}"))
                .unwrap_or_default(),
            opt(item.vol4.map(u64::from)),
            opt(item.dur_f_ticks),
            opt(item.dur_v_ticks),
            item.samples.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Event, EventKind, IrHeader};

    fn header() -> IrHeader {
        IrHeader {
            version: "1.61".into(),
            sample_rate: 44_100,
            total_samples: 0,
            declared_samples: 0,
            rate: 60,
            ay8910_clock: 1_789_772,
            k051649_clock: 0,
            ym2413_clock: 0,
        }
    }

    fn event(samples: u64, update: ChipUpdate) -> Event {
        Event {
            time_s: samples as f64 / 44_100.0,
            samples,
            chip: ChipId::Psg,
            channel: Some(0),
            kind: EventKind::RegWrite,
            address: None,
            value: None,
            detail: EventDetail::Chip(update),
        }
    }

    fn tone(samples: u64, period: u16) -> Event {
        event(
            samples,
            ChipUpdate::Psg(PsgUpdate::Tone {
                channel: 0,
                period,
                hz: 1_789_772.0 / (16.0 * f64::from(period)),
            }),
        )
    }

    fn volume(samples: u64, level: u8) -> Event {
        event(
            samples,
            ChipUpdate::Psg(PsgUpdate::Volume {
                channel: 0,
                level,
                previous: 0,
                envelope: false,
                tone_enabled: true,
            }),
        )
    }

    fn doc(events: Vec<Event>) -> IrDocument {
        IrDocument {
            header: header(),
            events,
            notes: Vec::new(),
            opll_gates: Vec::new(),
            opll_slices: Vec::new(),
        }
    }

    #[test]
    fn test_tick_is_gcd_of_deltas() {
        let ir = doc(vec![
            tone(0, 200),
            volume(0, 12),
            volume(735, 10),
            tone(1470, 150),
            volume(2205, 0),
        ]);
        let tl = quantize(&ir);
        assert_eq!(tl.tick_samples, 735);
        assert_eq!(tl.ticks_per_second, 60);
        let ticks: Vec<u64> = tl.items.iter().map(|i| i.tick).collect();
        assert_eq!(ticks, vec![0, 1, 2, 3]);
        assert_eq!(tl.items[0].kind, TickKind::FreqVol);
        assert_eq!(tl.items[1].kind, TickKind::Vol);
        assert_eq!(tl.items[2].kind, TickKind::Freq);
    }

    #[test]
    fn test_durations_per_kind() {
        let ir = doc(vec![
            tone(0, 200),
            volume(0, 12),
            volume(735, 10),
            tone(1470, 150),
            volume(2205, 0),
        ]);
        let tl = quantize(&ir);
        assert_eq!(tl.items[0].dur_f_ticks, Some(2));
        assert_eq!(tl.items[0].dur_v_ticks, Some(1));
        assert_eq!(tl.items[1].dur_v_ticks, Some(2));
        assert_eq!(tl.items[2].dur_f_ticks, None);
        assert_eq!(tl.items[3].dur_v_ticks, None);
    }

    #[test]
    fn test_repeated_values_are_dropped() {
        let ir = doc(vec![volume(0, 8), volume(100, 8), volume(300, 4)]);
        let tl = quantize(&ir);
        assert_eq!(tl.tick_samples, 300);
        assert_eq!(tl.items.len(), 2);
        assert_eq!(tl.items[1].vol4, Some(4));
    }

    #[test]
    fn test_empty_defaults_to_one_sample() {
        let tl = quantize(&doc(Vec::new()));
        assert_eq!(tl.tick_samples, 1);
        assert_eq!(tl.ticks_per_second, 44_100);
        assert!(tl.items.is_empty());
    }

    #[test]
    fn test_tick_divides_deltas() {
        let ir = doc(vec![volume(0, 1), volume(882, 2), volume(1617, 3), volume(2499, 4)]);
        let tl = quantize(&ir);
        for w in tl.items.windows(2) {
            assert_eq!((w[1].samples - w[0].samples) % tl.tick_samples, 0);
            assert!(w[1].tick > w[0].tick);
        }
    }

    #[test]
    fn test_timeline_csv_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.csv");
        let tl = quantize(&doc(vec![tone(0, 200), volume(735, 3)]));
        write_timeline_csv(&path, &tl).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# tick_samples=735,ticks_per_second=60"));
        assert!(lines.next().unwrap().starts_with("chip,ch,tick,time_s,kind"));
        assert!(lines.next().unwrap().starts_with("PSG,0,0,0.000000,f,200,"));
    }
}
