//! YM2413 register timeline loader
//!
//! Rows are register writes (`time`, `addr`, `data`, `ch`, with the usual
//! column aliases). A key-on rising edge on 0x20-0x28 opens a note carrying
//! the channel's current F-number and block. Each note's IOI runs to the
//! next onset on its channel; the final onset has no IOI and is dropped.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use super::{
    open_csv, parse_float, parse_int, pattern_name, require_column, Dataset, PatchSource,
    Sequence, SequenceKey,
};
use crate::chips::opll::OPLL_CHANNELS;
use crate::envelope::{user_patch, NoteContext};
use crate::Result;

const MIN_IOI_S: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelRegs {
    fnum: u16,
    block: u8,
    key_on: bool,
    instrument: u8,
}

#[derive(Debug, Default)]
struct ChannelNotes {
    onsets: Vec<(f64, u16, u8)>,
    first_instrument: Option<u8>,
    first_user_patch: Option<[u8; 8]>,
}

/// Load a register timeline CSV
pub fn load(path: &Path, source: PatchSource) -> Result<Dataset> {
    let mut reader = open_csv(path)?;
    let headers = reader.headers()?.clone();
    let c_time = require_column(&headers, &["time", "time_s", "sec", "t"], path)?;
    let c_addr = require_column(&headers, &["addr", "address", "reg", "register"], path)?;
    let c_data = require_column(&headers, &["data", "val", "value"], path)?;
    let c_ch = require_column(&headers, &["ch", "channel"], path)?;

    let mut regs = [ChannelRegs::default(); OPLL_CHANNELS];
    let mut user = [0u8; 8];
    let mut channels: BTreeMap<u8, ChannelNotes> = BTreeMap::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let parsed = (|| {
            let t = parse_float(field(c_time))?;
            let addr = u8::try_from(parse_int(field(c_addr))?).ok()?;
            let data = u8::try_from(parse_int(field(c_data))?).ok()?;
            let ch = parse_int(field(c_ch))?;
            Some((t, addr, data, ch))
        })();
        let Some((t, addr, data, ch)) = parsed else {
            skipped += 1;
            continue;
        };

        if addr < 0x08 {
            user[usize::from(addr)] = data;
            continue;
        }
        let Some(ch) = usize::try_from(ch).ok().filter(|&c| c < OPLL_CHANNELS) else {
            continue;
        };
        let st = &mut regs[ch];
        match addr & 0xF0 {
            0x10 => st.fnum = (st.fnum & 0x100) | u16::from(data),
            0x20 => {
                st.fnum = (st.fnum & 0xFF) | (u16::from(data & 0x01) << 8);
                st.block = (data >> 1) & 0x07;
                let key_on = data & 0x10 != 0;
                if key_on && !st.key_on {
                    let notes = channels.entry(ch as u8).or_default();
                    notes.onsets.push((t, st.fnum, st.block));
                    notes.first_instrument.get_or_insert(st.instrument);
                    notes.first_user_patch.get_or_insert(user);
                }
                st.key_on = key_on;
            }
            0x30 => st.instrument = data >> 4,
            _ => {}
        }
    }
    if skipped > 0 {
        warn!(file = %path.display(), skipped, "skipped malformed timeline rows");
    }

    let pattern = pattern_name(path, "_timeline_YM2413");
    let mut dataset = Dataset::new();
    for (channel, ch_notes) in channels {
        let notes: Vec<NoteContext> = ch_notes
            .onsets
            .windows(2)
            .map(|w| NoteContext {
                fnum: w[0].1,
                block: w[0].2,
                t_on: w[0].0,
                ioi: (w[1].0 - w[0].0).max(MIN_IOI_S),
            })
            .collect();
        if notes.is_empty() {
            debug!(file = %path.display(), channel, "single onset, no sequence");
            continue;
        }
        let patch = match (source, ch_notes.first_instrument, ch_notes.first_user_patch) {
            (PatchSource::Detect, Some(0), Some(bytes)) => user_patch(&bytes),
            _ => source.resolve(ch_notes.first_instrument),
        };
        dataset.insert(
            SequenceKey::new(pattern.clone(), channel),
            Sequence::new(patch, notes),
        );
    }
    Ok(dataset)
}
