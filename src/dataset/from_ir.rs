//! Sequences from the YM2413 gates of a decoded log

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use super::{pattern_name, Dataset, PatchSource, Sequence, SequenceKey};
use crate::chips::{ChipUpdate, OpllUpdate};
use crate::envelope::{user_patch, NoteContext};
use crate::ir::{EventDetail, IrBuilder, IrDocument, OpllGate};
use crate::vgm_parser::{load_file, samples_to_seconds, DecodeOptions};
use crate::Result;

/// User patch registers as written before `samples`
fn user_patch_at(ir: &IrDocument, samples: u64) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    for event in ir.events.iter().take_while(|e| e.samples <= samples) {
        if let EventDetail::Chip(ChipUpdate::Opll(OpllUpdate::UserPatch { reg, value })) =
            event.detail
        {
            if let Some(slot) = bytes.get_mut(usize::from(reg)) {
                *slot = value;
            }
        }
    }
    bytes
}

/// One sequence per YM2413 channel with at least one gate.
///
/// Each gate's IOI runs to the next gate onset; the last gate uses its own
/// key-on length.
pub fn from_ir(pattern: &str, ir: &IrDocument, source: PatchSource) -> Dataset {
    let sample_rate = ir.header.sample_rate;
    let mut by_channel: BTreeMap<u8, Vec<&OpllGate>> = BTreeMap::new();
    for gate in &ir.opll_gates {
        by_channel.entry(gate.channel).or_default().push(gate);
    }

    let mut dataset = Dataset::new();
    for (channel, mut gates) in by_channel {
        gates.sort_by_key(|g| g.on_samples);
        let notes: Vec<NoteContext> = gates
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let end = gates.get(i + 1).map_or(g.off_samples, |next| next.on_samples);
                NoteContext {
                    fnum: g.fnum0,
                    block: g.block0,
                    t_on: samples_to_seconds(g.on_samples, sample_rate),
                    ioi: samples_to_seconds(end.saturating_sub(g.on_samples), sample_rate),
                }
            })
            .collect();
        let first = gates[0];
        let patch = match source {
            PatchSource::Detect if first.inst0 == 0 => {
                user_patch(&user_patch_at(ir, first.on_samples))
            }
            _ => source.resolve(Some(first.inst0)),
        };
        dataset.insert(
            SequenceKey::new(pattern, channel),
            Sequence::new(patch, notes),
        );
    }
    dataset
}

/// Decode a VGM file and build its gate dataset, keyed by the file stem
pub fn load_vgm(path: &Path, options: &DecodeOptions, source: PatchSource) -> Result<Dataset> {
    let stream = load_file(path, options)?;
    let ir = IrBuilder::from_stream(&stream).build(&stream);
    let dataset = from_ir(&pattern_name(path, ""), &ir, source);
    info!(file = %path.display(), sequences = dataset.len(), notes = dataset.total_notes(),
        "built dataset from YM2413 gates");
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::rom_patch;
    use approx::assert_relative_eq;

    fn vgm(commands: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 0x40];
        data[0..4].copy_from_slice(b"Vgm ");
        data[0x08..0x0C].copy_from_slice(&0x0000_0151u32.to_le_bytes());
        data[0x10..0x14].copy_from_slice(&3_579_545u32.to_le_bytes());
        data[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
        data.extend_from_slice(commands);
        data.push(0x66);
        data
    }

    #[test]
    fn test_gates_become_notes() {
        let data = vgm(&[
            0x51, 0x30, 0x70, // ch0 trumpet (7), volume 0
            0x51, 0x10, 0xAC, //
            0x51, 0x20, 0x18, // key on, block 4
            0x61, 0x44, 0xAC, // wait 44100
            0x51, 0x20, 0x08, // key off
            0x62, //
            0x51, 0x20, 0x18, // key on at 44835
            0x61, 0x44, 0xAC, //
        ]);
        let stream = crate::vgm_parser::decode(&data, &DecodeOptions::default()).unwrap();
        let ir = IrBuilder::from_stream(&stream).build(&stream);
        let ds = from_ir("song", &ir, PatchSource::Detect);
        assert_eq!(ds.len(), 1);
        let seq = ds.get(&SequenceKey::new("song", 0)).unwrap();
        assert_eq!(seq.patch, rom_patch(7).unwrap());
        assert_eq!(seq.notes.len(), 2);
        assert_eq!(seq.notes[0].fnum, 0xAC);
        assert_eq!(seq.notes[0].block, 4);
        assert_relative_eq!(seq.notes[0].ioi, 44_835.0 / 44_100.0);
        assert_relative_eq!(seq.notes[1].ioi, 1.0);
    }

    #[test]
    fn test_user_patch_from_events() {
        let data = vgm(&[
            0x51, 0x05, 0xF3, //
            0x51, 0x07, 0x24, //
            0x51, 0x01, 0x10, //
            0x51, 0x20, 0x10, //
            0x62,
        ]);
        let stream = crate::vgm_parser::decode(&data, &DecodeOptions::default()).unwrap();
        let ir = IrBuilder::from_stream(&stream).build(&stream);
        let ds = from_ir("u", &ir, PatchSource::Detect);
        let seq = ds.iter().next().unwrap().1;
        assert_eq!((seq.patch.ar, seq.patch.dr, seq.patch.sl, seq.patch.rr), (15, 3, 2, 4));
        assert!(seq.patch.ksr);
    }
}
