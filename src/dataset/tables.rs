//! CSV manifest loaders
//!
//! - patches CSV: `pattern, channel, ar, dr, sl, rr[, ksr]`
//! - notes CSV: `pattern, channel, fnum, blk, t_on[, ioi]`
//! - durations CSV: `ch, t_on_s, blk_on, fnum_on[, interval_to_next_on_s]`,
//!   one file per pattern

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use super::{
    checked_note, checked_patch, find_column, open_csv, parse_flag, parse_float, parse_int,
    pattern_name, require_column, Dataset, PatchSource, Sequence, SequenceKey,
};
use crate::envelope::{NoteContext, PatchParams};
use crate::Result;

/// IOI assumed for a durations row without a next onset
pub const FALLBACK_IOI_S: f64 = 0.25;

fn row_line(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn load_patches(path: &Path) -> Result<BTreeMap<SequenceKey, PatchParams>> {
    let mut reader = open_csv(path)?;
    let headers = reader.headers()?.clone();
    let c_pattern = require_column(&headers, &["pattern"], path)?;
    let c_channel = require_column(&headers, &["channel", "ch"], path)?;
    let c_ar = require_column(&headers, &["ar"], path)?;
    let c_dr = require_column(&headers, &["dr"], path)?;
    let c_sl = require_column(&headers, &["sl"], path)?;
    let c_rr = require_column(&headers, &["rr"], path)?;
    let c_ksr = find_column(&headers, &["ksr"]);

    let mut patches = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let parsed = (|| {
            let channel = u8::try_from(parse_int(field(c_channel))?).ok()?;
            let ksr = match c_ksr.map(field).filter(|s| !s.is_empty()) {
                Some(cell) => parse_flag(cell)?,
                None => true,
            };
            let patch = checked_patch(
                parse_int(field(c_ar))?,
                parse_int(field(c_dr))?,
                parse_int(field(c_sl))?,
                parse_int(field(c_rr))?,
                ksr,
            )?;
            Some((SequenceKey::new(field(c_pattern), channel), patch))
        })();
        match parsed {
            Some((key, patch)) => {
                patches.insert(key, patch);
            }
            None => warn!(file = %path.display(), line = row_line(&record),
                "skipping malformed patch row"),
        }
    }
    Ok(patches)
}

/// Load the patches and notes CSV manifests
pub fn load_manifests(patches_path: &Path, notes_path: &Path) -> Result<Dataset> {
    let patches = load_patches(patches_path)?;

    let mut reader = open_csv(notes_path)?;
    let headers = reader.headers()?.clone();
    let c_pattern = require_column(&headers, &["pattern"], notes_path)?;
    let c_channel = require_column(&headers, &["channel", "ch"], notes_path)?;
    let c_fnum = require_column(&headers, &["fnum"], notes_path)?;
    let c_blk = require_column(&headers, &["blk", "block"], notes_path)?;
    let c_t_on = require_column(&headers, &["t_on"], notes_path)?;
    let c_ioi = find_column(&headers, &["ioi"]);

    // Empty IOIs are filled from the next onset once every row is read
    let mut grouped: BTreeMap<SequenceKey, Vec<(NoteContext, bool)>> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let parsed = (|| {
            let channel = u8::try_from(parse_int(field(c_channel))?).ok()?;
            let ioi_cell = c_ioi.map(field).unwrap_or("");
            let (ioi, explicit) = if ioi_cell.is_empty() {
                (0.0, false)
            } else {
                (parse_float(ioi_cell)?, true)
            };
            let note = checked_note(
                parse_int(field(c_fnum))?,
                parse_int(field(c_blk))?,
                parse_float(field(c_t_on))?,
                ioi,
            )?;
            Some((SequenceKey::new(field(c_pattern), channel), note, explicit))
        })();
        match parsed {
            Some((key, note, explicit)) => grouped.entry(key).or_default().push((note, explicit)),
            None => warn!(file = %notes_path.display(), line = row_line(&record),
                "skipping malformed note row"),
        }
    }

    let mut dataset = Dataset::new();
    for (key, mut rows) in grouped {
        let Some(patch) = patches.get(&key) else {
            warn!(file = %notes_path.display(), sequence = %key, notes = rows.len(),
                "skipping notes without a patch row");
            continue;
        };
        rows.sort_by(|a, b| a.0.t_on.total_cmp(&b.0.t_on));
        let onsets: Vec<f64> = rows.iter().map(|(n, _)| n.t_on).collect();
        let notes = rows
            .into_iter()
            .enumerate()
            .map(|(i, (mut note, explicit))| {
                if !explicit {
                    note.ioi = onsets.get(i + 1).map_or(0.0, |next| (next - note.t_on).max(0.0));
                }
                note
            })
            .collect();
        dataset.insert(key, Sequence::new(*patch, notes));
    }
    Ok(dataset)
}

/// Load a durations CSV; the pattern is the file stem without `_durations`
pub fn load_durations(path: &Path, patch: PatchSource) -> Result<Dataset> {
    let mut reader = open_csv(path)?;
    let headers = reader.headers()?.clone();
    let c_ch = require_column(&headers, &["ch", "channel"], path)?;
    let c_t_on = require_column(&headers, &["t_on_s", "t_on"], path)?;
    let c_blk = require_column(&headers, &["blk_on", "blk"], path)?;
    let c_fnum = require_column(&headers, &["fnum_on", "fnum"], path)?;
    let c_ioi = find_column(&headers, &["interval_to_next_on_s", "ioi"]);
    let c_inst = find_column(&headers, &["inst_on", "inst"]);

    let mut channels: BTreeMap<u8, (Vec<NoteContext>, Option<u8>)> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let parsed = (|| {
            let channel = u8::try_from(parse_int(field(c_ch))?).ok()?;
            let ioi = match c_ioi.map(field).filter(|s| !s.is_empty()) {
                Some(cell) => parse_float(cell)?,
                None => FALLBACK_IOI_S,
            };
            let note = checked_note(
                parse_int(field(c_fnum))?,
                parse_int(field(c_blk))?,
                parse_float(field(c_t_on))?,
                ioi,
            )?;
            let inst = c_inst
                .and_then(|i| parse_int(field(i)))
                .and_then(|v| u8::try_from(v).ok());
            Some((channel, note, inst))
        })();
        match parsed {
            Some((channel, note, inst)) => {
                let entry = channels.entry(channel).or_default();
                entry.0.push(note);
                entry.1 = entry.1.or(inst);
            }
            None => warn!(file = %path.display(), line = row_line(&record),
                "skipping malformed durations row"),
        }
    }

    let pattern = pattern_name(path, "_durations");
    let mut dataset = Dataset::new();
    for (channel, (notes, inst)) in channels {
        dataset.insert(
            SequenceKey::new(pattern.clone(), channel),
            Sequence::new(patch.resolve(inst), notes),
        );
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::rom_patch;
    use crate::VgmGateError;
    use approx::assert_relative_eq;
    use std::fs;

    #[test]
    fn test_manifest_pair() {
        let dir = tempfile::tempdir().unwrap();
        let patches = dir.path().join("patches.csv");
        let notes = dir.path().join("notes.csv");
        fs::write(
            &patches,
            "pattern,channel,ar,dr,sl,rr,ksr\n\
             song,0,15,4,4,7,0\n\
             song,1,15,4,x,7,1\n\
             song,2,12,2,3,6,\n",
        )
        .unwrap();
        fs::write(
            &notes,
            "pattern,channel,fnum,blk,t_on,ioi\n\
             song,0,172,4,0.5,\n\
             song,0,172,4,0.0,0.5\n\
             song,0,200,4,1.25,\n\
             song,0,oops,4,2.0,\n\
             song,1,172,4,0.0,0.5\n\
             song,2,172,4,0.0,0.4\n",
        )
        .unwrap();

        let ds = load_manifests(&patches, &notes).unwrap();
        // channel 1 has no valid patch row
        assert_eq!(ds.len(), 2);
        let seq = ds.get(&SequenceKey::new("song", 0)).unwrap();
        assert!(!seq.patch.ksr);
        assert_eq!(seq.notes.len(), 3);
        assert_relative_eq!(seq.notes[0].ioi, 0.5);
        assert_relative_eq!(seq.notes[1].ioi, 0.75);
        assert_eq!(seq.notes[2].ioi, 0.0);
        assert!(ds.get(&SequenceKey::new("song", 2)).unwrap().patch.ksr);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let patches = dir.path().join("patches.csv");
        let notes = dir.path().join("notes.csv");
        fs::write(&patches, "pattern,channel,ar,dr,rr\nsong,0,15,4,7\n").unwrap();
        fs::write(&notes, "pattern,channel,fnum,blk,t_on\n").unwrap();
        let err = load_manifests(&patches, &notes).unwrap_err();
        assert!(matches!(err, VgmGateError::Schema { .. }));
        let msg = err.to_string();
        assert!(msg.contains("'sl'"));
        assert!(msg.contains("patches.csv"));
    }

    #[test]
    fn test_durations_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage1_durations.csv");
        fs::write(
            &path,
            "ch,t_on_s,interval_to_next_on_s,blk_on,fnum_on\n\
             3,0.0,0.5,4,172\n\
             3,0.5,,4,181\n\
             4,bad,0.5,4,172\n",
        )
        .unwrap();
        let ds = load_durations(&path, PatchSource::Instrument(2)).unwrap();
        assert_eq!(ds.len(), 1);
        let (key, seq) = ds.iter().next().unwrap();
        assert_eq!(key.pattern, "stage1");
        assert_eq!(key.channel, 3);
        assert_eq!(seq.patch, rom_patch(2).unwrap());
        assert_eq!(seq.notes[1].ioi, FALLBACK_IOI_S);
    }
}
