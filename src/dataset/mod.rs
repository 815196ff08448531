//! Note sequence datasets
//!
//! A dataset maps a (pattern, channel) key to the carrier patch and the
//! ordered note list of that channel. Loaders exist for a JSON manifest, a
//! pair of CSV manifests, a per-channel durations CSV, a register timeline
//! CSV and, with the `decoder` feature, the YM2413 gates of a decoded VGM.
//!
//! Missing required fields or columns are fatal schema errors naming the
//! file. Rows or notes that fail to parse are skipped with a warning.

pub mod manifest;
pub mod tables;
pub mod timeline_csv;

#[cfg(feature = "decoder")]
pub mod from_ir;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::envelope::{rom_patch, NoteContext, PatchParams};
use crate::{Result, VgmGateError};

/// Key of one note sequence
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceKey {
    /// Pattern (song or excerpt) name
    pub pattern: String,
    /// Channel number
    pub channel: u8,
}

impl SequenceKey {
    /// New key
    pub fn new(pattern: impl Into<String>, channel: u8) -> Self {
        SequenceKey {
            pattern: pattern.into(),
            channel,
        }
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pattern, self.channel)
    }
}

/// Patch and notes of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Carrier patch
    pub patch: PatchParams,
    /// Notes ordered by onset
    pub notes: Vec<NoteContext>,
}

impl Sequence {
    /// Sequence with notes sorted by onset (stable)
    pub fn new(patch: PatchParams, mut notes: Vec<NoteContext>) -> Self {
        notes.sort_by(|a, b| a.t_on.total_cmp(&b.t_on));
        Sequence { patch, notes }
    }

    /// Number of note-to-note transitions
    pub fn transitions(&self) -> usize {
        self.notes.len().saturating_sub(1)
    }
}

/// Where a loader takes the patch from when the input carries none
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatchSource {
    /// Use this patch for every sequence
    Fixed(PatchParams),
    /// Use a ROM instrument (1-15)
    Instrument(u8),
    /// Use the instrument active at the sequence's first onset
    Detect,
}

impl PatchSource {
    /// Resolve a ROM instrument number, falling back to the default patch
    pub fn resolve(&self, active_instrument: Option<u8>) -> PatchParams {
        match *self {
            PatchSource::Fixed(patch) => patch,
            PatchSource::Instrument(inst) => rom_patch(inst).unwrap_or_default(),
            PatchSource::Detect => active_instrument
                .and_then(rom_patch)
                .unwrap_or_default(),
        }
    }
}

/// Ordered collection of note sequences
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    sequences: BTreeMap<SequenceKey, Sequence>,
}

impl Dataset {
    /// Empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a sequence
    pub fn insert(&mut self, key: SequenceKey, sequence: Sequence) {
        self.sequences.insert(key, sequence);
    }

    /// Sequence for a key
    pub fn get(&self, key: &SequenceKey) -> Option<&Sequence> {
        self.sequences.get(key)
    }

    /// Number of sequences
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// True when no sequence was loaded
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Sequences in key order
    pub fn iter(&self) -> impl Iterator<Item = (&SequenceKey, &Sequence)> {
        self.sequences.iter()
    }

    /// Total notes across all sequences
    pub fn total_notes(&self) -> usize {
        self.sequences.values().map(|s| s.notes.len()).sum()
    }

    /// Merge another dataset into this one; later keys win
    pub fn extend(&mut self, other: Dataset) {
        self.sequences.extend(other.sequences);
    }

    /// Load a JSON manifest
    pub fn from_manifest(path: &Path) -> Result<Self> {
        manifest::load(path)
    }

    /// Load the patches and notes CSV manifests
    pub fn from_csv(patches: &Path, notes: &Path) -> Result<Self> {
        tables::load_manifests(patches, notes)
    }

    /// Load a per-channel durations CSV
    pub fn from_durations_csv(path: &Path, patch: PatchSource) -> Result<Self> {
        tables::load_durations(path, patch)
    }

    /// Load a YM2413 register timeline CSV
    pub fn from_timeline_csv(path: &Path, patch: PatchSource) -> Result<Self> {
        timeline_csv::load(path, patch)
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = (&'a SequenceKey, &'a Sequence);
    type IntoIter = std::collections::btree_map::Iter<'a, SequenceKey, Sequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}

/// Pattern name from a file stem, minus a known suffix
pub(crate) fn pattern_name(path: &Path, suffix: &str) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_suffix(suffix).unwrap_or(&stem).to_string()
}

/// Integer cell: decimal, `0x` hex, or a float with no fraction
pub(crate) fn parse_int(cell: &str) -> Option<i64> {
    let s = cell.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = s.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
}

/// Float cell
pub(crate) fn parse_float(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Index of the first header matching any alias
pub(crate) fn find_column(headers: &csv::StringRecord, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(alias))
    })
}

/// Like [`find_column`] but a missing column is a schema error
pub(crate) fn require_column(
    headers: &csv::StringRecord,
    aliases: &[&str],
    file: &Path,
) -> Result<usize> {
    find_column(headers, aliases).ok_or_else(|| {
        VgmGateError::schema(
            file,
            format!("missing required column '{}'", aliases.join("' / '")),
        )
    })
}

/// Open a headered CSV with trimmed cells
pub(crate) fn open_csv(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?)
}

/// Validate a note's codes and timing
pub(crate) fn checked_note(fnum: i64, blk: i64, t_on: f64, ioi: f64) -> Option<NoteContext> {
    if !(0..=0x3FF).contains(&fnum) || !(0..=7).contains(&blk) || t_on < 0.0 || ioi < 0.0 {
        return None;
    }
    Some(NoteContext {
        fnum: fnum as u16,
        block: blk as u8,
        t_on,
        ioi,
    })
}

/// Validate patch codes
pub(crate) fn checked_patch(ar: i64, dr: i64, sl: i64, rr: i64, ksr: bool) -> Option<PatchParams> {
    let code = |v: i64| u8::try_from(v).ok().filter(|c| *c <= 15);
    Some(PatchParams {
        ar: code(ar)?,
        dr: code(dr)?,
        sl: code(sl)?,
        rr: code(rr)?,
        ksr,
    })
}

/// Parse a boolean-ish cell (`1`, `true`, `yes`, `on`)
pub(crate) fn parse_flag(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int(" 0x2A "), Some(42));
        assert_eq!(parse_int("3.0"), Some(3));
        assert_eq!(parse_int("3.5"), None);
        assert_eq!(parse_int("abc"), None);
    }

    #[test]
    fn test_pattern_name_strips_suffix() {
        assert_eq!(
            pattern_name(Path::new("out/song_durations.csv"), "_durations"),
            "song"
        );
        assert_eq!(pattern_name(Path::new("song.csv"), "_durations"), "song");
    }

    #[test]
    fn test_sequence_sorted_by_onset() {
        let n = |t_on| NoteContext {
            fnum: 1,
            block: 1,
            t_on,
            ioi: 0.1,
        };
        let seq = Sequence::new(PatchParams::default(), vec![n(0.3), n(0.1), n(0.2)]);
        let onsets: Vec<f64> = seq.notes.iter().map(|n| n.t_on).collect();
        assert_eq!(onsets, vec![0.1, 0.2, 0.3]);
        assert_eq!(seq.transitions(), 2);
    }

    #[test]
    fn test_dataset_order_is_by_key() {
        let mut ds = Dataset::new();
        let seq = Sequence::new(PatchParams::default(), Vec::new());
        ds.insert(SequenceKey::new("b", 0), seq.clone());
        ds.insert(SequenceKey::new("a", 3), seq.clone());
        ds.insert(SequenceKey::new("a", 1), seq);
        let keys: Vec<String> = ds.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["a:1", "a:3", "b:0"]);
    }

    #[test]
    fn test_patch_source_resolve() {
        let fixed = PatchParams {
            ar: 1,
            ..PatchParams::default()
        };
        assert_eq!(PatchSource::Fixed(fixed).resolve(Some(3)), fixed);
        assert_eq!(PatchSource::Detect.resolve(Some(3)), rom_patch(3).unwrap());
        assert_eq!(PatchSource::Detect.resolve(Some(0)), PatchParams::default());
        assert_eq!(PatchSource::Instrument(2).resolve(None), rom_patch(2).unwrap());
    }
}
