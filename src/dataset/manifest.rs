//! JSON manifest loader
//!
//! ```json
//! {"patterns": [{"pattern": "intro", "channel": 0,
//!   "patch": {"ar": 15, "dr": 4, "sl": 4, "rr": 7, "ksr": true},
//!   "notes": [{"fnum": 172, "blk": 4, "t_on": 0.0, "ioi": 0.25}]}]}
//! ```
//!
//! `ksr` defaults to on when absent.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::{checked_note, checked_patch, Dataset, Sequence, SequenceKey};
use crate::{Result, VgmGateError};

#[derive(Debug, Deserialize)]
struct RawManifest {
    patterns: Vec<RawPattern>,
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    pattern: String,
    channel: i64,
    patch: RawPatch,
    notes: Vec<RawNote>,
}

#[derive(Debug, Deserialize)]
struct RawPatch {
    ar: i64,
    dr: i64,
    sl: i64,
    rr: i64,
    ksr: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawNote {
    fnum: i64,
    blk: i64,
    t_on: f64,
    ioi: f64,
}

/// Load a manifest file
pub fn load(path: &Path) -> Result<Dataset> {
    let text = std::fs::read_to_string(path)?;
    parse(&text, path)
}

/// Parse manifest text; `source` names the file in errors and warnings
pub fn parse(text: &str, source: &Path) -> Result<Dataset> {
    let raw: RawManifest =
        serde_json::from_str(text).map_err(|e| VgmGateError::schema(source, e.to_string()))?;

    let mut dataset = Dataset::new();
    for entry in raw.patterns {
        let Ok(channel) = u8::try_from(entry.channel) else {
            warn!(file = %source.display(), pattern = %entry.pattern, channel = entry.channel,
                "skipping pattern with invalid channel");
            continue;
        };
        let p = &entry.patch;
        let Some(patch) = checked_patch(p.ar, p.dr, p.sl, p.rr, p.ksr.unwrap_or(true)) else {
            warn!(file = %source.display(), pattern = %entry.pattern, channel,
                "skipping pattern with out-of-range patch codes");
            continue;
        };

        let total = entry.notes.len();
        let notes: Vec<_> = entry
            .notes
            .iter()
            .filter_map(|n| checked_note(n.fnum, n.blk, n.t_on, n.ioi))
            .collect();
        if notes.len() < total {
            warn!(file = %source.display(), pattern = %entry.pattern, channel,
                skipped = total - notes.len(), "skipped out-of-range notes");
        }
        dataset.insert(
            SequenceKey::new(entry.pattern, channel),
            Sequence::new(patch, notes),
        );
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "patterns": [
            {"pattern": "intro", "channel": 1,
             "patch": {"ar": 15, "dr": 4, "sl": 4, "rr": 7},
             "notes": [
                {"fnum": 172, "blk": 4, "t_on": 0.0, "ioi": 0.25},
                {"fnum": 172, "blk": 9, "t_on": 0.25, "ioi": 0.25},
                {"fnum": 200, "blk": 4, "t_on": 0.5, "ioi": 0.25}
             ]},
            {"pattern": "intro", "channel": 0,
             "patch": {"ar": 12, "dr": 3, "sl": 2, "rr": 5, "ksr": false},
             "notes": []}
        ]
    }"#;

    #[test]
    fn test_parse_manifest() {
        let ds = parse(MANIFEST, Path::new("patterns.json")).unwrap();
        assert_eq!(ds.len(), 2);
        let seq = ds.get(&SequenceKey::new("intro", 1)).unwrap();
        assert!(seq.patch.ksr);
        // blk 9 is out of range
        assert_eq!(seq.notes.len(), 2);
        assert_eq!(seq.notes[1].fnum, 200);
        let first = ds.iter().next().unwrap();
        assert_eq!(first.0.channel, 0);
        assert!(!first.1.patch.ksr);
    }

    #[test]
    fn test_missing_field_names_field_and_file() {
        let text = r#"{"patterns": [{"pattern": "x", "channel": 0,
            "patch": {"ar": 1, "dr": 1, "rr": 1}, "notes": []}]}"#;
        let err = parse(text, Path::new("broken.json")).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, VgmGateError::Schema { .. }));
        assert!(msg.contains("broken.json"));
        assert!(msg.contains("`sl`"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let ds = load(&path).unwrap();
        assert_eq!(ds.total_notes(), 2);
    }
}
