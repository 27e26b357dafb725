//! Calibration notes carried from one prediction to the next.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::models::{BatchInstructions, ReflectTraceUnit};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBook {
    #[serde(default)]
    pub drug: BTreeMap<String, String>,
    #[serde(default)]
    pub cell_line: BTreeMap<String, String>,
    #[serde(default)]
    pub general: Vec<String>,
}

impl CalibrationBook {
    /// Load from `path`; a missing file is an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Ok(Self::default()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically via a temp file in the same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn drug_notes(&self, drug: &str) -> Option<&str> {
        self.drug.get(drug).map(String::as_str)
    }

    pub fn cell_line_notes(&self, cell_line: &str) -> Option<&str> {
        self.cell_line.get(cell_line).map(String::as_str)
    }

    /// Replace the drug and cell line notes, and add new general notes.
    pub fn apply(&mut self, drug: &str, cell_line: &str, reflection: &ReflectTraceUnit) {
        set_note(&mut self.drug, drug, &reflection.drug_specific_calibration);
        set_note(
            &mut self.cell_line,
            cell_line,
            &reflection.cell_line_specific_calibration,
        );
        for note in &reflection.general_notes {
            let note = note.trim();
            if !note.is_empty() && !self.general.iter().any(|g| g == note) {
                self.general.push(note.to_string());
            }
        }
    }

    pub fn apply_batch(&mut self, drug: &str, cell_line: &str, instructions: &BatchInstructions) {
        set_note(&mut self.drug, drug, &instructions.drug_instructions);
        set_note(&mut self.cell_line, cell_line, &instructions.cell_line_instructions);
    }

    /// Context for the next prediction on `drug` and `cell_line`, if any notes apply.
    pub fn context_for(&self, drug: &str, cell_line: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(notes) = self.drug_notes(drug) {
            parts.push(format!("Calibration notes for {}:\n{}", drug, notes));
        }
        if let Some(notes) = self.cell_line_notes(cell_line) {
            parts.push(format!("Calibration notes for {}:\n{}", cell_line, notes));
        }
        if !self.general.is_empty() {
            let lines: Vec<String> = self.general.iter().map(|n| format!("- {}", n)).collect();
            parts.push(format!("General notes:\n{}", lines.join("\n")));
        }
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }
}

fn set_note(map: &mut BTreeMap<String, String>, key: &str, note: &str) {
    let note = note.trim();
    if !note.is_empty() {
        map.insert(key.to_string(), note.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reflection(drug: &str, general: &[&str]) -> ReflectTraceUnit {
        ReflectTraceUnit {
            verdict: "v".into(),
            drug_specific_calibration: drug.into(),
            cell_line_specific_calibration: "K562 is BCR-ABL positive".into(),
            task_specific_calibration: "t".into(),
            general_notes: general.iter().map(|s| s.to_string()).collect(),
            trajectory: None,
        }
    }

    #[test]
    fn test_apply_overwrites_and_dedups() {
        let mut book = CalibrationBook::default();
        book.apply("imatinib", "K562", &reflection("first", &["note a", "note b"]));
        book.apply("imatinib", "K562", &reflection("second", &["note b", " note c "]));

        assert_eq!(book.drug_notes("imatinib"), Some("second"));
        assert_eq!(book.cell_line_notes("K562"), Some("K562 is BCR-ABL positive"));
        assert_eq!(book.general, vec!["note a", "note b", "note c"]);
    }

    #[test]
    fn test_blank_notes_do_not_erase() {
        let mut book = CalibrationBook::default();
        book.apply("imatinib", "K562", &reflection("keep me", &[]));
        book.apply("imatinib", "K562", &reflection("  ", &[]));
        assert_eq!(book.drug_notes("imatinib"), Some("keep me"));
    }

    #[test]
    fn test_apply_batch() {
        let mut book = CalibrationBook::default();
        book.apply_batch(
            "imatinib",
            "K562",
            &BatchInstructions {
                drug_instructions: "potent in fusion-driven lines".into(),
                cell_line_instructions: "sensitive to ABL inhibitors".into(),
            },
        );
        assert_eq!(book.cell_line_notes("K562"), Some("sensitive to ABL inhibitors"));
    }

    #[test]
    fn test_context_for() {
        let mut book = CalibrationBook::default();
        assert_eq!(book.context_for("imatinib", "K562"), None);

        book.apply("imatinib", "K562", &reflection("potent", &["check fusions"]));
        let ctx = book.context_for("imatinib", "A549").unwrap();
        assert!(ctx.contains("Calibration notes for imatinib:\npotent"));
        assert!(!ctx.contains("A549"));
        assert!(ctx.contains("General notes:\n- check fusions"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes/book.json");
        assert_eq!(CalibrationBook::load(&path).unwrap(), CalibrationBook::default());

        let mut book = CalibrationBook::default();
        book.apply("imatinib", "K562", &reflection("potent", &["g"]));
        book.save(&path).unwrap();
        assert_eq!(CalibrationBook::load(&path).unwrap(), book);
    }
}
