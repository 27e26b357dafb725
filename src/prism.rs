//! DepMap PRISM secondary screen wrangling and task loading.
//!
//! The secondary repurposing release ships two screens, HTS002 and MTS010,
//! with overlapping drug/cell line combinations. Each screen is deduplicated
//! on `(smiles, depmap_id, ccle_name)` first, preferring the best curve fit,
//! then the screens are merged with MTS010 taking precedence.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::DataConfig;
use crate::error::{Error, Result};

pub const SCREEN_MTS010: &str = "MTS010";
pub const SCREEN_HTS002: &str = "HTS002";
pub const DEDUP_SEED: u64 = 42;

/// PRISM reports IC50 in micromolar.
pub const PRISM_UNIT: &str = "uM";

/// One row of the cell line metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellLineInfo {
    #[serde(default, deserialize_with = "text")]
    pub depmap_id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub ccle_name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub primary_tissue: Option<String>,
}

/// One fitted dose-response curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResponse {
    #[serde(default, deserialize_with = "text")]
    pub broad_id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub depmap_id: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub ccle_name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub screen_id: Option<String>,
    #[serde(default, deserialize_with = "number")]
    pub ic50: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub ec50: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub auc: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub r2: Option<f64>,
    #[serde(default, deserialize_with = "text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub moa: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub target: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub smiles: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub convergence: Option<String>,
}

impl DoseResponse {
    fn converged(&self) -> bool {
        matches!(
            self.convergence.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("true") | Some("1")
        )
    }

    fn combo_key(&self) -> Option<(String, String, String)> {
        Some((
            self.smiles.clone()?,
            self.depmap_id.clone()?,
            self.ccle_name.clone()?,
        ))
    }
}

/// Deduplicated row of the processed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismRecord {
    pub name: Option<String>,
    pub smiles: String,
    pub broad_id: Option<String>,
    pub depmap_id: String,
    pub ccle_name: String,
    pub screen_id: String,
    pub ic50: f64,
    pub ec50: Option<f64>,
    pub auc: Option<f64>,
    pub r2: Option<f64>,
    pub moa: Option<String>,
    pub target: Option<String>,
    pub primary_tissue: Option<String>,
}

/// Dose-response table plus whether it carried a `convergence` column.
#[derive(Debug, Clone, Default)]
pub struct DoseResponseTable {
    pub rows: Vec<DoseResponse>,
    pub has_convergence: bool,
}

/// Row counts of one wrangling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WrangleReport {
    pub input_rows: usize,
    pub mts010_rows: usize,
    pub mts010_kept: usize,
    pub hts002_rows: usize,
    pub hts002_kept: usize,
    pub combined: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TissueCount {
    pub primary_tissue: String,
    pub ccle_name: String,
    pub count: usize,
}

/// One drug/cell line pair to predict, with its measured IC50.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrismTask {
    pub drug: String,
    pub cell_line: String,
    #[serde(default)]
    pub smiles: Option<String>,
    #[serde(default)]
    pub depmap_id: Option<String>,
    #[serde(default)]
    pub screen_id: Option<String>,
    #[serde(default)]
    pub primary_tissue: Option<String>,
    /// Measured IC50 in `output_unit`, when known
    #[serde(default)]
    pub ic50_true: Option<f64>,
    pub output_unit: String,
    /// Overrides the generated description
    #[serde(default)]
    pub description: Option<String>,
}

impl PrismTask {
    pub fn new(
        drug: impl Into<String>,
        cell_line: impl Into<String>,
        ic50_true: f64,
        output_unit: impl Into<String>,
    ) -> Self {
        Self {
            drug: drug.into(),
            cell_line: cell_line.into(),
            smiles: None,
            depmap_id: None,
            screen_id: None,
            primary_tissue: None,
            ic50_true: Some(ic50_true),
            output_unit: output_unit.into(),
            description: None,
        }
    }

    /// A pair without a measurement, e.g. for a one-off prediction.
    pub fn unmeasured(
        drug: impl Into<String>,
        cell_line: impl Into<String>,
        output_unit: impl Into<String>,
    ) -> Self {
        Self {
            ic50_true: None,
            ..Self::new(drug, cell_line, f64::NAN, output_unit)
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// `(drug, cell_line)`
    pub fn key(&self) -> (String, String) {
        (self.drug.clone(), self.cell_line.clone())
    }

    pub fn experimental_description(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        let mut parts = vec![format!(
            "DepMap PRISM secondary repurposing screen{}: cell viability IC50 of {} in {}",
            self.screen_id
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default(),
            self.drug,
            self.cell_line
        )];
        if let Some(tissue) = &self.primary_tissue {
            parts.push(format!("primary tissue: {}", tissue));
        }
        if let Some(smiles) = &self.smiles {
            parts.push(format!("SMILES: {}", smiles));
        }
        parts.join("; ")
    }
}

fn text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !is_missing(s)))
}

fn number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw
        .filter(|s| !is_missing(s))
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite()))
}

fn is_missing(s: &str) -> bool {
    matches!(s.trim(), "" | "NA" | "NaN" | "nan" | "None")
}

pub fn load_cell_line_info(path: &Path) -> Result<Vec<CellLineInfo>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<CellLineInfo>, _>>()?;
    info!(path = %path.display(), rows = rows.len(), "loaded cell line info");
    Ok(rows)
}

pub fn load_dose_response(path: &Path) -> Result<DoseResponseTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let has_convergence = reader.headers()?.iter().any(|h| h == "convergence");
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<DoseResponse>, _>>()?;
    info!(path = %path.display(), rows = rows.len(), has_convergence, "loaded dose response");
    Ok(DoseResponseTable {
        rows,
        has_convergence,
    })
}

/// One row per `(smiles, depmap_id, ccle_name)`: highest r² when any row of
/// the group has one, otherwise a seeded random pick.
fn dedup_screen(rows: Vec<DoseResponse>, rng: &mut StdRng) -> Vec<DoseResponse> {
    let mut groups: BTreeMap<(String, String, String), Vec<DoseResponse>> = BTreeMap::new();
    for row in rows {
        if let Some(key) = row.combo_key() {
            groups.entry(key).or_default().push(row);
        }
    }

    let mut kept = Vec::with_capacity(groups.len());
    for (_, mut group) in groups {
        let best_fit = group
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.r2.map(|r2| (i, r2)))
            // first maximum wins on ties
            .fold(None, |best: Option<(usize, f64)>, (i, r2)| match best {
                Some((_, b)) if b >= r2 => best,
                _ => Some((i, r2)),
            })
            .map(|(i, _)| i);

        let pick = match best_fit {
            Some(i) => i,
            None => {
                let indices: Vec<usize> = (0..group.len()).collect();
                match indices.choose(rng) {
                    Some(i) => *i,
                    None => continue,
                }
            }
        };
        kept.push(group.swap_remove(pick));
    }
    kept
}

/// Deduplicate and merge the two screens, attaching `primary_tissue`.
pub fn wrangle(
    dose: DoseResponseTable,
    cells: &[CellLineInfo],
) -> (Vec<PrismRecord>, WrangleReport) {
    let mut report = WrangleReport {
        input_rows: dose.rows.len(),
        ..Default::default()
    };
    let has_convergence = dose.has_convergence;

    let mut mts = Vec::new();
    let mut hts = Vec::new();
    for mut row in dose.rows {
        if row.ic50.is_none() || (has_convergence && !row.converged()) {
            continue;
        }
        row.smiles = row
            .smiles
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if row.combo_key().is_none() {
            continue;
        }
        match row.screen_id.as_deref() {
            Some(SCREEN_MTS010) => mts.push(row),
            Some(SCREEN_HTS002) => hts.push(row),
            _ => {}
        }
    }

    let mut rng = StdRng::seed_from_u64(DEDUP_SEED);
    report.mts010_rows = mts.len();
    let mts = dedup_screen(mts, &mut rng);
    report.mts010_kept = mts.len();
    report.hts002_rows = hts.len();
    let hts = dedup_screen(hts, &mut rng);
    report.hts002_kept = hts.len();
    info!(
        mts010_rows = report.mts010_rows,
        mts010_kept = report.mts010_kept,
        hts002_rows = report.hts002_rows,
        hts002_kept = report.hts002_kept,
        "deduplicated screens"
    );

    let mut tissues: HashMap<(String, String), Option<String>> = HashMap::new();
    for cell in cells {
        if let (Some(depmap_id), Some(ccle_name)) = (&cell.depmap_id, &cell.ccle_name) {
            tissues
                .entry((depmap_id.clone(), ccle_name.clone()))
                .or_insert_with(|| cell.primary_tissue.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut combined = Vec::new();
    for row in mts.into_iter().chain(hts) {
        let Some(key) = row.combo_key() else { continue };
        let Some(ic50) = row.ic50 else { continue };
        if !seen.insert(key.clone()) {
            continue;
        }
        let (smiles, depmap_id, ccle_name) = key;
        let primary_tissue = tissues
            .get(&(depmap_id.clone(), ccle_name.clone()))
            .cloned()
            .flatten();
        combined.push(PrismRecord {
            name: row.name,
            smiles,
            broad_id: row.broad_id,
            depmap_id,
            ccle_name,
            screen_id: row.screen_id.unwrap_or_default(),
            ic50,
            ec50: row.ec50,
            auc: row.auc,
            r2: row.r2,
            moa: row.moa,
            target: row.target,
            primary_tissue,
        });
    }
    report.combined = combined.len();
    (combined, report)
}

/// Fail when a `(ccle_name, name)` pair appears more than once.
///
/// Unnamed compounds are not paired with anything.
pub fn check_unique_pairs(records: &[PrismRecord]) -> Result<()> {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for r in records {
        let Some(name) = r.name.as_deref() else {
            continue;
        };
        *counts.entry((r.ccle_name.as_str(), name)).or_default() += 1;
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|((cell, drug), n)| format!("{} / {} ({})", cell, drug, n))
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(Error::Validation(format!(
        "Found {} duplicate (cell line, drug) pairs:\n{}",
        duplicates.len(),
        duplicates.join("\n")
    )))
}

/// Rows per `(primary_tissue, ccle_name)`; rows without a tissue are skipped.
pub fn tissue_summary(records: &[PrismRecord]) -> Vec<TissueCount> {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for r in records {
        if let Some(tissue) = r.primary_tissue.as_deref() {
            *counts.entry((tissue, r.ccle_name.as_str())).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|((tissue, cell), count)| TissueCount {
            primary_tissue: tissue.to_string(),
            ccle_name: cell.to_string(),
            count,
        })
        .collect()
}

pub fn write_processed(records: &[PrismRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = records.len(), "wrote processed PRISM table");
    Ok(())
}

/// Validate paths, wrangle, check and write the processed table.
pub fn run_pipeline(data: &DataConfig) -> Result<(PathBuf, WrangleReport)> {
    let (_, cell_path, dose_path) = data.validate()?;
    let cells = load_cell_line_info(&cell_path)?;
    let dose = load_dose_response(&dose_path)?;
    let (records, report) = wrangle(dose, &cells);
    check_unique_pairs(&records)?;
    for t in tissue_summary(&records).iter().take(20) {
        info!(tissue = %t.primary_tissue, cell_line = %t.ccle_name, count = t.count, "tissue summary");
    }
    write_processed(&records, &data.processed)?;
    Ok((data.processed.clone(), report))
}

/// Convert a micromolar value to `unit`.
pub fn convert_from_um(value: f64, unit: &str) -> Result<f64> {
    let factor = match unit {
        "pM" => 1e6,
        "nM" => 1e3,
        "uM" | "µM" | "μM" => 1.0,
        "mM" => 1e-3,
        "M" => 1e-6,
        other => {
            return Err(Error::InvalidArgument(format!(
                "unsupported concentration unit: {}",
                other
            )))
        }
    };
    Ok(value * factor)
}

/// Read the processed table as prediction tasks in `output_unit`.
///
/// Rows without a drug name or with a non-positive IC50 are skipped.
pub fn load_tasks(processed: &Path, output_unit: &str) -> Result<Vec<PrismTask>> {
    let mut reader = csv::Reader::from_path(processed)?;
    let mut tasks = Vec::new();
    let mut skipped = 0usize;
    for row in reader.deserialize::<PrismRecord>() {
        let row = row?;
        let Some(drug) = row.name.filter(|n| !n.trim().is_empty()) else {
            skipped += 1;
            continue;
        };
        if !(row.ic50 > 0.0) {
            skipped += 1;
            continue;
        }
        tasks.push(PrismTask {
            drug,
            cell_line: row.ccle_name,
            smiles: Some(row.smiles),
            depmap_id: Some(row.depmap_id),
            screen_id: Some(row.screen_id),
            primary_tissue: row.primary_tissue,
            ic50_true: Some(convert_from_um(row.ic50, output_unit)?),
            output_unit: output_unit.to_string(),
            description: None,
        });
    }
    info!(path = %processed.display(), tasks = tasks.len(), skipped, "loaded PRISM tasks");
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const DOSE_CSV: &str = "\
broad_id,depmap_id,ccle_name,screen_id,ic50,ec50,auc,r2,name,moa,target,smiles,convergence
BRD-1,ACH-1,K562_HAEMATOPOIETIC,HTS002,0.5,0.4,0.6,0.80,imatinib,BCR-ABL inhibitor,ABL1, CCN1 ,TRUE
BRD-2,ACH-1,K562_HAEMATOPOIETIC,HTS002,0.9,0.8,0.7,0.95,imatinib,BCR-ABL inhibitor,ABL1,CCN1,TRUE
BRD-3,ACH-1,K562_HAEMATOPOIETIC,MTS010,0.2,0.2,0.5,0.70,imatinib,BCR-ABL inhibitor,ABL1,CCN1,TRUE
BRD-4,ACH-2,A549_LUNG,HTS002,3.0,2.0,0.9,,gefitinib,EGFR inhibitor,EGFR,CCO,TRUE
BRD-5,ACH-2,A549_LUNG,HTS002,4.0,2.0,0.9,,gefitinib,EGFR inhibitor,EGFR,CCO,TRUE
BRD-6,ACH-2,A549_LUNG,MTS010,5.0,2.0,0.9,0.9,erlotinib,EGFR inhibitor,EGFR,CCC,FALSE
BRD-7,ACH-2,A549_LUNG,MTS006,1.0,1.0,0.9,0.9,afatinib,EGFR inhibitor,EGFR,CCCC,TRUE
BRD-8,ACH-2,A549_LUNG,MTS010,NA,1.0,0.9,0.9,osimertinib,EGFR inhibitor,EGFR,CCCCC,TRUE
BRD-9,,A549_LUNG,MTS010,1.0,1.0,0.9,0.9,lapatinib,EGFR inhibitor,EGFR,CCCCCC,TRUE
";

    const CELLS_CSV: &str = "\
depmap_id,ccle_name,primary_tissue
ACH-1,K562_HAEMATOPOIETIC,haematopoietic_and_lymphoid
ACH-1,K562_HAEMATOPOIETIC,blood
ACH-2,A549_LUNG,lung
";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn fixture() -> (Vec<PrismRecord>, WrangleReport) {
        let dir = tempdir().unwrap();
        let dose = load_dose_response(&write(dir.path(), "dose.csv", DOSE_CSV)).unwrap();
        let cells = load_cell_line_info(&write(dir.path(), "cells.csv", CELLS_CSV)).unwrap();
        wrangle(dose, &cells)
    }

    #[test]
    fn test_load_dose_response_detects_convergence() {
        let dir = tempdir().unwrap();
        let table = load_dose_response(&write(dir.path(), "dose.csv", DOSE_CSV)).unwrap();
        assert!(table.has_convergence);
        assert_eq!(table.rows.len(), 9);
        assert_eq!(table.rows[3].r2, None);
        assert_eq!(table.rows[7].ic50, None);
        assert_eq!(table.rows[8].depmap_id, None);
    }

    #[test]
    fn test_wrangle_prefers_mts010() {
        let (records, report) = fixture();
        let imatinib: Vec<_> = records
            .iter()
            .filter(|r| r.name.as_deref() == Some("imatinib"))
            .collect();
        assert_eq!(imatinib.len(), 1);
        assert_eq!(imatinib[0].screen_id, "MTS010");
        assert_eq!(imatinib[0].ic50, 0.2);
        // smiles were trimmed so HTS002 and MTS010 rows share a key
        assert_eq!(imatinib[0].smiles, "CCN1");
        assert_eq!(report.hts002_kept, 2);
        assert_eq!(report.combined, 2);
    }

    #[test]
    fn test_wrangle_filters_rows() {
        let (records, report) = fixture();
        let names: Vec<_> = records.iter().filter_map(|r| r.name.as_deref()).collect();
        // erlotinib did not converge, afatinib is another screen,
        // osimertinib has no ic50 and lapatinib no depmap_id
        assert_eq!(names, vec!["imatinib", "gefitinib"]);
        assert_eq!(report.input_rows, 9);
        assert_eq!(report.mts010_rows, 1);
    }

    #[test]
    fn test_dedup_prefers_highest_r2() {
        let dir = tempdir().unwrap();
        let body = DOSE_CSV.replace(",MTS010,0.2,0.2,0.5,0.70,imatinib", ",MTS009,0.2,0.2,0.5,0.70,imatinib");
        let dose = load_dose_response(&write(dir.path(), "dose.csv", &body)).unwrap();
        let (records, _) = wrangle(dose, &[]);
        let imatinib = records
            .iter()
            .find(|r| r.name.as_deref() == Some("imatinib"))
            .unwrap();
        assert_eq!(imatinib.broad_id.as_deref(), Some("BRD-2"));
        assert_eq!(imatinib.primary_tissue, None);
    }

    #[test]
    fn test_dedup_without_r2_is_reproducible() {
        let (a, _) = fixture();
        let (b, _) = fixture();
        let pick = |records: &[PrismRecord]| {
            records
                .iter()
                .find(|r| r.name.as_deref() == Some("gefitinib"))
                .map(|r| r.broad_id.clone())
        };
        assert_eq!(pick(&a), pick(&b));
        assert!(matches!(
            pick(&a).flatten().as_deref(),
            Some("BRD-4") | Some("BRD-5")
        ));
    }

    #[test]
    fn test_tissue_join_uses_first_cell_row() {
        let (records, _) = fixture();
        let k562 = records
            .iter()
            .find(|r| r.ccle_name == "K562_HAEMATOPOIETIC")
            .unwrap();
        assert_eq!(
            k562.primary_tissue.as_deref(),
            Some("haematopoietic_and_lymphoid")
        );
    }

    #[test]
    fn test_check_unique_pairs() {
        let (mut records, _) = fixture();
        assert!(check_unique_pairs(&records).is_ok());
        let mut dup = records[0].clone();
        dup.smiles = "OTHER".into();
        records.push(dup);
        let err = check_unique_pairs(&records).unwrap_err();
        assert!(err.to_string().contains("Found 1 duplicate"));
    }

    #[test]
    fn test_unnamed_compounds_are_not_duplicates() {
        let (records, _) = fixture();
        let mut first = records[0].clone();
        first.name = None;
        first.ccle_name = "CELL_LUNG".into();
        first.smiles = "CCO".into();
        let mut second = first.clone();
        second.smiles = "CCN".into();
        assert!(check_unique_pairs(&[first, second]).is_ok());
    }

    #[test]
    fn test_tissue_summary() {
        let (records, _) = fixture();
        let summary = tissue_summary(&records);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].primary_tissue, "haematopoietic_and_lymphoid");
        assert_eq!(summary[1].ccle_name, "A549_LUNG");
        assert_eq!(summary[1].count, 1);
    }

    #[test]
    fn test_write_and_load_tasks() {
        let (records, _) = fixture();
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/processed/out.csv");
        write_processed(&records, &path).unwrap();

        let tasks = load_tasks(&path, "nM").unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].drug, "imatinib");
        assert_eq!(tasks[0].output_unit, "nM");
        assert!((tasks[0].ic50_true.unwrap() - 200.0).abs() < 1e-9);
        assert!(tasks[0]
            .experimental_description()
            .contains("primary tissue: haematopoietic_and_lymphoid"));
    }

    #[test]
    fn test_convert_from_um() {
        assert_eq!(convert_from_um(2.0, "uM").unwrap(), 2.0);
        assert_eq!(convert_from_um(2.0, "nM").unwrap(), 2000.0);
        assert!(convert_from_um(2.0, "ppm").is_err());
    }

    #[test]
    fn test_run_pipeline() {
        let dir = tempdir().unwrap();
        write(dir.path(), "dose.csv", DOSE_CSV);
        write(dir.path(), "cells.csv", CELLS_CSV);
        let data = DataConfig {
            depmap_prism: Some(dir.path().to_path_buf()),
            cell_line_info: Some("cells.csv".into()),
            dose_response: Some("dose.csv".into()),
            processed: dir.path().join("out/processed.csv"),
        };
        let (path, report) = run_pipeline(&data).unwrap();
        assert!(path.exists());
        assert_eq!(report.combined, 2);
    }
}
