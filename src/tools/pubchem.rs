//! PubChem PUG REST / PUG View tools.

use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{endpoint, number, text, with_markup_strings};
use crate::cache::ToolCache;
use crate::client::{params, JsonApi, Params};
use crate::error::{Error, Result};

const PROPERTY_FIELDS: [&str; 11] = [
    "MolecularFormula",
    "MolecularWeight",
    "XLogP",
    "TPSA",
    "HBondDonorCount",
    "HBondAcceptorCount",
    "RotatableBondCount",
    "Complexity",
    "HeavyAtomCount",
    "Charge",
    "CanonicalSMILES",
];

const SMILES_FIELDS: [&str; 2] = ["CanonicalSMILES", "ConnectivitySMILES"];

/// Bump an entry when its parsing changes so stale cached values are skipped.
const CACHE_VERSIONS: &[(&str, &str)] = &[
    ("search_cids", "1"),
    ("iupac_name", "1"),
    ("molecular_formula", "1"),
    ("properties", "1"),
    ("assay_summary", "1"),
    ("ghs_classification", "1"),
    ("drug_med_info", "1"),
    ("similar_cids", "1"),
];

/// Cached PubChem backend plus the agent-facing summaries built on it.
pub struct PubChemTools {
    api: Arc<dyn JsonApi>,
    view_base: String,
    cache: ToolCache,
    fetch_limit: usize,
}

impl PubChemTools {
    pub fn new(
        api: Arc<dyn JsonApi>,
        view_base: impl Into<String>,
        cache: ToolCache,
        fetch_limit: usize,
    ) -> Self {
        Self {
            api,
            view_base: view_base.into().trim_end_matches('/').to_string(),
            cache: cache.with_func_versions(CACHE_VERSIONS),
            fetch_limit: fetch_limit.max(1),
        }
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    async fn get(&self, path: String, query: Params) -> Result<Value> {
        self.api.get_json(&path, query).await
    }

    async fn first_property(&self, cid: &str, field: &'static str) -> Result<Option<String>> {
        let result = self
            .get(endpoint(&["compound", "cid", cid, "property", field, "JSON"])?, Vec::new())
            .await?;
        Ok(property_rows(&result)
            .first()
            .and_then(|row| row.get(field))
            .map(text))
    }

    async fn view(&self, heading: &str, cid: &str) -> Result<Value> {
        let url = format!(
            "{}/{}",
            self.view_base,
            endpoint(&["data", "compound", cid, "JSON"])?
        );
        let result = self.get(url, params(&[("heading", heading)])).await?;
        Ok(result.get("Record").cloned().unwrap_or_else(|| json!({})))
    }

    // ---- cached backend ----

    /// CIDs whose name or synonym matches `query`.
    pub async fn search_cids(&self, query: &str) -> Result<Vec<u64>> {
        let limit = self.fetch_limit;
        self.cache
            .fetch("search_cids", json!([query]), || async move {
                let path = endpoint(&["compound", "name", query, "cids", "JSON"])?;
                let result = self
                    .get(path, params(&[("MaxRecords", limit)]))
                    .await?;
                let mut cids = identifier_list(&result);
                cids.truncate(limit);
                Ok(cids)
            })
            .await
    }

    pub async fn iupac_name(&self, cid: &str) -> Result<Option<String>> {
        self.cache
            .fetch("iupac_name", json!([cid]), || {
                self.first_property(cid, "IUPACName")
            })
            .await
    }

    pub async fn molecular_formula(&self, cid: &str) -> Result<Option<String>> {
        self.cache
            .fetch("molecular_formula", json!([cid]), || {
                self.first_property(cid, "MolecularFormula")
            })
            .await
    }

    /// Computed properties for `cid`; an empty map when PubChem has none.
    pub async fn properties(&self, cid: &str) -> Result<Map<String, Value>> {
        self.cache
            .fetch("properties", json!([cid]), || async move {
                let fields = PROPERTY_FIELDS.join(",");
                let path = endpoint(&["compound", "cid", cid, "property", fields.as_str(), "JSON"])?;
                let result = self.get(path, Vec::new()).await?;
                Ok(property_rows(&result)
                    .first()
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default())
            })
            .await
    }

    /// The raw `Table` of the assay summary.
    pub async fn assay_summary(&self, cid: &str) -> Result<Value> {
        self.cache
            .fetch("assay_summary", json!([cid]), || async move {
                let result = self
                    .get(endpoint(&["compound", "cid", cid, "assaysummary", "JSON"])?, Vec::new())
                    .await?;
                Ok(result.get("Table").cloned().unwrap_or_else(|| json!({})))
            })
            .await
    }

    pub async fn ghs_classification(&self, cid: &str) -> Result<Value> {
        self.cache
            .fetch("ghs_classification", json!([cid]), || {
                self.view("GHS Classification", cid)
            })
            .await
    }

    pub async fn drug_med_info(&self, cid: &str) -> Result<Value> {
        self.cache
            .fetch("drug_med_info", json!([cid]), || {
                self.view("Drug and Medication Information", cid)
            })
            .await
    }

    /// CIDs 2D-similar to `cid` at `threshold` percent Tanimoto.
    pub async fn similar_cids(&self, cid: &str, threshold: u32) -> Result<Vec<u64>> {
        let limit = self.fetch_limit;
        self.cache
            .fetch("similar_cids", json!([cid, threshold]), || async move {
                let props = self
                    .properties(cid)
                    .await
                    .map_err(|e| Error::Validation(format!("SMILES fetch error: {}", e)))?;
                let smiles = SMILES_FIELDS
                    .iter()
                    .filter_map(|f| props.get(*f).and_then(Value::as_str))
                    .find(|s| !s.is_empty())
                    .ok_or_else(|| Error::Validation("No SMILES available".to_string()))?;

                // fastsimilarity_2d answers synchronously
                let path =
                    endpoint(&["compound", "fastsimilarity_2d", "smiles", smiles, "cids", "JSON"])?;
                let query = params(&[("Threshold", threshold as usize), ("MaxRecords", limit)]);
                let result = self.get(path, query).await?;
                Ok(identifier_list(&result))
            })
            .await
    }

    // ---- agent-facing summaries ----

    /// Search PubChem CIDs by compound name or synonym.
    pub async fn search_pubchem_cid(&self, query: &str, limit: usize) -> String {
        let limit = limit.max(1);
        let cids = match self.search_cids(query).await {
            Ok(cids) => cids,
            Err(e) => return format!("Error searching for compound '{}': {}", query, e),
        };
        let cids = &cids[..cids.len().min(limit)];

        match cids {
            [] => format!("No compounds found for query '{}'.", query),
            [cid] => match self.iupac_name(&cid.to_string()).await {
                Ok(Some(name)) => format!("Found compound '{}' with CID {} for {}.", name, cid, query),
                _ => format!("Found compound with CID {} for {}.", cid, query),
            },
            _ => format!(
                "Found {} compound(s) matching '{}': CIDs \n - {}",
                cids.len(),
                query,
                cids.iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join("\n - ")
            ),
        }
    }

    /// Key molecular properties with coarse drug-likeness bands.
    pub async fn get_properties(&self, cid: &str) -> String {
        match self.properties(cid).await {
            Ok(props) => summarize_properties(cid, &props),
            Err(e) => format!("Error fetching properties for CID {}: {}", cid, e),
        }
    }

    /// Active/inactive/inconclusive assay counts plus up to `limit` active assays.
    pub async fn get_assay_summary(&self, cid: &str, limit: usize) -> String {
        match self.assay_summary(cid).await {
            Ok(table) => summarize_assays(cid, &table, limit),
            Err(e) => format!("Error fetching assay summary for CID {}: {}", cid, e),
        }
    }

    pub async fn get_safety_summary(&self, cid: &str) -> String {
        match self.ghs_classification(cid).await {
            Ok(record) => summarize_safety(cid, &record),
            Err(e) => format!("Error fetching GHS classification for CID {}: {}", cid, e),
        }
    }

    pub async fn get_drug_summary(&self, cid: &str) -> String {
        match self.drug_med_info(cid).await {
            Ok(info) => summarize_drug_info(cid, &info),
            Err(e) => format!("Error fetching drug/medication info for CID {}: {}", cid, e),
        }
    }

    /// Similar compounds as a `cid | IUPAC Name | Molecular Formula` table.
    pub async fn find_similar_compounds(&self, cid: &str, threshold: u32, limit: usize) -> String {
        let limit = limit.max(1);
        let similar = match self.similar_cids(cid, threshold).await {
            Ok(similar) => similar,
            Err(e) => return format!("Error fetching similar compounds for CID {}: {}", cid, e),
        };
        if similar.is_empty() {
            return format!(
                "No similar compounds found for CID {} at ≥{}% Tanimoto.",
                cid, threshold
            );
        }

        let mut parts = vec![
            format!("Compounds similar to CID {} (≥{}% Tanimoto):", cid, threshold),
            "cid | IUPAC Name | Molecular Formula".to_string(),
        ];
        for similar_cid in similar.iter().take(limit) {
            let id = similar_cid.to_string();
            let name = self.iupac_name(&id).await.ok().flatten();
            let formula = self.molecular_formula(&id).await.ok().flatten();
            parts.push(format!(
                "{} | {} | {}",
                id,
                name.as_deref().unwrap_or("N/A"),
                formula.as_deref().unwrap_or("N/A")
            ));
        }
        parts.join("\n")
    }
}

fn property_rows(result: &Value) -> Vec<Value> {
    result
        .pointer("/PropertyTable/Properties")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn identifier_list(result: &Value) -> Vec<u64> {
    result
        .pointer("/IdentifierList/CID")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

/// Render the property map returned by [`PubChemTools::properties`].
pub fn summarize_properties(cid: &str, props: &Map<String, Value>) -> String {
    if props.is_empty() {
        return format!("No properties found for CID {}.", cid);
    }
    let mut summary = vec![format!("Properties for CID {}:", cid)];

    if let (Some(formula), Some(mw)) = (props.get("MolecularFormula"), props.get("MolecularWeight")) {
        match number(mw) {
            Some(mw) => summary.push(format!(
                "molecular formula {} with MW {:.2} g/mol",
                text(formula),
                mw
            )),
            None => summary.push(format!(
                "molecular formula {} with MW {} g/mol",
                text(formula),
                text(mw)
            )),
        }
    }

    if let Some(xlogp) = props.get("XLogP") {
        match number(xlogp) {
            Some(x) => {
                let band = if x < 0.0 {
                    "hydrophilic"
                } else if x > 3.0 {
                    "lipophilic"
                } else {
                    "moderate lipophilicity"
                };
                summary.push(format!("XLogP {:.2} ({})", x, band));
            }
            None => summary.push(format!("XLogP {}", text(xlogp))),
        }
    }

    if let Some(tpsa) = props.get("TPSA") {
        match number(tpsa) {
            Some(t) => {
                let perm = if t < 90.0 {
                    "good"
                } else if t < 140.0 {
                    "moderate"
                } else {
                    "poor"
                };
                summary.push(format!("TPSA {:.1} Å² ({} permeability expected)", t, perm));
            }
            None => summary.push(format!("TPSA {} Å²", text(tpsa))),
        }
    }

    if let (Some(hbd), Some(hba)) = (props.get("HBondDonorCount"), props.get("HBondAcceptorCount")) {
        summary.push(format!(
            "{} H-bond donors and {} H-bond acceptors",
            text(hbd),
            text(hba)
        ));
    }

    if let Some(rtb) = props.get("RotatableBondCount") {
        match number(rtb) {
            Some(r) => {
                let r = r as i64;
                let flex = if r <= 3 {
                    "rigid"
                } else if r >= 7 {
                    "flexible"
                } else {
                    "moderate flexibility"
                };
                summary.push(format!("{} rotatable bonds ({})", r, flex));
            }
            None => summary.push(format!("Rotatable bonds: {}", text(rtb))),
        }
    }

    if let Some(cplx) = props.get("Complexity") {
        match number(cplx) {
            Some(c) => {
                let desc = if c < 250.0 {
                    "simple"
                } else if c > 500.0 {
                    "complex"
                } else {
                    "moderate complexity"
                };
                summary.push(format!("molecular complexity {:.0} ({})", c, desc));
            }
            None => summary.push(format!("molecular complexity {}", text(cplx))),
        }
    }

    if let Some(charge) = props.get("Charge").and_then(number).map(|c| c as i64) {
        if charge != 0 {
            let kind = if charge > 0 { "cationic" } else { "anionic" };
            summary.push(format!("formal charge {:+} ({})", charge, kind));
        }
    }

    format!("{}.", summary.join(". "))
}

/// Render an assay summary `Table` (`Column` names plus `Row[].Cell[]`).
pub fn summarize_assays(cid: &str, table: &Value, limit: usize) -> String {
    let rows = table
        .get("Row")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if rows.is_empty() {
        return format!("No assay data found for CID {}.", cid);
    }
    let columns: Vec<String> = table
        .pointer("/Columns/Column")
        .or_else(|| table.get("Column"))
        .and_then(Value::as_array)
        .map(|cols| cols.iter().map(text).collect())
        .unwrap_or_default();

    let mut active = Vec::new();
    let mut inactive = 0usize;
    let mut inconclusive = 0usize;
    for row in &rows {
        let cells = row
            .get("Cell")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let assay: Map<String, Value> = columns.iter().cloned().zip(cells).collect();
        let outcome = assay.get("Activity Outcome")
            .or_else(|| assay.get("Outcome"))
            .map(text)
            .unwrap_or_default()
            .to_lowercase();
        if outcome.contains("inactive") {
            inactive += 1;
        } else if outcome.contains("active") {
            active.push(assay);
        } else {
            inconclusive += 1;
        }
    }

    let mut parts = vec![
        format!("Assay summary for CID {}:", cid),
        format!("- Active in {} assay(s)", active.len()),
        format!("- Inactive in {} assay(s)", inactive),
        format!("- Inconclusive in {} assay(s)", inconclusive),
    ];
    if !active.is_empty() {
        parts.push("\nActive in:".to_string());
        for assay in active.iter().take(limit) {
            let aid = assay.get("AID").map(text).unwrap_or_else(|| "N/A".to_string());
            let mut name = assay
                .get("Assay Name")
                .map(text)
                .unwrap_or_else(|| "N/A".to_string());
            if name.chars().count() > 100 {
                name = format!("{}...", name.chars().take(97).collect::<String>());
            }
            parts.push(format!("• AID {}: {} \n", aid, name));
        }
    }
    if active.len() > limit {
        parts.push(format!(
            "(Showing {} of {} active assays)",
            limit,
            active.len()
        ));
    }
    parts.join("\n")
}

/// Render the GHS classification record from PUG View.
pub fn summarize_safety(cid: &str, record: &Value) -> String {
    let top = sections(record);
    if top.is_empty() {
        return format!("No GHS classification data found for CID {}.", cid);
    }
    let mut parts = vec![format!("Safety (GHS) classification for CID {}:", cid)];
    let mut added = false;

    let ghs = top
        .iter()
        .filter(|s| s.get("TOCHeading").and_then(Value::as_str) == Some("GHS Classification"));
    for section in ghs {
        for sub in sections(section) {
            for info in array(&sub, "Information") {
                let name = info.get("Name").map(text).unwrap_or_default();
                let value = info.get("Value").cloned().unwrap_or(Value::Null);
                let rendered = value.to_string();

                if rendered.contains("Pictogram") {
                    let pictograms = with_markup_strings(&value);
                    if !pictograms.is_empty() {
                        parts.push(format!("GHS Pictograms: {}", pictograms.join(", ")));
                        added = true;
                        continue;
                    }
                }
                if rendered.contains("Signal") {
                    if let Some(word) = with_markup_strings(&value).first() {
                        parts.push(format!("Signal word: {}", word));
                        added = true;
                        continue;
                    }
                }
                if name.contains("Hazard Statement") {
                    let hazards = with_markup_strings(&value);
                    if !hazards.is_empty() {
                        let shown: Vec<&str> = hazards.iter().take(3).map(String::as_str).collect();
                        parts.push(format!("Hazard statements: {}", shown.join("; ")));
                        if hazards.len() > 3 {
                            parts.push(format!("  (and {} more)", hazards.len() - 3));
                        }
                        added = true;
                    }
                }
            }
        }
    }

    if added {
        parts.join("\n")
    } else {
        format!("Limited safety data available for CID {}", cid)
    }
}

/// Render the "Drug and Medication Information" record from PUG View.
pub fn summarize_drug_info(cid: &str, info: &Value) -> String {
    let top = sections(info);
    if top.is_empty() {
        return format!("No drug/medication information found for CID {}.", cid);
    }
    let mut parts = vec![format!("Drug/Medication Information for CID {}:", cid)];
    let mut added = false;

    for section in &top {
        for sub in sections(section) {
            let heading = sub.get("TOCHeading").map(text).unwrap_or_default();
            let infos = array(&sub, "Information");
            let strings = || -> Vec<String> {
                infos
                    .iter()
                    .filter_map(|i| i.get("Value"))
                    .flat_map(with_markup_strings)
                    .collect()
            };

            if heading.contains("Therapeutic Use") {
                let uses = strings();
                if !uses.is_empty() {
                    parts.push(format!(
                        "Therapeutic uses: {}",
                        uses.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                    ));
                    if uses.len() > 3 {
                        parts.push(format!("  (and {} more)", uses.len() - 3));
                    }
                    added = true;
                }
            } else if heading.contains("Drug Class") {
                let classes = strings();
                if !classes.is_empty() {
                    parts.push(format!(
                        "Drug classes: {}",
                        classes.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
                    ));
                    added = true;
                }
            } else if heading.contains("FDA") {
                for info in &infos {
                    let name = info.get("Name").map(text).unwrap_or_default();
                    let first = info
                        .get("Value")
                        .map(with_markup_strings)
                        .and_then(|v| v.into_iter().next())
                        .unwrap_or_default();
                    if !first.is_empty() && name.contains("FDA") {
                        parts.push(format!("{}: {}", name, first));
                        added = true;
                    }
                }
            }
        }
    }

    if added {
        parts.join("\n")
    } else {
        format!("CID {} - no specific drug/medication information available", cid)
    }
}

fn array(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn sections(value: &Value) -> Vec<Value> {
    array(value, "Section")
}
