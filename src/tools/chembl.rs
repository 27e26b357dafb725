//! ChEMBL web-service tools.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{endpoint, number, text};
use crate::cache::ToolCache;
use crate::client::{JsonApi, Params};
use crate::error::Result;

/// Bump an entry when its parsing changes so stale cached values are skipped.
const CACHE_VERSIONS: &[(&str, &str)] = &[
    ("search_molecules", "1"),
    ("compound_properties", "1"),
    ("compound_activities", "1"),
    ("drug_info", "1"),
    ("mechanisms", "1"),
    ("indications", "1"),
    ("search_targets", "1"),
    ("target_activities", "1"),
];

/// Outcome of a molecule lookup; "no data" answers are cached like hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompoundLookup {
    Found {
        properties: Map<String, Value>,
        molecule: Value,
    },
    NotFound,
    NoProperties,
}

/// Cached ChEMBL backend plus the agent-facing summaries built on it.
pub struct ChemblTools {
    api: Arc<dyn JsonApi>,
    cache: ToolCache,
    fetch_limit: usize,
}

impl ChemblTools {
    pub fn new(api: Arc<dyn JsonApi>, cache: ToolCache, fetch_limit: usize) -> Self {
        Self {
            api,
            cache: cache.with_func_versions(CACHE_VERSIONS),
            fetch_limit: fetch_limit.max(1),
        }
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    fn query(&self, pairs: &[(&str, &str)], activity_type: Option<&str>) -> Params {
        let mut query: Params = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        query.push(("limit".to_string(), self.fetch_limit.to_string()));
        if let Some(kind) = activity_type.filter(|t| !t.is_empty()) {
            query.push(("standard_type".to_string(), kind.to_string()));
        }
        query
    }

    async fn list(&self, endpoint: &str, query: Params, key: &str) -> Result<Vec<Value>> {
        let result = self.api.get_json(endpoint, query).await?;
        Ok(result
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    // ---- cached backend ----

    /// `"CHEMBL25 (ASPIRIN)"` style entries for molecules matching `query`.
    pub async fn search_molecules(&self, query: &str) -> Result<Vec<String>> {
        self.cache
            .fetch("search_molecules", json!([query]), || async move {
                let molecules = self
                    .list("molecule/search.json", self.query(&[("q", query)], None), "molecules")
                    .await?;
                Ok(molecules
                    .iter()
                    .map(|m| {
                        format!(
                            "{} ({})",
                            m.get("molecule_chembl_id").map(text).unwrap_or_else(|| "Unknown".into()),
                            m.get("pref_name").filter(|v| !v.is_null()).map(text).unwrap_or_else(|| "No name".into())
                        )
                    })
                    .collect())
            })
            .await
    }

    pub async fn compound_properties(&self, chembl_id: &str) -> Result<CompoundLookup> {
        self.cache
            .fetch("compound_properties", json!([chembl_id]), || async move {
                let record = format!("{}.json", chembl_id);
                let result = self
                    .api
                    .get_json(&endpoint(&["molecule", record.as_str()])?, Vec::new())
                    .await?;
                // search-style payloads wrap the record in `molecules`
                let molecule = match result.get("molecules").and_then(Value::as_array) {
                    Some(list) => list.first().cloned(),
                    None if result.get("molecule_chembl_id").is_some() => Some(result),
                    None => None,
                };
                let Some(molecule) = molecule else {
                    return Ok(CompoundLookup::NotFound);
                };
                match molecule.get("molecule_properties").and_then(Value::as_object) {
                    Some(props) if !props.is_empty() => Ok(CompoundLookup::Found {
                        properties: props.clone(),
                        molecule,
                    }),
                    _ => Ok(CompoundLookup::NoProperties),
                }
            })
            .await
    }

    pub async fn compound_activities(
        &self,
        chembl_id: &str,
        activity_type: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.cache
            .fetch(
                "compound_activities",
                json!([chembl_id, activity_type]),
                || async move {
                    let query = self.query(&[("molecule_chembl_id", chembl_id)], activity_type);
                    self.list("activity.json", query, "activities").await
                },
            )
            .await
    }

    /// Drug records (`drugs[]`) for a molecule.
    pub async fn drug_info(&self, chembl_id: &str) -> Result<Vec<Value>> {
        self.cache
            .fetch("drug_info", json!([chembl_id]), || async move {
                let query = self.query(&[("molecule_chembl_id", chembl_id)], None);
                self.list("drug.json", query, "drugs").await
            })
            .await
    }

    pub async fn mechanisms(&self, chembl_id: &str) -> Result<Vec<Value>> {
        self.cache
            .fetch("mechanisms", json!([chembl_id]), || async move {
                let query = self.query(&[("molecule_chembl_id", chembl_id)], None);
                self.list("mechanism.json", query, "mechanisms").await
            })
            .await
    }

    pub async fn indications(&self, chembl_id: &str) -> Result<Vec<Value>> {
        self.cache
            .fetch("indications", json!([chembl_id]), || async move {
                let query = self.query(&[("molecule_chembl_id", chembl_id)], None);
                self.list("drug_indication.json", query, "drug_indications")
                    .await
            })
            .await
    }

    pub async fn search_targets(&self, query: &str) -> Result<Vec<Value>> {
        self.cache
            .fetch("search_targets", json!([query]), || async move {
                self.list("target/search.json", self.query(&[("q", query)], None), "targets")
                    .await
            })
            .await
    }

    pub async fn target_activities(
        &self,
        target_chembl_id: &str,
        activity_type: Option<&str>,
    ) -> Result<Vec<Value>> {
        self.cache
            .fetch(
                "target_activities",
                json!([target_chembl_id, activity_type]),
                || async move {
                    let query =
                        self.query(&[("target_chembl_id", target_chembl_id)], activity_type);
                    self.list("activity.json", query, "activities").await
                },
            )
            .await
    }

    // ---- agent-facing summaries ----

    pub async fn search_chembl_id(&self, query: &str, limit: usize) -> String {
        let compounds = match self.search_molecules(query).await {
            Ok(c) => c,
            Err(e) => return format!("Error searching for compound: {}", e),
        };
        if compounds.is_empty() {
            return format!("No compounds found matching '{}'", query);
        }
        let shown = &compounds[..compounds.len().min(limit)];
        format!(
            "Found {} compound(s) matching '{}': \n - {}",
            shown.len(),
            query,
            shown.join("\n - ")
        )
    }

    pub async fn get_compound_properties(&self, chembl_id: &str) -> String {
        match self.compound_properties(chembl_id).await {
            Ok(CompoundLookup::Found {
                properties,
                molecule,
            }) => summarize_compound_properties(chembl_id, &properties, &molecule),
            Ok(CompoundLookup::NotFound) => format!("No data found for {}", chembl_id),
            Ok(CompoundLookup::NoProperties) => {
                format!("{} has no calculated properties available", chembl_id)
            }
            Err(e) => format!("Error retrieving compound properties: {}", e),
        }
    }

    pub async fn get_compound_bioactivities_summary(
        &self,
        chembl_id: &str,
        activity_type: Option<&str>,
        max_results: usize,
    ) -> String {
        match self.compound_activities(chembl_id, activity_type).await {
            Ok(activities) => summarize_bioactivities(chembl_id, &activities, max_results),
            Err(e) => format!("Error retrieving bioactivities: {}", e),
        }
    }

    pub async fn get_drug_approval_status(&self, chembl_id: &str) -> String {
        let drugs = match self.drug_info(chembl_id).await {
            Ok(d) => d,
            Err(e) => return format!("Error retrieving drug info: {}", e),
        };
        let Some(drug) = drugs.first() else {
            return format!("{} has no ChEMBL drug record and is not an approved drug", chembl_id);
        };
        match drug.get("first_approval").filter(|v| !v.is_null()) {
            Some(year) => format!(
                "{} is an approved drug (first approved: {})",
                chembl_id,
                text(year)
            ),
            None => format!("{} is not an approved drug", chembl_id),
        }
    }

    pub async fn get_drug_moa(&self, chembl_id: &str, limit: usize) -> String {
        let mechanisms = match self.mechanisms(chembl_id).await {
            Ok(m) => m,
            Err(e) => return format!("Error retrieving mechanism of action: {}", e),
        };
        let summaries: Vec<String> = mechanisms
            .iter()
            .take(limit)
            .filter_map(|mech| {
                let moa = non_empty(mech, "mechanism_of_action")?;
                let mut summary = moa;
                if let Some(action) = non_empty(mech, "action_type") {
                    summary.push_str(&format!(" ({})", action));
                }
                if let Some(target) = non_empty(mech, "target_chembl_id") {
                    summary.push_str(&format!(" targeting {}", target));
                }
                Some(summary)
            })
            .collect();
        if summaries.is_empty() {
            format!("No mechanism of action data found for {}", chembl_id)
        } else {
            format!("Mechanisms of action: {}", summaries.join("; "))
        }
    }

    pub async fn get_drug_indications(&self, chembl_id: &str, limit: usize) -> String {
        let indications = match self.indications(chembl_id).await {
            Ok(i) => i,
            Err(e) => return format!("Error retrieving indications: {}", e),
        };
        let summaries: Vec<String> = indications
            .iter()
            .take(limit)
            .filter_map(|ind| {
                let term = non_empty(ind, "efo_term")?;
                let mut summary = term.clone();
                if let Some(phase) = non_empty(ind, "max_phase_for_ind") {
                    summary.push_str(&format!(" (Phase {})", phase));
                }
                if let Some(mesh) = non_empty(ind, "mesh_heading").filter(|m| *m != term) {
                    summary.push_str(&format!(" ({})", mesh));
                }
                Some(summary)
            })
            .collect();
        if summaries.is_empty() {
            format!("No indication data found for {}", chembl_id)
        } else {
            format!("Drug indications: {}", summaries.join(", "))
        }
    }

    pub async fn search_target_id(&self, query: &str, limit: usize) -> String {
        let targets = match self.search_targets(query).await {
            Ok(t) => t,
            Err(e) => return format!("Error searching for target: {}", e),
        };
        if targets.is_empty() {
            return format!("No targets found matching '{}'", query);
        }
        let listed: Vec<String> = targets
            .iter()
            .take(limit)
            .map(|t| {
                let id = non_empty(t, "target_chembl_id").unwrap_or_else(|| "Unknown".into());
                let name = non_empty(t, "pref_name").unwrap_or_else(|| "No name".into());
                match non_empty(t, "organism") {
                    Some(org) => format!("{} ({}, {})", id, name, org),
                    None => format!("{} ({})", id, name),
                }
            })
            .collect();
        format!(
            "Found {} target(s) matching '{}': {}",
            listed.len(),
            query,
            listed.join(", ")
        )
    }

    pub async fn get_target_activities_summary(
        &self,
        target_chembl_id: &str,
        activity_type: Option<&str>,
        max_compounds: usize,
    ) -> String {
        match self.target_activities(target_chembl_id, activity_type).await {
            Ok(activities) => summarize_target_activities(
                target_chembl_id,
                activity_type,
                &activities,
                max_compounds,
            ),
            Err(e) => format!("Error retrieving bioactivities: {}", e),
        }
    }
}

fn non_empty(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .filter(|v| !v.is_null())
        .map(text)
        .filter(|s| !s.is_empty())
}

/// Activity values the way medicinal chemists read them: tiny values in
/// scientific notation, sub-micromolar with one decimal, the rest rounded.
pub fn format_activity_value(v: f64) -> String {
    if v < 0.1 {
        scientific(v)
    } else if v < 1000.0 {
        format!("{:.1}", v)
    } else {
        format!("{:.0}", v)
    }
}

// `1.23e-02` rather than Rust's `1.23e-2`
fn scientific(v: f64) -> String {
    let raw = format!("{:.2e}", v);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

pub fn summarize_compound_properties(
    chembl_id: &str,
    props: &Map<String, Value>,
    molecule: &Value,
) -> String {
    let mut parts = vec![format!("Properties of {}:", chembl_id)];

    if let Some(mw) = props.get("mw_freebase").filter(|v| !v.is_null()) {
        match number(mw) {
            Some(mw) => parts.push(format!("molecular weight {:.1} Da", mw)),
            None => parts.push(format!("molecular weight {} Da", text(mw))),
        }
    }

    if let Some(logp) = props.get("alogp").filter(|v| !v.is_null()) {
        match number(logp) {
            Some(x) => {
                let band = if x < 0.0 {
                    "hydrophilic"
                } else if x > 3.0 {
                    "lipophilic"
                } else {
                    "moderate lipophilicity"
                };
                parts.push(format!("ALogP {:.2} ({})", x, band));
            }
            None => parts.push(format!("ALogP {}", text(logp))),
        }
    }

    if let Some(psa) = props.get("psa").filter(|v| !v.is_null()) {
        match number(psa) {
            Some(t) => {
                let perm = if t < 90.0 {
                    "good"
                } else if t < 140.0 {
                    "moderate"
                } else {
                    "poor"
                };
                parts.push(format!("TPSA {:.1} Å² ({} permeability expected)", t, perm));
            }
            None => parts.push(format!("TPSA {} Å²", text(psa))),
        }
    }

    let hbd = props.get("hbd").filter(|v| !v.is_null());
    let hba = props.get("hba").filter(|v| !v.is_null());
    if let (Some(hbd), Some(hba)) = (hbd, hba) {
        parts.push(format!(
            "{} H-bond donors and {} H-bond acceptors",
            text(hbd),
            text(hba)
        ));
    }

    if let Some(rtb) = props.get("rtb").and_then(number) {
        let rtb = rtb as i64;
        let flex = if rtb <= 3 {
            "rigid"
        } else if rtb >= 7 {
            "flexible"
        } else {
            "moderate flexibility"
        };
        parts.push(format!("{} rotatable bonds ({})", rtb, flex));
    }

    if let Some(ro5) = props.get("num_ro5_violations").and_then(number) {
        if ro5 == 0.0 {
            parts.push("compliant with Lipinski's Rule of Five".to_string());
        } else {
            parts.push(format!("has {} Ro5 violation(s)", ro5 as i64));
        }
    }

    if let Some(kind) = non_empty(molecule, "molecule_type") {
        parts.push(format!("classified as {}", kind));
    }

    format!("{}.", parts.join(". "))
}

struct Measured {
    kind: String,
    value: f64,
    units: String,
    relation: String,
}

pub fn summarize_bioactivities(chembl_id: &str, activities: &[Value], max_results: usize) -> String {
    if activities.is_empty() {
        return format!("No bioactivity data found for {}", chembl_id);
    }

    // insertion-ordered grouping by target name
    let mut targets: Vec<(String, String, Vec<Measured>)> = Vec::new();
    for act in activities {
        let name = non_empty(act, "target_pref_name").unwrap_or_else(|| "Unknown target".into());
        let id = non_empty(act, "target_chembl_id").unwrap_or_default();
        let idx = match targets.iter().position(|(n, _, _)| *n == name) {
            Some(i) => i,
            None => {
                targets.push((name, id, Vec::new()));
                targets.len() - 1
            }
        };
        let (Some(value), Some(kind)) = (
            act.get("standard_value").and_then(number),
            non_empty(act, "standard_type"),
        ) else {
            continue;
        };
        targets[idx].2.push(Measured {
            kind,
            value,
            units: non_empty(act, "standard_units").unwrap_or_default(),
            relation: non_empty(act, "standard_relation").unwrap_or_else(|| "=".into()),
        });
    }

    let total = targets.len();
    targets.sort_by(|a, b| b.2.len().cmp(&a.2.len()));

    let mut parts = vec![format!("Bioactivity summary for {}:", chembl_id)];
    let mut shown = 0;
    for (name, id, measured) in &targets {
        if shown >= max_results {
            break;
        }
        let mut best: BTreeMap<&str, &Measured> = BTreeMap::new();
        for m in measured {
            best.entry(m.kind.as_str())
                .and_modify(|b| {
                    if m.value < b.value {
                        *b = m;
                    }
                })
                .or_insert(m);
        }
        if best.is_empty() {
            continue;
        }
        let rendered: Vec<String> = best
            .values()
            .map(|m| {
                format!(
                    "{} {} {} {}",
                    m.kind,
                    m.relation,
                    format_activity_value(m.value),
                    m.units
                )
            })
            .collect();
        parts.push(format!("\n• {} ({}): {}", name, id, rendered.join(", ")));
        shown += 1;
    }

    if total > max_results {
        parts.push(format!(
            "(Showing top {} of {} targets with activity data)",
            max_results, total
        ));
    }
    parts.join("\n")
}

pub fn summarize_target_activities(
    target_chembl_id: &str,
    activity_type: Option<&str>,
    activities: &[Value],
    max_compounds: usize,
) -> String {
    let label = activity_type.unwrap_or("bioactivity");
    if activities.is_empty() {
        return format!("No {} activities found for {}", label, target_chembl_id);
    }

    let mut valid: Vec<(f64, &Value)> = activities
        .iter()
        .filter(|a| match activity_type {
            Some(kind) => a.get("standard_type").and_then(Value::as_str) == Some(kind),
            None => true,
        })
        .filter_map(|a| a.get("standard_value").and_then(number).map(|v| (v, a)))
        .collect();
    if valid.is_empty() {
        return format!("No valid {} data found for {}", label, target_chembl_id);
    }
    valid.sort_by(|a, b| a.0.total_cmp(&b.0));
    valid.truncate(max_compounds.max(1));

    let target_name =
        non_empty(valid[0].1, "target_pref_name").unwrap_or_else(|| target_chembl_id.to_string());
    let mut parts = vec![format!(
        "Top {} compounds with {} against {} ({}):",
        valid.len(),
        label,
        target_name,
        target_chembl_id
    )];

    for (i, (value, act)) in valid.iter().enumerate() {
        let mol_id = non_empty(act, "molecule_chembl_id").unwrap_or_else(|| "Unknown".into());
        let mol_name =
            non_empty(act, "molecule_pref_name").unwrap_or_else(|| "No Preferred Name".into());
        let kind = non_empty(act, "standard_type").unwrap_or_else(|| label.to_string());
        let relation = non_empty(act, "standard_relation").unwrap_or_else(|| "=".into());
        let units = non_empty(act, "standard_units").unwrap_or_default();

        let mut activity = format!(
            "{} {} {} {}",
            kind,
            relation,
            format_activity_value(*value),
            units
        );
        if let Some(pchembl) = non_empty(act, "pchembl_value") {
            activity.push_str(&format!(" (pChEMBL value: {})", pchembl));
        }
        parts.push(format!(
            "{}. {} (CHEMBL ID: {}): {}",
            i + 1,
            mol_name,
            mol_id,
            activity
        ));

        if let Some(desc) = non_empty(act, "assay_description") {
            let details: Vec<String> = [
                ("ID", "assay_chembl_id"),
                ("Year", "document_year"),
                ("Organism", "target_organism"),
            ]
            .iter()
            .filter_map(|(label, key)| non_empty(act, key).map(|v| format!("{}: {}", label, v)))
            .collect();
            let mut assay = format!("Assay: {}", desc);
            if !details.is_empty() {
                assay.push_str(&format!(" ({})", details.join(", ")));
            }
            parts.push(format!("   {}", assay));
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockJsonApi;
    use crate::error::Error;
    use tempfile::tempdir;

    fn tools_with(api: MockJsonApi, dir: &std::path::Path) -> ChemblTools {
        ChemblTools::new(Arc::new(api), ToolCache::new("chembl", dir), 50)
    }

    #[test]
    fn test_format_activity_value() {
        assert_eq!(format_activity_value(0.0123), "1.23e-02");
        assert_eq!(format_activity_value(12.345), "12.3");
        assert_eq!(format_activity_value(25000.4), "25000");
    }

    #[test]
    fn test_summarize_compound_properties() {
        let props = json!({
            "mw_freebase": "180.16", "alogp": "1.31", "psa": "63.60",
            "hbd": 1, "hba": 3, "rtb": 2, "num_ro5_violations": 0
        });
        let molecule = json!({"molecule_type": "Small molecule"});
        let out = summarize_compound_properties("CHEMBL25", props.as_object().unwrap(), &molecule);
        assert_eq!(
            out,
            "Properties of CHEMBL25:. molecular weight 180.2 Da. ALogP 1.31 (moderate lipophilicity). \
             TPSA 63.6 Å² (good permeability expected). 1 H-bond donors and 3 H-bond acceptors. \
             2 rotatable bonds (rigid). compliant with Lipinski's Rule of Five. classified as Small molecule."
        );
    }

    #[test]
    fn test_summarize_bioactivities_groups_and_ranks() {
        let acts = vec![
            json!({"target_pref_name": "EGFR", "target_chembl_id": "CHEMBL203",
                   "standard_type": "IC50", "standard_value": "50", "standard_units": "nM"}),
            json!({"target_pref_name": "EGFR", "target_chembl_id": "CHEMBL203",
                   "standard_type": "IC50", "standard_value": "5", "standard_units": "nM",
                   "standard_relation": "<"}),
            json!({"target_pref_name": "EGFR", "target_chembl_id": "CHEMBL203",
                   "standard_type": "Ki", "standard_value": "0.05", "standard_units": "nM"}),
            json!({"target_pref_name": "HER2", "target_chembl_id": "CHEMBL1824",
                   "standard_type": "IC50", "standard_value": "1500", "standard_units": "nM"}),
            json!({"target_pref_name": "Unknown panel", "standard_type": "IC50"}),
        ];
        let out = summarize_bioactivities("CHEMBL553", &acts, 1);
        assert!(out.starts_with("Bioactivity summary for CHEMBL553:"));
        assert!(out.contains("• EGFR (CHEMBL203): IC50 < 5.0 nM, Ki = 5.00e-02 nM"));
        assert!(!out.contains("HER2"));
        assert!(out.contains("(Showing top 1 of 3 targets with activity data)"));

        let all = summarize_bioactivities("CHEMBL553", &acts, 5);
        assert!(all.contains("• HER2 (CHEMBL1824): IC50 = 1500 nM"));
        assert!(!all.contains("Showing"));
    }

    #[test]
    fn test_summarize_target_activities() {
        let acts = vec![
            json!({"standard_type": "IC50", "standard_value": "120", "standard_units": "nM",
                   "molecule_chembl_id": "CHEMBL1", "molecule_pref_name": null,
                   "target_pref_name": "EGFR"}),
            json!({"standard_type": "IC50", "standard_value": "3", "standard_units": "nM",
                   "molecule_chembl_id": "CHEMBL2", "molecule_pref_name": "GEFITINIB",
                   "pchembl_value": "8.52", "target_pref_name": "EGFR",
                   "assay_description": "Inhibition of EGFR", "assay_chembl_id": "CHEMBL9",
                   "document_year": 2004, "target_organism": "Homo sapiens"}),
            json!({"standard_type": "Ki", "standard_value": "1", "molecule_chembl_id": "CHEMBL3"}),
        ];
        let out = summarize_target_activities("CHEMBL203", Some("IC50"), &acts, 5);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Top 2 compounds with IC50 against EGFR (CHEMBL203):");
        assert_eq!(
            lines[1],
            "1. GEFITINIB (CHEMBL ID: CHEMBL2): IC50 = 3.0 nM (pChEMBL value: 8.52)"
        );
        assert_eq!(
            lines[2],
            "   Assay: Inhibition of EGFR (ID: CHEMBL9, Year: 2004, Organism: Homo sapiens)"
        );
        assert_eq!(
            lines[3],
            "2. No Preferred Name (CHEMBL ID: CHEMBL1): IC50 = 120.0 nM"
        );
    }

    #[tokio::test]
    async fn test_compound_properties_lookup_states() {
        let dir = tempdir().unwrap();
        let mut api = MockJsonApi::new();
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "molecule/CHEMBL25.json")
            .times(1)
            .returning(|_, _| {
                Ok(json!({"molecule_chembl_id": "CHEMBL25", "molecule_type": "Small molecule",
                          "molecule_properties": {"mw_freebase": "180.16"}}))
            });
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "molecule/CHEMBL0.json")
            .returning(|_, _| Ok(json!({"molecules": []})));
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "molecule/CHEMBL7.json")
            .returning(|_, _| Ok(json!({"molecules": [{"molecule_chembl_id": "CHEMBL7"}]})));
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "molecule/CHEMBL9.json")
            .returning(|_, _| Err(Error::api(500, "down")));
        let tools = tools_with(api, dir.path());

        let out = tools.get_compound_properties("CHEMBL25").await;
        assert!(out.contains("molecular weight 180.2 Da"));
        assert!(out.ends_with("classified as Small molecule."));
        // cached
        assert_eq!(tools.get_compound_properties("CHEMBL25").await, out);

        assert_eq!(
            tools.get_compound_properties("CHEMBL0").await,
            "No data found for CHEMBL0"
        );
        assert_eq!(
            tools.get_compound_properties("CHEMBL7").await,
            "CHEMBL7 has no calculated properties available"
        );
        assert_eq!(
            tools.get_compound_properties("CHEMBL9").await,
            "Error retrieving compound properties: API error: 500 - down"
        );
    }

    #[tokio::test]
    async fn test_activity_query_carries_limit_and_type() {
        let dir = tempdir().unwrap();
        let mut api = MockJsonApi::new();
        api.expect_get_json()
            .withf(|endpoint, query| {
                endpoint == "activity.json"
                    && query.contains(&("molecule_chembl_id".to_string(), "CHEMBL25".to_string()))
                    && query.contains(&("limit".to_string(), "50".to_string()))
                    && query.contains(&("standard_type".to_string(), "IC50".to_string()))
            })
            .times(1)
            .returning(|_, _| Ok(json!({"activities": []})));
        let tools = tools_with(api, dir.path());
        let out = tools
            .get_compound_bioactivities_summary("CHEMBL25", Some("IC50"), 5)
            .await;
        assert_eq!(out, "No bioactivity data found for CHEMBL25");
    }

    #[tokio::test]
    async fn test_drug_approval_status() {
        let dir = tempdir().unwrap();
        let mut api = MockJsonApi::new();
        api.expect_get_json()
            .withf(|_, query| query.contains(&("molecule_chembl_id".to_string(), "CHEMBL25".to_string())))
            .returning(|_, _| Ok(json!({"drugs": [{"first_approval": 1950}]})));
        api.expect_get_json()
            .withf(|_, query| query.contains(&("molecule_chembl_id".to_string(), "CHEMBL1".to_string())))
            .returning(|_, _| Ok(json!({"drugs": [{"first_approval": null}]})));
        api.expect_get_json()
            .withf(|_, query| query.contains(&("molecule_chembl_id".to_string(), "CHEMBL2".to_string())))
            .returning(|_, _| Ok(json!({"drugs": []})));
        let tools = tools_with(api, dir.path());

        assert_eq!(
            tools.get_drug_approval_status("CHEMBL25").await,
            "CHEMBL25 is an approved drug (first approved: 1950)"
        );
        assert_eq!(
            tools.get_drug_approval_status("CHEMBL1").await,
            "CHEMBL1 is not an approved drug"
        );
        assert!(tools
            .get_drug_approval_status("CHEMBL2")
            .await
            .contains("no ChEMBL drug record"));
    }

    #[tokio::test]
    async fn test_moa_indications_and_targets() {
        let dir = tempdir().unwrap();
        let mut api = MockJsonApi::new();
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "mechanism.json")
            .returning(|_, _| {
                Ok(json!({"mechanisms": [
                    {"mechanism_of_action": "Cyclooxygenase inhibitor", "action_type": "INHIBITOR",
                     "target_chembl_id": "CHEMBL2094253"},
                    {"mechanism_of_action": ""}
                ]}))
            });
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "drug_indication.json")
            .returning(|_, _| {
                Ok(json!({"drug_indications": [
                    {"efo_term": "pain", "max_phase_for_ind": 4, "mesh_heading": "Pain"},
                    {"efo_term": "fever", "mesh_heading": "fever"}
                ]}))
            });
        api.expect_get_json()
            .withf(|endpoint, _| endpoint == "target/search.json")
            .returning(|_, _| {
                Ok(json!({"targets": [
                    {"target_chembl_id": "CHEMBL203", "pref_name": "EGFR", "organism": "Homo sapiens"},
                    {"target_chembl_id": "CHEMBL999"}
                ]}))
            });
        let tools = tools_with(api, dir.path());

        assert_eq!(
            tools.get_drug_moa("CHEMBL25", 5).await,
            "Mechanisms of action: Cyclooxygenase inhibitor (INHIBITOR) targeting CHEMBL2094253"
        );
        assert_eq!(
            tools.get_drug_indications("CHEMBL25", 5).await,
            "Drug indications: pain (Phase 4) (Pain), fever"
        );
        assert_eq!(
            tools.search_target_id("egfr", 5).await,
            "Found 2 target(s) matching 'egfr': CHEMBL203 (EGFR, Homo sapiens), CHEMBL999 (No name)"
        );
    }
}
