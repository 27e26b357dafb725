//! Chemistry and cell-line database tools for the agent
//!
//! Provides tools for:
//! - PubChem compound lookup, properties, assays, safety and drug info
//! - ChEMBL molecules, bioactivities, mechanisms, indications and targets
//! - Cellosaurus cell-line accessions and summaries
//!
//! Every tool returns a natural-language string; backend failures are folded
//! into that string so the agent can read and react to them.

pub mod cellosaurus;
pub mod chembl;
pub mod pubchem;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::cache::ToolCache;
use crate::client::{ApiClient, JsonApi, PUBCHEM_VIEW_BASE_URL};
use crate::config::Config;
use crate::error::{Error, Result};

pub use cellosaurus::CellosaurusTools;
pub use chembl::ChemblTools;
pub use pubchem::PubChemTools;

const SEGMENT_BASE: &str = "http://segments.invalid/";

/// Tool execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(msg.into()),
        }
    }

    /// Text shown to the model as the observation for this call.
    pub fn observation(&self) -> String {
        match (&self.error, &self.output) {
            (Some(e), _) => format!("Error: {}", e),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        }
    }
}

/// Tool definition for LLM function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Anything the agent can call tools on.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, name: &str, params: &HashMap<String, Value>) -> ToolResult;
}

/// The PubChem, ChEMBL and Cellosaurus tools behind one dispatch table.
pub struct ToolBox {
    pubchem: PubChemTools,
    chembl: ChemblTools,
    cellosaurus: CellosaurusTools,
}

impl ToolBox {
    pub fn new(pubchem: PubChemTools, chembl: ChemblTools, cellosaurus: CellosaurusTools) -> Self {
        Self {
            pubchem,
            chembl,
            cellosaurus,
        }
    }

    /// Wire up live API clients, rate limiters and caches from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let limit = config.fetch_limit();
        let pubchem: Arc<dyn JsonApi> = Arc::new(ApiClient::pubchem(config)?);
        let chembl: Arc<dyn JsonApi> = Arc::new(ApiClient::chembl(config)?);
        let cellosaurus: Arc<dyn JsonApi> = Arc::new(ApiClient::cellosaurus(config)?);

        Ok(Self::new(
            PubChemTools::new(
                pubchem,
                PUBCHEM_VIEW_BASE_URL,
                ToolCache::from_config("pubchem", config)?,
                limit,
            ),
            ChemblTools::new(chembl, ToolCache::from_config("chembl", config)?, limit),
            CellosaurusTools::new(
                cellosaurus,
                ToolCache::from_config("cellosaurus", config)?,
                limit,
            ),
        ))
    }

    pub fn pubchem(&self) -> &PubChemTools {
        &self.pubchem
    }

    pub fn chembl(&self) -> &ChemblTools {
        &self.chembl
    }

    pub fn cellosaurus(&self) -> &CellosaurusTools {
        &self.cellosaurus
    }

    /// Cache backing one service (`pubchem`, `chembl` or `cellosaurus`).
    pub fn cache(&self, service: &str) -> Option<&ToolCache> {
        match service {
            "pubchem" => Some(self.pubchem.cache()),
            "chembl" => Some(self.chembl.cache()),
            "cellosaurus" => Some(self.cellosaurus.cache()),
            _ => None,
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.get_tool_definitions().iter().any(|d| d.name == name)
    }

    /// Get all available tool definitions for LLM function calling
    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let cid = json!({"type": ["integer", "string"], "description": "PubChem compound ID"});
        let chembl_id = json!({"type": "string", "description": "ChEMBL molecule ID, e.g. CHEMBL25"});
        let limit = |default: u64, what: &str| {
            json!({"type": "integer", "description": format!("Maximum number of {} (default: {})", what, default)})
        };
        let activity_type = json!({"type": "string", "description": "Optional activity type filter, e.g. IC50"});

        vec![
            def(
                "search_pubchem_cid",
                "Search PubChem CIDs for a compound name or synonym",
                json!({"query": {"type": "string", "description": "Compound name or synonym"},
                       "limit": limit(5, "CIDs")}),
                &["query"],
            ),
            def(
                "get_properties",
                "Summarize key molecular properties (formula, MW, XLogP, TPSA, H-bonding, flexibility, complexity, charge) of a PubChem CID",
                json!({"cid": cid}),
                &["cid"],
            ),
            def(
                "get_assay_summary",
                "Summarize active/inactive/inconclusive PubChem bioassays for a CID and list active assays",
                json!({"cid": cid, "limit": limit(5, "active assays listed")}),
                &["cid"],
            ),
            def(
                "get_safety_summary",
                "Summarize the GHS safety classification of a PubChem CID",
                json!({"cid": cid}),
                &["cid"],
            ),
            def(
                "get_drug_summary",
                "Summarize therapeutic uses, drug classes and FDA information of a PubChem CID",
                json!({"cid": cid}),
                &["cid"],
            ),
            def(
                "find_similar_compounds",
                "Find structurally similar PubChem compounds by 2D Tanimoto similarity",
                json!({"cid": cid,
                       "threshold": {"type": "integer", "description": "Tanimoto threshold in percent (default: 90)"},
                       "limit": limit(10, "similar compounds")}),
                &["cid"],
            ),
            def(
                "search_chembl_id",
                "Search ChEMBL molecule IDs for a compound name or synonym",
                json!({"query": {"type": "string", "description": "Compound name or synonym"},
                       "limit": limit(5, "results")}),
                &["query"],
            ),
            def(
                "get_compound_properties",
                "Summarize calculated properties and Rule-of-Five compliance of a ChEMBL molecule",
                json!({"chembl_id": chembl_id}),
                &["chembl_id"],
            ),
            def(
                "get_compound_bioactivities_summary",
                "Summarize the best measured activity per target for a ChEMBL molecule",
                json!({"chembl_id": chembl_id, "activity_type": activity_type,
                       "max_results": limit(5, "targets")}),
                &["chembl_id"],
            ),
            def(
                "get_drug_approval_status",
                "Report whether a ChEMBL molecule is an approved drug",
                json!({"chembl_id": chembl_id}),
                &["chembl_id"],
            ),
            def(
                "get_drug_moa",
                "List mechanisms of action of a ChEMBL drug",
                json!({"chembl_id": chembl_id, "limit": limit(5, "mechanisms")}),
                &["chembl_id"],
            ),
            def(
                "get_drug_indications",
                "List clinical indications of a ChEMBL drug",
                json!({"chembl_id": chembl_id, "limit": limit(5, "indications")}),
                &["chembl_id"],
            ),
            def(
                "search_target_id",
                "Search ChEMBL target IDs for a protein or target name",
                json!({"query": {"type": "string", "description": "Target name or synonym"},
                       "limit": limit(5, "targets")}),
                &["query"],
            ),
            def(
                "get_target_activities_summary",
                "List the most potent compounds measured against a ChEMBL target",
                json!({"target_chembl_id": {"type": "string", "description": "ChEMBL target ID"},
                       "activity_type": activity_type,
                       "max_compounds": limit(5, "compounds")}),
                &["target_chembl_id"],
            ),
            def(
                "search_cellosaurus_ac",
                "Search Cellosaurus accessions for a cell line name or synonym",
                json!({"query": {"type": "string", "description": "Cell line name or synonym"}}),
                &["query"],
            ),
            def(
                "get_cellosaurus_summary",
                "Summarize a Cellosaurus cell line (name, species, tissues, diseases, cell type)",
                json!({"ac": {"type": "string", "description": "Cellosaurus accession, e.g. CVCL_0030"}}),
                &["ac"],
            ),
        ]
    }

    /// Execute a tool by name with parameters
    pub async fn execute(&self, name: &str, params: &HashMap<String, Value>) -> ToolResult {
        info!(tool = %name, "executing tool");

        let summary = match name {
            "search_pubchem_cid" => {
                let Some(query) = arg_str(params, "query") else {
                    return missing("query");
                };
                self.pubchem
                    .search_pubchem_cid(&query, arg_usize(params, "limit", 5))
                    .await
            }
            "get_properties" => {
                let Some(cid) = arg_str(params, "cid") else {
                    return missing("cid");
                };
                self.pubchem.get_properties(&cid).await
            }
            "get_assay_summary" => {
                let Some(cid) = arg_str(params, "cid") else {
                    return missing("cid");
                };
                self.pubchem
                    .get_assay_summary(&cid, arg_usize(params, "limit", 5))
                    .await
            }
            "get_safety_summary" => {
                let Some(cid) = arg_str(params, "cid") else {
                    return missing("cid");
                };
                self.pubchem.get_safety_summary(&cid).await
            }
            "get_drug_summary" => {
                let Some(cid) = arg_str(params, "cid") else {
                    return missing("cid");
                };
                self.pubchem.get_drug_summary(&cid).await
            }
            "find_similar_compounds" => {
                let Some(cid) = arg_str(params, "cid") else {
                    return missing("cid");
                };
                let threshold = arg_usize(params, "threshold", 90).min(100) as u32;
                self.pubchem
                    .find_similar_compounds(&cid, threshold, arg_usize(params, "limit", 10))
                    .await
            }
            "search_chembl_id" => {
                let Some(query) = arg_str(params, "query") else {
                    return missing("query");
                };
                self.chembl
                    .search_chembl_id(&query, arg_usize(params, "limit", 5))
                    .await
            }
            "get_compound_properties" => {
                let Some(id) = arg_str(params, "chembl_id") else {
                    return missing("chembl_id");
                };
                self.chembl.get_compound_properties(&id).await
            }
            "get_compound_bioactivities_summary" => {
                let Some(id) = arg_str(params, "chembl_id") else {
                    return missing("chembl_id");
                };
                let kind = arg_str(params, "activity_type");
                self.chembl
                    .get_compound_bioactivities_summary(
                        &id,
                        kind.as_deref(),
                        arg_usize(params, "max_results", 5),
                    )
                    .await
            }
            "get_drug_approval_status" => {
                let Some(id) = arg_str(params, "chembl_id") else {
                    return missing("chembl_id");
                };
                self.chembl.get_drug_approval_status(&id).await
            }
            "get_drug_moa" => {
                let Some(id) = arg_str(params, "chembl_id") else {
                    return missing("chembl_id");
                };
                self.chembl
                    .get_drug_moa(&id, arg_usize(params, "limit", 5))
                    .await
            }
            "get_drug_indications" => {
                let Some(id) = arg_str(params, "chembl_id") else {
                    return missing("chembl_id");
                };
                self.chembl
                    .get_drug_indications(&id, arg_usize(params, "limit", 5))
                    .await
            }
            "search_target_id" => {
                let Some(query) = arg_str(params, "query") else {
                    return missing("query");
                };
                self.chembl
                    .search_target_id(&query, arg_usize(params, "limit", 5))
                    .await
            }
            "get_target_activities_summary" => {
                let Some(id) = arg_str(params, "target_chembl_id") else {
                    return missing("target_chembl_id");
                };
                let kind = arg_str(params, "activity_type");
                self.chembl
                    .get_target_activities_summary(
                        &id,
                        kind.as_deref(),
                        arg_usize(params, "max_compounds", 5),
                    )
                    .await
            }
            "search_cellosaurus_ac" => {
                let Some(query) = arg_str(params, "query") else {
                    return missing("query");
                };
                self.cellosaurus.search_cellosaurus_ac(&query).await
            }
            "get_cellosaurus_summary" => {
                let Some(ac) = arg_str(params, "ac") else {
                    return missing("ac");
                };
                self.cellosaurus.get_cellosaurus_summary(&ac).await
            }
            _ => return ToolResult::err(format!("Unknown tool: {}", name)),
        };

        ToolResult::ok(Value::String(summary))
    }
}

#[async_trait]
impl ToolExecutor for ToolBox {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.get_tool_definitions()
    }

    async fn execute(&self, name: &str, params: &HashMap<String, Value>) -> ToolResult {
        ToolBox::execute(self, name, params).await
    }
}

fn def(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn missing(arg: &str) -> ToolResult {
    ToolResult::err(format!("Missing required argument '{}'", arg))
}

/// String argument; numbers are accepted and rendered (CIDs often arrive as integers).
fn arg_str(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn arg_usize(params: &HashMap<String, Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(number)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
        .unwrap_or(default)
}

/// Numeric value of a JSON number or numeric string.
pub(crate) fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Display form of a JSON scalar: strings without quotes, null as empty.
pub(crate) fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The `String` entries of a PUG View `StringWithMarkup` value.
pub(crate) fn with_markup_strings(value: &Value) -> Vec<String> {
    value
        .get("StringWithMarkup")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("String").and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Relative endpoint joined from raw path segments, each percent-encoded.
pub(crate) fn endpoint(segments: &[&str]) -> Result<String> {
    let mut url = Url::parse(SEGMENT_BASE).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidArgument(format!("{} cannot carry a path", SEGMENT_BASE)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.path().trim_start_matches('/').to_string())
}
