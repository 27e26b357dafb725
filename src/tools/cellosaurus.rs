//! Cellosaurus cell-line tools.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{endpoint, text};
use crate::cache::ToolCache;
use crate::client::{params, JsonApi};
use crate::error::Result;

const COMPACT_FIELDS: [&str; 7] = ["id", "site", "di", "ox", "sx", "age", "cell"];
const CELL_TYPE_DATABASES: [&str; 3] = ["BTO", "CL", "CLO"];

/// Bump an entry when its parsing changes so stale cached values are skipped.
const CACHE_VERSIONS: &[(&str, &str)] = &[("search_accessions", "1"), ("cell_line_summary", "1")];

/// Minimal description of one cell line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellLineSummary {
    pub recommended_name: Option<String>,
    pub tissues: Vec<String>,
    pub diseases: Vec<String>,
    pub species: Vec<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub cell_type: Option<String>,
}

impl CellLineSummary {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct CellosaurusTools {
    api: Arc<dyn JsonApi>,
    cache: ToolCache,
    fetch_limit: usize,
}

impl CellosaurusTools {
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

    /// Primary accessions for a cell line name or synonym.
    pub async fn search_accessions(&self, query: &str) -> Result<Vec<String>> {
        let rows = self.fetch_limit;
        self.cache
            .fetch("search_accessions", json!([query]), || async move {
                let q = format!("idsy:\"{}\"", query);
                let result = self
                    .api
                    .get_json(
                        "search/cell-line",
                        params(&[
                            ("q", q.as_str()),
                            ("rows", rows.to_string().as_str()),
                            ("format", "json"),
                            ("fields", "ac"),
                        ]),
                    )
                    .await?;
                Ok(cell_line_list(&result)
                    .iter()
                    .flat_map(|entry| list(entry, "accession-list"))
                    .filter(|a| a.get("type").and_then(Value::as_str) == Some("primary"))
                    .filter_map(|a| a.get("value").and_then(Value::as_str).map(str::to_string))
                    .collect())
            })
            .await
    }

    /// Summary for accession `ac`, from the compact field API when possible.
    pub async fn cell_line_summary(&self, ac: &str) -> Result<CellLineSummary> {
        self.cache
            .fetch("cell_line_summary", json!([ac]), || async move {
                let path = endpoint(&["cell-line", ac])?;
                let compact = self
                    .api
                    .get_json(
                        &path,
                        params(&[("fields", COMPACT_FIELDS.join(",").as_str()), ("format", "json")]),
                    )
                    .await?;
                if let Some(summary) = from_compact(&compact) {
                    return Ok(summary);
                }

                let full = self
                    .api
                    .get_json(&path, params(&[("format", "json")]))
                    .await?;
                Ok(cell_line_list(&full)
                    .first()
                    .map(from_full_record)
                    .unwrap_or_default())
            })
            .await
    }

    pub async fn search_cellosaurus_ac(&self, query: &str) -> String {
        match self.search_accessions(query).await {
            Ok(acs) if acs.is_empty() => format!("No Cellosaurus match for '{}'", query),
            Ok(acs) => format!("Cellosaurus ACs found for '{}': {}", query, acs.join(", ")),
            Err(_) => format!("Error searching Cellosaurus for '{}'", query),
        }
    }

    pub async fn get_cellosaurus_summary(&self, ac: &str) -> String {
        match self.cell_line_summary(ac).await {
            Ok(record) => render_summary(ac, &record),
            Err(_) => format!("Error fetching Cellosaurus summary for AC '{}'", ac),
        }
    }
}

pub fn render_summary(ac: &str, record: &CellLineSummary) -> String {
    if record.is_empty() {
        return format!("No Cellosaurus record found for AC '{}'", ac);
    }
    let mut parts = vec![format!("Cellosaurus summary for AC '{}':", ac)];
    if let Some(name) = &record.recommended_name {
        parts.push(format!("- Recommended Name: {}", name));
    }
    for (label, items) in [
        ("Species", &record.species),
        ("Tissues", &record.tissues),
        ("Diseases", &record.diseases),
    ] {
        if !items.is_empty() {
            let shown: Vec<&str> = items.iter().take(3).map(String::as_str).collect();
            parts.push(format!("- {}: {}", label, shown.join(", ")));
        }
    }
    if let Some(cell_type) = &record.cell_type {
        parts.push(format!("- Cell Type: {}", cell_type));
    }
    parts.join("\n")
}

fn cell_line_list(result: &Value) -> Vec<Value> {
    result
        .pointer("/Cellosaurus/cell-line-list")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn list(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn as_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).map(text).collect(),
        Some(other) => vec![text(other)],
    }
}

fn optional(value: Option<&Value>) -> Option<String> {
    value.filter(|v| !v.is_null()).map(text)
}

fn from_compact(flat: &Value) -> Option<CellLineSummary> {
    let obj = flat.as_object()?;
    if !COMPACT_FIELDS.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }
    Some(CellLineSummary {
        recommended_name: optional(obj.get("id")),
        tissues: as_list(obj.get("site")),
        diseases: as_list(obj.get("di")),
        species: as_list(obj.get("ox")),
        sex: optional(obj.get("sx")),
        age: optional(obj.get("age")),
        cell_type: optional(obj.get("cell")),
    })
}

fn label_or_value(v: &Value) -> Option<String> {
    ["label", "value"]
        .iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn from_full_record(entry: &Value) -> CellLineSummary {
    let recommended_name = list(entry, "name-list")
        .iter()
        .find(|n| n.get("type").and_then(Value::as_str) == Some("identifier"))
        .and_then(|n| n.get("value").and_then(Value::as_str))
        .map(str::to_string);

    let tissues = list(entry, "derived-from-site-list")
        .iter()
        .filter_map(|s| s.get("site").and_then(label_or_value))
        .collect();

    let cell_type = list(entry, "xref-list").iter().find_map(|xr| {
        let db = xr.get("database").and_then(Value::as_str)?;
        if !CELL_TYPE_DATABASES.contains(&db) {
            return None;
        }
        xr.get("label").and_then(Value::as_str).map(str::to_string)
    });

    CellLineSummary {
        recommended_name,
        tissues,
        diseases: list(entry, "disease-list").iter().filter_map(label_or_value).collect(),
        species: list(entry, "species-list").iter().filter_map(label_or_value).collect(),
        sex: optional(entry.get("sex")),
        age: optional(entry.get("age")),
        cell_type,
    }
}
