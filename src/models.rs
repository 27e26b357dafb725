//! Task and trace records exchanged between the predictor, the reflector and
//! the trace store.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::evaluation::Evaluation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Name,
    PrismId,
    Smiles,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Name => "name",
            IdentifierType::PrismId => "prism_id",
            IdentifierType::Smiles => "smiles",
        }
    }
}

/// Minimal handle on a drug; everything else is fetched through tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitlIdentifier {
    #[serde(rename = "type")]
    pub kind: IdentifierType,
    pub value: String,
    pub experimental_description: String,
}

/// One drug to predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitlInput {
    #[serde(default = "new_unit_id")]
    pub unit_id: String,
    pub identifier: LitlIdentifier,
    pub output_unit: String,
}

impl LitlInput {
    pub fn new(identifier: LitlIdentifier, output_unit: impl Into<String>) -> Self {
        Self {
            unit_id: new_unit_id(),
            identifier,
            output_unit: output_unit.into(),
        }
    }
}

/// `unit-` followed by 12 hex characters.
pub fn new_unit_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("unit-{}", &hex[..12])
}

/// One ReAct step: what the model thought, which tool it called, what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub step: usize,
    pub thought: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub observation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitlPrediction {
    /// Echo of the identifier value
    pub value: String,
    pub predicted_ic50: f64,
    pub confidence: u8,
    pub explanation: String,
    #[serde(default)]
    pub trajectory: Vec<TrajectoryStep>,
}

/// Full record of one identifier-based prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LitlUnit {
    pub unit_id: String,
    pub iter: u32,
    pub identifier: LitlIdentifier,
    pub prediction: LitlPrediction,
}

fn default_trace_unit() -> String {
    "nM".to_string()
}

/// One drug/cell-line prediction, later annotated with the measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceUnit {
    pub drug: String,
    pub cell_line: String,
    #[serde(default)]
    pub experimental_description: Option<String>,
    #[serde(default = "default_trace_unit")]
    pub output_unit: String,

    #[serde(default, deserialize_with = "positive_ic50")]
    pub ic50_pred: Option<f64>,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub trajectory: Option<Vec<TrajectoryStep>>,

    #[serde(default)]
    pub ic50_true: Option<f64>,
    #[serde(default)]
    pub metrics: Option<Evaluation>,
}

fn positive_ic50<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<f64>, D::Error> {
    let value = Option::<f64>::deserialize(d)?;
    match value {
        Some(v) if !(v > 0.0) => Err(D::Error::custom(format!(
            "ic50_pred must be greater than 0, got {}",
            v
        ))),
        other => Ok(other),
    }
}

impl TraceUnit {
    pub fn new(drug: impl Into<String>, cell_line: impl Into<String>) -> Self {
        Self {
            drug: drug.into(),
            cell_line: cell_line.into(),
            experimental_description: None,
            output_unit: default_trace_unit(),
            ic50_pred: None,
            confidence: None,
            explanation: None,
            trajectory: None,
            ic50_true: None,
            metrics: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.experimental_description = description;
        self
    }

    pub fn with_output_unit(mut self, unit: impl Into<String>) -> Self {
        self.output_unit = unit.into();
        self
    }

    /// Attach a prediction; the IC50 must be strictly positive.
    pub fn with_prediction(
        mut self,
        ic50_pred: f64,
        confidence: u8,
        explanation: impl Into<String>,
        trajectory: Vec<TrajectoryStep>,
    ) -> Result<Self> {
        if !(ic50_pred > 0.0 && ic50_pred.is_finite()) {
            return Err(Error::Validation(format!(
                "ic50_pred must be greater than 0, got {}",
                ic50_pred
            )));
        }
        self.ic50_pred = Some(ic50_pred);
        self.confidence = Some(confidence.min(100));
        self.explanation = Some(explanation.into());
        self.trajectory = Some(trajectory);
        Ok(self)
    }
}

/// Outcome of reflecting on one scored prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectTraceUnit {
    pub verdict: String,
    pub drug_specific_calibration: String,
    pub cell_line_specific_calibration: String,
    pub task_specific_calibration: String,
    #[serde(default)]
    pub general_notes: Vec<String>,
    #[serde(default)]
    pub trajectory: Option<Vec<TrajectoryStep>>,
}

/// Instruction sets produced by reflecting over several predictions of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInstructions {
    pub drug_instructions: String,
    pub cell_line_instructions: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_id_format() {
        let id = new_unit_id();
        assert!(id.starts_with("unit-"));
        assert_eq!(id.len(), 17);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_unit_id());
    }

    #[test]
    fn test_identifier_serde() {
        let input: LitlInput = serde_json::from_value(json!({
            "identifier": {"type": "prism_id", "value": "BRD-K12345",
                           "experimental_description": "A549 viability"},
            "output_unit": "uM"
        }))
        .unwrap();
        assert_eq!(input.identifier.kind, IdentifierType::PrismId);
        assert!(input.unit_id.starts_with("unit-"));
        let back = serde_json::to_value(&input).unwrap();
        assert_eq!(back["identifier"]["type"], "prism_id");
    }

    #[test]
    fn test_trace_unit_defaults() {
        let t: TraceUnit =
            serde_json::from_value(json!({"drug": "imatinib", "cell_line": "K562"})).unwrap();
        assert_eq!(t.output_unit, "nM");
        assert!(t.ic50_pred.is_none());
        assert!(t.metrics.is_none());
    }

    #[test]
    fn test_trace_unit_rejects_non_positive_ic50_on_load() {
        let err = serde_json::from_value::<TraceUnit>(
            json!({"drug": "x", "cell_line": "y", "ic50_pred": 0.0}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_with_prediction_validates() {
        let base = TraceUnit::new("imatinib", "K562").with_output_unit("uM");
        assert!(matches!(
            base.clone().with_prediction(-1.0, 50, "", vec![]),
            Err(Error::Validation(_))
        ));
        let t = base.with_prediction(0.25, 140, "BCR-ABL driven", vec![]).unwrap();
        assert_eq!(t.ic50_pred, Some(0.25));
        assert_eq!(t.confidence, Some(100));
        assert_eq!(t.output_unit, "uM");
    }

    #[test]
    fn test_reflect_unit_general_notes_default() {
        let r: ReflectTraceUnit = serde_json::from_value(json!({
            "verdict": "v", "drug_specific_calibration": "d",
            "cell_line_specific_calibration": "c", "task_specific_calibration": "t"
        }))
        .unwrap();
        assert!(r.general_notes.is_empty());
    }
}
