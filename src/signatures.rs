//! Declarative input/output contracts for the agent.
//!
//! A [`Signature`] names the fields a model call receives and the fields it
//! must answer with. The agent renders the inputs into the prompt and parses
//! the model's final JSON answer back against the outputs.

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    OptStr,
    Float,
    Int,
    StrList,
    Json,
}

impl FieldKind {
    fn type_hint(&self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::OptStr => "string or null",
            FieldKind::Float => "number",
            FieldKind::Int => "integer",
            FieldKind::StrList => "list of strings",
            FieldKind::Json => "JSON value",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind, description: &'static str) -> Field {
    Field {
        name,
        description,
        kind,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub name: &'static str,
    pub instructions: &'static str,
    pub inputs: &'static [Field],
    pub outputs: &'static [Field],
}

pub const PREDICT_IC50_FROM_IDENTIFIER: Signature = Signature {
    name: "PredictIC50FromIdentifier",
    instructions: "You are an expert pharmacologist and medicinal chemist predicting the IC50 \
of a drug against a biological target. You are given a single drug identifier (name, PRISM ID \
or SMILES). Tools can look up the drug target, mechanism of action and related data; to use \
that information you MUST call the tools explicitly.",
    inputs: &[
        field("identifier_type", FieldKind::Str, "One of: name | prism_id | smiles"),
        field("identifier_value", FieldKind::Str, "The actual identifier string"),
        field(
            "experimental_description",
            FieldKind::Str,
            "Brief description of the target or assay context (cell line, protein target, ...)",
        ),
        field("output_unit", FieldKind::Str, "Unit required for the predicted IC50"),
    ],
    outputs: &[
        field("drug_identifier_out", FieldKind::Str, "The input drug identifier repeated back"),
        field("predicted_ic50", FieldKind::Float, "Predicted IC50 in `output_unit`, strictly > 0"),
        field("confidence", FieldKind::Int, "Confidence in the prediction, 0-100"),
        field("explanation", FieldKind::Str, "How the prediction was reached"),
    ],
};

pub const PREDICT_IC50_DRUG_CELL: Signature = Signature {
    name: "PredictIC50DrugCell",
    instructions: "You are an expert pharmacologist and medicinal chemist. You are given a drug \
name and a cell line name that uniquely identify the pair, and optionally an experimental \
description of the assay. Provisionally predict the not yet measured cell viability IC50 of the \
drug against the cell line, using the knowledge bases available to you as tools. Call the tools \
explicitly to gather the evidence for your prediction. Higher level tool or task context may be \
supplied; when it is, follow it.",
    inputs: &[
        field("drug", FieldKind::Str, "Drug name or identifier"),
        field("cell_line", FieldKind::Str, "Cell line name or identifier"),
        field(
            "experimental_description",
            FieldKind::OptStr,
            "Optional experimental details relevant to the IC50, or None",
        ),
        field("output_unit", FieldKind::Str, "Unit required for the predicted IC50"),
        field("tool_context", FieldKind::OptStr, "Optional higher level context on tool usage"),
        field(
            "additional_bio_context",
            FieldKind::OptStr,
            "Optional additional context: past tasks and calibration notes",
        ),
    ],
    outputs: &[
        field(
            "ic50_pred",
            FieldKind::Float,
            "Predicted IC50 in `output_unit`, a float strictly greater than 0",
        ),
        field("confidence", FieldKind::Int, "Confidence in the prediction, 0-100"),
        field("explanation", FieldKind::Str, "Detailed explanation of the prediction"),
    ],
};

pub const REFLECT_IC50_DRUG_CELL: Signature = Signature {
    name: "ReflectIC50DrugCell",
    instructions: "You are a senior pharmacologist and medicinal chemist. A colleague made a \
provisional cell viability IC50 prediction for a drug against a cell line from existing \
knowledge only; the laboratory has now measured the true IC50. Critically evaluate the \
prediction against the measurement. You see the full prediction record, including the \
reasoning trajectory when available, and you have the same tools your colleague had. Identify \
sound and flawed reasoning steps and tool use, and write specific calibration notes that improve \
future predictions. Every note must be actionable with the available tools and knowledge; do NOT \
propose new experiments, consulting experts, or additional tools.",
    inputs: &[
        field("drug", FieldKind::Str, "Drug of the provisional prediction"),
        field("cell_line", FieldKind::Str, "Cell line of the provisional prediction"),
        field(
            "experimental_description",
            FieldKind::OptStr,
            "Optional experimental details, or None",
        ),
        field("output_unit", FieldKind::Str, "Unit of both IC50 values"),
        field("ic50_true", FieldKind::Float, "Measured IC50 in `output_unit`"),
        field("ic50_pred", FieldKind::Float, "Provisional IC50 in `output_unit`"),
        field("confidence", FieldKind::Int, "Confidence (0-100) of the provisional prediction"),
        field("explanation", FieldKind::Str, "Explanation given for the provisional prediction"),
        field(
            "provisional_trajectory",
            FieldKind::OptStr,
            "Optional step-by-step trajectory of the provisional prediction",
        ),
        field(
            "existing_drug_calibration",
            FieldKind::OptStr,
            "Existing drug-specific calibration notes, if any",
        ),
        field(
            "existing_cell_line_calibration",
            FieldKind::OptStr,
            "Existing cell line-specific calibration notes, if any",
        ),
    ],
    outputs: &[
        field(
            "verdict",
            FieldKind::Str,
            "Concise verdict comparing prediction and measurement; always state both values",
        ),
        field(
            "drug_specific_calibration",
            FieldKind::Str,
            "Drug-specific calibration: flaws, gaps and concrete improvements; integrate or \
replace existing drug notes",
        ),
        field(
            "cell_line_specific_calibration",
            FieldKind::Str,
            "Cell line-specific calibration: flaws, gaps and concrete improvements; integrate or \
replace existing cell line notes",
        ),
        field(
            "task_specific_calibration",
            FieldKind::Str,
            "Calibration specific to this exact drug/cell line pair",
        ),
        field(
            "general_notes",
            FieldKind::StrList,
            "Concise standalone takeaways that generalize across drugs and cell lines",
        ),
    ],
};

pub const BATCH_REFLECT: Signature = Signature {
    name: "BatchReflect",
    instructions: "You are a senior pharmacologist and medicinal chemist. Several colleagues made \
provisional cell viability IC50 predictions for one drug against one cell line from existing \
knowledge only; the laboratory has measured the true IC50. Evaluate their predictions and \
reasoning against the measurement and write concise, actionable instructions for future \
predictions, separately for the drug and for the cell line. Existing instructions are given, or \
None when there are none; your output overwrites them, so improve, integrate or replace them as \
serves future predictions best.",
    inputs: &[
        field("drug", FieldKind::Str, "Drug name or identifier"),
        field("cell_line", FieldKind::Str, "Cell line name or identifier"),
        field(
            "experimental_description",
            FieldKind::OptStr,
            "Optional experimental details, or None",
        ),
        field("output_unit", FieldKind::Str, "Unit of the IC50 values, e.g. nM or uM"),
        field("ic50_true", FieldKind::Float, "Measured IC50 in `output_unit`"),
        field(
            "colleague_prediction_traces",
            FieldKind::Json,
            "Prediction traces: trajectory steps, ic50_pred, explanation, confidence, evaluation",
        ),
        field(
            "existing_drug_instructions",
            FieldKind::OptStr,
            "Existing drug instructions; preserve what still holds, drop what is contradicted",
        ),
        field(
            "existing_cell_line_instructions",
            FieldKind::OptStr,
            "Existing cell line instructions; preserve what still holds, drop what is contradicted",
        ),
    ],
    outputs: &[
        field(
            "drug_instructions",
            FieldKind::Str,
            "Instructions for future predictions with this drug; describe cell line properties \
generically rather than naming the cell line",
        ),
        field(
            "cell_line_instructions",
            FieldKind::Str,
            "Instructions for future predictions on this cell line; describe drug properties \
generically rather than naming the drug",
        ),
    ],
};

impl Signature {
    /// Render the input fields as `name: value` lines.
    ///
    /// Missing optional inputs render as `None`; a missing required input is an error.
    pub fn render_inputs(&self, inputs: &Map<String, Value>) -> Result<String> {
        let mut lines = Vec::with_capacity(self.inputs.len());
        for f in self.inputs {
            let value = inputs.get(f.name).filter(|v| !v.is_null());
            let rendered = match (value, f.kind) {
                (None, FieldKind::OptStr) => "None".to_string(),
                (None, _) => {
                    return Err(Error::InvalidArgument(format!(
                        "{}: missing input '{}'",
                        self.name, f.name
                    )))
                }
                (Some(Value::String(s)), _) => s.clone(),
                (Some(Value::Array(_)) | Some(Value::Object(_)), _) => {
                    serde_json::to_string_pretty(value.unwrap_or(&Value::Null))?
                }
                (Some(other), _) => other.to_string(),
            };
            lines.push(format!("{}: {}", f.name, rendered));
        }
        Ok(lines.join("\n"))
    }

    /// Describe the expected answer object for the prompt.
    pub fn output_schema(&self) -> String {
        self.outputs
            .iter()
            .map(|f| format!("- \"{}\" ({}): {}", f.name, f.kind.type_hint(), f.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse a model answer into the output fields, coercing numeric strings.
    pub fn parse_outputs(&self, text: &str) -> Result<Map<String, Value>> {
        let raw = extract_json_object(text)
            .ok_or_else(|| Error::Parse(format!("{}: no JSON object in answer", self.name)))?;
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|e| Error::Parse(format!("{}: {}", self.name, e)))?;
        let Value::Object(mut obj) = parsed else {
            return Err(Error::Parse(format!("{}: answer is not an object", self.name)));
        };

        let mut out = Map::new();
        for f in self.outputs {
            let value = obj.remove(f.name).unwrap_or(Value::Null);
            if value.is_null() && f.kind != FieldKind::OptStr && f.kind != FieldKind::Json {
                return Err(Error::Parse(format!(
                    "{}: missing output '{}'",
                    self.name, f.name
                )));
            }
            let coerced = coerce(f, value).map_err(|found| {
                Error::Parse(format!(
                    "{}: output '{}' should be {}, got {}",
                    self.name,
                    f.name,
                    f.kind.type_hint(),
                    found
                ))
            })?;
            out.insert(f.name.to_string(), coerced);
        }
        Ok(out)
    }
}

fn coerce(f: &Field, value: Value) -> std::result::Result<Value, String> {
    match (f.kind, value) {
        (FieldKind::Json, v) => Ok(v),
        (FieldKind::Str, Value::String(s)) => Ok(Value::String(s)),
        (FieldKind::OptStr, v @ (Value::String(_) | Value::Null)) => Ok(v),
        (FieldKind::Float, Value::Number(n)) => Ok(Value::Number(n)),
        (FieldKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(s),
        (FieldKind::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => n
                .as_f64()
                .map(|x| Value::from(x.round() as i64))
                .ok_or_else(|| n.to_string()),
        },
        (FieldKind::Int, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(|x| Value::from(x.round() as i64))
            .map_err(|_| s),
        (FieldKind::StrList, Value::Array(items)) => Ok(Value::Array(
            items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Value::String(s),
                    other => Value::String(other.to_string()),
                })
                .collect(),
        )),
        (_, other) => Err(other.to_string()),
    }
}

/// The outermost `{ ... }` span of `text`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_inputs_with_missing_optional() {
        let inputs = map(json!({
            "drug": "imatinib", "cell_line": "K562", "output_unit": "uM",
            "experimental_description": null
        }));
        let text = PREDICT_IC50_DRUG_CELL.render_inputs(&inputs).unwrap();
        assert!(text.contains("drug: imatinib"));
        assert!(text.contains("experimental_description: None"));
        assert!(text.contains("tool_context: None"));
        assert!(text.contains("additional_bio_context: None"));
    }

    #[test]
    fn test_render_inputs_missing_required() {
        let inputs = map(json!({"drug": "imatinib"}));
        let err = PREDICT_IC50_DRUG_CELL.render_inputs(&inputs).unwrap_err();
        assert!(err.to_string().contains("cell_line"));
    }

    #[test]
    fn test_render_inputs_numbers_and_json() {
        let inputs = map(json!({
            "drug": "d", "cell_line": "c", "output_unit": "uM", "ic50_true": 1.5,
            "colleague_prediction_traces": [{"ic50_pred": 2.0}]
        }));
        let text = BATCH_REFLECT.render_inputs(&inputs).unwrap();
        assert!(text.contains("ic50_true: 1.5"));
        assert!(text.contains("\"ic50_pred\": 2.0"));
    }

    #[test]
    fn test_parse_outputs_coerces_numbers() {
        let answer = "Here is my answer:\n```json\n{\"ic50_pred\": \"0.35\", \"confidence\": 72.6, \
                      \"explanation\": \"BCR-ABL dependent line\"}\n```";
        let out = PREDICT_IC50_DRUG_CELL.parse_outputs(answer).unwrap();
        assert_eq!(out["ic50_pred"], json!(0.35));
        assert_eq!(out["confidence"], json!(73));
        assert_eq!(out["explanation"], "BCR-ABL dependent line");
    }

    #[test]
    fn test_parse_outputs_missing_field() {
        let err = PREDICT_IC50_DRUG_CELL
            .parse_outputs(r#"{"ic50_pred": 1.0, "confidence": 50}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("explanation")));
    }

    #[test]
    fn test_parse_outputs_wrong_kind() {
        let err = PREDICT_IC50_DRUG_CELL
            .parse_outputs(r#"{"ic50_pred": "about ten", "confidence": 50, "explanation": "x"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = REFLECT_IC50_DRUG_CELL
            .parse_outputs(
                r#"{"verdict": "v", "drug_specific_calibration": "d",
                    "cell_line_specific_calibration": "c", "task_specific_calibration": "t",
                    "general_notes": "not a list"}"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("general_notes"));
    }

    #[test]
    fn test_parse_outputs_without_json() {
        assert!(matches!(
            BATCH_REFLECT.parse_outputs("I cannot answer"),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_output_schema_lists_every_field() {
        let schema = REFLECT_IC50_DRUG_CELL.output_schema();
        for f in REFLECT_IC50_DRUG_CELL.outputs {
            assert!(schema.contains(f.name));
        }
        assert!(schema.contains("(list of strings)"));
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(extract_json_object("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("} {"), None);
        assert_eq!(extract_json_object("none"), None);
    }
}
