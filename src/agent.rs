//! ReAct-style tool-using agent and the predictor/reflector built on it.
//!
//! Each step the model answers with one JSON object
//! `{"thought": ..., "tool": ..., "args": {...}}`. The named tool runs and its
//! observation is appended to the trajectory shown in the next prompt. The
//! loop stops when the model calls `finish` or after `max_iters` steps, then
//! one extraction call turns the trajectory into the signature's outputs.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::llm::LanguageModel;
use crate::metrics::AgentUsage;
use crate::models::{
    BatchInstructions, LitlInput, LitlPrediction, LitlUnit, ReflectTraceUnit, TraceUnit,
    TrajectoryStep,
};
use crate::prism::PrismTask;
use crate::signatures::{
    extract_json_object, Signature, BATCH_REFLECT, PREDICT_IC50_DRUG_CELL,
    PREDICT_IC50_FROM_IDENTIFIER, REFLECT_IC50_DRUG_CELL,
};
use crate::tools::ToolExecutor;

pub const FINISH_TOOL: &str = "finish";
pub const INVALID_TOOL: &str = "invalid";
pub const MAX_OBSERVATION_BYTES: usize = 4000;
const EXTRACT_ATTEMPTS: usize = 2;
const DEFAULT_MAX_ITERS: usize = 8;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// What an agent run produced.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub outputs: Map<String, Value>,
    pub trajectory: Vec<TrajectoryStep>,
    pub usage: AgentUsage,
}

pub struct ReActAgent {
    signature: Signature,
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolExecutor>,
    max_iters: usize,
    max_tokens: u32,
}

struct ParsedStep {
    thought: String,
    tool: String,
    args: Map<String, Value>,
}

impl ReActAgent {
    pub fn new(
        signature: Signature,
        model: Arc<dyn LanguageModel>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            signature,
            model,
            tools,
            max_iters: DEFAULT_MAX_ITERS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub async fn run(&self, inputs: &Map<String, Value>) -> Result<AgentOutcome> {
        let rendered = self.signature.render_inputs(inputs)?;
        let system = self.step_system_prompt();
        let mut trajectory: Vec<TrajectoryStep> = Vec::new();
        let mut usage = AgentUsage::default();

        for step in 1..=self.max_iters {
            let prompt = format!(
                "{}\n\n{}\n\nNext step:",
                rendered,
                render_trajectory(&trajectory)
            );
            let response = self
                .model
                .complete(&prompt, Some(&system), self.max_tokens)
                .await?;
            usage.record_completion(&response);

            let parsed = match parse_step(&response.content) {
                Ok(parsed) => parsed,
                Err(reason) => {
                    warn!(signature = self.signature.name, step, %reason, "unparsable agent step");
                    trajectory.push(TrajectoryStep {
                        step,
                        thought: truncate_observation(response.content),
                        tool: INVALID_TOOL.to_string(),
                        args: Value::Null,
                        observation: format!(
                            "{} Reply with exactly one JSON object: \
                             {{\"thought\": \"...\", \"tool\": \"<tool name>\", \"args\": {{...}}}}.",
                            reason
                        ),
                    });
                    continue;
                }
            };

            if parsed.tool == FINISH_TOOL {
                trajectory.push(TrajectoryStep {
                    step,
                    thought: parsed.thought,
                    tool: parsed.tool,
                    args: Value::Object(parsed.args),
                    observation: "Completed.".to_string(),
                });
                break;
            }

            let params: HashMap<String, Value> = parsed
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let result = self.tools.execute(&parsed.tool, &params).await;
            usage.record_tool_call();
            debug!(
                signature = self.signature.name,
                step,
                tool = %parsed.tool,
                success = result.success,
                "tool call finished"
            );

            trajectory.push(TrajectoryStep {
                step,
                thought: parsed.thought,
                tool: parsed.tool,
                args: Value::Object(parsed.args),
                observation: truncate_observation(result.observation()),
            });
        }

        let outputs = self.extract(&rendered, &trajectory, &mut usage).await?;
        Ok(AgentOutcome {
            outputs,
            trajectory,
            usage,
        })
    }

    async fn extract(
        &self,
        rendered: &str,
        trajectory: &[TrajectoryStep],
        usage: &mut AgentUsage,
    ) -> Result<Map<String, Value>> {
        let system = format!(
            "{}\n\nRespond with one JSON object and nothing else. Fields:\n{}",
            self.signature.instructions,
            self.signature.output_schema()
        );
        let mut prompt = format!(
            "{}\n\n{}\n\nGive your final answer now.",
            rendered,
            render_trajectory(trajectory)
        );

        let mut last_err = None;
        for attempt in 1..=EXTRACT_ATTEMPTS {
            let response = self
                .model
                .complete(&prompt, Some(&system), self.max_tokens)
                .await?;
            usage.record_completion(&response);
            match self.signature.parse_outputs(&response.content) {
                Ok(outputs) => return Ok(outputs),
                Err(e) => {
                    warn!(signature = self.signature.name, attempt, error = %e, "rejected final answer");
                    prompt.push_str(&format!(
                        "\n\nYour previous answer was rejected ({}). Answer with the JSON object only.",
                        e
                    ));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::Parse(format!("{}: no final answer", self.signature.name))))
    }

    fn step_system_prompt(&self) -> String {
        let mut tools: Vec<String> = self
            .tools
            .definitions()
            .into_iter()
            .map(|d| format!("- {}: {} Arguments: {}", d.name, d.description, d.parameters))
            .collect();
        tools.push(format!(
            "- {}: Signal that you have gathered enough information to answer. Arguments: {{}}",
            FINISH_TOOL
        ));

        format!(
            "{}\n\nYou work step by step. In each step reply with one JSON object \
             {{\"thought\": \"<your reasoning>\", \"tool\": \"<tool name>\", \"args\": {{...}}}}. \
             After each call you will see the tool's observation. Call `{}` when you are done.\n\n\
             Available tools:\n{}\n\nYour final answer will need:\n{}",
            self.signature.instructions,
            FINISH_TOOL,
            tools.join("\n"),
            self.signature.output_schema()
        )
    }
}

fn parse_step(text: &str) -> std::result::Result<ParsedStep, String> {
    let raw = extract_json_object(text).ok_or_else(|| "No JSON object found.".to_string())?;
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("Invalid JSON ({}).", e))?;
    let tool = value
        .get("tool")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "Missing \"tool\" field.".to_string())?
        .to_string();
    let thought = value
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let args = match value.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err("\"args\" must be an object.".to_string()),
    };
    Ok(ParsedStep {
        thought,
        tool,
        args,
    })
}

/// Cut `text` to at most [`MAX_OBSERVATION_BYTES`] bytes on a char boundary.
pub fn truncate_observation(text: String) -> String {
    if text.len() <= MAX_OBSERVATION_BYTES {
        return text;
    }
    let mut end = MAX_OBSERVATION_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} ...[truncated]", &text[..end])
}

/// Human-readable trajectory, as shown to the model.
pub fn render_trajectory(trajectory: &[TrajectoryStep]) -> String {
    if trajectory.is_empty() {
        return "Trajectory: (no steps yet)".to_string();
    }
    let steps: Vec<String> = trajectory
        .iter()
        .map(|s| {
            format!(
                "[step {}]\nthought: {}\ntool: {}\nargs: {}\nobservation: {}",
                s.step, s.thought, s.tool, s.args, s.observation
            )
        })
        .collect();
    format!("Trajectory:\n{}", steps.join("\n\n"))
}

fn output_f64(outputs: &Map<String, Value>, name: &str) -> Result<f64> {
    outputs
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Parse(format!("output '{}' is not a number", name)))
}

fn output_str(outputs: &Map<String, Value>, name: &str) -> String {
    outputs
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn output_confidence(outputs: &Map<String, Value>) -> u8 {
    outputs
        .get("confidence")
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .clamp(0, 100) as u8
}

fn opt(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

/// Extra context handed to a prediction.
#[derive(Debug, Clone, Default)]
pub struct PredictionContext {
    pub tool_context: Option<String>,
    pub additional_bio_context: Option<String>,
}

/// Provisional IC50 predictions with tools.
pub struct Predictor {
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolExecutor>,
    max_iters: usize,
    max_tokens: u32,
}

impl Predictor {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            model,
            tools,
            max_iters: DEFAULT_MAX_ITERS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn agent(&self, signature: Signature) -> ReActAgent {
        ReActAgent::new(signature, self.model.clone(), self.tools.clone())
            .with_max_iters(self.max_iters)
            .with_max_tokens(self.max_tokens)
    }

    pub async fn predict(&self, task: &PrismTask, context: &PredictionContext) -> Result<TraceUnit> {
        self.predict_traced(task, context).await.map(|(trace, _)| trace)
    }

    /// Like [`Predictor::predict`], also returning model and tool usage.
    pub async fn predict_traced(
        &self,
        task: &PrismTask,
        context: &PredictionContext,
    ) -> Result<(TraceUnit, AgentUsage)> {
        let description = task.experimental_description();
        let mut inputs = Map::new();
        inputs.insert("drug".into(), json!(task.drug));
        inputs.insert("cell_line".into(), json!(task.cell_line));
        inputs.insert("experimental_description".into(), json!(description));
        inputs.insert("output_unit".into(), json!(task.output_unit));
        inputs.insert("tool_context".into(), opt(context.tool_context.as_deref()));
        inputs.insert(
            "additional_bio_context".into(),
            opt(context.additional_bio_context.as_deref()),
        );

        let outcome = self.agent(PREDICT_IC50_DRUG_CELL).run(&inputs).await?;
        let ic50_pred = output_f64(&outcome.outputs, "ic50_pred")?;
        let confidence = output_confidence(&outcome.outputs);

        let trace = TraceUnit::new(&task.drug, &task.cell_line)
            .with_description(Some(description))
            .with_output_unit(&task.output_unit)
            .with_prediction(
                ic50_pred,
                confidence,
                output_str(&outcome.outputs, "explanation"),
                outcome.trajectory,
            )?;

        info!(
            drug = %task.drug,
            cell_line = %task.cell_line,
            ic50_pred,
            confidence,
            "prediction complete"
        );
        Ok((trace, outcome.usage))
    }

    /// Predict from a bare drug identifier.
    pub async fn predict_from_identifier(&self, input: &LitlInput, iter: u32) -> Result<LitlUnit> {
        let mut inputs = Map::new();
        inputs.insert(
            "identifier_type".into(),
            json!(input.identifier.kind.as_str()),
        );
        inputs.insert("identifier_value".into(), json!(input.identifier.value));
        inputs.insert(
            "experimental_description".into(),
            json!(input.identifier.experimental_description),
        );
        inputs.insert("output_unit".into(), json!(input.output_unit));

        let outcome = self.agent(PREDICT_IC50_FROM_IDENTIFIER).run(&inputs).await?;
        let predicted_ic50 = output_f64(&outcome.outputs, "predicted_ic50")?;
        if !(predicted_ic50 > 0.0 && predicted_ic50.is_finite()) {
            return Err(Error::Validation(format!(
                "predicted_ic50 must be greater than 0, got {}",
                predicted_ic50
            )));
        }

        Ok(LitlUnit {
            unit_id: input.unit_id.clone(),
            iter,
            identifier: input.identifier.clone(),
            prediction: LitlPrediction {
                value: output_str(&outcome.outputs, "drug_identifier_out"),
                predicted_ic50,
                confidence: output_confidence(&outcome.outputs),
                explanation: output_str(&outcome.outputs, "explanation"),
                trajectory: outcome.trajectory,
            },
        })
    }
}

/// Reflection on scored predictions.
pub struct Reflector {
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolExecutor>,
    max_iters: usize,
    max_tokens: u32,
}

impl Reflector {
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            model,
            tools,
            max_iters: DEFAULT_MAX_ITERS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn reflect(
        &self,
        trace: &TraceUnit,
        drug_notes: Option<&str>,
        cell_line_notes: Option<&str>,
    ) -> Result<ReflectTraceUnit> {
        self.reflect_traced(trace, drug_notes, cell_line_notes)
            .await
            .map(|(reflection, _)| reflection)
    }

    pub async fn reflect_traced(
        &self,
        trace: &TraceUnit,
        drug_notes: Option<&str>,
        cell_line_notes: Option<&str>,
    ) -> Result<(ReflectTraceUnit, AgentUsage)> {
        let (Some(ic50_true), Some(ic50_pred)) = (trace.ic50_true, trace.ic50_pred) else {
            return Err(Error::Validation(format!(
                "cannot reflect on {}/{} without both predicted and measured IC50",
                trace.drug, trace.cell_line
            )));
        };

        let mut inputs = Map::new();
        inputs.insert("drug".into(), json!(trace.drug));
        inputs.insert("cell_line".into(), json!(trace.cell_line));
        inputs.insert(
            "experimental_description".into(),
            opt(trace.experimental_description.as_deref()),
        );
        inputs.insert("output_unit".into(), json!(trace.output_unit));
        inputs.insert("ic50_true".into(), json!(ic50_true));
        inputs.insert("ic50_pred".into(), json!(ic50_pred));
        inputs.insert("confidence".into(), json!(trace.confidence.unwrap_or(0)));
        inputs.insert(
            "explanation".into(),
            json!(trace.explanation.clone().unwrap_or_default()),
        );
        inputs.insert(
            "provisional_trajectory".into(),
            trace
                .trajectory
                .as_deref()
                .map_or(Value::Null, |t| Value::String(render_trajectory(t))),
        );
        inputs.insert("existing_drug_calibration".into(), opt(drug_notes));
        inputs.insert("existing_cell_line_calibration".into(), opt(cell_line_notes));

        let outcome = ReActAgent::new(REFLECT_IC50_DRUG_CELL, self.model.clone(), self.tools.clone())
            .with_max_iters(self.max_iters)
            .with_max_tokens(self.max_tokens)
            .run(&inputs)
            .await?;

        let mut reflection: ReflectTraceUnit =
            serde_json::from_value(Value::Object(outcome.outputs))?;
        reflection.trajectory = Some(outcome.trajectory);
        info!(drug = %trace.drug, cell_line = %trace.cell_line, "reflection complete");
        Ok((reflection, outcome.usage))
    }

    /// Turn several scored predictions of one pair into drug and cell line instructions.
    pub async fn batch_reflect(
        &self,
        traces: &[TraceUnit],
        existing: Option<&BatchInstructions>,
    ) -> Result<BatchInstructions> {
        let first = traces
            .first()
            .ok_or_else(|| Error::InvalidArgument("batch reflection needs at least one trace".into()))?;
        if traces
            .iter()
            .any(|t| t.drug != first.drug || t.cell_line != first.cell_line)
        {
            return Err(Error::Validation(
                "batch reflection traces must share one drug/cell line pair".into(),
            ));
        }
        let ic50_true = first.ic50_true.ok_or_else(|| {
            Error::Validation(format!(
                "cannot reflect on {}/{} without a measured IC50",
                first.drug, first.cell_line
            ))
        })?;

        let colleague_traces: Vec<Value> = traces
            .iter()
            .map(|t| {
                json!({
                    "trajectory": t.trajectory,
                    "ic50_pred": t.ic50_pred,
                    "explanation": t.explanation,
                    "confidence": t.confidence,
                    "evaluation": t.metrics,
                })
            })
            .collect();

        let mut inputs = Map::new();
        inputs.insert("drug".into(), json!(first.drug));
        inputs.insert("cell_line".into(), json!(first.cell_line));
        inputs.insert(
            "experimental_description".into(),
            opt(first.experimental_description.as_deref()),
        );
        inputs.insert("output_unit".into(), json!(first.output_unit));
        inputs.insert("ic50_true".into(), json!(ic50_true));
        inputs.insert("colleague_prediction_traces".into(), Value::Array(colleague_traces));
        inputs.insert(
            "existing_drug_instructions".into(),
            opt(existing.map(|e| e.drug_instructions.as_str())),
        );
        inputs.insert(
            "existing_cell_line_instructions".into(),
            opt(existing.map(|e| e.cell_line_instructions.as_str())),
        );

        let outcome = ReActAgent::new(BATCH_REFLECT, self.model.clone(), self.tools.clone())
            .with_max_iters(0)
            .with_max_tokens(self.max_tokens)
            .run(&inputs)
            .await?;
        Ok(serde_json::from_value(Value::Object(outcome.outputs))?)
    }
}
