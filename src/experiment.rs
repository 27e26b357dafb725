//! The lab-in-the-loop run: predict, score against PRISM, reflect, remember.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

use crate::agent::{PredictionContext, Predictor, Reflector};
use crate::dispatch::PrismDispatchQueue;
use crate::error::{Error, Result};
use crate::evaluation::{evaluate, Evaluation};
use crate::history::LitlHistory;
use crate::metrics::RunMetrics;
use crate::notes::CalibrationBook;
use crate::prism::PrismTask;
use crate::store::{TraceRecord, TraceStore};

/// Outcome of [`LitlRunner::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Tasks that produced a record
    pub count: usize,
    pub failures: usize,
    pub mean_fold_error: Option<f64>,
    pub within_3_fold_rate: Option<f64>,
    pub metrics: RunMetrics,
}

pub struct LitlRunner {
    predictor: Predictor,
    reflector: Reflector,
    queue: PrismDispatchQueue,
    store: TraceStore,
    notes: CalibrationBook,
    notes_path: Option<PathBuf>,
    tool_context: Option<String>,
    metrics: RunMetrics,
}

impl LitlRunner {
    pub fn new(
        predictor: Predictor,
        reflector: Reflector,
        queue: PrismDispatchQueue,
        store: TraceStore,
        notes: CalibrationBook,
    ) -> Self {
        Self {
            predictor,
            reflector,
            queue,
            store,
            notes,
            notes_path: None,
            tool_context: None,
            metrics: RunMetrics::new(),
        }
    }

    /// Persist the notes book to `path` after every reflection.
    pub fn with_notes_path(mut self, path: PathBuf) -> Self {
        self.notes_path = Some(path);
        self
    }

    pub fn with_tool_context(mut self, context: impl Into<String>) -> Self {
        self.tool_context = Some(context.into());
        self
    }

    pub fn queue(&self) -> &PrismDispatchQueue {
        &self.queue
    }

    pub fn notes(&self) -> &CalibrationBook {
        &self.notes
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Work through at most `limit` tasks (all pending ones when `None`).
    pub async fn run(&mut self, limit: Option<usize>) -> Result<RunSummary> {
        let mut iteration = self.store.next_iteration()?;
        let mut evaluations: Vec<Evaluation> = Vec::new();
        let mut failures = 0usize;
        let mut attempted = 0usize;

        while limit.map_or(true, |l| attempted < l) {
            let Some(task) = self.queue.dispatch() else {
                break;
            };
            attempted += 1;
            self.metrics.record_task();

            match self.run_task(&task, iteration).await {
                Ok(evaluation) => {
                    info!(
                        iteration,
                        drug = %task.drug,
                        cell_line = %task.cell_line,
                        fold_error = evaluation.fold_error,
                        "task complete"
                    );
                    evaluations.push(evaluation);
                    iteration += 1;
                }
                Err(e) => {
                    failures += 1;
                    error!(drug = %task.drug, cell_line = %task.cell_line, error = %e, "task failed");
                }
            }
            self.queue.complete(&task)?;
        }

        let count = evaluations.len();
        let (mean_fold_error, within_3_fold_rate) = if count == 0 {
            (None, None)
        } else {
            let n = count as f64;
            (
                Some(evaluations.iter().map(|e| e.fold_error).sum::<f64>() / n),
                Some(evaluations.iter().filter(|e| e.within_3_fold).count() as f64 / n),
            )
        };

        let summary = RunSummary {
            count,
            failures,
            mean_fold_error,
            within_3_fold_rate,
            metrics: self.metrics.clone(),
        };
        info!(
            count,
            failures,
            pending = self.queue.pending_len(),
            tool_calls = self.metrics.tool_calls,
            "LITL run finished"
        );
        Ok(summary)
    }

    async fn run_task(&mut self, task: &PrismTask, iteration: u64) -> Result<Evaluation> {
        let ic50_true = task.ic50_true.ok_or_else(|| {
            Error::Validation(format!(
                "task {}/{} has no measured IC50",
                task.drug, task.cell_line
            ))
        })?;
        let history = LitlHistory::new(vec![&self.queue])?
            .find_relevant(Some(&task.drug), Some(&task.cell_line))?;
        let bio_context = match self.notes.context_for(&task.drug, &task.cell_line) {
            Some(notes) => format!("{}\n\n{}", history, notes),
            None => history,
        };
        let context = PredictionContext {
            tool_context: self.tool_context.clone(),
            additional_bio_context: Some(bio_context),
        };

        let (mut trace, usage) = match self.predictor.predict_traced(task, &context).await {
            Ok(done) => done,
            Err(e) => {
                self.metrics.record_prediction_failure();
                return Err(e);
            }
        };
        self.metrics.record_prediction(&usage);

        let ic50_pred = trace
            .ic50_pred
            .ok_or_else(|| Error::Validation("prediction carries no IC50".into()))?;
        let evaluation = evaluate(ic50_pred, ic50_true)?;
        trace.ic50_true = Some(ic50_true);
        trace.metrics = Some(evaluation.clone());

        let reflected = self
            .reflector
            .reflect_traced(
                &trace,
                self.notes.drug_notes(&task.drug),
                self.notes.cell_line_notes(&task.cell_line),
            )
            .await;
        let (reflection, usage) = match reflected {
            Ok(done) => done,
            Err(e) => {
                self.metrics.record_reflection_failure();
                return Err(e);
            }
        };
        self.metrics.record_reflection(&usage);

        self.notes.apply(&task.drug, &task.cell_line, &reflection);
        if let Some(path) = &self.notes_path {
            self.notes.save(path)?;
        }
        self.store
            .append(&TraceRecord::new(iteration, trace, Some(reflection)))?;
        Ok(evaluation)
    }
}
