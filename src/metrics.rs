use serde::{Deserialize, Serialize};

use crate::llm::LLMResponse;

/// Model and tool usage of one agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AgentUsage {
    pub fn record_completion(&mut self, response: &LLMResponse) {
        self.llm_calls += 1;
        self.input_tokens += u64::from(response.input_tokens);
        self.output_tokens += u64::from(response.output_tokens);
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }
}

/// Counters for a LITL run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    pub tasks_total: u64,
    pub predictions: u64,
    pub prediction_failures: u64,
    pub reflections: u64,
    pub reflection_failures: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful prediction and its usage
    pub fn record_prediction(&mut self, usage: &AgentUsage) {
        self.predictions += 1;
        self.absorb(usage);
    }

    pub fn record_prediction_failure(&mut self) {
        self.prediction_failures += 1;
    }

    /// Record a successful reflection and its usage
    pub fn record_reflection(&mut self, usage: &AgentUsage) {
        self.reflections += 1;
        self.absorb(usage);
    }

    pub fn record_reflection_failure(&mut self) {
        self.reflection_failures += 1;
    }

    pub fn record_task(&mut self) {
        self.tasks_total += 1;
    }

    fn absorb(&mut self, usage: &AgentUsage) {
        self.llm_calls += usage.llm_calls;
        self.tool_calls += usage.tool_calls;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
    }

    /// Share of attempted predictions that succeeded, as a percentage
    pub fn success_rate(&self) -> f64 {
        let attempted = self.predictions + self.prediction_failures;
        if attempted == 0 {
            return 100.0;
        }
        (self.predictions as f64 / attempted as f64) * 100.0
    }
}
