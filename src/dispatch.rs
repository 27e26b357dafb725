//! Work queue of PRISM tasks for one LITL run.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::error::{Error, Result};
use crate::prism::PrismTask;

/// Pending tasks, tasks handed out but not finished, and the keys of finished ones.
#[derive(Debug, Clone)]
pub struct PrismDispatchQueue {
    name: String,
    pending: VecDeque<PrismTask>,
    in_flight: HashSet<(String, String)>,
    completed_keys: Vec<(String, String)>,
}

impl PrismDispatchQueue {
    pub fn new(name: impl Into<String>, tasks: Vec<PrismTask>) -> Self {
        Self {
            name: name.into(),
            pending: tasks.into(),
            in_flight: HashSet::new(),
            completed_keys: Vec::new(),
        }
    }

    /// Shuffle the pending tasks reproducibly.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        self.pending.make_contiguous().shuffle(&mut rng);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand out the next pending task.
    pub fn dispatch(&mut self) -> Option<PrismTask> {
        let task = self.pending.pop_front()?;
        self.in_flight.insert(task.key());
        debug!(queue = %self.name, drug = %task.drug, cell_line = %task.cell_line, "dispatched task");
        Some(task)
    }

    /// Mark an in-flight task as done.
    pub fn complete(&mut self, task: &PrismTask) -> Result<()> {
        let key = task.key();
        if !self.in_flight.remove(&key) {
            return Err(Error::InvalidArgument(format!(
                "task {}/{} is not in flight on queue '{}'",
                key.0, key.1, self.name
            )));
        }
        self.completed_keys.push(key);
        Ok(())
    }

    /// Put an in-flight task back at the end of the queue.
    pub fn requeue(&mut self, task: PrismTask) -> Result<()> {
        if !self.in_flight.remove(&task.key()) {
            return Err(Error::InvalidArgument(format!(
                "task {}/{} is not in flight on queue '{}'",
                task.drug, task.cell_line, self.name
            )));
        }
        self.pending.push_back(task);
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// `(drug, cell_line)` of every completed task, in completion order.
    pub fn completed_keys(&self) -> &[(String, String)] {
        &self.completed_keys
    }
}
