//! Lookup of past LITL tasks that share a drug or a cell line.

use crate::dispatch::PrismDispatchQueue;
use crate::error::{Error, Result};

const MAX_LISTED: usize = 5;

pub struct LitlHistory<'a> {
    dispatchers: Vec<&'a PrismDispatchQueue>,
}

impl<'a> LitlHistory<'a> {
    pub fn new(dispatchers: Vec<&'a PrismDispatchQueue>) -> Result<Self> {
        if dispatchers.is_empty() {
            return Err(Error::InvalidArgument(
                "Expected a non-empty list of dispatch queues".into(),
            ));
        }
        Ok(Self { dispatchers })
    }

    /// Summarize completed tasks involving `drug` or `cell_line`.
    pub fn find_relevant(&self, drug: Option<&str>, cell_line: Option<&str>) -> Result<String> {
        let drug = drug.filter(|d| !d.is_empty());
        let cell_line = cell_line.filter(|c| !c.is_empty());
        if drug.is_none() && cell_line.is_none() {
            return Err(Error::InvalidArgument(
                "At least one of 'drug' or 'cell_line' must be provided \
                 to find relevant past tasks."
                    .into(),
            ));
        }

        let mut drug_relevant: Vec<&str> = Vec::new();
        let mut cell_line_relevant: Vec<&str> = Vec::new();
        for dispatcher in &self.dispatchers {
            for (past_drug, past_cell) in dispatcher.completed_keys() {
                if drug == Some(past_drug.as_str()) {
                    drug_relevant.push(past_cell);
                }
                if cell_line == Some(past_cell.as_str()) {
                    cell_line_relevant.push(past_drug);
                }
            }
        }

        if drug_relevant.is_empty() && cell_line_relevant.is_empty() {
            return Ok("No relevant past tasks found involving the specified \
                       drug and cell line. \
                       Make a provisional IC50 prediction from tool calls \
                       and any calibration notes provided."
                .to_string());
        }

        let mut parts = vec!["Relevant past tasks found:".to_string()];
        if let Some(drug) = drug {
            if let Some(line) = listing(&drug_relevant, |n| {
                format!("Tasks predicted with {} on {} cell lines, including: ", drug, n)
            }, || format!("Tasks predicted with {} on cell lines: ", drug))
            {
                parts.push(line);
            }
        }
        if let Some(cell_line) = cell_line {
            if let Some(line) = listing(&cell_line_relevant, |n| {
                format!("Tasks predicted on {} with {} drugs, including: ", cell_line, n)
            }, || format!("Tasks predicted on {} with drugs: ", cell_line))
            {
                parts.push(line);
            }
        }

        Ok(parts.join("\n")
            + "\nThe calibration notes provided below summarise lessons \
               from these past tasks; weigh them where they apply.")
    }
}

fn listing(
    items: &[&str],
    many: impl Fn(usize) -> String,
    few: impl Fn() -> String,
) -> Option<String> {
    match items.len() {
        0 => None,
        n if n <= MAX_LISTED => Some(few() + &items.join(", ")),
        n => Some(many(n) + &items[..MAX_LISTED].join(", ") + " ..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prism::PrismTask;

    fn queue_with(done: &[(&str, &str)]) -> PrismDispatchQueue {
        let tasks = done
            .iter()
            .map(|(d, c)| PrismTask::new(*d, *c, 1.0, "uM"))
            .collect();
        let mut queue = PrismDispatchQueue::new("q", tasks);
        while let Some(task) = queue.dispatch() {
            queue.complete(&task).unwrap();
        }
        queue
    }

    #[test]
    fn test_requires_dispatchers() {
        assert!(LitlHistory::new(vec![]).is_err());
    }

    #[test]
    fn test_requires_drug_or_cell_line() {
        let q = queue_with(&[]);
        let history = LitlHistory::new(vec![&q]).unwrap();
        assert!(history.find_relevant(None, None).is_err());
        assert!(history.find_relevant(Some(""), None).is_err());
    }

    #[test]
    fn test_nothing_relevant() {
        let q = queue_with(&[("a", "x")]);
        let history = LitlHistory::new(vec![&q]).unwrap();
        let text = history.find_relevant(Some("b"), Some("y")).unwrap();
        assert!(text.starts_with("No relevant past tasks found"));
        assert!(text.ends_with("any calibration notes provided."));
        assert!(!text.contains("memory"));
    }

    #[test]
    fn test_short_lists() {
        let q = queue_with(&[("imatinib", "K562"), ("imatinib", "A549"), ("dasatinib", "K562")]);
        let history = LitlHistory::new(vec![&q]).unwrap();
        let text = history
            .find_relevant(Some("imatinib"), Some("K562"))
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Relevant past tasks found:");
        assert_eq!(lines[1], "Tasks predicted with imatinib on cell lines: K562, A549");
        assert_eq!(lines[2], "Tasks predicted on K562 with drugs: imatinib, dasatinib");
        assert!(lines[3].starts_with("The calibration notes provided"));
        assert!(!text.contains("memory"));
    }

    #[test]
    fn test_long_list_is_cut() {
        let cells = ["c1", "c2", "c3", "c4", "c5", "c6", "c7"];
        let done: Vec<(&str, &str)> = cells.iter().map(|c| ("drug", *c)).collect();
        let q = queue_with(&done);
        let history = LitlHistory::new(vec![&q]).unwrap();
        let text = history.find_relevant(Some("drug"), None).unwrap();
        assert!(text.contains(
            "Tasks predicted with drug on 7 cell lines, including: c1, c2, c3, c4, c5 ..."
        ));
    }

    #[test]
    fn test_searches_every_dispatcher() {
        let a = queue_with(&[("d1", "K562")]);
        let b = queue_with(&[("d2", "K562")]);
        let history = LitlHistory::new(vec![&a, &b]).unwrap();
        let text = history.find_relevant(None, Some("K562")).unwrap();
        assert!(text.contains("with drugs: d1, d2"));
    }
}
