//! Per-line results of batch operations (deduction, receiving).

use uuid::Uuid;

use crate::error::{FailedLine, LedgerError, LedgerResult};

/// Outcome of a multi-line batch where lines commit independently.
///
/// Every input line ends up in exactly one of `succeeded` or `failed`; nothing
/// is dropped silently.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<Id, T> {
    pub succeeded: Vec<(Id, T)>,
    pub failed: Vec<(Id, LedgerError)>,
}

impl<Id, T> Default for BatchReport<Id, T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<Id, T> BatchReport<Id, T>
where
    Id: Copy + Into<Uuid>,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line: Id, result: LedgerResult<T>) {
        match result {
            Ok(value) => self.succeeded.push((line, value)),
            Err(err) => self.failed.push((line, err)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn succeeded_ids(&self) -> Vec<Id> {
        self.succeeded.iter().map(|(id, _)| *id).collect()
    }

    pub fn failed_ids(&self) -> Vec<Id> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }

    /// Collapse into a `Result`, turning any failed line into `PartialFailure`.
    pub fn into_result(self) -> LedgerResult<Vec<(Id, T)>> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        Err(LedgerError::PartialFailure {
            succeeded: self.succeeded.iter().map(|(id, _)| (*id).into()).collect(),
            failed: self
                .failed
                .into_iter()
                .map(|(id, err)| FailedLine {
                    line: id.into(),
                    error: err.to_string(),
                })
                .collect(),
        })
    }
}
