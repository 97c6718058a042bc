use crate::coverage::Coverage;
use crate::fault::Fault;
use crate::input::Input;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Summary of one target execution: what it covered and whether it faulted.
///
/// Results are shared behind `Arc` and never mutated once constructed;
/// minimization and mutation always build new results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult<C: Coverage, F: Fault> {
    pub coverage: C,
    pub fault: F,
}

impl<C: Coverage, F: Fault> ExecutionResult<C, F> {
    pub fn is_faulted(&self) -> bool {
        self.fault.is_faulted()
    }
}

/// One unit of fuzzing work: an input plus its cached execution result.
///
/// Entries enqueued by the user have no result yet; the minimizer driver
/// computes the baseline lazily. Entries re-enqueued by the pipeline always
/// carry the result that made them interesting.
#[derive(Debug, Clone)]
pub struct QueueEntry<I: Input, C: Coverage, F: Fault> {
    pub input: I,
    pub result: Option<Arc<ExecutionResult<C, F>>>,
}

impl<I: Input, C: Coverage, F: Fault> QueueEntry<I, C, F> {
    pub fn new(input: I) -> Self {
        Self {
            input,
            result: None,
        }
    }

    pub fn with_result(input: I, result: Arc<ExecutionResult<C, F>>) -> Self {
        Self {
            input,
            result: Some(result),
        }
    }
}

/// Unbounded concurrency-safe FIFO of entries awaiting processing.
pub struct WorkQueue<I: Input, C: Coverage, F: Fault> {
    inner: Mutex<VecDeque<QueueEntry<I, C, F>>>,
}

impl<I: Input, C: Coverage, F: Fault> WorkQueue<I, C, F> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, entry: QueueEntry<I, C, F>) {
        self.inner.lock().unwrap().push_back(entry);
    }

    pub fn pop(&self) -> Option<QueueEntry<I, C, F>> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Input, C: Coverage, F: Fault> Default for WorkQueue<I, C, F> {
    fn default() -> Self {
        Self::new()
    }
}
