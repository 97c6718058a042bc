use crate::coverage::{Coverage, CoverageCompressor, CoverageError, CoverageReader, SeenCoverage};
use crate::executor::{ExecutorError, TargetExecutor};
use crate::fault::{Fault, FaultDetector};
use crate::input::Input;
use crate::queue::{ExecutionResult, QueueEntry, WorkQueue};
use crate::tracer::TracerGateway;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by collaborators while executing one input.
///
/// Target faults are never errors; they come back inside the
/// [`ExecutionResult`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Executor failure: {0}")]
    Executor(#[from] ExecutorError),
    #[error("Coverage failure: {0}")]
    Coverage(#[from] CoverageError),
}

/// Orchestrates one target run end to end.
///
/// This is the only place coverage is read, compressed, or checked for
/// novelty; the minimizer and mutator drivers both execute through it, so the
/// whole engine shares a single definition of "interesting".
pub struct ExecutionPipeline<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    executor: Arc<E>,
    reader: Arc<dyn CoverageReader<E::Target, R>>,
    compressor: Arc<dyn CoverageCompressor<R, C>>,
    detector: Arc<dyn FaultDetector<I, E, F>>,
    seen: Arc<SeenCoverage<C>>,
    queue: Arc<WorkQueue<I, C, F>>,
    tracer: Arc<TracerGateway<I, R, F>>,
}

impl<I, E, R, C, F> ExecutionPipeline<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        executor: Arc<E>,
        reader: Arc<dyn CoverageReader<E::Target, R>>,
        compressor: Arc<dyn CoverageCompressor<R, C>>,
        detector: Arc<dyn FaultDetector<I, E, F>>,
        seen: Arc<SeenCoverage<C>>,
        queue: Arc<WorkQueue<I, C, F>>,
        tracer: Arc<TracerGateway<I, R, F>>,
    ) -> Self {
        Self {
            executor,
            reader,
            compressor,
            detector,
            seen,
            queue,
            tracer,
        }
    }

    /// Runs `input` once and classifies the outcome.
    ///
    /// Steps, in order: initialize a target run, clear stale coverage, detect
    /// faults (which drives the actual execution), read and compress
    /// coverage, then atomically test-and-insert the compressed value into
    /// the seen set. If `requeue_on_novelty` is set and the coverage was
    /// novel, a new entry carrying this result is pushed onto the work queue.
    ///
    /// Returns the execution result and whether the coverage was novel. The
    /// target handle never outlives this call.
    pub fn execute(
        &self,
        input: &I,
        requeue_on_novelty: bool,
    ) -> Result<(Arc<ExecutionResult<C, F>>, bool), PipelineError> {
        let mut target = self.executor.initialize(input)?;
        self.reader.clear(&mut target)?;

        let fault = self.detector.detect(self.executor.as_ref(), &mut target);
        if fault.is_faulted() {
            self.tracer.input_faulted(input, &fault);
        }

        let raw = self.reader.read(&mut target)?;
        self.tracer.input_fuzzed(input, &raw);
        let coverage = self.compressor.compress(raw);
        let novel = self.seen.observe(&coverage);

        let result = Arc::new(ExecutionResult { coverage, fault });
        if requeue_on_novelty && novel {
            self.queue
                .push(QueueEntry::with_result(input.clone(), Arc::clone(&result)));
            self.tracer.inputs_enqueued(std::slice::from_ref(input));
        }
        Ok((result, novel))
    }
}
