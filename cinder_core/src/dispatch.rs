use crate::config::FuzzerSettings;
use crate::coverage::{Coverage, CoverageCompressor, CoverageReader, SeenCoverage};
use crate::executor::{ExecutorError, TargetExecutor};
use crate::fault::{Fault, FaultDetector, FaultEq};
use crate::input::Input;
use crate::minimizer::{Minimizer, MinimizerDriver};
use crate::mutator::{Mutator, MutatorDriver};
use crate::pipeline::ExecutionPipeline;
use crate::queue::{QueueEntry, WorkQueue};
use crate::rng::SharedRng;
use crate::tracer::{Tracer, TracerGateway};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum FuzzerError {
    #[error("Executor global initialization failed: {0}")]
    GlobalInit(#[from] ExecutorError),
}

/// Cooperative cancellation signal for a fuzzing run.
///
/// Cloned handles share one flag; cancelling any of them stops the loop at
/// its next poll point.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counting semaphore bounding how many entries are in flight at once.
struct AdmissionSlots {
    permits: Mutex<usize>,
    available: Condvar,
}

impl AdmissionSlots {
    fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until a slot frees up or the token fires. Returns false on
    /// cancellation, in which case no slot was taken.
    fn acquire(&self, cancel: &CancellationToken) -> bool {
        let mut permits = self.permits.lock().unwrap();
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(permits, Duration::from_millis(10))
                .unwrap();
            permits = guard;
        }
    }

    fn release(&self) {
        *self.permits.lock().unwrap() += 1;
        self.available.notify_one();
    }
}

/// Releases the slot when the worker finishes, panics included.
struct SlotGuard(Arc<AdmissionSlots>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Everything a worker needs to process one queue entry: minimize to a
/// fixpoint, then mutate unless the baseline faulted.
struct EntryProcessor<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    minimizer: Arc<MinimizerDriver<I, E, R, C, F>>,
    mutator: Arc<MutatorDriver<I, E, R, C, F>>,
}

impl<I, E, R, C, F> Clone for EntryProcessor<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    fn clone(&self) -> Self {
        Self {
            minimizer: Arc::clone(&self.minimizer),
            mutator: Arc::clone(&self.mutator),
        }
    }
}

impl<I, E, R, C, F> EntryProcessor<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    fn process(&self, entry: QueueEntry<I, C, F>) {
        let minimized = match self.minimizer.minimize(entry) {
            Ok(minimized) => minimized,
            Err(e) => {
                log::error!("Abandoning queue entry after pipeline failure: {e}");
                return;
            }
        };
        // Faulted lineages are terminal: record them, never mutate them.
        if minimized.result.as_ref().is_some_and(|r| r.is_faulted()) {
            return;
        }
        if let Err(e) = self.mutator.mutate(&minimized) {
            log::error!("Mutation of entry aborted: {e}");
        }
    }
}

/// The fuzzing loop: owns the work queue, the seen-coverage set, and the
/// dispatch policy, and closes the feedback cycle between them.
pub struct Fuzzer<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    settings: FuzzerSettings,
    executor: Arc<E>,
    seen: Arc<SeenCoverage<C>>,
    queue: Arc<WorkQueue<I, C, F>>,
    tracer: Arc<TracerGateway<I, R, F>>,
    processor: EntryProcessor<I, E, R, C, F>,
}

impl<I, E, R, C, F> Fuzzer<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I> + 'static,
    R: 'static,
    C: Coverage,
    F: Fault,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: FuzzerSettings,
        executor: Arc<E>,
        reader: Arc<dyn CoverageReader<E::Target, R>>,
        compressor: Arc<dyn CoverageCompressor<R, C>>,
        detector: Arc<dyn FaultDetector<I, E, F>>,
        fault_eq: Arc<dyn FaultEq<F>>,
        minimizer: Arc<dyn Minimizer<I>>,
        mutator: Arc<dyn Mutator<I>>,
        tracer: Box<dyn Tracer<I, R, F>>,
    ) -> Self {
        let seen = Arc::new(SeenCoverage::new());
        let queue = Arc::new(WorkQueue::new());
        let tracer = Arc::new(TracerGateway::new(tracer));
        let rng = Arc::new(SharedRng::from_seed(settings.seed));
        let pipeline = Arc::new(ExecutionPipeline::new(
            Arc::clone(&executor),
            reader,
            compressor,
            detector,
            Arc::clone(&seen),
            Arc::clone(&queue),
            Arc::clone(&tracer),
        ));
        let processor = EntryProcessor {
            minimizer: Arc::new(MinimizerDriver::new(
                Arc::clone(&pipeline),
                minimizer,
                fault_eq,
                Arc::clone(&rng),
                Arc::clone(&tracer),
            )),
            mutator: Arc::new(MutatorDriver::new(pipeline, mutator, rng, Arc::clone(&tracer))),
        };
        Self {
            settings,
            executor,
            seen,
            queue,
            tracer,
            processor,
        }
    }

    /// Appends one input to the work queue.
    pub fn enqueue(&self, input: I) {
        self.queue.push(QueueEntry::new(input.clone()));
        self.tracer.inputs_enqueued(std::slice::from_ref(&input));
    }

    /// Appends a batch of inputs to the work queue.
    pub fn enqueue_range(&self, inputs: impl IntoIterator<Item = I>) {
        let inputs: Vec<I> = inputs.into_iter().collect();
        if inputs.is_empty() {
            return;
        }
        for input in &inputs {
            self.queue.push(QueueEntry::new(input.clone()));
        }
        self.tracer.inputs_enqueued(&inputs);
    }

    /// Entries currently waiting in the work queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Distinct compressed coverage values observed so far.
    pub fn distinct_coverage(&self) -> usize {
        self.seen.len()
    }

    /// Runs the fuzzing loop until `cancel` fires.
    ///
    /// Blocks the calling thread. The queue can always receive more work, so
    /// without cancellation this runs forever; termination is caller-driven.
    /// On cancellation the loop stops dequeuing and notifies the tracer
    /// exactly once that the run finished, but workers already dispatched to
    /// the pool are not awaited; callers that need a full drain must track
    /// the pool externally.
    pub fn run(&self, cancel: &CancellationToken) -> Result<(), FuzzerError> {
        self.executor.global_init()?;

        let backoff = Duration::from_millis(self.settings.idle_backoff_ms);
        let slots = match self.settings.max_parallelism {
            n if n > 1 => Some(Arc::new(AdmissionSlots::new(n))),
            _ => None,
        };
        let sequential = self.settings.max_parallelism == 1;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(entry) = self.queue.pop() else {
                thread::sleep(backoff);
                continue;
            };
            self.tracer.input_dequeued(&entry.input);

            if sequential {
                self.processor.process(entry);
            } else if let Some(slots) = &slots {
                if !slots.acquire(cancel) {
                    // Cancelled while waiting for a slot: the entry is
                    // abandoned without side effects.
                    break;
                }
                let guard = SlotGuard(Arc::clone(slots));
                let processor = self.processor.clone();
                thread::spawn(move || {
                    let _slot = guard;
                    processor.process(entry);
                });
            } else {
                let processor = self.processor.clone();
                thread::spawn(move || processor.process(entry));
            }
        }

        self.tracer.fuzzer_finished();
        Ok(())
    }
}
