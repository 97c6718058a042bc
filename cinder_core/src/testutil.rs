//! Scripted collaborator doubles shared by the engine's unit tests.

use crate::coverage::{CoverageError, CoverageReader, ProbeSetCompressor, SeenCoverage};
use crate::dispatch::CancellationToken;
use crate::executor::{ExecutionStatus, ExecutorError, TargetExecutor};
use crate::fault::{CrashDetector, CrashFault};
use crate::minimizer::Minimizer;
use crate::mutator::Mutator;
use crate::pipeline::ExecutionPipeline;
use crate::queue::WorkQueue;
use crate::tracer::{Tracer, TracerGateway};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct ScriptedBehavior {
    probes: Vec<u64>,
    crash: Option<String>,
}

/// Executor whose coverage and crash behavior is a lookup table. Inputs
/// without a scripted behavior cover one probe per byte value.
pub(crate) struct ScriptedExecutor {
    behaviors: HashMap<Vec<u8>, ScriptedBehavior>,
    executions: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn with_coverage(mut self, input: &[u8], probes: &[u64]) -> Self {
        self.behaviors.insert(
            input.to_vec(),
            ScriptedBehavior {
                probes: probes.to_vec(),
                crash: None,
            },
        );
        self
    }

    pub fn with_crash(mut self, input: &[u8], probes: &[u64], message: &str) -> Self {
        self.behaviors.insert(
            input.to_vec(),
            ScriptedBehavior {
                probes: probes.to_vec(),
                crash: Some(message.to_string()),
            },
        );
        self
    }

    /// Number of target runs so far.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTarget {
    probes: Vec<u64>,
    crash: Option<String>,
}

impl TargetExecutor<Vec<u8>> for ScriptedExecutor {
    type Target = ScriptedTarget;

    fn initialize(&self, input: &Vec<u8>) -> Result<ScriptedTarget, ExecutorError> {
        Ok(match self.behaviors.get(input) {
            Some(behavior) => ScriptedTarget {
                probes: behavior.probes.clone(),
                crash: behavior.crash.clone(),
            },
            None => ScriptedTarget {
                probes: input.iter().map(|&b| u64::from(b)).collect(),
                crash: None,
            },
        })
    }

    fn run(&self, target: &mut ScriptedTarget) -> ExecutionStatus {
        self.executions.fetch_add(1, Ordering::SeqCst);
        match &target.crash {
            Some(message) => ExecutionStatus::Crash(message.clone()),
            None => ExecutionStatus::Ok,
        }
    }
}

/// Reads the probes the scripted target was initialized with.
pub(crate) struct ScriptedCoverageReader;

impl CoverageReader<ScriptedTarget, Vec<u64>> for ScriptedCoverageReader {
    fn clear(&self, _target: &mut ScriptedTarget) -> Result<(), CoverageError> {
        Ok(())
    }

    fn read(&self, target: &mut ScriptedTarget) -> Result<Vec<u64>, CoverageError> {
        Ok(std::mem::take(&mut target.probes))
    }
}

/// Minimizer whose candidate lists are a lookup table keyed by the current
/// input; inputs without an entry get an empty sequence.
pub(crate) struct ScriptedMinimizer {
    script: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

impl ScriptedMinimizer {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
        }
    }

    pub fn with_candidates(mut self, input: &[u8], candidates: &[Vec<u8>]) -> Self {
        self.script.insert(input.to_vec(), candidates.to_vec());
        self
    }
}

impl Minimizer<Vec<u8>> for ScriptedMinimizer {
    fn reductions(
        &self,
        _rng: ChaCha8Rng,
        input: &Vec<u8>,
    ) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        Box::new(self.script.get(input).cloned().unwrap_or_default().into_iter())
    }
}

/// Minimizer that counts generation passes and never proposes anything.
#[derive(Default)]
pub(crate) struct CountingMinimizer {
    passes: AtomicUsize,
}

impl CountingMinimizer {
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl Minimizer<Vec<u8>> for CountingMinimizer {
    fn reductions(
        &self,
        _rng: ChaCha8Rng,
        _input: &Vec<u8>,
    ) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        self.passes.fetch_add(1, Ordering::SeqCst);
        Box::new(std::iter::empty())
    }
}

/// Mutator with table-driven mutation lists, optionally cancelling a token
/// when asked to mutate a designated input.
pub(crate) struct ScriptedMutator {
    script: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    cancel_on: Option<(Vec<u8>, CancellationToken)>,
}

impl ScriptedMutator {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            cancel_on: None,
        }
    }

    pub fn with_mutations(mut self, input: &[u8], mutations: &[Vec<u8>]) -> Self {
        self.script.insert(input.to_vec(), mutations.to_vec());
        self
    }

    pub fn with_cancel_on(mut self, input: &[u8], token: CancellationToken) -> Self {
        self.cancel_on = Some((input.to_vec(), token));
        self
    }
}

impl Mutator<Vec<u8>> for ScriptedMutator {
    fn mutations(
        &self,
        _rng: ChaCha8Rng,
        input: &Vec<u8>,
    ) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        if let Some((trigger, token)) = &self.cancel_on {
            if trigger == input {
                token.cancel();
            }
        }
        Box::new(self.script.get(input).cloned().unwrap_or_default().into_iter())
    }
}

/// Mutator that counts invocations and yields nothing.
#[derive(Default)]
pub(crate) struct CountingMutator {
    calls: AtomicUsize,
}

impl CountingMutator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Mutator<Vec<u8>> for CountingMutator {
    fn mutations(
        &self,
        _rng: ChaCha8Rng,
        _input: &Vec<u8>,
    ) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::new(std::iter::empty())
    }
}

fn render(input: &[u8]) -> String {
    String::from_utf8_lossy(input).into_owned()
}

/// Tracer that appends one line per notification, optionally cancelling a
/// token once a number of events has been recorded.
#[derive(Default)]
pub(crate) struct RecordingTracer {
    events: Arc<Mutex<Vec<String>>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingTracer {
    pub fn events_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.events)
    }

    pub fn with_cancel_after(mut self, events: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((events, token));
        self
    }

    fn push(&self, event: String) {
        let mut events = self.events.lock().unwrap();
        events.push(event);
        if let Some((limit, token)) = &self.cancel_after {
            if events.len() >= *limit {
                token.cancel();
            }
        }
    }
}

impl Tracer<Vec<u8>, Vec<u64>, CrashFault> for RecordingTracer {
    fn inputs_enqueued(&self, inputs: &[Vec<u8>]) {
        let rendered: Vec<String> = inputs.iter().map(|i| render(i)).collect();
        self.push(format!("enqueued:{}", rendered.join(",")));
    }

    fn input_dequeued(&self, input: &Vec<u8>) {
        self.push(format!("dequeued:{}", render(input)));
    }

    fn input_faulted(&self, input: &Vec<u8>, _fault: &CrashFault) {
        self.push(format!("faulted:{}", render(input)));
    }

    fn input_fuzzed(&self, input: &Vec<u8>, raw_coverage: &Vec<u64>) {
        self.push(format!("fuzzed:{}:{:?}", render(input), raw_coverage));
    }

    fn minimization_found(&self, from: &Vec<u8>, to: &Vec<u8>) {
        self.push(format!("minimized:{}->{}", render(from), render(to)));
    }

    fn mutation_found(&self, from: &Vec<u8>, to: &Vec<u8>) {
        self.push(format!("mutated:{}->{}", render(from), render(to)));
    }

    fn fuzzer_finished(&self) {
        self.push("finished".to_string());
    }
}

pub(crate) type TestPipeline =
    ExecutionPipeline<Vec<u8>, ScriptedExecutor, Vec<u64>, BTreeSet<u64>, CrashFault>;

/// A fully wired pipeline over scripted collaborators, plus handles to the
/// shared state the tests assert on.
pub(crate) struct TestRig {
    pub pipeline: Arc<TestPipeline>,
    pub executor: Arc<ScriptedExecutor>,
    pub queue: Arc<WorkQueue<Vec<u8>, BTreeSet<u64>, CrashFault>>,
    pub seen: Arc<SeenCoverage<BTreeSet<u64>>>,
    pub tracer: Arc<TracerGateway<Vec<u8>, Vec<u64>, CrashFault>>,
    pub events: Arc<Mutex<Vec<String>>>,
}

pub(crate) fn rig(executor: ScriptedExecutor) -> TestRig {
    let executor = Arc::new(executor);
    let seen = Arc::new(SeenCoverage::new());
    let queue = Arc::new(WorkQueue::new());
    let recording = RecordingTracer::default();
    let events = recording.events_handle();
    let tracer = Arc::new(TracerGateway::new(Box::new(recording)));
    let pipeline = Arc::new(ExecutionPipeline::new(
        Arc::clone(&executor),
        Arc::new(ScriptedCoverageReader),
        Arc::new(ProbeSetCompressor),
        Arc::new(CrashDetector),
        Arc::clone(&seen),
        Arc::clone(&queue),
        Arc::clone(&tracer),
    ));
    TestRig {
        pipeline,
        executor,
        queue,
        seen,
        tracer,
        events,
    }
}
