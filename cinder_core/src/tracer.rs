use std::sync::Mutex;

/// Observability callbacks for one fuzzing run.
///
/// Purely observational: tracers must not steer the run, and must not block
/// indefinitely, because every callback is delivered under the gateway's
/// serialization lock.
pub trait Tracer<I, R, F>: Send + Sync {
    /// Inputs were appended to the work queue (user enqueue or pipeline
    /// requeue of a novel input).
    fn inputs_enqueued(&self, inputs: &[I]);
    /// The controller pulled an entry off the queue for processing.
    fn input_dequeued(&self, input: &I);
    /// The fault detector reported a faulted execution.
    fn input_faulted(&self, input: &I, fault: &F);
    /// One execution finished and produced raw coverage.
    fn input_fuzzed(&self, input: &I, raw_coverage: &R);
    /// The minimizer driver accepted a behaviorally equivalent smaller input.
    fn minimization_found(&self, from: &I, to: &I);
    /// The mutator driver produced an input with novel coverage.
    fn mutation_found(&self, from: &I, to: &I);
    /// The run loop exited. Emitted exactly once per run.
    fn fuzzer_finished(&self);
}

/// A tracer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl<I, R, F> Tracer<I, R, F> for NoopTracer {
    fn inputs_enqueued(&self, _inputs: &[I]) {}
    fn input_dequeued(&self, _input: &I) {}
    fn input_faulted(&self, _input: &I, _fault: &F) {}
    fn input_fuzzed(&self, _input: &I, _raw_coverage: &R) {}
    fn minimization_found(&self, _from: &I, _to: &I) {}
    fn mutation_found(&self, _from: &I, _to: &I) {}
    fn fuzzer_finished(&self) {}
}

/// Funnels all tracer notifications through one mutex.
///
/// Workers notify concurrently, but each callback runs to completion before
/// the next one starts, so the tracer observes a strict total order of calls.
/// Which order concurrent workers' calls land in is unspecified; only
/// per-call atomicity is guaranteed.
pub struct TracerGateway<I, R, F> {
    inner: Mutex<Box<dyn Tracer<I, R, F>>>,
}

impl<I, R, F> TracerGateway<I, R, F> {
    pub fn new(tracer: Box<dyn Tracer<I, R, F>>) -> Self {
        Self {
            inner: Mutex::new(tracer),
        }
    }

    pub fn inputs_enqueued(&self, inputs: &[I]) {
        self.inner.lock().unwrap().inputs_enqueued(inputs);
    }

    pub fn input_dequeued(&self, input: &I) {
        self.inner.lock().unwrap().input_dequeued(input);
    }

    pub fn input_faulted(&self, input: &I, fault: &F) {
        self.inner.lock().unwrap().input_faulted(input, fault);
    }

    pub fn input_fuzzed(&self, input: &I, raw_coverage: &R) {
        self.inner.lock().unwrap().input_fuzzed(input, raw_coverage);
    }

    pub fn minimization_found(&self, from: &I, to: &I) {
        self.inner.lock().unwrap().minimization_found(from, to);
    }

    pub fn mutation_found(&self, from: &I, to: &I) {
        self.inner.lock().unwrap().mutation_found(from, to);
    }

    pub fn fuzzer_finished(&self) {
        self.inner.lock().unwrap().fuzzer_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingTracer;
    use std::sync::Arc;

    #[test]
    fn gateway_serializes_concurrent_notifications() {
        let tracer = RecordingTracer::default();
        let events = tracer.events_handle();
        let gateway: Arc<TracerGateway<Vec<u8>, Vec<u64>, crate::fault::CrashFault>> =
            Arc::new(TracerGateway::new(Box::new(tracer)));

        let mut handles = Vec::new();
        for t in 0..4u8 {
            let gateway = Arc::clone(&gateway);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    gateway.input_dequeued(&vec![t]);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every call landed whole, none were lost or torn.
        assert_eq!(events.lock().unwrap().len(), 200);
    }

    #[test]
    fn noop_tracer_accepts_all_callbacks() {
        let gateway: TracerGateway<Vec<u8>, Vec<u64>, crate::fault::CrashFault> =
            TracerGateway::new(Box::new(NoopTracer));
        gateway.inputs_enqueued(&[vec![1]]);
        gateway.input_dequeued(&vec![1]);
        gateway.fuzzer_finished();
    }
}
