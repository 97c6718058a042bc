use crate::coverage::Coverage;
use crate::executor::TargetExecutor;
use crate::fault::Fault;
use crate::input::Input;
use crate::pipeline::{ExecutionPipeline, PipelineError};
use crate::queue::QueueEntry;
use crate::rng::SharedRng;
use crate::tracer::TracerGateway;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Produces derived inputs for the mutator driver.
///
/// The returned sequence must be lazy and finite; the driver drains it fully,
/// so a non-terminating sequence hangs the run.
pub trait Mutator<I: Input>: Send + Sync {
    fn mutations(&self, rng: ChaCha8Rng, input: &I) -> Box<dyn Iterator<Item = I> + Send>;
}

/// Byte-input mutator that adds a small random value (1..=15, wrapping) to a
/// randomly chosen byte, `count` times per call. An empty input grows a
/// single zero byte first so there is always something to mutate.
#[derive(Debug, Clone, Copy)]
pub struct ByteAddMutator {
    count: usize,
}

impl ByteAddMutator {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Mutator<Vec<u8>> for ByteAddMutator {
    fn mutations(&self, mut rng: ChaCha8Rng, input: &Vec<u8>) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        let base = input.clone();
        Box::new((0..self.count).map(move |_| {
            let mut bytes = base.clone();
            if bytes.is_empty() {
                bytes.push(0);
            }
            let index = rng.random_range(0..bytes.len());
            let delta = rng.random_range(1u8..=15u8);
            bytes[index] = bytes[index].wrapping_add(delta);
            bytes
        }))
    }
}

/// Explores derivatives of a queue entry's input.
///
/// Every mutation runs through the pipeline with requeueing enabled, so novel
/// derivatives feed straight back into the work queue. The sequence is fully
/// drained: exploration does not stop at the first interesting case. Callers
/// must not hand this driver a faulted entry; faulted lineages are terminal.
pub struct MutatorDriver<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    pipeline: Arc<ExecutionPipeline<I, E, R, C, F>>,
    mutator: Arc<dyn Mutator<I>>,
    rng: Arc<SharedRng>,
    tracer: Arc<TracerGateway<I, R, F>>,
}

impl<I, E, R, C, F> MutatorDriver<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    pub fn new(
        pipeline: Arc<ExecutionPipeline<I, E, R, C, F>>,
        mutator: Arc<dyn Mutator<I>>,
        rng: Arc<SharedRng>,
        tracer: Arc<TracerGateway<I, R, F>>,
    ) -> Self {
        Self {
            pipeline,
            mutator,
            rng,
            tracer,
        }
    }

    pub fn mutate(&self, entry: &QueueEntry<I, C, F>) -> Result<(), PipelineError> {
        for candidate in self.mutator.mutations(self.rng.fork(), &entry.input) {
            let (_result, novel) = self.pipeline.execute(&candidate, true)?;
            if novel {
                self.tracer.mutation_found(&entry.input, &candidate);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rig, ScriptedExecutor, ScriptedMutator};

    #[test]
    fn mutation_sequence_is_fully_drained() {
        // "C" repeats coverage already seen by "B"; the driver must still
        // execute "D" afterwards.
        let executor = ScriptedExecutor::new()
            .with_coverage(b"A", &[1])
            .with_coverage(b"B", &[2])
            .with_coverage(b"C", &[2])
            .with_coverage(b"D", &[3]);
        let rig = rig(executor);
        let mutator = Arc::new(ScriptedMutator::new().with_mutations(
            b"A",
            &[b"B".to_vec(), b"C".to_vec(), b"D".to_vec()],
        ));
        let driver = MutatorDriver::new(
            Arc::clone(&rig.pipeline),
            mutator,
            Arc::new(SharedRng::from_seed(0)),
            Arc::clone(&rig.tracer),
        );

        driver.mutate(&QueueEntry::new(b"A".to_vec())).unwrap();

        assert_eq!(rig.executor.executions(), 3, "no early termination");
        let events = rig.events.lock().unwrap();
        let found: Vec<_> = events
            .iter()
            .filter(|e| e.starts_with("mutated:"))
            .collect();
        assert_eq!(
            found,
            vec!["mutated:A->B", "mutated:A->D"],
            "only novel mutations are reported"
        );
        drop(events);
        // "B" and "D" were requeued by the pipeline, "C" was not.
        assert_eq!(rig.queue.len(), 2);
    }

    #[test]
    fn byte_add_mutator_yields_bounded_lazy_sequence() {
        let rng = SharedRng::from_seed(42);
        let base = vec![10u8, 20, 30];
        let mutants: Vec<Vec<u8>> = ByteAddMutator::new(8).mutations(rng.fork(), &base).collect();

        assert_eq!(mutants.len(), 8);
        for mutant in &mutants {
            assert_eq!(mutant.len(), base.len(), "length is preserved");
            assert_ne!(*mutant, base, "a nonzero delta always changes a byte");
        }
    }

    #[test]
    fn byte_add_mutator_grows_empty_input() {
        let rng = SharedRng::from_seed(1);
        let mutants: Vec<Vec<u8>> = ByteAddMutator::new(2)
            .mutations(rng.fork(), &Vec::new())
            .collect();
        assert!(mutants.iter().all(|m| m.len() == 1));
    }

    #[test]
    fn byte_add_mutator_is_deterministic_per_fork_seed() {
        let base = vec![1u8, 2, 3, 4];
        let a: Vec<Vec<u8>> = ByteAddMutator::new(4)
            .mutations(SharedRng::from_seed(7).fork(), &base)
            .collect();
        let b: Vec<Vec<u8>> = ByteAddMutator::new(4)
            .mutations(SharedRng::from_seed(7).fork(), &base)
            .collect();
        assert_eq!(a, b);
    }
}
