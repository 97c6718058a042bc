use crate::coverage::Coverage;
use crate::executor::TargetExecutor;
use crate::fault::{Fault, FaultEq};
use crate::input::Input;
use crate::pipeline::{ExecutionPipeline, PipelineError};
use crate::queue::QueueEntry;
use crate::rng::SharedRng;
use crate::tracer::TracerGateway;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Produces candidate reduced inputs for the minimizer driver.
///
/// The returned sequence must be lazy and finite; the driver pulls it to
/// exhaustion, so a non-terminating sequence hangs the run. Candidate order
/// is the minimization priority: the driver takes the first behaviorally
/// equivalent candidate it sees.
pub trait Minimizer<I: Input>: Send + Sync {
    fn reductions(&self, rng: ChaCha8Rng, input: &I) -> Box<dyn Iterator<Item = I> + Send>;
}

/// A minimizer that never proposes candidates, for targets whose inputs are
/// not worth shrinking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMinimizer;

impl<I: Input> Minimizer<I> for NoopMinimizer {
    fn reductions(&self, _rng: ChaCha8Rng, _input: &I) -> Box<dyn Iterator<Item = I> + Send> {
        Box::new(std::iter::empty())
    }
}

/// Byte-input minimizer that proposes chunk removals, coarse to fine:
/// half-size blocks, then quarter-size blocks, then single bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockRemoveMinimizer;

impl Minimizer<Vec<u8>> for BlockRemoveMinimizer {
    fn reductions(&self, _rng: ChaCha8Rng, input: &Vec<u8>) -> Box<dyn Iterator<Item = Vec<u8>> + Send> {
        let len = input.len();
        if len == 0 {
            return Box::new(std::iter::empty());
        }

        // Non-increasing by construction, so dedup removes size collisions
        // on short inputs.
        let mut sizes = vec![len.div_ceil(2), len.div_ceil(4), 1];
        sizes.dedup();

        let base = input.clone();
        Box::new(sizes.into_iter().flat_map(move |size| {
            let base = base.clone();
            (0..len).step_by(size).map(move |offset| {
                let mut candidate = base.clone();
                candidate.drain(offset..(offset + size).min(len));
                candidate
            })
        }))
    }
}

/// Shrinks a queue entry's input to a fixpoint that preserves its observed
/// behavior.
///
/// The baseline execution runs with requeueing disabled so that computing it
/// never feeds the queue; candidate executions requeue normally, since a
/// reduction candidate that happens to cover novel ground is interesting in
/// its own right. A candidate replaces the current input iff its compressed
/// coverage equals the baseline's and the fault results are equal under the
/// configured comparator; each replacement restarts candidate generation
/// from the smaller input. Minimality is only as good as the plugin's
/// candidates.
pub struct MinimizerDriver<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    pipeline: Arc<ExecutionPipeline<I, E, R, C, F>>,
    minimizer: Arc<dyn Minimizer<I>>,
    fault_eq: Arc<dyn FaultEq<F>>,
    rng: Arc<SharedRng>,
    tracer: Arc<TracerGateway<I, R, F>>,
}

impl<I, E, R, C, F> MinimizerDriver<I, E, R, C, F>
where
    I: Input,
    E: TargetExecutor<I>,
    C: Coverage,
    F: Fault,
{
    pub fn new(
        pipeline: Arc<ExecutionPipeline<I, E, R, C, F>>,
        minimizer: Arc<dyn Minimizer<I>>,
        fault_eq: Arc<dyn FaultEq<F>>,
        rng: Arc<SharedRng>,
        tracer: Arc<TracerGateway<I, R, F>>,
    ) -> Self {
        Self {
            pipeline,
            minimizer,
            fault_eq,
            rng,
            tracer,
        }
    }

    pub fn minimize(
        &self,
        entry: QueueEntry<I, C, F>,
    ) -> Result<QueueEntry<I, C, F>, PipelineError> {
        let mut baseline = match entry.result {
            Some(result) => result,
            None => self.pipeline.execute(&entry.input, false)?.0,
        };
        let mut current = entry.input;

        'pass: loop {
            for candidate in self.minimizer.reductions(self.rng.fork(), &current) {
                let (result, _novel) = self.pipeline.execute(&candidate, true)?;
                let equivalent = result.coverage == baseline.coverage
                    && self.fault_eq.same(&result.fault, &baseline.fault);
                if equivalent {
                    self.tracer.minimization_found(&current, &candidate);
                    current = candidate;
                    baseline = result;
                    continue 'pass;
                }
            }
            // A full pass without an equivalent candidate: fixpoint reached.
            break;
        }

        Ok(QueueEntry::with_result(current, baseline))
    }
}
