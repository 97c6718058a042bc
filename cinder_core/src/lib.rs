pub mod config;
pub mod coverage;
pub mod dispatch;
pub mod executor;
pub mod fault;
pub mod input;
pub mod minimizer;
pub mod mutator;
pub mod pipeline;
pub mod queue;
pub mod rng;
pub mod tracer;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{CinderConfig, FuzzerSettings};
pub use coverage::{
    Coverage, CoverageCompressor, CoverageError, CoverageReader, FileProbeCoverageReader,
    InProcessCoverageReader, ProbeSetCompressor, SeenCoverage, record_probe,
};
pub use dispatch::{CancellationToken, Fuzzer, FuzzerError};
pub use executor::{
    CommandExecutor, CommandExecutorConfig, CommandTarget, ExecutionStatus, ExecutorError,
    InProcessExecutor, InputDelivery, TargetExecutor,
};
pub use fault::{
    CrashDetector, CrashFault, Fault, FaultDetector, FaultEq, KindFaultEq, StrictFaultEq,
};
pub use input::Input;
pub use minimizer::{BlockRemoveMinimizer, Minimizer, MinimizerDriver, NoopMinimizer};
pub use mutator::{ByteAddMutator, Mutator, MutatorDriver};
pub use pipeline::{ExecutionPipeline, PipelineError};
pub use queue::{ExecutionResult, QueueEntry, WorkQueue};
pub use rng::SharedRng;
pub use tracer::{NoopTracer, Tracer, TracerGateway};
