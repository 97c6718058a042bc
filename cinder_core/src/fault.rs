use crate::executor::{ExecutionStatus, TargetExecutor};
use crate::input::Input;
use std::fmt;

/// Detector-reported outcome of one target execution.
///
/// A fault is the signal the fuzzer exists to find, not an engine error.
/// Detector plugins decide what counts as faulted and carry whatever detail
/// they need; the engine only asks for the flag.
pub trait Fault: Clone + Send + Sync + fmt::Debug + 'static {
    fn is_faulted(&self) -> bool;
}

/// Pluggable equality policy over fault results.
///
/// Deliberately decoupled from structural equality so that "the same kind of
/// crash" can compare equal even when diagnostic details (addresses, message
/// suffixes) differ between runs.
pub trait FaultEq<F>: Send + Sync {
    fn same(&self, a: &F, b: &F) -> bool;
}

/// Compares only the fault flag: any two clean runs are equal, any two
/// faulted runs are equal.
#[derive(Debug, Default, Clone, Copy)]
pub struct KindFaultEq;

impl<F: Fault> FaultEq<F> for KindFaultEq {
    fn same(&self, a: &F, b: &F) -> bool {
        a.is_faulted() == b.is_faulted()
    }
}

/// Structural fault equality, for fault types whose detail is stable across
/// runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictFaultEq;

impl<F: Fault + PartialEq> FaultEq<F> for StrictFaultEq {
    fn same(&self, a: &F, b: &F) -> bool {
        a == b
    }
}

/// Drives the actual execution of a prepared target run and interprets its
/// outcome as a fault result.
pub trait FaultDetector<I, E, F>: Send + Sync
where
    I: Input,
    E: TargetExecutor<I>,
{
    fn detect(&self, executor: &E, target: &mut E::Target) -> F;
}

/// Fault result produced by [`CrashDetector`]: the raw execution status,
/// faulted iff the target crashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashFault {
    pub status: ExecutionStatus,
}

impl CrashFault {
    /// Crash description, if this fault is a crash.
    pub fn description(&self) -> Option<&str> {
        match &self.status {
            ExecutionStatus::Crash(desc) => Some(desc),
            _ => None,
        }
    }

    /// Stable md5 digest of the crash description, usable as a
    /// deduplication bucket for crash artifacts.
    pub fn bucket(&self) -> Option<String> {
        self.description()
            .map(|desc| format!("{:x}", md5::compute(desc.as_bytes())))
    }
}

impl Fault for CrashFault {
    fn is_faulted(&self) -> bool {
        matches!(self.status, ExecutionStatus::Crash(_))
    }
}

/// Runs the target and reports a fault iff the run crashed.
///
/// Timeouts and executor-side errors are logged but not treated as faults;
/// a detector with a different hang/error policy can replace this one.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrashDetector;

impl<I, E> FaultDetector<I, E, CrashFault> for CrashDetector
where
    I: Input,
    E: TargetExecutor<I>,
{
    fn detect(&self, executor: &E, target: &mut E::Target) -> CrashFault {
        let status = executor.run(target);
        match &status {
            ExecutionStatus::Timeout => log::debug!("Target run timed out"),
            ExecutionStatus::Error(msg) => log::warn!("Target run reported an error: {msg}"),
            _ => {}
        }
        CrashFault { status }
    }
}
