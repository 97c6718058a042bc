use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::hash::Hash;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur while collecting or decoding coverage.
#[derive(Error, Debug)]
pub enum CoverageError {
    /// Clearing stale coverage state for a target run failed.
    #[error("Failed to clear coverage state: {0}")]
    Clear(String),
    /// Reading raw coverage for a target run failed.
    #[error("Failed to read coverage: {0}")]
    Read(String),
}

/// A compressed coverage value.
///
/// Compressed coverage is the engine's novelty currency: it must support
/// equality and hashing so it can live in the seen-coverage set. Raw coverage
/// stays opaque to the engine and only ever flows into a
/// [`CoverageCompressor`].
pub trait Coverage: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {}

impl<T> Coverage for T where T: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static {}

/// Reads coverage produced by one target run.
///
/// `T` is the executor's per-run target handle; `clear` and `read` bracket the
/// fault-detection step and must not retain the handle beyond the call.
pub trait CoverageReader<T, R>: Send + Sync {
    /// Discards any stale coverage state left over from a previous run.
    fn clear(&self, target: &mut T) -> Result<(), CoverageError>;
    /// Reads the raw coverage the run produced.
    fn read(&self, target: &mut T) -> Result<R, CoverageError>;
}

/// Compresses raw coverage into a comparable, hashable encoding.
///
/// Must be deterministic: the same raw coverage always compresses to an equal
/// value, otherwise novelty detection degenerates.
pub trait CoverageCompressor<R, C: Coverage>: Send + Sync {
    fn compress(&self, raw: R) -> C;
}

/// The set of compressed coverage values observed so far in this run.
///
/// This is the one piece of cross-worker shared mutable state outside the
/// work queue and the tracer gateway. The set only grows; membership is
/// checked and inserted under a single lock so classification is atomic.
pub struct SeenCoverage<C: Coverage> {
    inner: Mutex<HashSet<C>>,
}

impl<C: Coverage> SeenCoverage<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashSet::new()),
        }
    }

    /// Records `coverage` and reports whether it was novel.
    ///
    /// Returns `true` iff the value was not already a member at the moment of
    /// insertion. Once a value has been observed, every later call with an
    /// equal value returns `false`.
    pub fn observe(&self, coverage: &C) -> bool {
        self.inner.lock().unwrap().insert(coverage.clone())
    }

    /// Number of distinct compressed coverage values observed so far.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Coverage> Default for SeenCoverage<C> {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static PROBE_SINK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Records one coverage probe hit for the current thread.
///
/// In-process harnesses (or instrumentation shims around them) call this with
/// a stable probe id per program point. The hits accumulate in a thread-local
/// sink drained by [`InProcessCoverageReader`]; a target runs, from clear to
/// read, on a single worker thread, so sinks never mix across workers.
pub fn record_probe(id: u64) {
    PROBE_SINK.with(|sink| sink.borrow_mut().push(id));
}

/// Coverage reader for in-process targets instrumented via [`record_probe`].
///
/// Ignores the target handle entirely; the raw coverage is the ordered list
/// of probe hits the harness recorded on this thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessCoverageReader;

impl<T> CoverageReader<T, Vec<u64>> for InProcessCoverageReader {
    fn clear(&self, _target: &mut T) -> Result<(), CoverageError> {
        PROBE_SINK.with(|sink| sink.borrow_mut().clear());
        Ok(())
    }

    fn read(&self, _target: &mut T) -> Result<Vec<u64>, CoverageError> {
        Ok(PROBE_SINK.with(|sink| std::mem::take(&mut *sink.borrow_mut())))
    }
}

/// Coverage reader for subprocess targets that dump probe ids to a file.
///
/// The [`CommandExecutor`](crate::executor::CommandExecutor) points the child
/// at a per-run dump path; the child writes one decimal probe id per line.
/// A missing file reads as empty coverage, malformed lines are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileProbeCoverageReader;

impl CoverageReader<crate::executor::CommandTarget, Vec<u64>> for FileProbeCoverageReader {
    fn clear(&self, target: &mut crate::executor::CommandTarget) -> Result<(), CoverageError> {
        let path = target.coverage_path();
        if path.exists() {
            fs::remove_file(path).map_err(|e| CoverageError::Clear(e.to_string()))?;
        }
        Ok(())
    }

    fn read(&self, target: &mut crate::executor::CommandTarget) -> Result<Vec<u64>, CoverageError> {
        let path = target.coverage_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path).map_err(|e| CoverageError::Read(e.to_string()))?;
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse::<u64>().ok())
            .collect())
    }
}

/// Compresses a raw probe hit list into the set of distinct probes.
///
/// Hit order and hit counts are discarded; two runs cover the same ground iff
/// they touched the same probes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeSetCompressor;

impl CoverageCompressor<Vec<u64>, BTreeSet<u64>> for ProbeSetCompressor {
    fn compress(&self, raw: Vec<u64>) -> BTreeSet<u64> {
        raw.into_iter().collect()
    }
}
