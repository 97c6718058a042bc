use std::fmt;

/// A fuzzable test case.
///
/// The engine treats inputs as opaque values: what an input *means*, and when
/// two inputs count as the same, is decided entirely by the executor,
/// minimizer, and mutator plugins. The engine only needs to clone inputs and
/// move them between worker threads.
pub trait Input: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> Input for T where T: Clone + Send + Sync + fmt::Debug + 'static {}
