/// Errors that stop a run before or instead of dispatching anything.
///
/// Failures of individual work items never surface here, they are recorded
/// in the `RunResult` as `FailureReason`s.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid configuration: concurrency {concurrency} cannot run {items} items")]
    InvalidConfiguration { items: usize, concurrency: usize },

    #[error("invalid target {target:?}: {msg}")]
    InvalidTarget { target: String, msg: String },

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
