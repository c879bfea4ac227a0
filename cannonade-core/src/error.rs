use thiserror::Error;

/// Fatal errors surfaced by [`run`](../cannonade/fn.run.html).
///
/// Only configuration problems and a target that no connection could ever
/// reach abort a run. Mid-run failures (timeouts, dropped connections,
/// malformed responses) are absorbed into the [`RunResult`](crate::RunResult)
/// instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("`{field}` must be greater than zero")]
    InvalidConfig { field: &'static str },

    #[error("`pipelining` above 1 requires http2; http/1.1 drives one request per connection")]
    PipeliningRequiresHttp2,

    #[error("all {attempted} connection attempts to {target} failed")]
    NoConnectionsAvailable { target: String, attempted: usize },
}
