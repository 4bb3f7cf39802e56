use serde::Serialize;
use std::time::Duration;

use crate::error::Result;

/// How a generation stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Finished,
    Interrupted { reason: String },
    /// The consumer dropped the stream before it ended.
    Cancelled,
    /// The whole-request deadline elapsed mid-stream.
    TimedOut,
}

/// Summary handed to completion hooks once per stream.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub request_id: String,
    pub model: String,
    /// Concatenation of every fragment delivered so far.
    pub text: String,
    pub outcome: CompletionOutcome,
    pub fragments: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Called exactly once after a stream ends, including on cancellation.
///
/// Synchronous so it can run from `Drop`. An error is logged by the caller and
/// never affects what was already delivered.
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_complete(&self, completion: &Completion) -> Result<()>;
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
