//! Ordered fallback across redundant sources.
//!
//! Both the price providers and the proof-book sources follow the same rule:
//! try each source in declared order, give every attempt a bounded wait, stop
//! at the first success. This module is that rule, once.
//!
//! A timed-out attempt is dropped, not detached. Whatever it was doing is
//! cancelled at its next suspension point, so a slow source can never hand
//! back a value after a later source has already answered.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Why one source did not answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptFailure {
    /// The per-attempt deadline passed.
    TimedOut(#[serde(with = "millis")] Duration),
    /// The source answered with an error.
    Failed(String),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::TimedOut(d) => write!(f, "timed out after {}ms", d.as_millis()),
            AttemptFailure::Failed(e) => f.write_str(e),
        }
    }
}

/// One failed attempt, for the caller's diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// Identifier of the source that failed.
    pub source_id: String,
    /// What went wrong.
    pub failure: AttemptFailure,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source_id, self.failure)
    }
}

/// The first successful answer, plus what failed before it.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The answer.
    pub value: T,
    /// Identifier of the source that produced it.
    pub source_id: String,
    /// Position of that source in the list (0 = primary).
    pub index: usize,
    /// Sources tried and abandoned first.
    pub failures: Vec<Attempt>,
}

/// Tries `sources` in order until one answers within `per_attempt`.
///
/// `label` names each source in logs and diagnostics; `what` names the kind
/// of data being fetched. Returns every attempt's failure if none succeeds.
pub async fn resolve_in_order<'a, S, T, E, L, F, Fut>(
    what: &'static str,
    sources: &'a [S],
    per_attempt: Duration,
    label: L,
    mut attempt: F,
) -> Result<Resolved<T>, Vec<Attempt>>
where
    L: Fn(&S) -> String,
    F: FnMut(&'a S) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut failures = Vec::new();

    for (index, source) in sources.iter().enumerate() {
        let source_id = label(source);
        debug!(what, source = %source_id, index, "Trying source");

        let failure = match timeout(per_attempt, attempt(source)).await {
            Ok(Ok(value)) => {
                if !failures.is_empty() {
                    debug!(what, source = %source_id, skipped = failures.len(), "Resolved from fallback source");
                }
                return Ok(Resolved {
                    value,
                    source_id,
                    index,
                    failures,
                });
            }
            Ok(Err(e)) => AttemptFailure::Failed(e.to_string()),
            Err(_) => AttemptFailure::TimedOut(per_attempt),
        };

        warn!(what, source = %source_id, %failure, "Source failed, advancing");
        failures.push(Attempt { source_id, failure });
    }

    Err(failures)
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
