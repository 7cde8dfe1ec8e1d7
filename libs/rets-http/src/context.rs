use std::time::Duration;
use tokio::time::Instant;

/// Absolute deadline for one logical request.
///
/// Stored in the request's extensions. The dispatcher enforces it on every
/// network attempt, and the challenge retry inherits it unchanged, so the
/// whole exchange (including the retry) has to finish before this instant.
/// Cancellation is expressed by dropping the future returned by `send`.
///
/// # Example
///
/// ```ignore
/// let mut req = http::Request::get(url).body(Full::default())?;
/// req.extensions_mut().insert(Deadline::after(Duration::from_secs(30)));
/// let resp = session.send(req).await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    #[must_use]
    pub fn instant(self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero if it already passed.
    #[must_use]
    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}
