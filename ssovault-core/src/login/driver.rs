//! Automation driver contract

use async_trait::async_trait;
use tokio::time::Instant;

/// Result of one driver attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    Success,
    /// Retry may succeed, e.g. the page or form was not ready yet
    TransientFailure(String),
    /// Retry cannot help, e.g. credentials rejected, MFA or CAPTCHA required
    PermanentFailure(String),
}

/// Locates and fills a target's login form and interprets the response
///
/// The orchestrator owns retry, backoff and timeout. A driver makes exactly
/// one attempt per call and should give up by `deadline`; the orchestrator
/// abandons the call at the deadline either way. `secret` is only valid for
/// the duration of the call and must not be retained or logged.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn attempt(
        &self,
        target_url: &str,
        username: &str,
        secret: &str,
        deadline: Instant,
    ) -> DriverOutcome;
}
