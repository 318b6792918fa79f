use std::future::Future;
use std::time::Duration;

/* ============================= ERROR KINDS ============================= */

/// Classified failure from a cloud adapter call.
///
/// Every AWS / Kubernetes / network error is folded into one of these five
/// kinds so that callers can decide policy without inspecting provider
/// error types.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Credentials or RBAC reject the call.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Throttling, timeout, or transient network failure. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The resource exists but is not in a state eligible for the transition.
    #[error("conflicting state: {0}")]
    Conflict(String),

    /// Misconfiguration or invariant violation. Never retried.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CloudError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    /// Whether an orchestrator phase should stop the run when it sees this.
    pub fn is_terminating(&self) -> bool {
        matches!(self, CloudError::Fatal(_) | CloudError::Unauthorized(_))
    }
}

/* ============================= CLASSIFICATION ============================= */

/// Fold an AWS SDK error code / message pair into a `CloudError`.
///
/// Works off the service error code when one is present; dispatch and
/// timeout failures carry no code and are classified by message.
pub fn classify_aws(code: Option<&str>, message: &str) -> CloudError {
    if let Some(code) = code {
        if code.contains("Throttl")
            || code == "RequestLimitExceeded"
            || code == "TooManyRequestsException"
            || code == "ProvisionedThroughputExceededException"
        {
            return CloudError::Transient(message.to_string());
        }
        if code.contains("NotFound") || code == "NoSuchEntity" {
            return CloudError::NotFound(message.to_string());
        }
        if code.contains("AccessDenied")
            || code.contains("Unauthorized")
            || code.contains("UnrecognizedClient")
            || code.contains("ExpiredToken")
            || code.contains("InvalidClientTokenId")
        {
            return CloudError::Unauthorized(message.to_string());
        }
        if code.contains("Conflict") || code == "ResourceInUseException" || code == "IncorrectInstanceState" {
            return CloudError::Conflict(message.to_string());
        }
        return CloudError::Fatal(message.to_string());
    }

    // No service code: connection-level failure from the SDK runtime.
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("dispatch failure")
        || lowered.contains("connection")
    {
        CloudError::Transient(message.to_string())
    } else {
        CloudError::Fatal(message.to_string())
    }
}

/// Fold a kube client error into a `CloudError`.
pub fn classify_kube(err: &kube::Error) -> CloudError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            401 | 403 => CloudError::Unauthorized(resp.message.clone()),
            404 => CloudError::NotFound(resp.message.clone()),
            409 => CloudError::Conflict(resp.message.clone()),
            429 => CloudError::Transient(resp.message.clone()),
            code if code >= 500 => CloudError::Transient(resp.message.clone()),
            _ => CloudError::Fatal(resp.message.clone()),
        },
        kube::Error::HyperError(e) => CloudError::Transient(e.to_string()),
        kube::Error::Service(e) => CloudError::Transient(e.to_string()),
        other => CloudError::Fatal(other.to_string()),
    }
}

/* ============================= RETRY ============================= */

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Run `op`, retrying exactly once after a 1 s backoff when the first
/// attempt fails transiently. Every other error surfaces immediately;
/// the caller decides policy for repeated failures.
pub async fn retry_once<T, F, Fut>(op: F) -> Result<T, CloudError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::debug!(error = %e, "transient_error_retrying");
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── classify_aws ──

    #[test]
    fn test_classify_throttling_is_transient() {
        let e = classify_aws(Some("Throttling"), "rate exceeded");
        assert!(e.is_transient());
    }

    #[test]
    fn test_classify_request_limit_is_transient() {
        let e = classify_aws(Some("RequestLimitExceeded"), "slow down");
        assert!(e.is_transient());
    }

    #[test]
    fn test_classify_dynamo_throughput_is_transient() {
        let e = classify_aws(Some("ProvisionedThroughputExceededException"), "x");
        assert!(e.is_transient());
    }

    #[test]
    fn test_classify_resource_not_found() {
        let e = classify_aws(Some("ResourceNotFoundException"), "no such nodegroup");
        assert!(matches!(e, CloudError::NotFound(_)));
    }

    #[test]
    fn test_classify_access_denied() {
        let e = classify_aws(Some("AccessDeniedException"), "nope");
        assert!(matches!(e, CloudError::Unauthorized(_)));
        assert!(e.is_terminating());
    }

    #[test]
    fn test_classify_expired_token() {
        let e = classify_aws(Some("ExpiredTokenException"), "token expired");
        assert!(matches!(e, CloudError::Unauthorized(_)));
    }

    #[test]
    fn test_classify_resource_in_use_is_conflict() {
        let e = classify_aws(Some("ResourceInUseException"), "busy");
        assert!(matches!(e, CloudError::Conflict(_)));
    }

    #[test]
    fn test_classify_unknown_code_is_fatal() {
        let e = classify_aws(Some("ValidationException"), "bad input");
        assert!(matches!(e, CloudError::Fatal(_)));
        assert!(e.is_terminating());
    }

    #[test]
    fn test_classify_no_code_timeout_is_transient() {
        let e = classify_aws(None, "request timed out after 30s");
        assert!(e.is_transient());
    }

    #[test]
    fn test_classify_no_code_dispatch_failure_is_transient() {
        let e = classify_aws(None, "dispatch failure: connection refused");
        assert!(e.is_transient());
    }

    #[test]
    fn test_classify_no_code_other_is_fatal() {
        let e = classify_aws(None, "serialization error");
        assert!(matches!(e, CloudError::Fatal(_)));
    }

    // ── classify_kube ──

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("http {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_classify_kube_403_unauthorized() {
        assert!(matches!(classify_kube(&api_error(403)), CloudError::Unauthorized(_)));
    }

    #[test]
    fn test_classify_kube_401_unauthorized() {
        assert!(matches!(classify_kube(&api_error(401)), CloudError::Unauthorized(_)));
    }

    #[test]
    fn test_classify_kube_404_not_found() {
        assert!(matches!(classify_kube(&api_error(404)), CloudError::NotFound(_)));
    }

    #[test]
    fn test_classify_kube_409_conflict() {
        assert!(matches!(classify_kube(&api_error(409)), CloudError::Conflict(_)));
    }

    #[test]
    fn test_classify_kube_429_transient() {
        assert!(classify_kube(&api_error(429)).is_transient());
    }

    #[test]
    fn test_classify_kube_503_transient() {
        assert!(classify_kube(&api_error(503)).is_transient());
    }

    #[test]
    fn test_classify_kube_400_fatal() {
        assert!(matches!(classify_kube(&api_error(400)), CloudError::Fatal(_)));
    }

    // ── retry_once ──

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_recovers_from_single_transient() {
        let calls = AtomicUsize::new(0);
        let result = retry_once(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CloudError::Transient("first".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_gives_up_after_second_transient() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::Transient("still failing".into()))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_does_not_retry_fatal() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CloudError::Fatal("broken".into()))
        })
        .await;
        assert!(matches!(result.unwrap_err(), CloudError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_once_success_first_try() {
        let calls = AtomicUsize::new(0);
        let result = retry_once(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("ok")
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
