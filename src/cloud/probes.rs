use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/* ============================= OUTCOMES ============================= */

/// Result of a liveness HEAD probe.
///
/// `Down` means a definitive HTTP response outside the acceptance set;
/// `Unreachable` means no response at all (timeout, refused connection,
/// DNS failure). Callers that must fail closed treat `Unreachable` as up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerdict {
    Up,
    Down,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub verdict: HttpVerdict,
    pub code: Option<u16>,
    pub latency_ms: Option<u64>,
}

impl ProbeOutcome {
    pub fn unreachable(latency_ms: Option<u64>) -> Self {
        Self { verdict: HttpVerdict::Unreachable, code: None, latency_ms }
    }
}

/// Result of the 3-second quick probe used by the scheduler.
/// UNKNOWN distinguishes a timeout or unreachable host from a definitive
/// non-accepted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickVerdict {
    Up,
    Down,
    Unknown,
}

impl QuickVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuickVerdict::Up => "UP",
            QuickVerdict::Down => "DOWN",
            QuickVerdict::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickOutcome {
    pub verdict: QuickVerdict,
    pub code: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpVerdict {
    Open,
    Refused,
    Timeout,
}

pub const QUICK_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/* ============================= TRAIT ============================= */

/// Outbound reachability probes. TCP probes are reserved for start-time
/// database healthiness checks; they never feed a status verdict.
#[async_trait]
pub trait HttpProber: Send + Sync {
    /// HEAD `https://<host>` then `http://<host>`, following redirects,
    /// with `timeout` per attempt. Returns on the first definitive response.
    async fn head_probe(&self, hostname: &str, timeout: Duration) -> ProbeOutcome;

    /// 3-second probe with UNKNOWN on timeout.
    async fn quick_probe(&self, hostname: &str) -> QuickOutcome;

    async fn tcp_probe(&self, host: &str, port: u16, timeout: Duration) -> TcpVerdict;
}

/* ============================= HELPERS ============================= */

pub fn accepts(acceptance: &[u16], code: u16) -> bool {
    acceptance.contains(&code)
}

/// HTTPS first, HTTP fallback; a hostname that already carries a scheme is
/// probed as-is.
fn candidate_urls(hostname: &str) -> Vec<String> {
    if hostname.starts_with("http://") || hostname.starts_with("https://") {
        vec![hostname.to_string()]
    } else {
        vec![format!("https://{hostname}"), format!("http://{hostname}")]
    }
}

/* ============================= REQWEST IMPLEMENTATION ============================= */

pub struct ReqwestProber {
    client: reqwest::Client,
    acceptance: Vec<u16>,
}

impl ReqwestProber {
    pub fn new(acceptance: Vec<u16>, insecure: bool) -> anyhow::Result<Self> {
        if insecure {
            warn!("tls_verification_disabled_for_outbound_probes");
        }
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self { client, acceptance })
    }

    async fn attempt(&self, url: &str, timeout: Duration) -> Result<(u16, u64), reqwest::Error> {
        let started = std::time::Instant::now();
        let response = self.client.head(url).timeout(timeout).send().await?;
        Ok((response.status().as_u16(), started.elapsed().as_millis() as u64))
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn head_probe(&self, hostname: &str, timeout: Duration) -> ProbeOutcome {
        if hostname.is_empty() {
            return ProbeOutcome::unreachable(None);
        }

        let mut last_latency = None;
        for url in candidate_urls(hostname) {
            match self.attempt(&url, timeout).await {
                Ok((code, latency_ms)) => {
                    let verdict = if accepts(&self.acceptance, code) {
                        HttpVerdict::Up
                    } else {
                        HttpVerdict::Down
                    };
                    debug!(url = %url, code, latency_ms, "http_probe_response");
                    return ProbeOutcome { verdict, code: Some(code), latency_ms: Some(latency_ms) };
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "http_probe_attempt_failed");
                    if e.is_timeout() {
                        last_latency = Some(timeout.as_millis() as u64);
                    }
                }
            }
        }

        ProbeOutcome::unreachable(last_latency)
    }

    async fn quick_probe(&self, hostname: &str) -> QuickOutcome {
        if hostname.is_empty() {
            return QuickOutcome { verdict: QuickVerdict::Unknown, code: None };
        }

        let mut last_definitive: Option<u16> = None;
        for url in candidate_urls(hostname) {
            match self.attempt(&url, QUICK_PROBE_TIMEOUT).await {
                Ok((code, _)) => {
                    if accepts(&self.acceptance, code) {
                        return QuickOutcome { verdict: QuickVerdict::Up, code: Some(code) };
                    }
                    last_definitive = Some(code);
                }
                Err(e) if e.is_timeout() => {
                    return QuickOutcome { verdict: QuickVerdict::Unknown, code: None };
                }
                Err(_) => continue,
            }
        }

        match last_definitive {
            Some(code) => QuickOutcome { verdict: QuickVerdict::Down, code: Some(code) },
            None => QuickOutcome { verdict: QuickVerdict::Unknown, code: None },
        }
    }

    async fn tcp_probe(&self, host: &str, port: u16, timeout: Duration) -> TcpVerdict {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => TcpVerdict::Open,
            Ok(Err(_)) => TcpVerdict::Refused,
            Err(_) => TcpVerdict::Timeout,
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_default_set() {
        assert!(accepts(&[200], 200));
        assert!(!accepts(&[200], 405));
        assert!(!accepts(&[200], 503));
    }

    #[test]
    fn test_accepts_metrics_variant() {
        assert!(accepts(&[200, 405], 405));
        assert!(accepts(&[200, 405], 200));
        assert!(!accepts(&[200, 405], 302));
    }

    #[test]
    fn test_candidate_urls_https_first() {
        assert_eq!(
            candidate_urls("svc.example.com"),
            vec!["https://svc.example.com", "http://svc.example.com"]
        );
    }

    #[test]
    fn test_candidate_urls_respects_explicit_scheme() {
        assert_eq!(candidate_urls("http://svc.example.com"), vec!["http://svc.example.com"]);
        assert_eq!(candidate_urls("https://svc.example.com"), vec!["https://svc.example.com"]);
    }

    #[test]
    fn test_quick_verdict_strings() {
        assert_eq!(QuickVerdict::Up.as_str(), "UP");
        assert_eq!(QuickVerdict::Down.as_str(), "DOWN");
        assert_eq!(QuickVerdict::Unknown.as_str(), "UNKNOWN");
    }

    #[tokio::test]
    async fn test_tcp_probe_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = ReqwestProber::new(vec![200], true).unwrap();
        let verdict = prober.tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(verdict, TcpVerdict::Open);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_port() {
        // Bind then drop to find a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = ReqwestProber::new(vec![200], true).unwrap();
        let verdict = prober.tcp_probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(verdict, TcpVerdict::Refused);
    }

    #[tokio::test]
    async fn test_head_probe_empty_hostname_unreachable() {
        let prober = ReqwestProber::new(vec![200], true).unwrap();
        let outcome = prober.head_probe("", Duration::from_secs(1)).await;
        assert_eq!(outcome.verdict, HttpVerdict::Unreachable);
        assert_eq!(outcome.code, None);
    }

    #[tokio::test]
    async fn test_quick_probe_empty_hostname_unknown() {
        let prober = ReqwestProber::new(vec![200], true).unwrap();
        let outcome = prober.quick_probe("").await;
        assert_eq!(outcome.verdict, QuickVerdict::Unknown);
    }
}
