//! Authenticated HTTP GET for direct-fetch exports.

use std::error::Error as StdError;
use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;

/// Largest export body read into memory.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Response to a direct fetch; non-2xx statuses are returned, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Plain HTTP GET with caller-supplied headers.
pub trait HttpFetcher: Send + Sync {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError>;
}

/// `ureq`-backed fetcher.
#[derive(Debug, Clone)]
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(10))
                .redirects(5)
                .build(),
        }
    }
}

impl HttpFetcher for UreqFetcher {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<FetchResponse, FetchError> {
        let mut request = self.agent.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.set(name, value);
        }

        let response = match request.call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(ureq::Error::Transport(transport)) => {
                let timed_out = matches!(
                    transport.kind(),
                    ureq::ErrorKind::Io | ureq::ErrorKind::ConnectionFailed
                ) && caused_by_timeout(&transport);
                return Err(if timed_out {
                    FetchError::Timeout {
                        url: url.to_string(),
                        timeout,
                    }
                } else {
                    FetchError::Transport {
                        url: url.to_string(),
                        message: transport.to_string(),
                    }
                });
            }
        };

        let status = response.status();
        let content_type = response.header("content-type").map(str::to_string);
        let content_disposition = response.header("content-disposition").map(str::to_string);
        let body = read_body(response.into_reader(), MAX_BODY_BYTES, url, timeout)?;

        Ok(FetchResponse {
            status,
            content_type,
            content_disposition,
            body,
        })
    }
}

/// Whether any error in the `source` chain is an I/O timeout.
fn caused_by_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_timeout_kind(io_err.kind()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// Socket read timeouts surface as `WouldBlock` on some platforms.
fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

/// Read at most `limit` bytes; a longer body is an error, never a truncation.
fn read_body(
    reader: impl Read,
    limit: u64,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut body)
        .map_err(|e| {
            if is_timeout_kind(e.kind()) {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                }
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
    if body.len() as u64 > limit {
        return Err(FetchError::TooLarge {
            url: url.to_string(),
            limit,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        let mut resp = FetchResponse {
            status: 200,
            content_type: None,
            content_disposition: None,
            body: vec![],
        };
        assert!(resp.is_success());
        resp.status = 302;
        assert!(!resp.is_success());
        resp.status = 403;
        assert!(!resp.is_success());
    }

    #[test]
    fn test_unreachable_host_is_transport_error() {
        let fetcher = UreqFetcher::new();
        let err = fetcher
            .get("http://127.0.0.1:9/export", &[], Duration::from_secs(2))
            .unwrap_err();
        assert!(err.to_string().contains("127.0.0.1:9"));
    }

    #[test]
    fn test_body_at_limit_is_kept() {
        let body = read_body(&b"Email\na@x.com\n"[..], 14, "u", Duration::ZERO).unwrap();
        assert_eq!(body.len(), 14);
    }

    #[test]
    fn test_body_over_limit_is_rejected() {
        let body = &b"Email\na@x.com\nb@x.com\n"[..];
        let err = read_body(body, 14, "https://h/x", Duration::ZERO).unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 14, .. }));
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("exceeds 14 bytes"));
    }

    #[derive(Debug, Error)]
    #[error("connection failed")]
    struct Wrapped(#[source] io::Error);

    #[test]
    fn test_timeout_found_by_io_kind() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "deadline");
        assert!(caused_by_timeout(&timed_out));
        assert!(caused_by_timeout(&Wrapped(timed_out)));
        let would_block = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(caused_by_timeout(&Wrapped(would_block)));

        // The message alone does not make a timeout.
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "timed out");
        assert!(!caused_by_timeout(&Wrapped(refused)));
    }

    struct Stalled;

    impl Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    #[test]
    fn test_stalled_body_is_timeout() {
        let err = read_body(Stalled, 10, "u", Duration::from_secs(3)).unwrap_err();
        assert!(err.is_timeout());
    }
}
