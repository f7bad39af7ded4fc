//! The remote requester contract.
//!
//! The engine never opens sockets itself: every server exchange goes through
//! an injected [`HttpRequester`]. A default blocking implementation backed by
//! `ureq` is available behind the `ureq-transport` feature.

/// The request could not be executed but is probably worth retrying later
/// (e.g., no connectivity, timeout).
pub const RECOVERABLE_ERROR: i32 = -1;
/// The request could not be executed due to a local defect (e.g., programming
/// fault, out of memory).
pub const CRITICAL_ERROR: i32 = -2;

/// HTTP method for an engine request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One outbound exchange, fully assembled by the engine.
#[derive(Debug, Clone)]
pub struct HttpParams {
    pub method: Method,
    /// Absolute URL including query string.
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// The outcome of one exchange.
///
/// Contract: `code` is negative iff `error` is non-empty. The engine treats a
/// violation as a defect.
#[derive(Debug, Clone)]
pub struct HttpResult {
    /// HTTP status code on a completed exchange; [`RECOVERABLE_ERROR`] or
    /// [`CRITICAL_ERROR`] when the exchange could not be made at all.
    pub code: i32,
    pub body: String,
    /// Value of the response `Date` header, if present.
    pub date: String,
    /// Local failure description; empty iff the exchange completed.
    pub error: String,
}

impl HttpResult {
    pub fn recoverable(error: impl Into<String>) -> Self {
        Self {
            code: RECOVERABLE_ERROR,
            body: String::new(),
            date: String::new(),
            error: error.into(),
        }
    }

    pub fn critical(error: impl Into<String>) -> Self {
        Self {
            code: CRITICAL_ERROR,
            body: String::new(),
            date: String::new(),
            error: error.into(),
        }
    }
}

/// Performs one blocking HTTP exchange on behalf of the engine.
///
/// Implementations must do HTTPS certificate validation and should apply their
/// own timeout; the engine does not support mid-call cancellation.
pub trait HttpRequester: Send + Sync {
    fn request(&self, params: &HttpParams) -> HttpResult;
}

impl<T: HttpRequester + ?Sized> HttpRequester for std::sync::Arc<T> {
    fn request(&self, params: &HttpParams) -> HttpResult {
        (**self).request(params)
    }
}

/// `code >= 500 && code <= 599`
pub(crate) fn is_server_error(code: i32) -> bool {
    (500..=599).contains(&code)
}

#[cfg(feature = "ureq-transport")]
pub use self::ureq_transport::UreqRequester;

#[cfg(feature = "ureq-transport")]
mod ureq_transport {
    use std::time::Duration;

    use super::{HttpParams, HttpRequester, HttpResult, Method};

    /// Blocking requester backed by `ureq`.
    pub struct UreqRequester {
        agent: ureq::Agent,
    }

    impl UreqRequester {
        /// Requester with a 30-second global timeout.
        pub fn new() -> Self {
            Self::with_timeout(Duration::from_secs(30))
        }

        pub fn with_timeout(timeout: Duration) -> Self {
            let config = ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .http_status_as_error(false)
                .build();
            Self {
                agent: config.into(),
            }
        }
    }

    impl Default for UreqRequester {
        fn default() -> Self {
            Self::new()
        }
    }

    impl HttpRequester for UreqRequester {
        fn request(&self, params: &HttpParams) -> HttpResult {
            let outcome = match params.method {
                Method::Post => {
                    let mut request = self.agent.post(&params.url);
                    for (name, value) in &params.headers {
                        request = request.header(name.as_str(), value.as_str());
                    }
                    request.send_empty()
                }
                Method::Get => {
                    let mut request = self.agent.get(&params.url);
                    for (name, value) in &params.headers {
                        request = request.header(name.as_str(), value.as_str());
                    }
                    request.call()
                }
            };

            let mut response = match outcome {
                Ok(response) => response,
                // With http_status_as_error disabled, any Err here is a
                // transport-level failure (timeout, DNS, TLS, ...).
                Err(e) => return HttpResult::recoverable(e.to_string()),
            };

            let date = response
                .headers()
                .get(ureq::http::header::DATE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let code = i32::from(response.status().as_u16());

            let body = match response.body_mut().read_to_string() {
                Ok(body) => body,
                Err(e) => {
                    return HttpResult::recoverable(format!("failed to read response body: {e}"))
                }
            };

            HttpResult {
                code,
                body,
                date,
                error: String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors_uphold_contract() {
        let r = HttpResult::recoverable("timeout was exceeded");
        assert_eq!(r.code, RECOVERABLE_ERROR);
        assert!(!r.error.is_empty());

        let c = HttpResult::critical("oom");
        assert_eq!(c.code, CRITICAL_ERROR);
        assert!(!c.error.is_empty());
    }

    #[test]
    fn test_is_server_error_bounds() {
        assert!(!is_server_error(499));
        assert!(is_server_error(500));
        assert!(is_server_error(599));
        assert!(!is_server_error(600));
        assert!(!is_server_error(RECOVERABLE_ERROR));
    }
}
