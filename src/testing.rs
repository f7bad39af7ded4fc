//! Test-support collaborators for exercising failure paths.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::http::{HttpParams, HttpRequester, HttpResult};

/// A forced outcome for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Complete the exchange with this HTTP status and an empty body.
    StatusCode(i32),
    /// Fail the exchange as a timed-out request.
    Timeout,
}

/// Wraps a requester and replaces the next queued exchanges with forced
/// outcomes. Once the queue is drained, requests pass through to the inner
/// requester untouched.
///
/// Used to drive retry and error-surfacing paths that a well-behaved server
/// will not produce on demand.
pub struct FaultInjector<R> {
    inner: R,
    queue: Mutex<VecDeque<Fault>>,
}

impl<R> FaultInjector<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue one forced outcome.
    pub fn push(&self, fault: Fault) {
        self.force(fault, 1);
    }

    /// Queue `count` copies of a forced outcome.
    pub fn force(&self, fault: Fault, count: usize) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(std::iter::repeat(fault).take(count));
        }
    }
}

impl<R: HttpRequester> HttpRequester for FaultInjector<R> {
    fn request(&self, params: &HttpParams) -> HttpResult {
        let fault = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        match fault {
            Some(Fault::StatusCode(code)) => HttpResult {
                code,
                body: String::new(),
                date: String::new(),
                error: String::new(),
            },
            Some(Fault::Timeout) => HttpResult::recoverable("request timeout exceeded"),
            None => self.inner.request(params),
        }
    }
}
