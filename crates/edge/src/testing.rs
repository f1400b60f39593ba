//! Test doubles for the network.
//!
//! [`ScriptedFetcher`] answers requests from a per-URL script and records
//! every request it sees. Unscripted URLs fail with a transport error, as if
//! the device had no route to them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::net::{FetchError, FetchRequest, FetchResponse, Fetcher};

#[derive(Debug, Clone)]
enum Reply {
    Respond {
        response: FetchResponse,
        delay: Duration,
    },
    Fail(FetchError),
}

#[derive(Debug, Default)]
struct Script {
    /// Played in order; the last reply repeats once the queue is drained.
    queue: VecDeque<Reply>,
    last: Option<Reply>,
}

impl Script {
    fn next(&mut self) -> Option<Reply> {
        if let Some(reply) = self.queue.pop_front() {
            self.last = Some(reply.clone());
            return Some(reply);
        }
        self.last.clone()
    }
}

/// A [`Fetcher`] driven by canned replies.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<FetchRequest>>,
    offline: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        let mut scripts = lock(&self.scripts);
        let script = scripts.entry(url.to_string()).or_default();
        script.queue.extend(replies);
    }

    fn replace(&self, url: &str, reply: Reply) {
        let mut scripts = lock(&self.scripts);
        scripts.insert(
            url.to_string(),
            Script {
                queue: VecDeque::new(),
                last: Some(reply),
            },
        );
    }

    /// Always answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<String>) {
        self.respond_with(url, FetchResponse::new(status, body.into()));
    }

    /// Always answer `url` with `response`.
    pub fn respond_with(&self, url: &str, response: FetchResponse) {
        self.replace(
            url,
            Reply::Respond {
                response,
                delay: Duration::ZERO,
            },
        );
    }

    /// Answer `url` with an empty body after `delay`.
    pub fn respond_with_delay(&self, url: &str, status: StatusCode, delay: Duration) {
        self.replace(
            url,
            Reply::Respond {
                response: FetchResponse::empty(status),
                delay,
            },
        );
    }

    /// Answer successive requests to `url` in order.
    pub fn respond_sequence(
        &self,
        url: &str,
        replies: Vec<Result<(StatusCode, String), FetchError>>,
    ) {
        self.push(
            url,
            replies.into_iter().map(|reply| match reply {
                Ok((status, body)) => Reply::Respond {
                    response: FetchResponse::new(status, body),
                    delay: Duration::ZERO,
                },
                Err(e) => Reply::Fail(e),
            }),
        );
    }

    /// Always fail requests to `url`.
    pub fn fail(&self, url: &str, error: FetchError) {
        self.replace(url, Reply::Fail(error));
    }

    /// Fail every request with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every request seen so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests seen for `url`.
    #[must_use]
    pub fn hits(&self, url: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.url.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.to_string();
        lock(&self.requests).push(request);

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("network unreachable".to_string()));
        }

        let reply = lock(&self.scripts).get_mut(&url).and_then(Script::next);
        match reply {
            Some(Reply::Respond { response, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(Reply::Fail(e)) => Err(e),
            None => Err(FetchError::Transport(format!("no route to {url}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_sequence_then_repeat_last() {
        let fetcher = ScriptedFetcher::new();
        fetcher.respond_sequence(
            "https://a.test/x",
            vec![
                Err(FetchError::Timeout),
                Ok((StatusCode::OK, "ok".to_string())),
            ],
        );

        assert!(fetcher.fetch(get("https://a.test/x")).await.is_err());
        assert_eq!(fetcher.fetch(get("https://a.test/x")).await.unwrap().status, StatusCode::OK);
        assert_eq!(fetcher.fetch(get("https://a.test/x")).await.unwrap().status, StatusCode::OK);
        assert_eq!(fetcher.hits("https://a.test/x"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_and_offline() {
        let fetcher = ScriptedFetcher::new();
        fetcher.respond("https://a.test/y", StatusCode::OK, "y");
        assert!(matches!(
            fetcher.fetch(get("https://a.test/z")).await,
            Err(FetchError::Transport(_))
        ));

        fetcher.set_offline(true);
        assert!(fetcher.fetch(get("https://a.test/y")).await.is_err());
        fetcher.set_offline(false);
        assert!(fetcher.fetch(get("https://a.test/y")).await.is_ok());
    }
}
