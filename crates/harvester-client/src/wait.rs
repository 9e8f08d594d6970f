//! Bounded waits on a single resource.
//!
//! A wait subscribes to watch events for one object, checks every observed
//! version against a predicate and gives up once the timeout elapses. Running
//! out of time is a normal outcome (`NotReady`), never an error. The watch
//! stream is owned by the wait future, so it is released on every exit path,
//! including when the caller drops the future.

use crate::error::HarvesterError;
use futures::{Stream, StreamExt};
use kube::{Api, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

/// Default bound for a single wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a bounded wait.
#[derive(Debug, Clone)]
pub enum WaitOutcome<K> {
    /// The predicate matched this version of the resource
    Ready(K),
    /// Timed out, or the watch ended, before the predicate matched
    NotReady,
}

impl<K> WaitOutcome<K> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn into_ready(self) -> Option<K> {
        match self {
            Self::Ready(resource) => Some(resource),
            Self::NotReady => None,
        }
    }
}

/// Watches the named object in `api` until `is_ready` matches or `timeout` elapses.
pub async fn wait_for<K, P>(
    api: Api<K>,
    name: &str,
    timeout: Duration,
    is_ready: P,
) -> Result<WaitOutcome<K>, HarvesterError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    P: FnMut(&K) -> bool,
{
    let selector = format!("metadata.name={}", name);
    // Server-side timeout keeps each underlying watch request inside the bound too.
    let server_timeout = u32::try_from(timeout.as_secs().max(1)).unwrap_or(u32::MAX);
    let config = watcher::Config::default()
        .fields(&selector)
        .timeout(server_timeout);

    debug!("Waiting up to {:?} for {}", timeout, name);
    wait_on_stream(watcher(api, config), timeout, is_ready).await
}

/// Consumes watch events from `stream` until `is_ready` matches or `timeout` elapses.
pub async fn wait_on_stream<K, S, P>(
    stream: S,
    timeout: Duration,
    mut is_ready: P,
) -> Result<WaitOutcome<K>, HarvesterError>
where
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
    P: FnMut(&K) -> bool,
{
    let mut stream = std::pin::pin!(stream);

    let consume = async {
        while let Some(event) = stream.next().await {
            match event.map_err(|e| HarvesterError::Watch(e.to_string()))? {
                watcher::Event::Apply(resource) | watcher::Event::InitApply(resource) => {
                    if is_ready(&resource) {
                        return Ok(WaitOutcome::Ready(resource));
                    }
                }
                watcher::Event::Delete(_) | watcher::Event::Init | watcher::Event::InitDone => {}
            }
        }
        Ok(WaitOutcome::NotReady)
    };

    match tokio::time::timeout(timeout, consume).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => Ok(WaitOutcome::NotReady),
    }
}
