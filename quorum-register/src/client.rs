//! Majority-quorum reads and writes over a static view.
//!
//! Every operation fans a request out to all processes at once and returns
//! as soon as a majority has answered. Any two majorities share a process,
//! so a completed write is always visible to the next quorum read: either
//! the read sees agreement at a timestamp at least as new, or it sees
//! divergence and writes the newest value back before returning it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::message::{Request, Response};
use crate::register::{Timestamp, Value, VersionedValue};
use crate::transport::{Transport, TransportError};
use crate::view::{Process, View};

#[derive(Debug, Error)]
pub enum QuorumError {
    /// `failures` holds one entry per failed process, so `failed == failures.len()`.
    #[error("quorum unavailable: needed {needed} of {n} processes but {failed} failed")]
    QuorumUnavailable {
        needed: usize,
        n: usize,
        failed: usize,
        failures: Vec<TransportError>,
    },
    #[error("none of the {} seed processes returned a view", .failures.len())]
    NoSeedResponded { failures: Vec<TransportError> },
}

/// Outcome of the read phase.
///
/// `value` carries the highest timestamp among the collected replies;
/// `divergent` is set when the replies did not all share that timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumRead {
    pub value: VersionedValue,
    pub divergent: bool,
}

impl QuorumRead {
    fn from_replies(replies: Vec<VersionedValue>) -> Self {
        let lowest = replies.iter().map(|reply| reply.timestamp).min();
        let value = replies
            .into_iter()
            .max_by_key(|reply| reply.timestamp)
            .unwrap_or_default();
        let divergent = lowest.is_some_and(|lowest| lowest != value.timestamp);
        Self { value, divergent }
    }
}

/// Client of the replicated register.
///
/// Operations of one client are meant to run one after another; the only
/// concurrency is inside a single fan-out.
#[derive(Debug)]
pub struct QuorumClient<T> {
    view: View,
    transport: Arc<T>,
    config: ClientConfig,
}

impl<T: Transport> QuorumClient<T> {
    pub fn new(view: View, transport: T) -> Self {
        Self::with_config(view, transport, ClientConfig::default())
    }

    pub fn with_config(view: View, transport: T, config: ClientConfig) -> Self {
        Self {
            view,
            transport: Arc::new(transport),
            config,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Reads the register, repairing the replicas first if they disagree.
    pub async fn read(&self) -> Result<Option<Value>, QuorumError> {
        let QuorumRead { value, divergent } = self.read_quorum().await?;
        if divergent {
            info!(
                timestamp = value.timestamp,
                "replicas diverge; writing newest value back before returning"
            );
            self.write_quorum(value.clone()).await?;
        }
        Ok(value.value)
    }

    /// Writes `value` with a timestamp above any a quorum has seen.
    ///
    /// Divergence found by the preliminary read is not repaired here: the new
    /// timestamp is strictly greater than every value observed, so the write
    /// itself overrides the stale replicas. Returns the installed timestamp.
    pub async fn write(&self, value: impl Into<Value>) -> Result<Timestamp, QuorumError> {
        let observed = self.read_quorum().await?;
        if observed.divergent {
            debug!(
                timestamp = observed.value.timestamp,
                "pre-write read diverged; the new write supersedes it"
            );
        }

        let message = VersionedValue::new(value, observed.value.timestamp + 1);
        let timestamp = message.timestamp;
        self.write_quorum(message).await?;
        Ok(timestamp)
    }

    /// Collects the register state from a quorum.
    pub async fn read_quorum(&self) -> Result<QuorumRead, QuorumError> {
        let replies = self.fan_out(Request::Read, expect_value).await?;
        Ok(QuorumRead::from_replies(replies))
    }

    /// Installs `message` at a quorum.
    ///
    /// Replicas already holding a newer timestamp acknowledge without adopting
    /// `message`; that still proves a timestamp at least as new is stored.
    pub async fn write_quorum(&self, message: VersionedValue) -> Result<(), QuorumError> {
        self.fan_out(Request::Write { value: message }, expect_ack)
            .await
            .map(|_| ())
    }

    /// Sends `request` to every process and waits for a quorum of accepted
    /// replies. Requests still in flight once the outcome is known are aborted.
    async fn fan_out<R, F>(&self, request: Request, accept: F) -> Result<Vec<R>, QuorumError>
    where
        F: Fn(&Process, Response) -> Result<R, TransportError>,
    {
        let n = self.view.n();
        let needed = self.view.quorum_size();
        let request_timeout = self.config.request_timeout;

        let mut in_flight = JoinSet::new();
        let mut targets = HashMap::with_capacity(n);
        for process in self.view.members().cloned() {
            let transport = Arc::clone(&self.transport);
            let request = request.clone();
            let target = process.clone();
            let handle = in_flight.spawn(async move {
                call_with_timeout(&*transport, &target, request, request_timeout).await
            });
            targets.insert(handle.id(), process);
        }

        let mut tally = Tally::new(targets);
        while let Some(joined) = in_flight.join_next_with_id().await {
            tally.record(joined, &accept);

            if tally.replies.len() >= needed {
                // Keep replies that already arrived; abandon the rest.
                while let Some(joined) = in_flight.try_join_next_with_id() {
                    tally.record(joined, &accept);
                }
                in_flight.abort_all();
                return Ok(tally.replies);
            }
            if n - tally.failures.len() < needed {
                break;
            }
        }

        let failures = tally.failures;
        let failed = failures.len();
        warn!(needed, n, failed, "quorum unavailable");
        Err(QuorumError::QuorumUnavailable {
            needed,
            n,
            failed,
            failures,
        })
    }
}

/// Replies and failures gathered by one fan-out. Every failure, including a
/// task that panicked or was cancelled, lands in `failures` under its process.
struct Tally<R> {
    targets: HashMap<task::Id, Process>,
    replies: Vec<R>,
    failures: Vec<TransportError>,
}

impl<R> Tally<R> {
    fn new(targets: HashMap<task::Id, Process>) -> Self {
        Self {
            replies: Vec::with_capacity(targets.len()),
            failures: Vec::new(),
            targets,
        }
    }

    fn record<F>(
        &mut self,
        joined: Result<(task::Id, Result<Response, TransportError>), JoinError>,
        accept: &F,
    ) where
        F: Fn(&Process, Response) -> Result<R, TransportError>,
    {
        let outcome = match joined {
            Ok((id, outcome)) => {
                let Some(process) = self.targets.remove(&id) else {
                    return;
                };
                outcome.and_then(|response| accept(&process, response))
            }
            Err(source) => {
                let Some(process) = self.targets.remove(&source.id()) else {
                    return;
                };
                warn!(%process, error = %source, "quorum request task failed");
                Err(TransportError::TaskFailed { process, source })
            }
        };

        match outcome {
            Ok(reply) => self.replies.push(reply),
            Err(err) => {
                debug!(process = %err.process(), error = %err, "process excluded from quorum");
                self.failures.push(err);
            }
        }
    }
}

/// Asks each seed in turn for its view and returns the first answer.
pub async fn fetch_view<T: Transport>(
    transport: &T,
    seeds: &[Process],
    request_timeout: Duration,
) -> Result<View, QuorumError> {
    let mut failures = Vec::new();
    for seed in seeds {
        let outcome = call_with_timeout(transport, seed, Request::GetCurrentView, request_timeout)
            .await
            .and_then(|response| expect_view(seed, response));
        match outcome {
            Ok(view) => {
                debug!(%seed, %view, "fetched current view");
                return Ok(view);
            }
            Err(err) => {
                warn!(%seed, error = %err, "seed did not return a view");
                failures.push(err);
            }
        }
    }
    Err(QuorumError::NoSeedResponded { failures })
}

async fn call_with_timeout<T: Transport>(
    transport: &T,
    process: &Process,
    request: Request,
    request_timeout: Duration,
) -> Result<Response, TransportError> {
    match timeout(request_timeout, transport.call(process, request)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TransportError::Timeout {
            process: process.clone(),
            timeout: request_timeout,
        }),
    }
}

fn expect_value(process: &Process, response: Response) -> Result<VersionedValue, TransportError> {
    match response {
        Response::Value { value } => Ok(value),
        other => Err(unexpected(process, "value", other)),
    }
}

fn expect_ack(process: &Process, response: Response) -> Result<VersionedValue, TransportError> {
    match response {
        Response::Ack { value } => Ok(value),
        other => Err(unexpected(process, "ack", other)),
    }
}

fn expect_view(process: &Process, response: Response) -> Result<View, TransportError> {
    match response {
        Response::View { view } => Ok(view),
        other => Err(unexpected(process, "view", other)),
    }
}

fn unexpected(process: &Process, wanted: &str, response: Response) -> TransportError {
    let message = match response {
        Response::Error { message } => message,
        other => format!("expected {wanted} response, got {other:?}"),
    };
    TransportError::Application {
        process: process.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreeing_replies_are_not_divergent() {
        let read = QuorumRead::from_replies(vec![
            VersionedValue::new("a", 4),
            VersionedValue::new("a", 4),
        ]);
        assert_eq!(read.value, VersionedValue::new("a", 4));
        assert!(!read.divergent);
    }

    #[test]
    fn mixed_timestamps_pick_the_newest() {
        let read = QuorumRead::from_replies(vec![
            VersionedValue::new("old", 5),
            VersionedValue::new("new", 6),
            VersionedValue::new("old", 5),
        ]);
        assert_eq!(read.value, VersionedValue::new("new", 6));
        assert!(read.divergent);
    }

    #[test]
    fn unwritten_register_reads_as_nil_at_zero() {
        let read = QuorumRead::from_replies(vec![VersionedValue::default(); 2]);
        assert_eq!(read.value, VersionedValue::default());
        assert!(!read.divergent);
    }

    #[test]
    fn error_response_keeps_its_message() {
        let err = expect_ack(
            &Process::new("a:1"),
            Response::Error {
                message: "boom".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Application { message, .. } if message == "boom"));
    }

    #[test]
    fn wrong_variant_is_an_application_error() {
        let err = expect_value(
            &Process::new("a:1"),
            Response::Ack {
                value: VersionedValue::default(),
            },
        )
        .unwrap_err();
        assert!(!err.is_unreachable());
    }
}
