//! How a quorum client reaches a single replica.
//!
//! The quorum protocol only needs "send this request to that process and
//! give me the answer or a failure". [`TcpTransport`] does that over the
//! JSON-line protocol in [`crate::message`]; [`MemoryTransport`] calls
//! in-process replicas directly and can inject crashes and stalls.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::task::JoinError;

use crate::message::{Request, Response, read_message, write_message};
use crate::service::ReplicaService;
use crate::view::{Process, View};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{process} is unreachable: {source}")]
    Unreachable {
        process: Process,
        #[source]
        source: io::Error,
    },
    #[error("{process} did not answer within {timeout:?}")]
    Timeout { process: Process, timeout: Duration },
    #[error("{process} answered with an error: {message}")]
    Application { process: Process, message: String },
    #[error("request to {process} was lost with its task: {source}")]
    TaskFailed {
        process: Process,
        #[source]
        source: JoinError,
    },
}

impl TransportError {
    pub fn process(&self) -> &Process {
        match self {
            TransportError::Unreachable { process, .. }
            | TransportError::Timeout { process, .. }
            | TransportError::Application { process, .. }
            | TransportError::TaskFailed { process, .. } => process,
        }
    }

    /// True when the process gave no answer at all.
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, TransportError::Application { .. })
    }
}

/// Delivers one request to one process.
pub trait Transport: Send + Sync + 'static {
    fn call(
        &self,
        to: &Process,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

/// Opens a fresh TCP connection per request.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    fn call(
        &self,
        to: &Process,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        let process = to.clone();
        async move {
            let unreachable = |source: io::Error| TransportError::Unreachable {
                process: process.clone(),
                source,
            };

            let stream = TcpStream::connect(process.addr())
                .await
                .map_err(unreachable)?;
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);

            write_message(&mut writer, &request)
                .await
                .map_err(unreachable)?;
            let response = read_message::<_, Response>(&mut reader)
                .await
                .map_err(|err| match err.kind() {
                    // The process answered, just not with anything we understand.
                    io::ErrorKind::InvalidData => TransportError::Application {
                        process: process.clone(),
                        message: format!("undecodable response: {err}"),
                    },
                    _ => unreachable(err),
                })?
                .ok_or_else(|| {
                    unreachable(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before a response arrived",
                    ))
                })?;

            match response {
                Response::Error { message } => Err(TransportError::Application { process, message }),
                response => Ok(response),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Crashed,
    Stalled,
}

#[derive(Debug, Default)]
struct MemoryNetwork {
    replicas: HashMap<Process, Arc<ReplicaService>>,
    faults: HashMap<Process, Fault>,
}

/// In-process transport over [`ReplicaService`] instances.
///
/// Crashed processes fail immediately as unreachable; stalled processes
/// never answer, so only the client's request timeout or early quorum
/// completion gets past them.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    network: Arc<Mutex<MemoryNetwork>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts one fresh replica for every member of `view`.
    pub fn cluster(view: &View) -> Self {
        let transport = Self::new();
        for process in view.members() {
            transport.add_replica(process.clone(), Arc::new(ReplicaService::new(view.clone())));
        }
        transport
    }

    pub fn add_replica(&self, process: Process, service: Arc<ReplicaService>) {
        self.with_network(|network| {
            network.replicas.insert(process, service);
        });
    }

    pub fn replica(&self, process: &Process) -> Option<Arc<ReplicaService>> {
        self.with_network(|network| network.replicas.get(process).cloned())
    }

    pub fn crash(&self, process: &Process) {
        self.set_fault(process, Fault::Crashed);
    }

    pub fn stall(&self, process: &Process) {
        self.set_fault(process, Fault::Stalled);
    }

    pub fn restore(&self, process: &Process) {
        self.with_network(|network| {
            network.faults.remove(process);
        });
    }

    fn set_fault(&self, process: &Process, fault: Fault) {
        self.with_network(|network| {
            network.faults.insert(process.clone(), fault);
        });
    }

    fn with_network<R>(&self, f: impl FnOnce(&mut MemoryNetwork) -> R) -> R {
        let mut network = self.network.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut network)
    }

    fn route(&self, process: &Process) -> Result<Option<Arc<ReplicaService>>, TransportError> {
        self.with_network(|network| match network.faults.get(process) {
            Some(Fault::Stalled) => Ok(None),
            Some(Fault::Crashed) => Err(TransportError::Unreachable {
                process: process.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "process crashed"),
            }),
            None => network
                .replicas
                .get(process)
                .cloned()
                .map(Some)
                .ok_or_else(|| TransportError::Unreachable {
                    process: process.clone(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such process"),
                }),
        })
    }
}

impl Transport for MemoryTransport {
    fn call(
        &self,
        to: &Process,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        let route = self.route(to);
        async move {
            match route? {
                Some(service) => Ok(service.handle(request)),
                None => std::future::pending().await,
            }
        }
    }
}
