use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::message::{Request, Response, read_message, write_message};
use crate::service::ReplicaService;

/// Serves one [`ReplicaService`] over TCP.
pub struct ReplicaServer {
    listener: TcpListener,
    service: Arc<ReplicaService>,
}

impl ReplicaServer {
    pub fn new(listener: TcpListener, service: Arc<ReplicaService>) -> Self {
        Self { listener, service }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> &Arc<ReplicaService> {
        &self.service
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ReplicaServer { listener, service } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("replica shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &service);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    service: &Arc<ReplicaService>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, service),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, service: &Arc<ReplicaService>) {
    let service = Arc::clone(service);
    tokio::spawn(async move {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        if let Err(err) = serve_connection(&mut reader, &mut writer, &service).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

/// Answers request lines until the peer hangs up.
///
/// A line that does not decode gets an error response; the connection stays open.
pub async fn serve_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    service: &ReplicaService,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let response = match read_message::<_, Request>(reader).await {
            Ok(Some(request)) => {
                debug!(?request, "handling request");
                service.handle(request)
            }
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => Response::Error {
                message: format!("malformed request: {err}"),
            },
            Err(err) => return Err(err.into()),
        };
        write_message(writer, &response).await?;
    }
    Ok(())
}
