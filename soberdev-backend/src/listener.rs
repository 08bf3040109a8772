use std::net::{SocketAddr, ToSocketAddrs as _};

use anyhow::Context;
use async_trait::async_trait;
use futures::TryFutureExt as _;
use serde::Serialize;
use soberdev_task::{ChildTask, ShutdownSignal, Task};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::Instrument as _;
use url::Url;

use crate::AppState;

const HTTP_CONNECTION_MAX_DURATION: tokio::time::Duration = tokio::time::Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct ListenerUrls {
    /// URL to use on local network
    pub internal_url: Url,

    /// URL to use from external networks
    pub external_url: Url,
}

pub struct BackendListener {
    addr: SocketAddr,
    listener: TcpListener,
    state: AppState,
}

impl BackendListener {
    pub fn init_and_bind(urls: &ListenerUrls, state: AppState) -> anyhow::Result<Self> {
        let url = &urls.internal_url;

        // Only plain HTTP here; TLS termination is the fronting proxy's job.
        if url.scheme() != "http" {
            anyhow::bail!("unsupported listener scheme: {}", url.scheme());
        }

        let host = url.host_str().context("internal URL has no host")?;
        let port = url.port_or_known_default().context("internal URL has no port")?;

        let socket_addr = (host, port)
            .to_socket_addrs()
            .context("resolve internal URL to socket addr")?
            .next()
            .context("internal URL resolved to nothing")?;

        let socket = if socket_addr.is_ipv4() {
            TcpSocket::new_v4().context("failed to create IPv4 TCP socket")?
        } else {
            TcpSocket::new_v6().context("failed to create IPv6 TCP socket")?
        };
        socket.bind(socket_addr).context("failed to bind TCP socket")?;

        let listener = socket
            .listen(64)
            .context("failed to listen with the bound TCP socket")?;

        info!("Listening on http://{socket_addr}");

        Ok(Self {
            addr: socket_addr,
            listener,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[instrument("listener", skip(self), fields(port = self.addr.port()))]
    pub async fn run(self) -> anyhow::Result<()> {
        run_http_listener(self.listener, self.state).await
    }
}

#[async_trait]
impl Task for BackendListener {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "backend listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown_signal.wait() => Ok(()),
        }
    }
}

async fn run_http_listener(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let state = state.clone();

                let fut = tokio::time::timeout(HTTP_CONNECTION_MAX_DURATION, async move {
                    if let Err(e) = handle_http_peer(stream, state, peer_addr).await {
                        error!(error = format!("{e:#}"), "handle_http_peer failed");
                    }
                })
                .inspect_err(|error| debug!(%error, "Drop long-lived HTTP connection"))
                .instrument(info_span!("http", client = %peer_addr));

                ChildTask::spawn(fut).detach();
            }
            Err(error) => {
                error!(%error, "Failed to accept connection");
            }
        }
    }
}

/// Checks if an error represents a benign client disconnect.
///
/// Walks the error chain and returns true if any cause is a `std::io::Error`
/// with kind `BrokenPipe`, `ConnectionReset`, or `UnexpectedEof`.
fn is_benign_disconnect(err: &anyhow::Error) -> bool {
    use std::io::ErrorKind::{BrokenPipe, ConnectionReset, UnexpectedEof};

    err.chain().any(|cause| {
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            return matches!(ioe.kind(), BrokenPipe | ConnectionReset | UnexpectedEof);
        }
        false
    })
}

pub(crate) async fn handle_http_peer(io: TcpStream, state: AppState, peer_addr: SocketAddr) -> anyhow::Result<()> {
    use axum::extract::connect_info::ConnectInfo;
    use hyper::service::service_fn;
    use tower::Service as _;

    let service = service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
        // We have to clone `tower_service` because hyper's `Service` uses `&self` whereas
        // tower's `Service` requires `&mut self`.
        //
        // We don't need to call `poll_ready` since `Router` is always ready.
        crate::make_http_service(state.clone())
            .layer(axum::Extension(ConnectInfo(peer_addr)))
            .call(request)
    });

    let result = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
        .serve_connection_with_upgrades(hyper_util::rt::TokioIo::new(io), service)
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(error) => {
            // Check for hyper-specific benign cases first.
            if let Some(hyper_err) = error.downcast_ref::<hyper::Error>()
                && (hyper_err.is_canceled() || hyper_err.is_incomplete_message())
            {
                debug!(error = format!("{:#}", anyhow::anyhow!(error)), %peer_addr, "Request was cancelled/incomplete");
                return Ok(());
            }

            // Then check for underlying io::Error kinds via anyhow chain.
            let error = anyhow::Error::from_boxed(error);
            if is_benign_disconnect(&error) {
                debug!(error = format!("{error:#}"), %peer_addr, "Client disconnected");
                Ok(())
            } else {
                Err(error.context("HTTP server"))
            }
        }
    }
}
