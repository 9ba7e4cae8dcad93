use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::router::{Router, RpcRequest, RpcResponse};

/// CRI messages are capped well below this on the wire.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// The network transport: a real listener feeding inbound requests through
/// dispatch.
///
/// Lifecycle: Stopped -> Listening -> Stopped. `start` and `stop` are meant
/// to be paired as a scoped acquisition with guaranteed release; both are
/// safe to call redundantly.
pub struct RpcServer {
    router: Arc<Router>,
    addr: SocketAddr,
    state: tokio::sync::Mutex<ServerState>,
}

enum ServerState {
    Stopped,
    Listening {
        handle: ServerHandle,
        stop: CancellationToken,
        task: JoinHandle<std::io::Result<()>>,
    },
}

/// A handle to a listening server, usable to construct client URLs.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// The bound address, with the OS-assigned port when the server was
    /// created with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl RpcServer {
    pub(crate) fn new(router: Arc<Router>, addr: SocketAddr) -> Self {
        Self {
            router,
            addr,
            state: tokio::sync::Mutex::new(ServerState::Stopped),
        }
    }

    /// Bind the endpoint and begin routing inbound requests.
    ///
    /// Returns once the socket is listening. Idempotent: calling `start`
    /// while listening returns the existing handle and opens no second
    /// listener.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let mut state = self.state.lock().await;
        if let ServerState::Listening { handle, .. } = &*state {
            return Ok(handle.clone());
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;

        // Stop on either the server-scoped token or the shared signal.
        let stop = CancellationToken::new();
        let shutdown = {
            let stop = stop.clone();
            let shared = self.router.cancellation().clone();
            async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = shared.cancelled() => {}
                }
            }
        };

        let app = axum_app(Arc::clone(&self.router));
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        });

        info!(addr = %local_addr, "server listening");

        let handle = ServerHandle { local_addr };
        *state = ServerState::Listening {
            handle: handle.clone(),
            stop,
            task,
        };
        Ok(handle)
    }

    /// Drain in-flight requests and release the listener.
    ///
    /// In-flight dispatches are bounded by the shared cancellation signal:
    /// once it fires they resolve Cancelled and the drain completes. Safe
    /// to call when never started, and safe to call repeatedly.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ServerState::Stopped) {
            ServerState::Stopped => Ok(()),
            ServerState::Listening { handle, stop, task } => {
                stop.cancel();
                let result = match task.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(ServerError::Serve(err.to_string())),
                    Err(err) => Err(ServerError::Serve(err.to_string())),
                };
                info!(addr = %handle.local_addr(), "server stopped");
                result
            }
        }
    }

    /// Whether the server currently owns a listener.
    pub async fn is_listening(&self) -> bool {
        matches!(&*self.state.lock().await, ServerState::Listening { .. })
    }
}

/// The HTTP application the listener serves: `GET /` answers docs,
/// everything else goes through dispatch.
///
/// Public so the same application can be embedded or driven in-process by
/// tests; it behaves identically to the bound listener.
pub fn axum_app(router: Arc<Router>) -> axum::Router {
    axum::Router::new()
        .route("/", get(docs_endpoint))
        .fallback(dispatch_endpoint)
        .with_state(router)
}

async fn docs_endpoint(State(router): State<Arc<Router>>, request: Request) -> Response {
    let accept = header_str(&request, header::ACCEPT);
    router.docs(accept.as_deref().unwrap_or("")).into_response()
}

async fn dispatch_endpoint(State(router): State<Arc<Router>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!(path = %parts.uri.path(), error = %err, "failed to read request body");
            return RpcResponse::plain(
                axum::http::StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            )
            .into_response();
        }
    };

    router
        .route(RpcRequest {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            content_type,
            body,
        })
        .await
        .into_response()
}

fn header_str(request: &Request, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

impl IntoResponse for RpcResponse {
    fn into_response(self) -> Response {
        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, self.content_type)
            .body(Body::from(self.body))
            // The only inputs are a valid status and a static content type.
            .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn empty_router(cancel: CancellationToken) -> Arc<Router> {
        Arc::new(Router::new(cancel))
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let router = empty_router(CancellationToken::new());
        let server = router.server(loopback());

        let handle = server.start().await.unwrap();
        assert!(server.is_listening().await);
        assert_ne!(handle.local_addr().port(), 0);

        server.stop().await.unwrap();
        assert!(!server.is_listening().await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let router = empty_router(CancellationToken::new());
        let server = router.server(loopback());

        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();
        assert_eq!(first.local_addr(), second.local_addr());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_ok() {
        let router = empty_router(CancellationToken::new());
        let server = router.server(loopback());
        server.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_released_on_stop() {
        let router = empty_router(CancellationToken::new());
        let server = router.server(loopback());
        let addr = server.start().await.unwrap().local_addr();
        server.stop().await.unwrap();

        // The port must be rebindable once stop returns.
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok());
    }

    #[tokio::test]
    async fn test_shared_cancel_lets_stop_return_promptly() {
        let cancel = CancellationToken::new();
        let router = empty_router(cancel.clone());
        let server = router.server(loopback());
        server.start().await.unwrap();

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), server.stop())
            .await
            .expect("stop() should return promptly after the shared signal fires")
            .unwrap();
    }
}
