use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::descriptor::MethodDescriptor;
use crate::error::RegistryError;
use crate::handler::Handler;
use crate::local::LocalTransport;
use crate::protocol::WireProtocol;
use crate::server::RpcServer;
use crate::service::ServiceSet;

/// One installed method: its descriptor plus the resolved handler.
pub(crate) struct Route {
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) handler: Handler,
}

/// A normalized inbound request, independent of the transport that
/// produced it.
pub struct RpcRequest {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// A typed wire result: status, content type, and body bytes.
///
/// Dispatch never fails with anything else; every error kind is rendered
/// into one of these.
#[derive(Debug)]
pub struct RpcResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl RpcResponse {
    pub(crate) fn plain(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }
}

/// The multi-protocol RPC router: a path table of installed methods plus
/// the process-wide cancellation signal.
///
/// The table is built during a setup phase and only read while serving.
/// Registration concurrent with serving is not supported; a request racing
/// an install may observe a partially updated table.
pub struct Router {
    table: HashMap<String, Route>,
    cancel: CancellationToken,
}

impl Router {
    /// Create an empty router sharing the given cancellation signal.
    ///
    /// Every dispatch, open stream, and listener derived from this router
    /// observes the signal and unwinds promptly when it fires.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            table: HashMap::new(),
            cancel,
        }
    }

    /// The shared cancellation signal.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Install one or more services, inserting every declared method at
    /// its canonical path. Returns the router for chaining.
    ///
    /// Re-installing an existing path replaces its handler: last
    /// registration wins, with a warning.
    pub fn install(mut self, services: impl Into<ServiceSet>) -> Result<Self, RegistryError> {
        for builder in services.into().services {
            let service = builder.build()?;
            let service_name = service.service_name().to_owned();
            let mut installed = 0usize;

            for (descriptor, handler) in service.methods {
                let path = descriptor.path().canonical();
                if self.table.contains_key(&path) {
                    warn!(path = %path, "replacing existing handler registration");
                }
                self.table.insert(path, Route { descriptor, handler });
                installed += 1;
            }

            info!(
                service = %service_name,
                methods = installed,
                "installed service"
            );
        }
        Ok(self)
    }

    /// The number of installed canonical paths.
    pub fn path_count(&self) -> usize {
        self.table.len()
    }

    /// All installed canonical paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub(crate) fn lookup(&self, path: &str) -> Option<&Route> {
        self.table.get(path)
    }

    pub(crate) fn iter_routes(&self) -> impl Iterator<Item = (&str, &MethodDescriptor)> {
        self.table
            .iter()
            .map(|(path, route)| (path.as_str(), &route.descriptor))
    }

    /// Dispatch one request: path lookup, content negotiation, decode,
    /// cancellation-aware handler invocation, encode.
    ///
    /// This is the sole translation point from handler failure to wire
    /// status; nothing here can take down the listener.
    pub async fn route(&self, request: RpcRequest) -> RpcResponse {
        if request.method != Method::POST {
            return RpcResponse::plain(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("method {} not allowed, RPC calls are POST", request.method),
            );
        }

        let protocol = request
            .content_type
            .as_deref()
            .and_then(WireProtocol::from_content_type);

        let route = match self.table.get(&request.path) {
            Some(route) => route,
            None => {
                debug!(path = %request.path, "no handler registered");
                // Frame the miss with the negotiated protocol when there
                // is one; a miss is a typed result, never a fault.
                let status =
                    Status::unimplemented(format!("no method registered at '{}'", request.path));
                return respond_error(protocol.unwrap_or(WireProtocol::Connect), &status);
            }
        };

        let Some(protocol) = protocol else {
            return RpcResponse::plain(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                format!(
                    "unsupported content-type {:?}, expected Connect or gRPC-Web protobuf",
                    request.content_type.as_deref().unwrap_or("")
                ),
            );
        };

        let status = match self.invoke(route, protocol, request.body).await {
            Ok(body) => {
                debug!(path = %request.path, "dispatch ok");
                return RpcResponse {
                    status: StatusCode::OK,
                    content_type: protocol.response_content_type(),
                    body,
                };
            }
            Err(status) => status,
        };

        warn!(
            path = %request.path,
            code = ?status.code(),
            message = %status.message(),
            "dispatch failed"
        );
        respond_error(protocol, &status)
    }

    /// Decode, invoke, encode. Every failure comes back as a `Status`.
    async fn invoke(
        &self,
        route: &Route,
        protocol: WireProtocol,
        body: Bytes,
    ) -> Result<Bytes, Status> {
        if route.descriptor.is_server_streaming() {
            return Err(Status::unimplemented(
                "server-streaming responses are not supported",
            ));
        }

        let encoded = protocol.unframe_request(body)?;
        let decoded = route.descriptor.codec.decode(encoded).map_err(|err| {
            Status::invalid_argument(format!(
                "failed to decode {}: {err}",
                route.descriptor.request_schema()
            ))
        })?;

        if self.cancel.is_cancelled() {
            return Err(Status::cancelled("server is shutting down"));
        }

        let path = route.descriptor.path().canonical();
        let response = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(Status::cancelled("server is shutting down"));
            }
            response = route.handler.invoke(&path, decoded) => response?,
        };

        let encoded = route.descriptor.codec.encode(response)?;
        Ok(protocol.frame_response(encoded))
    }

    /// An in-process, encoding-free invocation path over this router.
    pub fn local(self: &Arc<Self>) -> LocalTransport {
        LocalTransport::new(Arc::clone(self))
    }

    /// A network transport for this router, bound to `addr` on `start`.
    pub fn server(self: &Arc<Self>, addr: SocketAddr) -> RpcServer {
        RpcServer::new(Arc::clone(self), addr)
    }
}

fn respond_error(protocol: WireProtocol, status: &Status) -> RpcResponse {
    let (http_status, content_type, body) = protocol.frame_error(status);
    RpcResponse {
        status: http_status,
        content_type,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;

    #[derive(Clone, PartialEq, prost::Message)]
    struct PingRequest {
        #[prost(string, tag = "1")]
        text: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct PingResponse {
        #[prost(string, tag = "1")]
        text: String,
    }

    fn echo_service() -> ServiceBuilder {
        ServiceBuilder::new("test.v1.Echo")
            .unary::<PingRequest, PingResponse>("Ping")
            .unary::<PingRequest, PingResponse>("Pong")
            .server_streaming::<PingRequest, PingResponse>("Watch")
            .handle("Ping", |req: PingRequest| async move {
                Ok(PingResponse {
                    text: format!("pong: {}", req.text),
                })
            })
    }

    fn post(path: &str, content_type: &str, body: Bytes) -> RpcRequest {
        RpcRequest {
            method: Method::POST,
            path: path.to_owned(),
            content_type: Some(content_type.to_owned()),
            body,
        }
    }

    fn encode(req: &PingRequest) -> Bytes {
        Bytes::from(prost::Message::encode_to_vec(req))
    }

    #[test]
    fn test_fresh_router_has_no_paths() {
        let router = Router::new(CancellationToken::new());
        assert_eq!(router.path_count(), 0);
    }

    #[test]
    fn test_install_counts_paths() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();
        assert_eq!(router.path_count(), 3);

        let other = ServiceBuilder::new("test.v1.Other")
            .unary::<PingRequest, PingResponse>("Noop");
        let router = router.install(other).unwrap();
        assert_eq!(router.path_count(), 4);
    }

    #[test]
    fn test_reinstall_keeps_count() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap()
            .install(echo_service())
            .unwrap();
        assert_eq!(router.path_count(), 3);
    }

    #[tokio::test]
    async fn test_reinstall_rebinds_to_latest() {
        let replacement = ServiceBuilder::new("test.v1.Echo")
            .unary::<PingRequest, PingResponse>("Ping")
            .handle("Ping", |_req: PingRequest| async move {
                Ok(PingResponse {
                    text: "replaced".to_owned(),
                })
            });
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap()
            .install(replacement)
            .unwrap();

        let response = router
            .route(post(
                "/test.v1.Echo/Ping",
                "application/proto",
                encode(&PingRequest::default()),
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        let decoded: PingResponse = prost::Message::decode(response.body).unwrap();
        assert_eq!(decoded.text, "replaced");
    }

    #[tokio::test]
    async fn test_dispatch_connect_unary() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let request = PingRequest {
            text: "hi".to_owned(),
        };
        let response = router
            .route(post("/test.v1.Echo/Ping", "application/proto", encode(&request)))
            .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/proto");
        let decoded: PingResponse = prost::Message::decode(response.body).unwrap();
        assert_eq!(decoded.text, "pong: hi");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_path_is_typed() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(post("/test.v1.Echo/Missing", "application/proto", Bytes::new()))
            .await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["code"], "unimplemented");
    }

    #[tokio::test]
    async fn test_dispatch_unbound_method_is_unimplemented() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(post(
                "/test.v1.Echo/Pong",
                "application/proto",
                encode(&PingRequest::default()),
            ))
            .await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_content_type() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(post("/test.v1.Echo/Ping", "application/json", Bytes::new()))
            .await;
        assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_non_post() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(RpcRequest {
                method: Method::GET,
                path: "/test.v1.Echo/Ping".to_owned(),
                content_type: Some("application/proto".to_owned()),
                body: Bytes::new(),
            })
            .await;
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_dispatch_decode_failure_keeps_diagnostic() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(post(
                "/test.v1.Echo/Ping",
                "application/proto",
                Bytes::from_static(b"\xff\xff\xff"),
            ))
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["code"], "invalid_argument");
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .contains("PingRequest")
        );
    }

    #[tokio::test]
    async fn test_dispatch_streaming_method_acknowledged_not_served() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let response = router
            .route(post(
                "/test.v1.Echo/Watch",
                "application/proto",
                encode(&PingRequest::default()),
            ))
            .await;
        assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_dispatch_grpc_web_framing() {
        let router = Router::new(CancellationToken::new())
            .install(echo_service())
            .unwrap();

        let request = PingRequest {
            text: "web".to_owned(),
        };
        let framed = {
            let message = encode(&request);
            let mut body = Vec::with_capacity(message.len() + 5);
            body.push(0);
            body.extend_from_slice(&(message.len() as u32).to_be_bytes());
            body.extend_from_slice(&message);
            Bytes::from(body)
        };

        let response = router
            .route(post("/test.v1.Echo/Ping", "application/grpc-web+proto", framed))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, "application/grpc-web+proto");

        // Unwrap the data frame and check the payload.
        let len = u32::from_be_bytes([
            response.body[1],
            response.body[2],
            response.body[3],
            response.body[4],
        ]) as usize;
        let decoded: PingResponse =
            prost::Message::decode(response.body.slice(5..5 + len)).unwrap();
        assert_eq!(decoded.text, "pong: web");
    }

    #[tokio::test]
    async fn test_handler_failure_translated_not_propagated() {
        let failing = ServiceBuilder::new("test.v1.Echo")
            .unary::<PingRequest, PingResponse>("Ping")
            .handle("Ping", |_req: PingRequest| async move {
                Err::<PingResponse, _>(Status::failed_precondition("backend offline"))
            });
        let router = Router::new(CancellationToken::new()).install(failing).unwrap();

        let response = router
            .route(post(
                "/test.v1.Echo/Ping",
                "application/proto",
                encode(&PingRequest::default()),
            ))
            .await;
        assert_eq!(response.status, StatusCode::PRECONDITION_FAILED);

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["code"], "failed_precondition");
        assert_eq!(json["message"], "backend offline");
    }

    #[tokio::test]
    async fn test_cancelled_signal_resolves_dispatches_cancelled() {
        let cancel = CancellationToken::new();
        let router = Router::new(cancel.clone()).install(echo_service()).unwrap();

        cancel.cancel();

        let response = router
            .route(post(
                "/test.v1.Echo/Ping",
                "application/proto",
                encode(&PingRequest::default()),
            ))
            .await;
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);

        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["code"], "canceled");
    }

    #[tokio::test]
    async fn test_cancel_fires_mid_handler() {
        let cancel = CancellationToken::new();
        let slow = ServiceBuilder::new("test.v1.Echo")
            .unary::<PingRequest, PingResponse>("Ping")
            .handle("Ping", |_req: PingRequest| async move {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Ok(PingResponse::default())
            });
        let router = Arc::new(Router::new(cancel.clone()).install(slow).unwrap());

        let dispatch = {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .route(RpcRequest {
                        method: Method::POST,
                        path: "/test.v1.Echo/Ping".to_owned(),
                        content_type: Some("application/proto".to_owned()),
                        body: Bytes::from(prost::Message::encode_to_vec(&PingRequest::default())),
                    })
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let response = dispatch.await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["code"], "canceled");
    }
}
