use std::sync::Arc;

use tonic::Status;

use crate::path::MethodPath;
use crate::router::Router;

/// The in-process transport: typed requests in, typed responses out, no
/// byte encoding and no network I/O.
///
/// Calls go through the same path table and handler bindings as the server
/// transport, so a local invocation is payload-equal to the same call made
/// over the wire. Failures surface as the same typed [`Status`] values the
/// wire would carry.
pub struct LocalTransport {
    router: Arc<Router>,
}

impl LocalTransport {
    pub(crate) fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// A directly callable view of one installed service.
    pub fn service(&self, service_name: impl Into<String>) -> LocalService {
        LocalService {
            router: Arc::clone(&self.router),
            service_name: service_name.into(),
        }
    }
}

/// A callable operation set for one service, keyed by method name.
pub struct LocalService {
    router: Arc<Router>,
    service_name: String,
}

impl LocalService {
    /// Invoke a method with a typed request.
    ///
    /// The request/response types must match the installed descriptor; a
    /// mismatch surfaces as an Internal status, same as on the wire.
    pub async fn call<Req, Resp>(&self, method: &str, request: Req) -> Result<Resp, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let path = MethodPath::new(&self.service_name, method).canonical();
        let route = self
            .router
            .lookup(&path)
            .ok_or_else(|| Status::unimplemented(format!("no method registered at '{path}'")))?;

        if route.descriptor.is_server_streaming() {
            return Err(Status::unimplemented(
                "server-streaming responses are not supported",
            ));
        }

        let cancel = self.router.cancellation();
        if cancel.is_cancelled() {
            return Err(Status::cancelled("server is shutting down"));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Status::cancelled("server is shutting down"));
            }
            response = route.handler.invoke(&path, Box::new(request)) => response?,
        };

        response
            .downcast::<Resp>()
            .map(|resp| *resp)
            .map_err(|_| Status::internal("handler returned unexpected response type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;
    use tokio_util::sync::CancellationToken;

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

    fn echo_router(cancel: CancellationToken) -> Arc<Router> {
        Arc::new(
            Router::new(cancel)
                .install(
                    ServiceBuilder::new("test.v1.Echo")
                        .unary::<PingRequest, PingResponse>("Ping")
                        .unary::<PingRequest, PingResponse>("Pong")
                        .handle("Ping", |req: PingRequest| async move {
                            Ok(PingResponse {
                                text: format!("pong: {}", req.text),
                            })
                        }),
                )
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_local_call_bypasses_encoding() {
        let router = echo_router(CancellationToken::new());
        let echo = router.local().service("test.v1.Echo");

        let response: PingResponse = echo
            .call(
                "Ping",
                PingRequest {
                    text: "hi".to_owned(),
                },
            )
            .await
            .unwrap();
        assert_eq!(response.text, "pong: hi");
    }

    #[tokio::test]
    async fn test_local_call_unknown_method() {
        let router = echo_router(CancellationToken::new());
        let echo = router.local().service("test.v1.Echo");

        let err = echo
            .call::<_, PingResponse>("Missing", PingRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_local_call_unbound_method() {
        let router = echo_router(CancellationToken::new());
        let echo = router.local().service("test.v1.Echo");

        let err = echo
            .call::<_, PingResponse>("Pong", PingRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_local_call_after_cancel() {
        let cancel = CancellationToken::new();
        let router = echo_router(cancel.clone());
        let echo = router.local().service("test.v1.Echo");

        cancel.cancel();
        let err = echo
            .call::<_, PingResponse>("Ping", PingRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Cancelled);
    }
}
