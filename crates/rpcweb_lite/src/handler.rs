use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use tonic::Status;

use crate::descriptor::BoxMessage;

/// A type-erased handler that can be stored in the path table.
///
/// This trait allows handlers with different request/response types to live
/// in a single registry. Messages cross the boundary as [`BoxMessage`]; the
/// wire codec is applied by dispatch, never here, so the local transport can
/// reuse the same invocation path without any encoding.
pub(crate) trait ErasedHandler: Send + Sync {
    fn call(
        &self,
        req: BoxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<BoxMessage, Status>> + Send>>;
}

/// An async function from a decoded request to a response.
///
/// The boxed form of what users pass to `ServiceBuilder::handle`.
pub type HandlerFn<Req, Resp> = Arc<
    dyn Fn(Req) -> Pin<Box<dyn Future<Output = Result<Resp, Status>> + Send>>
        + Send
        + Sync
        + 'static,
>;

/// A typed handler wrapping a user-supplied async function.
pub(crate) struct TypedHandler<Req, Resp> {
    func: HandlerFn<Req, Resp>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> TypedHandler<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(func: HandlerFn<Req, Resp>) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> ErasedHandler for TypedHandler<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn call(
        &self,
        req: BoxMessage,
    ) -> Pin<Box<dyn Future<Output = Result<BoxMessage, Status>> + Send>> {
        let func = Arc::clone(&self.func);
        Box::pin(async move {
            let req = req
                .downcast::<Req>()
                .map_err(|_| Status::internal("handler bound with mismatched request type"))?;
            let resp = func(*req).await?;
            Ok(Box::new(resp) as BoxMessage)
        })
    }
}

/// The resolved binding for one method in the path table.
///
/// Every declared method resolves to exactly one variant at descriptor
/// construction time; no method is ever unbound.
#[derive(Clone)]
pub(crate) enum Handler {
    /// A user-supplied handler.
    Bound(Arc<dyn ErasedHandler>),
    /// The injected default: a stub failing with `Unimplemented`.
    Unimplemented,
}

impl Handler {
    /// Invoke the handler with an already-decoded request.
    ///
    /// `path` names the method in the Unimplemented stub's status message.
    pub async fn invoke(&self, path: &str, req: BoxMessage) -> Result<BoxMessage, Status> {
        match self {
            Handler::Bound(handler) => handler.call(req).await,
            Handler::Unimplemented => Err(Status::unimplemented(format!(
                "method '{path}' has no registered handler"
            ))),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Handler::Bound(_))
    }
}

/// Helper to create a boxed handler from an async closure.
///
/// This handles the type gymnastics of boxing the closure and its return
/// type.
pub fn make_handler<Req, Resp, F, Fut>(f: F) -> HandlerFn<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_typed_handler_round_trip() {
        let func = make_handler(|req: u32| async move { Ok(req + 1) });
        let handler = Handler::Bound(Arc::new(TypedHandler::new(func)));

        let resp = handler
            .invoke("/test.v1.Echo/Inc", Box::new(41u32))
            .await
            .unwrap();
        assert_eq!(*resp.downcast::<u32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_mismatched_request_type_is_internal() {
        let func = make_handler(|req: u32| async move { Ok(req) });
        let handler = Handler::Bound(Arc::new(TypedHandler::new(func)));

        let err = handler
            .invoke("/test.v1.Echo/Inc", Box::new("not a u32".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_unimplemented_stub_names_the_path() {
        let err = Handler::Unimplemented
            .invoke("/test.v1.Echo/Missing", Box::new(0u32))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
        assert!(err.message().contains("/test.v1.Echo/Missing"));
    }
}
