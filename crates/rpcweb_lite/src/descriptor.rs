use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use tonic::Status;

use crate::path::MethodPath;

/// A decoded request or response message, type-erased so descriptors with
/// different message types can live in one table.
pub type BoxMessage = Box<dyn Any + Send>;

/// Type-erased encode/decode hooks for one method's request/response pair.
///
/// Captured from the concrete `prost::Message` types when the descriptor is
/// declared; the router never sees the concrete types again.
#[derive(Clone)]
pub(crate) struct MessageCodec {
    decode: Arc<dyn Fn(Bytes) -> Result<BoxMessage, prost::DecodeError> + Send + Sync>,
    encode: Arc<dyn Fn(BoxMessage) -> Result<Bytes, Status> + Send + Sync>,
}

impl MessageCodec {
    fn of<Req, Resp>() -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        Self {
            decode: Arc::new(|bytes| Ok(Box::new(Req::decode(bytes)?) as BoxMessage)),
            encode: Arc::new(|msg| {
                let msg = msg
                    .downcast::<Resp>()
                    .map_err(|_| Status::internal("handler returned unexpected response type"))?;
                Ok(Bytes::from(msg.encode_to_vec()))
            }),
        }
    }

    pub(crate) fn decode(&self, bytes: Bytes) -> Result<BoxMessage, prost::DecodeError> {
        (self.decode)(bytes)
    }

    pub(crate) fn encode(&self, msg: BoxMessage) -> Result<Bytes, Status> {
        (self.encode)(msg)
    }
}

/// Static metadata for one RPC method: names, schema names, and the
/// unary-vs-streaming flag, plus the captured codec.
///
/// Descriptors are immutable and externally supplied; identity is the
/// canonical `(service, method)` path.
#[derive(Clone)]
pub struct MethodDescriptor {
    service_name: String,
    method_name: String,
    request_schema: &'static str,
    response_schema: &'static str,
    server_streaming: bool,
    pub(crate) codec: MessageCodec,
}

impl MethodDescriptor {
    /// Describe a unary method with the given request/response schema.
    pub fn unary<Req, Resp>(service: impl Into<String>, method: impl Into<String>) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        Self::describe::<Req, Resp>(service, method, false)
    }

    /// Describe a server-streaming method.
    ///
    /// The flag is carried through to dispatch, which rejects streaming
    /// invocations as unimplemented.
    pub fn server_streaming<Req, Resp>(
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        Self::describe::<Req, Resp>(service, method, true)
    }

    fn describe<Req, Resp>(
        service: impl Into<String>,
        method: impl Into<String>,
        server_streaming: bool,
    ) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        Self {
            service_name: service.into(),
            method_name: method.into(),
            request_schema: schema_name::<Req>(),
            response_schema: schema_name::<Resp>(),
            server_streaming,
            codec: MessageCodec::of::<Req, Resp>(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The request message type name, e.g. `ListImagesRequest`.
    pub fn request_schema(&self) -> &'static str {
        self.request_schema
    }

    /// The response message type name, e.g. `ListImagesResponse`.
    pub fn response_schema(&self) -> &'static str {
        self.response_schema
    }

    pub fn is_server_streaming(&self) -> bool {
        self.server_streaming
    }

    /// The canonical routing path for this method.
    pub fn path(&self) -> MethodPath {
        MethodPath::new(&self.service_name, &self.method_name)
    }
}

/// The unqualified message type name, used as the schema name in docs.
fn schema_name<M: 'static>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}
