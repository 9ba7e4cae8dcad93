use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tonic::Status;

use crate::descriptor::MethodDescriptor;
use crate::error::RegistryError;
use crate::handler::{ErasedHandler, Handler, TypedHandler, make_handler};

/// A fluent builder for one RPC service: a fixed method list plus a
/// possibly partial method-name-to-handler mapping.
///
/// Handler bindings merge incrementally: a later `handle` call for the same
/// method overrides the earlier one, while bindings for distinct methods
/// are order-independent. Methods left without a handler resolve to the
/// Unimplemented stub at [`build`](Self::build) time.
///
/// # Example
/// ```ignore
/// let service = ServiceBuilder::new("runtime.v1.ImageService")
///     .unary::<ListImagesRequest, ListImagesResponse>("ListImages")
///     .unary::<PullImageRequest, PullImageResponse>("PullImage")
///     .handle("ListImages", |req: ListImagesRequest| async move {
///         Ok(ListImagesResponse { images: vec![] })
///     });
/// ```
pub struct ServiceBuilder {
    service_name: String,
    methods: Vec<MethodDescriptor>,
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl ServiceBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            methods: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Declare a unary method with the given request/response schema.
    pub fn unary<Req, Resp>(mut self, method: &str) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        self.methods
            .push(MethodDescriptor::unary::<Req, Resp>(&self.service_name, method));
        self
    }

    /// Declare a server-streaming method.
    ///
    /// The flag is recorded and surfaced by docs; dispatch rejects
    /// streaming invocations as unimplemented.
    pub fn server_streaming<Req, Resp>(mut self, method: &str) -> Self
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
    {
        self.methods.push(MethodDescriptor::server_streaming::<Req, Resp>(
            &self.service_name,
            method,
        ));
        self
    }

    /// Bind an async handler to a declared method.
    ///
    /// The request/response types must match the declaration; a mismatch
    /// surfaces as an Internal status at call time.
    pub fn handle<Req, Resp, F, Fut>(mut self, method: &str, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.handlers.insert(
            method.to_owned(),
            Arc::new(TypedHandler::new(make_handler(f))),
        );
        self
    }

    /// Chain another service for install-together composition.
    pub fn chain(self, other: ServiceBuilder) -> ServiceSet {
        ServiceSet::from(self).chain(other)
    }

    /// Resolve every declared method to a handler and produce the
    /// descriptor.
    ///
    /// Fails if a handler was bound for a method that was never declared.
    pub fn build(self) -> Result<ServiceDescriptor, RegistryError> {
        let Self {
            service_name,
            methods,
            mut handlers,
        } = self;

        let mut resolved = Vec::with_capacity(methods.len());
        for descriptor in methods {
            let handler = match handlers.remove(descriptor.method_name()) {
                Some(handler) => Handler::Bound(handler),
                None => Handler::Unimplemented,
            };
            resolved.push((descriptor, handler));
        }

        if let Some(method) = handlers.into_keys().next() {
            return Err(RegistryError::UnknownMethod {
                service: service_name,
                method,
            });
        }

        Ok(ServiceDescriptor {
            service_name,
            methods: resolved,
        })
    }
}

/// A fully-bound service: every declared method resolves to exactly one
/// handler, user-supplied or the Unimplemented stub.
pub struct ServiceDescriptor {
    service_name: String,
    pub(crate) methods: Vec<(MethodDescriptor, Handler)>,
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("service_name", &self.service_name)
            .field("method_count", &self.methods.len())
            .finish()
    }
}

impl ServiceDescriptor {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

/// A composite of service builders, installable as one unit.
pub struct ServiceSet {
    pub(crate) services: Vec<ServiceBuilder>,
}

impl ServiceSet {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
        }
    }

    pub fn chain(mut self, service: ServiceBuilder) -> Self {
        self.services.push(service);
        self
    }
}

impl Default for ServiceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ServiceBuilder> for ServiceSet {
    fn from(service: ServiceBuilder) -> Self {
        Self {
            services: vec![service],
        }
    }
}
