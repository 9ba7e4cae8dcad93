//! # rpcweb_lite
//!
//! A small multi-protocol RPC dispatcher: register service descriptors,
//! route Connect/gRPC-Web requests to their handlers, and serve the result
//! over an in-process transport or a real listener.
//!
//! ## Architecture
//!
//! - **Descriptors** (`descriptor`, `service`): static method metadata plus
//!   fully-bound handlers, produced by a fluent builder. Methods without a
//!   handler resolve to an Unimplemented stub.
//! - **Router** (`router`): the path table keyed by `/service/method`,
//!   dispatch, and the API docs view. One process-wide cancellation signal
//!   bounds every dispatch.
//! - **Transports** (`local`, `server`): a typed in-process call path and a
//!   `start`/`stop` TCP listener, both reading the same table.
//!
//! ## Example
//!
//! ```ignore
//! use rpcweb_lite::{Router, ServiceBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let router = Router::new(cancel.clone())
//!     .install(
//!         ServiceBuilder::new("runtime.v1.ImageService")
//!             .unary::<ListImagesRequest, ListImagesResponse>("ListImages")
//!             .handle("ListImages", |req| async move { /* ... */ }),
//!     )?;
//!
//! let router = std::sync::Arc::new(router);
//! let server = router.server("127.0.0.1:50051".parse()?);
//! let handle = server.start().await?;
//! ```

pub mod descriptor;
pub mod docs;
pub mod error;
pub mod handler;
pub mod local;
pub mod path;
pub mod protocol;
pub mod router;
pub mod server;
pub mod service;

pub use descriptor::MethodDescriptor;
pub use error::{PathError, RegistryError, ServerError};
pub use local::{LocalService, LocalTransport};
pub use path::MethodPath;
pub use protocol::WireProtocol;
pub use router::{Router, RpcRequest, RpcResponse};
pub use server::{RpcServer, ServerHandle, axum_app};
pub use service::{ServiceBuilder, ServiceDescriptor, ServiceSet};
