//! The function-provider backend: CRI handlers translating runtime and
//! image operations into function version, alias, and registry-mirror
//! state.
//!
//! This sits behind the router's handler interface; the dispatcher knows
//! nothing about it beyond request-in, response-or-status-out.

pub mod image;
pub mod runtime;
pub mod store;

use std::sync::Arc;

use rpcweb_lite::ServiceSet;
use tonic::Status;

pub use store::{AliasState, FunctionStore, StoreError};

impl From<StoreError> for Status {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionNotFound(_) | StoreError::AliasNotFound(_) => {
                Status::not_found(err.to_string())
            }
            StoreError::AliasState { .. } => Status::failed_precondition(err.to_string()),
        }
    }
}

/// Both CRI services with every backend-supported method bound.
pub fn services(store: &Arc<FunctionStore>) -> ServiceSet {
    runtime::service(Arc::clone(store)).chain(image::service(Arc::clone(store)))
}
