//! funcri: a CRI façade over a serverless function provider.
//!
//! The kubelet-facing surface is the CRI v1 `RuntimeService` and
//! `ImageService`, served over Connect and gRPC-Web by the
//! [`rpcweb_lite`] router. Behind it, pod sandboxes are function
//! versions, containers are routing aliases, and image pulls mirror
//! registry images into the provider.

pub mod backend;
pub mod cri;
pub mod proto;
