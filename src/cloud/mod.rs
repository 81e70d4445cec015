//! Remote Power Virtual Server collaborators
//!
//! The pipeline only talks to the capability traits in [`client`]. Two
//! implementations exist: [`PowerVsClient`] for real workspaces and
//! [`MockCloud`], a scripted in-memory cloud for tests and dry runs.

pub mod client;
pub mod error;
pub mod http;
pub mod mock;
pub mod types;

pub use client::{CloudClients, DhcpApi, ImageApi, InstanceApi, JobApi, NetworkApi};
pub use error::ApiError;
pub use http::PowerVsClient;
pub use mock::MockCloud;
pub use types::*;
