//! JSON-RPC surface for the corral control plane
//!
//! Exposes the resource and task observation boundaries over localhost,
//! including task-update subscriptions backed by the broadcast hub.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
