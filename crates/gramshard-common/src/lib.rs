//! Common types, errors, and configuration for the GramShard cluster
//!
//! This crate provides the foundational pieces shared by every other
//! GramShard crate: identifier newtypes, the matrix/message kind enums,
//! the error taxonomy, and the cluster configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClusterConfig, JoinConfig};
pub use error::{Result, ShardError};
pub use types::{
    EndpointId, MatrixKind, MessageId, MessageKind, ParamIndex, ShardId, StepId,
    CLIENT_ENDPOINT_BASE,
};
