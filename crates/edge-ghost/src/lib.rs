#![forbid(unsafe_code)]

//! Ghost: the edge agent that executes seed operations.
//!
//! [`GhostServer`] owns the lifecycle and the per-command execution state;
//! its pipeline turns an admitted command into a terminal [`edge_core::Event`]
//! without ever failing on a seed problem. [`GhostService`] wraps a server
//! with the admin control listener, the cluster host and the optional
//! Mirage session.

pub mod admin;
pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod server;
pub mod service;

pub use admin::{AdminCommand, AdminRequest, EnvelopeReply, VerificationRecord};
pub use cluster::{ClusterError, SpawnGhostRequest, SpawnGhostResult, normalize_node_suffix};
pub use command::CommandEnvelope;
pub use config::{GhostConfig, MirageLinkConfig, MiragePolicy};
pub use error::GhostError;
pub use execution::{ExecutionPhase, ExecutionState};
pub use pipeline::UNKNOWN_SEED_EXIT_CODE;
pub use server::{GhostPhase, GhostServer, GhostStatus};
pub use service::{GhostRuntime, GhostService, seed_info_from_metadata};
