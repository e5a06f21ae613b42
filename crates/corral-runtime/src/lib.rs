//! Container orchestration for the corral runtime.
//!
//! [`engine::Engine`] sequences a launch (process creation, registry
//! record, network attachment, resource limits, init handoff) as a saga so
//! a failed step rolls back the ones before it. The lifecycle commands
//! operate on the persisted records afterwards.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod exec;
pub mod handoff;
pub mod init;
pub mod lifecycle;
pub mod logs;
pub mod network;
pub mod process;
pub mod registry;
pub mod resource;
pub mod saga;
pub mod workspace;
