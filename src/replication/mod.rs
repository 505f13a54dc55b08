//! Replication Module
//!
//! Leader-side tracking of replicas and delivery of committed changes to them.
//!
//! ## Core Concepts
//! - **Healthy replicas** receive each change synchronously, right after it is committed.
//!   The write returns once every healthy replica has answered.
//! - **Inconsistent replicas** are behind. A dedicated recovery task per replica replays
//!   the missing range from the change log, oldest first, then promotes it to healthy.
//! - **Classification** of every RPC outcome drives the transitions: a rejecting replica
//!   is demoted, an unreachable one is dropped and must register again.
//! - Every transition is mirrored to the discovery service so read routing only targets
//!   up-to-date replicas.

pub mod coordinator;
pub mod handlers;
pub mod protocol;
pub mod types;
