//! Replicated Key-Value Store Library
//!
//! A single-leader, multi-replica in-memory key-value store. This crate holds both
//! process kinds; the binary (`main.rs`) picks one at startup.
//!
//! ## Architecture Modules
//!
//! - **`changelog`**: The durable, append-only record of every mutation, with gapless
//!   change ids that survive restarts.
//! - **`storage`**: The storage node. In-memory collections, the serialized write path,
//!   and the inbound side of replication.
//! - **`replication`**: The leader's replica set. Fans committed changes out to healthy
//!   replicas and drives catch-up of lagging ones.
//! - **`discovery`**: The coordinator process. Registration, read/write routing, leader
//!   health checks and failover.
//! - **`client`**: Typed HTTP clients both processes use to reach each other.
//! - **`config`** and **`error`**: Settings parsed from flags/environment and the shared
//!   error types.

pub mod changelog;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod replication;
pub mod storage;
