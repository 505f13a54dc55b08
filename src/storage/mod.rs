//! Storage Module
//!
//! The storage node: an in-memory collection/key store whose every mutation is recorded
//! in the change log and, on the leader, pushed to replicas.
//!
//! ## Core Concepts
//! - **Database**: Named collections of string keys. Elements may carry an expiration
//!   time; expired elements are hidden from reads and swept in the background.
//! - **Write path**: apply locally → commit to the change log → fan out to healthy
//!   replicas. Writes are serialized, so replicas see changes in id order.
//! - **Replica path**: Changes pushed by the leader are applied and logged under the
//!   leader's id. Replays of an id already held are acknowledged and ignored.
//! - **Role**: Assigned by discovery at registration and changed only by a promotion.

pub mod handlers;
pub mod memory;
pub mod node;
pub mod protocol;
pub mod service;
