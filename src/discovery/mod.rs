//! Discovery Module
//!
//! The coordinator process every storage node registers with. It owns the cluster's
//! membership and is the only component that decides who leads.
//!
//! ## Core Concepts
//! - **Registration**: The first node to register becomes leader. Every later node is a
//!   replica, announced to the leader, and classified healthy or inconsistent by comparing
//!   its last change id against the cluster's change counter.
//! - **Routing**: Writes go to the leader. Reads rotate over healthy replicas in id order
//!   and fall back to the leader when there are none.
//! - **Failover**: A background loop health-checks the leader. On failure an election
//!   hands leadership, together with the current replica set, to a replica. Registrations
//!   and write lookups are refused with `LeaderChanging` until the handoff completes.
//!
//! Discovery state lives in memory only; a restarted discovery service starts empty.

pub mod handlers;
pub mod node;
pub mod protocol;
pub mod service;
pub mod types;
