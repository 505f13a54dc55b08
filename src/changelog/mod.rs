//! Change Log Module
//!
//! Append-only, id-ordered record of every mutation applied to a storage node.
//!
//! ## Core Concepts
//! - **Change ids**: The leader assigns every committed mutation a strictly increasing,
//!   gapless sequence number. Replicas store the leader's id verbatim.
//! - **Durability**: Each change is written as one JSON line to `changes.log`, followed by
//!   the new high-water mark in `last-change-id`. The marker is a restart shortcut only;
//!   replay always recomputes the maximum from the log itself.
//! - **Catch-up**: Lagging replicas are fed from `ChangeLog::get_by_id` in ascending order.

pub mod log;
pub mod types;

#[cfg(test)]
mod tests;
