//! chore-sync: recurrence & reconciliation engine for shared household
//! task lists.
//!
//! Tasks can be marked done, become due again after a configurable cooldown,
//! and may reopen a linked task when completed. The [`engine::SyncEngine`]
//! merges optimistic local edits with live change events from other clients
//! into one ordered pending/completed partition.

pub mod config;
pub mod cooldown;
pub mod db;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod scanner;
pub mod store;
pub mod trigger;
pub mod types;
