//! Cached, optimistic client for the ISP administration API.
//!
//! Reads go through a shared [`cache::QueryCache`] that de-duplicates
//! in-flight requests. Writes apply optimistically to every cached list and
//! detail they affect, then commit the server's answer or roll back, and
//! finally mark the related queries stale.

pub mod api;
pub mod cache;
pub mod config;
pub mod mutation;
pub mod query;
pub mod resources;

#[cfg(test)]
mod testing;
