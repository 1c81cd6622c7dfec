//! Core data models for the versioned object store.
//!
//! These entities represent buckets, the per-key version history, user
//! metadata and multipart sessions. Row types map to tables via
//! `sqlx::FromRow`.

pub mod bucket;
pub mod metadata;
pub mod multipart;
pub mod object;
