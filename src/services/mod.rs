pub mod conditions;
pub mod key_locks;
pub mod multipart;
pub mod ranges;
pub mod storage_service;
pub mod tagging;
pub mod versioning;
