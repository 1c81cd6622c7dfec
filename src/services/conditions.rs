//! Conditional request evaluation (`If-Match`, `If-None-Match`,
//! `If-Modified-Since`, `If-Unmodified-Since` and their copy-source forms).

use super::storage_service::{StorageError, StorageResult};
use chrono::{DateTime, Utc};

/// Preconditions attached to a read or to the source of a copy.
#[derive(Clone, Debug, Default)]
pub struct Preconditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

/// Outcome of a single precondition check before it is mapped to an error.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Proceed,
    Failed,
    NotModified,
}

impl Preconditions {
    pub fn is_empty(&self) -> bool {
        self.if_match.is_none()
            && self.if_none_match.is_none()
            && self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
    }

    /// Evaluate for GET/HEAD: mismatches become `PreconditionFailed`,
    /// "unchanged" outcomes become `NotModified`.
    pub fn check_read(&self, etag: &str, last_modified: DateTime<Utc>) -> StorageResult<()> {
        match self.verdict(etag, last_modified) {
            Verdict::Proceed => Ok(()),
            Verdict::Failed => Err(StorageError::PreconditionFailed),
            Verdict::NotModified => Err(StorageError::NotModified {
                etag: etag.to_string(),
            }),
        }
    }

    /// Evaluate for a copy source: every failing condition is
    /// `PreconditionFailed`.
    pub fn check_copy_source(&self, etag: &str, last_modified: DateTime<Utc>) -> StorageResult<()> {
        match self.verdict(etag, last_modified) {
            Verdict::Proceed => Ok(()),
            Verdict::Failed | Verdict::NotModified => Err(StorageError::PreconditionFailed),
        }
    }

    // If-Match shadows If-Unmodified-Since; If-None-Match shadows
    // If-Modified-Since. HTTP dates carry whole seconds only.
    fn verdict(&self, etag: &str, last_modified: DateTime<Utc>) -> Verdict {
        let modified_at = last_modified.timestamp();

        if let Some(if_match) = &self.if_match {
            if !etag_list_matches(if_match, etag) {
                return Verdict::Failed;
            }
        } else if let Some(since) = self.if_unmodified_since {
            if modified_at > since.timestamp() {
                return Verdict::Failed;
            }
        }

        if let Some(if_none_match) = &self.if_none_match {
            if etag_list_matches(if_none_match, etag) {
                return Verdict::NotModified;
            }
        } else if let Some(since) = self.if_modified_since {
            if modified_at <= since.timestamp() {
                return Verdict::NotModified;
            }
        }

        Verdict::Proceed
    }
}

/// Match a comma-separated list of (optionally quoted, optionally weak)
/// entity tags against `etag`. `*` matches anything.
fn etag_list_matches(header: &str, etag: &str) -> bool {
    let etag = etag.trim_matches('"');
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*"
            || candidate
                .trim_start_matches("W/")
                .trim_matches('"')
                .eq(etag)
    })
}
