//! Single byte ranges requested through the `Range` header.

use super::storage_service::{StorageError, StorageResult};

/// An inclusive byte range inside an object of known size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Resolve a `Range` header against an object of `size` bytes.
    ///
    /// Supported forms are `bytes=N-M`, `bytes=N-` and `bytes=-N`. Headers
    /// that are not a single well-formed byte range yield `Ok(None)` and
    /// the whole object is served. A well-formed range that selects no byte
    /// of the object is `InvalidRange`.
    pub fn resolve(header: &str, size: u64) -> StorageResult<Option<Self>> {
        let Some(spec) = header.trim().strip_prefix("bytes=") else {
            return Ok(None);
        };
        if spec.contains(',') {
            return Ok(None);
        }
        let Some((first, last)) = spec.split_once('-') else {
            return Ok(None);
        };
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            let Ok(suffix) = last.parse::<u64>() else {
                return Ok(None);
            };
            if suffix == 0 || size == 0 {
                return Err(StorageError::InvalidRange { size });
            }
            // A suffix longer than the object selects all of it.
            return Ok(Some(Self {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }));
        }

        let Ok(start) = first.parse::<u64>() else {
            return Ok(None);
        };
        let end = if last.is_empty() {
            None
        } else {
            match last.parse::<u64>() {
                Ok(end) if end >= start => Some(end),
                _ => return Ok(None),
            }
        };

        if start >= size {
            return Err(StorageError::InvalidRange { size });
        }
        Ok(Some(Self {
            start,
            end: end.map_or(size - 1, |end| end.min(size - 1)),
        }))
    }

    /// Number of bytes selected.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a partial response.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> Option<ByteRange> {
        Some(ByteRange { start, end })
    }

    #[test]
    fn resolves_supported_forms() {
        assert_eq!(ByteRange::resolve("bytes=4-7", 11).unwrap(), range(4, 7));
        assert_eq!(ByteRange::resolve("bytes=4-", 11).unwrap(), range(4, 10));
        assert_eq!(ByteRange::resolve("bytes=-3", 11).unwrap(), range(8, 10));
        assert_eq!(ByteRange::resolve("bytes=-50", 11).unwrap(), range(0, 10));
        assert_eq!(ByteRange::resolve("bytes=4-500", 11).unwrap(), range(4, 10));

        let r = ByteRange::resolve("bytes=4-7", 11).unwrap().unwrap();
        assert_eq!(r.length(), 4);
        assert_eq!(r.content_range(11), "bytes 4-7/11");
    }

    #[test]
    fn unsatisfiable_ranges_are_rejected() {
        for (header, size) in [("bytes=40-50", 11), ("bytes=11-", 11), ("bytes=0-1", 0), ("bytes=-0", 11), ("bytes=-5", 0)] {
            assert!(
                matches!(
                    ByteRange::resolve(header, size),
                    Err(StorageError::InvalidRange { .. })
                ),
                "{header}"
            );
        }
    }

    #[test]
    fn malformed_headers_are_ignored() {
        for header in ["items=0-1", "bytes=0-1,4-5", "bytes=a-b", "bytes=7-4", "bytes=5"] {
            assert_eq!(ByteRange::resolve(header, 11).unwrap(), None, "{header}");
        }
    }
}
