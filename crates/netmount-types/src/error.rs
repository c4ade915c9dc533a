//! NetFS error taxonomy.
//!
//! Every variant is recovered at the dispatcher boundary and reported to the
//! client; nothing here is fatal to a connection, let alone the process. The
//! display text doubles as the wire `err` string.

use std::io;
use thiserror::Error;

/// A recoverable NetFS operation failure.
#[derive(Debug, Error)]
pub enum FsError {
    /// Operation target is absent.
    #[error("No such file")]
    NoSuchFile,

    /// Relocate or mkdir collision.
    #[error("File exists")]
    DestinationExists,

    /// Resolved depth exceeds the segment limit.
    #[error("Tree too deep")]
    TreeTooDeep,

    /// Write or delete against a read-only entry (or beneath one).
    #[error("Access denied")]
    AccessDenied,

    /// Relocation destination sits under a read-only ancestor.
    #[error("Destination is read-only")]
    DestinationReadOnly,

    /// Move source is read-only.
    #[error("Cannot move read-only file")]
    CannotMoveReadOnly,

    /// Write targets an existing directory.
    #[error("Cannot write to a directory")]
    CannotWriteToDirectory,

    /// mkdir obstructed by a non-directory ancestor.
    #[error("Cannot create directory")]
    CannotCreate,

    /// Quota exceeded at write-commit time.
    #[error("Out of space")]
    OutOfSpace,

    /// Transfer inactivity exceeded its deadline.
    #[error("Stream timeout")]
    StreamTimeout,

    /// Dispatcher has no handler for the requested type.
    #[error("No such request type {0}")]
    UnknownOperation(String),

    /// Unparsable or incomplete request.
    #[error("Malformed request")]
    MalformedRequest,

    /// Filesystem error not covered by a pre-check (e.g. a delete racing an
    /// operation between check and action).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// NetFS result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_strings() {
        assert_eq!(FsError::NoSuchFile.to_string(), "No such file");
        assert_eq!(FsError::DestinationExists.to_string(), "File exists");
        assert_eq!(FsError::OutOfSpace.to_string(), "Out of space");
        assert_eq!(FsError::StreamTimeout.to_string(), "Stream timeout");
        assert_eq!(
            FsError::UnknownOperation("frobnicate".into()).to_string(),
            "No such request type frobnicate"
        );
    }

    #[test]
    fn test_io_conversion() {
        let err: FsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, FsError::Io(_)));
    }
}
