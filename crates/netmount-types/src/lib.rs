//! Wire types for the netmount NetFS protocol.
//!
//! This crate is the leaf everything else builds on: file attributes, the
//! five stream-frame kinds of the chunked transfer protocol, the outer
//! hello/sync/reply message envelopes, and the error taxonomy. It performs
//! no I/O.
//!
//! # Key Types
//!
//! | Type            | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | [`Attributes`]  | size/kind/read-only/timestamps for one path     |
//! | [`StreamFrame`] | one frame of the chunked pull transfer protocol |
//! | [`Hello`]       | initial tree snapshot pushed on connect         |
//! | [`SyncMessage`] | one watcher delta pushed to a session           |
//! | [`Reply`]       | `{ok, type, data|err}` operation reply          |
//! | [`Request`]     | incoming operation envelope                     |
//! | [`FsError`]     | every recoverable NetFS failure                 |

pub mod attrs;
pub mod error;
pub mod frame;
pub mod message;

pub use attrs::{Attributes, attributes_value};
pub use error::{FsError, FsResult};
pub use frame::StreamFrame;
pub use message::{Hello, Reply, Request, SyncMessage};

/// Fixed chunk size of the transfer protocol, chosen to stay under typical
/// message-frame limits.
pub const CHUNK_SIZE: usize = 65536;

/// Maximum segment count of any absolute path that will be created or
/// relocated into.
pub const MAX_DEPTH: usize = 128;
