//! # netmount-fs
//!
//! The NetFS engine: a user's private directory tree exposed as a live,
//! remotely-synchronized virtual filesystem over a persistent message
//! connection.
//!
//! The engine sits behind an authentication/transport layer it never sees.
//! That layer hands [`session::run_session`] an authenticated [`User`] and a
//! pair of text-message channels; everything else happens in here:
//!
//! - [`sandbox`] confines every client-supplied path to the user's root
//! - [`probe`] stats paths into `Attributes | Absent` values
//! - [`watch`] keeps a per-user content index current and fans out deltas
//!   to every session of that user
//! - [`quota`] computes `(free, total)` capacity per user
//! - [`transfer`] runs the chunked pull protocol for reads and writes
//! - [`ops`] dispatches named operations with the policy checks applied
//!   before any filesystem mutation

pub mod ops;
pub mod probe;
pub mod quota;
pub mod sandbox;
pub mod session;
pub mod transfer;
pub mod user;
pub mod watch;

pub use sandbox::Sandbox;
pub use session::run_session;
pub use transfer::TransferTable;
pub use user::User;
pub use watch::{Delta, Subscription, WatchManager};
