//! A generic round-based protocol engine and the LSS threshold
//! key-generation / resharing protocol built on top of it.
//!
//! - [`protocol`] defines the `Round` trait contract, the wire
//!   [`protocol::Message`] envelope, and [`protocol::RoundInfo`], the
//!   session-parameter bundle every round is built against.
//! - [`handler`] is the [`handler::MultiHandler`] driver: buffers,
//!   deduplicates, verifies and replays inbound messages to advance a
//!   `Round` chain, enforcing the hash-chained broadcast echo.
//! - [`group`] is the prime-order group abstraction (concretely backed
//!   by secp256k1 via `k256`).
//! - [`party`] holds [`party::PartyId`], [`party::Polynomial`] and the
//!   Lagrange-coefficient helpers the LSS protocols interpolate with.
//! - [`transcript`] is the domain-separated Fiat-Shamir transcript used
//!   to derive round hashes, chain keys and RIDs.
//! - [`keygen`] and [`resharing`] are the two concrete LSS protocols:
//!   three-round DKG and six-round committee resharing.
//! - [`config`] is the persisted long-term key material both protocols
//!   produce.
//! - [`dev`] is an in-process synchronous test harness; not meant for
//!   production use.

pub mod config;
pub mod error;
pub mod group;
pub mod handler;
pub mod keygen;
pub mod party;
pub mod protocol;
pub mod resharing;
pub mod transcript;

pub mod dev;

pub use config::Config;
pub use error::{ConfigError, HandlerError, LocalError, RemoteError};
pub use handler::{MultiHandler, SessionResult};
pub use party::PartyId;
pub use protocol::{Message, Round, RoundInfo};
