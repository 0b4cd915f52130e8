//! The round framework: the `Round` trait contract, the wire
//! envelope, and the session-parameter bundle every round is built
//! against.
//!
//! Mirrors `manul`'s `Round`/`Protocol` trait family in spirit —
//! object-safe, consuming `finalize`, `Box<dyn Any>`-based results —
//! but collapsed to the single numbered-round model this crate's
//! protocols actually need: concrete protocols (`keygen`, `resharing`)
//! each implement `Round` as a tagged variant over a small enum of
//! their own round states and dispatch internally by `match`, rather
//! than each round being a free-standing type reached only through the
//! trait object.

use std::any::Any;
use std::fmt;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::error::{HandlerError, LocalError, RemoteError};
use crate::party::PartyId;

/// 1-based round index. Round 0 is reserved for the out-of-band abort
/// signal.
pub type RoundId = u32;

/// A marker naming the expected payload type for a round's p2p or
/// broadcast content, used only for a defensive shape check before
/// decoding against the concrete Rust type. Not itself an
/// encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentShape(pub &'static str);

/// Session parameters, constructed once and threaded immutably through
/// every round of a run (this crate's analogue of `manul`'s
/// `SessionParameters`).
#[derive(Debug, Clone)]
pub struct RoundInfo {
    pub protocol: &'static str,
    pub ssid: Vec<u8>,
    pub self_id: PartyId,
    /// All participating parties, in canonical (sorted) order.
    pub party_ids: Vec<PartyId>,
    pub threshold: u16,
    pub final_round: RoundId,
}

impl RoundInfo {
    pub fn others(&self) -> impl Iterator<Item = &PartyId> {
        self.party_ids.iter().filter(move |p| **p != self.self_id)
    }
}

/// A logical outbound message produced by [`Round::finalize`], before
/// the driver stamps it into a wire [`Message`].
pub struct RoundMessage {
    /// `None` means "broadcast to every other party".
    pub to: Option<PartyId>,
    pub broadcast: bool,
    pub payload: Vec<u8>,
}

impl RoundMessage {
    pub fn broadcast(payload: Vec<u8>) -> Self {
        Self { to: None, broadcast: true, payload }
    }

    pub fn direct(to: PartyId, payload: Vec<u8>) -> Self {
        Self { to: Some(to), broadcast: false, payload }
    }
}

/// The wire envelope. Encoded canonically with `postcard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub ssid: Vec<u8>,
    pub from: PartyId,
    pub to: Option<PartyId>,
    pub protocol: String,
    pub round_number: RoundId,
    pub broadcast: bool,
    pub broadcast_verification: Option<[u8; 32]>,
    pub data: Vec<u8>,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LocalError> {
        postcard::to_allocvec(self).map_err(|e| LocalError::new(format!("encoding failure: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoteError> {
        postcard::from_bytes(bytes).map_err(|e| RemoteError::new(format!("malformed message: {e}")))
    }
}

/// A round's terminal output, downcast from `Box<dyn Any>` the way
/// `manul`'s `Payload`/`Artifact` are. The concrete type is whatever
/// the protocol's last round produces (`crate::config::Config` for
/// keygen and resharing).
pub struct Artifact(Box<dyn Any + Send>);

impl Artifact {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }

    pub fn try_downcast<T: Send + 'static>(self) -> Result<T, LocalError> {
        self.0
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| LocalError::new("artifact downcast mismatch"))
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Artifact(..)")
    }
}

/// What a round produces when the driver is ready to advance.
pub enum FinalizeOutcome {
    /// Advance to a new round.
    Round(Box<dyn Round>),
    /// The protocol is complete.
    Result(Artifact),
    /// The protocol failed; `culprits` may be empty (e.g. a broken
    /// echo, attributable to no single party).
    Abort(HandlerError, Vec<PartyId>),
}

/// A value implementing exactly one numbered step of a protocol.
/// Object-safe: the driver only ever holds `Box<dyn Round>`.
pub trait Round: Send {
    /// 1-based round index.
    fn number(&self) -> RoundId;

    /// `None` means this round expects no p2p messages.
    fn message_content(&self) -> Option<ContentShape>;

    /// `Some` marks this as a `BroadcastRound` expecting a reliable
    /// broadcast from every party.
    fn broadcast_content(&self) -> Option<ContentShape>;

    /// Pure predicate over previously-stored state; must not mutate.
    fn verify_message(&self, from: &PartyId, payload: &[u8]) -> Result<(), RemoteError>;

    /// Commits a verified p2p message. Decoding/shape failures are
    /// attributed to `from`.
    fn store_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), RemoteError>;

    /// Commits a broadcast message (only called on `BroadcastRound`s).
    /// Decoding/shape failures are attributed to `from`.
    fn store_broadcast_message(&mut self, from: &PartyId, payload: &[u8]) -> Result<(), RemoteError>;

    /// `true` once every message this round needs has been stored.
    fn received_all(&self, info: &RoundInfo) -> bool;

    /// This round's own broadcast content, if it is producible from
    /// purely local state (i.e. without waiting on any predecessor
    /// round's `finalize` to have sent it already). Only ever
    /// non-`None` for a protocol's first round: every later round's
    /// own content is instead emitted by its predecessor's `finalize`
    /// during the first-round priming step.
    fn own_broadcast(&self, rng: &mut dyn CryptoRngCore, info: &RoundInfo) -> Result<Option<Vec<u8>>, LocalError> {
        let _ = (rng, info);
        Ok(None)
    }

    /// Consumes the round, possibly emitting outbound messages via
    /// `out`, and returns the next step.
    fn finalize(
        self: Box<Self>,
        rng: &mut dyn CryptoRngCore,
        info: &RoundInfo,
        out: &mut dyn FnMut(RoundMessage),
    ) -> Result<FinalizeOutcome, LocalError>;
}

/// Constructs the first round of a protocol run. Kept distinct from
/// `Round` only at the type level (it needs the RNG and `RoundInfo`
/// that later rounds receive through `finalize`/the driver instead).
pub trait FirstRound {
    fn first_round(self: Box<Self>, rng: &mut dyn CryptoRngCore, info: &RoundInfo) -> Result<Box<dyn Round>, LocalError>;
}
