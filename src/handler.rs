//! The `MultiHandler` driver: the stateful coordinator that
//! advances a `Round` trait-object chain by buffering, deduplicating,
//! verifying and replaying inbound messages, enforcing the
//! hash-chained broadcast echo along the way.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use rand_core::CryptoRngCore;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{HandlerError, LocalError};
use crate::party::PartyId;
use crate::protocol::{FinalizeOutcome, Message, Round, RoundId, RoundInfo, RoundMessage};
use crate::transcript::{Chain, Transcript};

/// Round 0 is reserved for the out-of-band abort signal.
const ABORT_ROUND: RoundId = 0;

#[derive(Clone)]
struct Stored {
    broadcast_verification: Option<[u8; 32]>,
    payload: Vec<u8>,
}

#[derive(Clone)]
enum Outcome {
    Result(Config),
    Error { error: HandlerError, culprits: Vec<PartyId> },
}

struct Inner {
    info: RoundInfo,
    current_number: RoundId,
    current: Option<Box<dyn Round>>,
    messages: HashMap<(RoundId, PartyId), Stored>,
    broadcasts: HashMap<(RoundId, PartyId), Stored>,
    broadcast_hash: HashMap<RoundId, [u8; 32]>,
    outcome: Option<Outcome>,
    /// The broadcast-verification hash every message of the current
    /// round must carry: `H_k` of whichever round actually produced the
    /// current one, whatever its round number (round numbers are not
    /// necessarily contiguous — see `DESIGN.md`'s keygen entry). `None`
    /// for round 1 (no predecessor), and also `None` whenever the
    /// producing round wasn't a `BroadcastRound` (no `H_k` is ever
    /// computed for it), e.g. resharing's p2p-only round 2.
    expected_verification: Option<[u8; 32]>,
    sender: SyncSender<Message>,
    rng: Box<dyn CryptoRngCore + Send>,
}

/// The round-based protocol driver.
///
/// Owns a single `Mutex<Inner>`: the entire synchronization domain for
/// one protocol run. `accept` briefly holds the lock to admit, store,
/// verify and finalize; `finalize` itself performs only pure CPU work,
/// never calling user code while holding the lock beyond `finalize`.
pub struct MultiHandler {
    inner: Mutex<Inner>,
}

/// What `result()` reports about a session.
pub enum SessionResult {
    NotFinished,
    Done(Config),
    Error { error: HandlerError, culprits: Vec<PartyId> },
}

impl MultiHandler {
    /// Constructs a new handler, priming round 1: round 1's `finalize`
    /// runs immediately to emit its initial broadcast, but `current`
    /// stays at round 1 so that other parties' round-1 broadcasts can
    /// still be integrated into `H_1`; the computed successor is
    /// stashed until `H_1` is ready.
    pub fn new(
        first_round: Box<dyn Round>,
        info: RoundInfo,
        rng: Box<dyn CryptoRngCore + Send>,
    ) -> Result<(Self, Receiver<Message>), LocalError> {
        let (sender, receiver) = sync_channel(2 * info.party_ids.len().max(1));
        let mut inner = Inner {
            current_number: first_round.number(),
            info,
            current: Some(first_round),
            messages: HashMap::new(),
            broadcasts: HashMap::new(),
            broadcast_hash: HashMap::new(),
            outcome: None,
            expected_verification: None,
            sender,
            rng,
        };
        inner.prime_first_round()?;
        inner.finalize_locked()?;
        Ok((Self { inner: Mutex::new(inner) }, receiver))
    }

    /// The admission predicate every inbound message must pass.
    pub fn can_accept(&self, msg: &Message) -> bool {
        let inner = self.inner.lock().expect("handler mutex poisoned");
        inner.can_accept(msg)
    }

    /// Admits, stores, verifies and replays an inbound message.
    pub fn accept(&self, msg: Message) -> Result<(), LocalError> {
        let mut inner = self.inner.lock().expect("handler mutex poisoned");
        inner.accept(msg)
    }

    /// Cooperative abort: a no-op if the session is already
    /// terminal.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("handler mutex poisoned");
        inner.abort_locked(HandlerError::UserStop, Vec::new());
    }

    pub fn result(&self) -> SessionResult {
        let inner = self.inner.lock().expect("handler mutex poisoned");
        match &inner.outcome {
            None => SessionResult::NotFinished,
            Some(Outcome::Result(config)) => SessionResult::Done(config.clone()),
            Some(Outcome::Error { error, culprits }) => {
                SessionResult::Error { error: error.clone(), culprits: culprits.clone() }
            }
        }
    }
}

impl Inner {
    fn can_accept(&self, msg: &Message) -> bool {
        let targets_self = msg.to.as_ref().map(|to| *to == self.info.self_id).unwrap_or(true);
        targets_self
            && msg.protocol == self.info.protocol
            && msg.ssid == self.info.ssid
            && self.info.party_ids.contains(&msg.from)
            && !msg.data.is_empty()
            && msg.round_number <= self.info.final_round
            && (msg.round_number >= self.current_number || msg.round_number == ABORT_ROUND)
    }

    fn accept(&mut self, msg: Message) -> Result<(), LocalError> {
        if self.outcome.is_some() {
            return Ok(());
        }
        if !self.can_accept(&msg) {
            trace!(from = ?msg.from, round = msg.round_number, "dropping inadmissible message");
            return Ok(());
        }

        if msg.round_number == ABORT_ROUND {
            let message = String::from_utf8_lossy(&msg.data).into_owned();
            self.abort_locked(HandlerError::RemoteAbort { culprit: msg.from.clone(), message }, vec![msg.from]);
            return Ok(());
        }

        self.store_and_process(msg)
    }

    fn store_and_process(&mut self, msg: Message) -> Result<(), LocalError> {
        let key = (msg.round_number, msg.from.clone());
        let stored = Stored { broadcast_verification: msg.broadcast_verification, payload: msg.data };

        if msg.broadcast {
            if self.broadcasts.contains_key(&key) {
                debug!(from = ?key.1, round = key.0, "duplicate broadcast dropped");
                return Ok(());
            }
            self.broadcasts.insert(key.clone(), stored);
        } else {
            if self.messages.contains_key(&key) {
                debug!(from = ?key.1, round = key.0, "duplicate message dropped");
                return Ok(());
            }
            self.messages.insert(key.clone(), stored);
        }

        if key.0 != self.current_number {
            // Queued for a future round.
            return Ok(());
        }

        self.integrate_current_round_message(&key.1, msg.broadcast)?;
        self.finalize_locked()
    }

    /// Decodes and verifies/stores a single already-buffered message
    /// against the current round.
    fn integrate_current_round_message(&mut self, from: &PartyId, is_broadcast: bool) -> Result<(), LocalError> {
        let round = match self.current.as_mut() {
            Some(round) => round,
            None => return Ok(()),
        };

        if is_broadcast {
            let payload = self.broadcasts[&(self.current_number, from.clone())].payload.clone();
            if let Err(remote) = round.store_broadcast_message(from, &payload) {
                self.abort_locked(
                    HandlerError::Round { round: self.current_number, message: remote.message().to_owned() },
                    vec![from.clone()],
                );
            }
            return Ok(());
        }

        // A p2p message on a BroadcastRound waits for that sender's
        // broadcast to arrive first.
        if round.broadcast_content().is_some()
            && !self.broadcasts.contains_key(&(self.current_number, from.clone()))
        {
            return Ok(());
        }

        let payload = self.messages[&(self.current_number, from.clone())].payload.clone();
        let round = self.current.as_ref().expect("checked above");
        if let Err(remote) = round.verify_message(from, &payload) {
            self.abort_locked(
                HandlerError::Round { round: self.current_number, message: remote.message().to_owned() },
                vec![from.clone()],
            );
            return Ok(());
        }
        let round = self.current.as_mut().expect("checked above");
        if let Err(remote) = round.store_message(from, &payload) {
            self.abort_locked(
                HandlerError::Round { round: self.current_number, message: remote.message().to_owned() },
                vec![from.clone()],
            );
        }
        Ok(())
    }

    /// Emits round 1's own broadcast immediately, without yet
    /// advancing, so other parties' round-1 broadcasts can still be
    /// integrated into `H_1`.
    fn prime_first_round(&mut self) -> Result<(), LocalError> {
        let round = match self.current.as_ref() {
            Some(round) => round,
            None => return Ok(()),
        };
        if round.broadcast_content().is_none() {
            return Ok(());
        }
        let payload = match round.own_broadcast(&mut self.rng, &self.info)? {
            Some(payload) => payload,
            None => return Ok(()),
        };
        let round_number = self.current_number;
        let key = (round_number, self.info.self_id.clone());
        self.broadcasts.insert(key, Stored { broadcast_verification: None, payload: payload.clone() });
        let wire = Message {
            ssid: self.info.ssid.clone(),
            from: self.info.self_id.clone(),
            to: None,
            protocol: self.info.protocol.to_owned(),
            round_number,
            broadcast: true,
            broadcast_verification: None,
            data: payload,
        };
        let _ = self.sender.try_send(wire);
        Ok(())
    }

    /// May advance zero, one or several rounds.
    fn finalize_locked(&mut self) -> Result<(), LocalError> {
        loop {
            if self.outcome.is_some() {
                return Ok(());
            }
            let round = match self.current.as_ref() {
                Some(round) => round,
                None => return Ok(()),
            };
            if !round.received_all(&self.info) {
                return Ok(());
            }

            let k = self.current_number;

            // Enforce the echo against the hash of whichever round
            // actually produced this one (round numbers need not be
            // contiguous, e.g. keygen's round 1 -> round 3).
            let expected = self.expected_verification;
            let mismatch = self
                .messages
                .iter()
                .chain(self.broadcasts.iter())
                .filter(|((round_number, _), _)| *round_number == k)
                .any(|(_, stored)| stored.broadcast_verification != expected);
            if mismatch {
                self.abort_locked(HandlerError::BroadcastVerificationFailed, Vec::new());
                return Ok(());
            }

            // H_k is defined once every broadcast for round k is in.
            if round.broadcast_content().is_some() {
                let mut transcript = Transcript::new("lss-core/handler/broadcast-hash");
                for party in &self.info.party_ids {
                    let stored = &self.broadcasts[&(k, party.clone())];
                    transcript = transcript.chain_bytes(&stored.payload);
                }
                self.broadcast_hash.insert(k, transcript.finalize_bytes());
            }

            let mut emitted: Vec<RoundMessage> = Vec::new();
            let round = self.current.take().expect("checked above");
            let outcome = {
                let mut out = |msg: RoundMessage| emitted.push(msg);
                round.finalize(&mut self.rng, &self.info, &mut out)?
            };

            match outcome {
                FinalizeOutcome::Round(next) => {
                    let next_number = next.number();
                    for msg in emitted {
                        self.stamp_and_send(msg, k, next_number);
                    }
                    // The round we're leaving is the one that produced
                    // the new current round; its broadcast hash (or
                    // `None`, if it wasn't a `BroadcastRound`) is what
                    // every message of the new round must echo.
                    self.expected_verification = self.broadcast_hash.get(&k).copied();
                    self.current_number = next_number;
                    self.current = Some(next);
                    self.replay_buffered(next_number)?;
                }
                FinalizeOutcome::Result(artifact) => {
                    match artifact.try_downcast::<Config>() {
                        Ok(config) => self.outcome = Some(Outcome::Result(config)),
                        Err(e) => self.abort_locked(HandlerError::Local(e), vec![self.info.self_id.clone()]),
                    }
                    return Ok(());
                }
                FinalizeOutcome::Abort(error, culprits) => {
                    self.abort_locked(error, culprits);
                    return Ok(());
                }
            }
        }
    }

    fn stamp_and_send(&mut self, msg: RoundMessage, finishing_round: RoundId, next_round: RoundId) {
        let broadcast_verification = self.broadcast_hash.get(&finishing_round).copied();
        let wire = Message {
            ssid: self.info.ssid.clone(),
            from: self.info.self_id.clone(),
            to: msg.to,
            protocol: self.info.protocol.to_owned(),
            round_number: next_round,
            broadcast: msg.broadcast,
            broadcast_verification,
            data: msg.payload,
        };
        if wire.broadcast {
            // Our own contribution must be in the buffer too, or `H_k`
            // for this round would never include it.
            let key = (next_round, self.info.self_id.clone());
            self.broadcasts.insert(
                key,
                Stored { broadcast_verification: wire.broadcast_verification, payload: wire.data.clone() },
            );
        }
        if let Err(TrySendError::Full(_)) = self.sender.try_send(wire) {
            warn!("outbound channel full; message dropped (caller must drain listen())");
        }
    }

    fn replay_buffered(&mut self, round: RoundId) -> Result<(), LocalError> {
        let broadcast_senders: Vec<PartyId> = self
            .broadcasts
            .keys()
            .filter(|(r, _)| *r == round)
            .map(|(_, p)| p.clone())
            .collect();
        for from in broadcast_senders {
            self.integrate_current_round_message(&from, true)?;
        }
        let p2p_senders: Vec<PartyId> =
            self.messages.keys().filter(|(r, _)| *r == round).map(|(_, p)| p.clone()).collect();
        for from in p2p_senders {
            self.integrate_current_round_message(&from, false)?;
        }
        Ok(())
    }

    fn abort_locked(&mut self, error: HandlerError, culprits: Vec<PartyId>) {
        if self.outcome.is_some() {
            return;
        }
        let message = error.to_string();
        self.outcome = Some(Outcome::Error { error, culprits });
        self.current = None;
        let envelope = Message {
            ssid: self.info.ssid.clone(),
            from: self.info.self_id.clone(),
            to: None,
            protocol: self.info.protocol.to_owned(),
            round_number: ABORT_ROUND,
            broadcast: true,
            broadcast_verification: None,
            data: message.into_bytes(),
        };
        let _ = self.sender.try_send(envelope);
    }
}
