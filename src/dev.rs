//! An in-process synchronous multi-party harness for exercising
//! [`MultiHandler`] end-to-end, without any real network I/O.
//!
//! Named and shaped after `manul::dev::run_sync`: callers hand it one
//! already-started [`Round`] per party plus that party's [`RoundInfo`],
//! and it shuttles messages between every party's handler until no
//! handler has outstanding outbound traffic, then reports each party's
//! [`SessionResult`]. Used by this crate's own tests below and by
//! `keygen`/`resharing`'s integration tests; not part of the public
//! API surface consumers of this crate would use in production (a real
//! caller wires `MultiHandler` to its own network layer instead).

use std::collections::{BTreeMap, VecDeque};

use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRngCore, SeedableRng};

use crate::config::Config;
use crate::error::{HandlerError, LocalError};
use crate::handler::{MultiHandler, SessionResult};
use crate::party::PartyId;
use crate::protocol::{Message, Round, RoundInfo};

/// The outcome of a [`run_sync`] call: one [`SessionResult`]-equivalent
/// per participating party.
pub struct ExecutionResult {
    pub results: BTreeMap<PartyId, Result<Config, (HandlerError, Vec<PartyId>)>>,
}

impl ExecutionResult {
    /// Convenience accessor for tests: panics unless every party
    /// produced the same `Config` (up to generation/threshold/public
    /// key), returning it.
    pub fn expect_consensus(&self) -> BTreeMap<PartyId, Config> {
        self.results
            .iter()
            .map(|(id, result)| {
                let config = result
                    .as_ref()
                    .unwrap_or_else(|(e, culprits)| panic!("party {id:?} did not finish: {e} (culprits: {culprits:?})"));
                (id.clone(), config.clone())
            })
            .collect()
    }
}

/// Drives every party's handler to quiescence, delivering each
/// outbound message to every handler it is addressed to (its target,
/// for a p2p message; every other party, for a broadcast) in the order
/// the handlers emit them.
///
/// `rng` is used only to derive each party's own per-session RNG
/// deterministically, so a fixed `rng` seed reproduces a fixed run.
pub fn run_sync(
    first_rounds: BTreeMap<PartyId, Box<dyn Round>>,
    infos: &BTreeMap<PartyId, RoundInfo>,
    rng: &mut impl CryptoRngCore,
) -> Result<ExecutionResult, LocalError> {
    let mut handlers = BTreeMap::new();
    let mut receivers = BTreeMap::new();
    for (id, first_round) in first_rounds {
        let info = infos
            .get(&id)
            .cloned()
            .ok_or_else(|| LocalError::new("missing RoundInfo for party"))?;
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let party_rng: Box<dyn CryptoRngCore + Send> = Box::new(ChaCha20Rng::from_seed(seed));
        let (handler, receiver) = MultiHandler::new(first_round, info, party_rng)?;
        handlers.insert(id.clone(), handler);
        receivers.insert(id, receiver);
    }

    let mut queue: VecDeque<Message> = VecDeque::new();
    drain_into(&receivers, &mut queue);

    loop {
        let Some(msg) = queue.pop_front() else {
            drain_into(&receivers, &mut queue);
            if queue.is_empty() {
                break;
            }
            continue;
        };
        for (id, handler) in &handlers {
            if *id == msg.from {
                continue;
            }
            let addressed = msg.to.as_ref().map(|to| to == id).unwrap_or(true);
            if addressed {
                handler.accept(msg.clone())?;
            }
        }
        drain_into(&receivers, &mut queue);
    }

    let mut results = BTreeMap::new();
    for (id, handler) in &handlers {
        let result = match handler.result() {
            SessionResult::Done(config) => Ok(config),
            SessionResult::Error { error, culprits } => Err((error, culprits)),
            SessionResult::NotFinished => {
                return Err(LocalError::new(format!("party {id:?} never reached a terminal state")))
            }
        };
        results.insert(id.clone(), result);
    }
    Ok(ExecutionResult { results })
}

fn drain_into(
    receivers: &BTreeMap<PartyId, std::sync::mpsc::Receiver<Message>>,
    queue: &mut VecDeque<Message>,
) {
    for receiver in receivers.values() {
        while let Ok(msg) = receiver.try_recv() {
            queue.push_back(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keygen;
    use crate::party::lagrange_coefficients_at_zero;
    use crate::protocol::RoundId;
    use rand_core::OsRng;

    /// Installs a `tracing` subscriber gated by `RUST_LOG`, so running
    /// `RUST_LOG=lss_core=trace cargo test -- --nocapture` surfaces the
    /// handler's admission/finalize/abort events. Safe to call from
    /// every test: `try_init` is a no-op once a subscriber is set.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    }

    fn keygen_setup(n: u32, threshold: u16) -> (BTreeMap<PartyId, Box<dyn Round>>, BTreeMap<PartyId, RoundInfo>) {
        let party_ids: Vec<PartyId> = (0..n).map(PartyId::from_index).collect();
        let mut first_rounds = BTreeMap::new();
        let mut infos = BTreeMap::new();
        for id in &party_ids {
            let info = RoundInfo {
                protocol: "lss-core/keygen",
                ssid: b"dev-harness-ssid".to_vec(),
                self_id: id.clone(),
                party_ids: party_ids.clone(),
                threshold,
                final_round: 3,
            };
            let mut rng = OsRng;
            first_rounds.insert(id.clone(), keygen::start(&mut rng, &info));
            infos.insert(id.clone(), info);
        }
        (first_rounds, infos)
    }

    #[test]
    fn keygen_end_to_end_reaches_consensus() {
        init_tracing();
        let (first_rounds, infos) = keygen_setup(4, 3);
        let result = run_sync(first_rounds, &infos, &mut OsRng).unwrap();
        let configs = result.expect_consensus();

        let pk = configs.values().next().unwrap().public_key;
        for config in configs.values() {
            assert_eq!(config.public_key, pk);
            config.validate().unwrap();
        }

        let ids: Vec<PartyId> = configs.keys().cloned().collect();
        let xs: Vec<_> = ids.iter().map(|p| p.to_scalar()).collect();
        let coeffs = lagrange_coefficients_at_zero(&xs).unwrap();
        let reconstructed: crate::group::Scalar = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| configs[id].secret_share * coeffs[&idx])
            .sum();
        assert_eq!(reconstructed.mul_by_generator(), pk);
    }

    /// An inbound round-0 envelope is the handler's out-of-band abort
    /// signal and must move `result()` to `Error` on the very next
    /// `accept`.
    #[test]
    fn round_zero_message_triggers_abort() {
        init_tracing();
        let (first_rounds, infos) = keygen_setup(3, 2);
        let ids: Vec<PartyId> = infos.keys().cloned().collect();

        let mut handlers = BTreeMap::new();
        for (id, first_round) in first_rounds {
            let info = infos[&id].clone();
            let (handler, _receiver) = MultiHandler::new(first_round, info, Box::new(OsRng)).unwrap();
            handlers.insert(id, handler);
        }

        let target = &ids[0];
        let attacker = ids[1].clone();
        let abort = Message {
            ssid: b"dev-harness-ssid".to_vec(),
            from: attacker.clone(),
            to: None,
            protocol: "lss-core/keygen".into(),
            round_number: 0,
            broadcast: true,
            broadcast_verification: None,
            data: b"abort".to_vec(),
        };
        handlers[target].accept(abort).unwrap();
        match handlers[target].result() {
            SessionResult::Error { error: HandlerError::RemoteAbort { culprit, .. }, .. } => {
                assert_eq!(culprit, attacker)
            }
            _ => panic!("expected an abort"),
        }
    }

    /// Delivering the exact same message a second time must not change
    /// anything observable, checked here by feeding one party's round 1
    /// broadcast to another twice in a row and then letting the rest of
    /// the protocol run normally.
    #[test]
    fn duplicate_delivery_is_idempotent() {
        init_tracing();
        let (first_rounds, infos) = keygen_setup(3, 2);
        let ids: Vec<PartyId> = infos.keys().cloned().collect();

        let mut handlers = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for (id, first_round) in first_rounds {
            let info = infos[&id].clone();
            let (handler, receiver) = MultiHandler::new(first_round, info, Box::new(OsRng)).unwrap();
            handlers.insert(id, handler);
            receivers.insert(id, receiver);
        }

        let sender = ids[0].clone();
        let recipient = &ids[1];
        let broadcast = receivers[&sender].recv().expect("round 1 broadcast");
        handlers[recipient].accept(broadcast.clone()).unwrap();
        handlers[recipient].accept(broadcast).unwrap();

        let mut queue: VecDeque<Message> = VecDeque::new();
        drain_into(&receivers, &mut queue);
        while let Some(msg) = queue.pop_front() {
            for (id, handler) in &handlers {
                if *id == msg.from {
                    continue;
                }
                let addressed = msg.to.as_ref().map(|to| to == id).unwrap_or(true);
                if addressed {
                    handler.accept(msg.clone()).unwrap();
                }
            }
            drain_into(&receivers, &mut queue);
        }

        for handler in handlers.values() {
            match handler.result() {
                SessionResult::Done(config) => config.validate().unwrap(),
                SessionResult::NotFinished => panic!("expected every party to finish"),
                SessionResult::Error { error, .. } => panic!("expected no abort, got {error}"),
            }
        }
    }

    #[test]
    fn order_independence_yields_identical_configs() {
        init_tracing();
        let run = |seed: u64| {
            let (first_rounds, infos) = keygen_setup(4, 3);
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(seed);
            run_sync(first_rounds, &infos, &mut rng).unwrap().expect_consensus()
        };
        let a = run(1);
        let b = run(1);
        for id in a.keys() {
            assert_eq!(a[id].public_key, b[id].public_key);
            assert_eq!(a[id].secret_share, b[id].secret_share);
        }
    }

    #[test]
    fn resharing_end_to_end_preserves_public_key() {
        init_tracing();
        use crate::resharing::{self, ReshareParams};

        let (first_rounds, infos) = keygen_setup(5, 3);
        let keygen_result = run_sync(first_rounds, &infos, &mut OsRng).unwrap();
        let configs = keygen_result.expect_consensus();

        let old_parties: Vec<PartyId> = configs.keys().cloned().collect();
        let dealer = old_parties[0].clone();
        let added: Vec<PartyId> = (5..7).map(PartyId::from_index).collect();
        let mut new_parties = old_parties.clone();
        new_parties.extend(added.iter().cloned());
        new_parties.sort();

        let old_public_key = configs.values().next().unwrap().public_key;
        let chain_key = configs[&old_parties[0]].chain_key;
        let rid = configs[&old_parties[0]].rid;

        let new_threshold: u16 = 4;
        let final_round: RoundId = 6;

        let mut first_rounds = BTreeMap::new();
        let mut infos = BTreeMap::new();
        for id in &new_parties {
            let info = RoundInfo {
                protocol: "lss-core/resharing",
                ssid: b"dev-harness-reshare-ssid".to_vec(),
                self_id: id.clone(),
                party_ids: new_parties.clone(),
                threshold: new_threshold,
                final_round,
            };
            let params = ReshareParams {
                old_parties: old_parties.clone(),
                old_threshold: 3,
                dealer: dealer.clone(),
                own_old_share: configs.get(id).map(|c| c.secret_share),
                old_public_key,
                chain_key,
                rid,
                old_generation: configs[&old_parties[0]].generation,
            };
            let mut rng = OsRng;
            let round = resharing::start(&mut rng, &info, params).unwrap();
            first_rounds.insert(id.clone(), round);
            infos.insert(id.clone(), info);
        }

        let result = run_sync(first_rounds, &infos, &mut OsRng).unwrap();
        let new_configs = result.expect_consensus();
        for config in new_configs.values() {
            assert_eq!(config.public_key, old_public_key);
            assert_eq!(config.generation, configs[&old_parties[0]].generation + 1);
            config.validate().unwrap();
        }
    }
}
