use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::codec::{Codec, Frame, MsgType, RawTlv, TlvType};
use crate::config::ProtocolConfig;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::identity::NodeIdentity;

/// The role a node currently plays in charging coordination. Exactly one
/// role is active at a time; switching roles cancels every in-flight
/// session rather than leaving it half-finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    MobileProvider,
    PlatoonHead,
    PlatoonMember,
    Rreh,
}

/// Identifies one charging-coordination session: the consumer, the
/// provider it is negotiating with, and the consumer-assigned sequence
/// number that disambiguates repeated attempts between the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub consumer_id: NodeIdentity,
    pub provider_id: NodeIdentity,
    pub seq: u32,
}

/// Consumer-side state machine, driven by `ChargingCoordination` on the
/// node that initiated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Discover,
    Evaluate,
    SendOffer,
    WaitAccept,
    Ack,
    WaitAckAck,
    Allocated,
    Travel,
    Charge,
    Leave,
    Cancelled,
}

/// Provider-side state machine (shared by `MobileProvider`, `PlatoonHead`,
/// and `Rreh` roles — `Rreh` additionally queues competing consumers
/// instead of rejecting them outright).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Announce,
    WaitOffers,
    Select,
    SendAccept,
    WaitAck,
    SendAckAck,
    Charge,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Consumer(ConsumerState),
    Provider(ProviderState),
}

/// RREH-only grid congestion level. Any transition triggers an immediate
/// GRID_STATUS origination rather than waiting for the next beacon-style
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum GridState {
    Normal = 0,
    Limited = 1,
    Congested = 2,
    Offline = 3,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub deadline: Option<f64>,
    pub required_energy_kw: f32,
}

impl Session {
    fn new_consumer(id: SessionId, required_energy_kw: f32) -> Self {
        Self {
            id,
            state: SessionState::Consumer(ConsumerState::Discover),
            deadline: None,
            required_energy_kw,
        }
    }

    fn new_provider(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Provider(ProviderState::Announce),
            deadline: None,
            required_energy_kw: 0.0,
        }
    }
}

/// Layer C: role management and the charging-coordination handshake.
/// Consumer-initiated and provider-initiated sessions are tracked
/// separately since the same node may simultaneously be a consumer
/// session's initiator and a provider session's responder for a different
/// peer, but never both roles for the *same* session.
pub struct ChargingCoordination {
    role: Role,
    sessions: HashMap<SessionId, Session>,
    /// RREH only: consumers waiting for a charging slot once the active
    /// session completes, FIFO order.
    rreh_queue: VecDeque<NodeIdentity>,
    /// RREH only: last grid state a GRID_STATUS was emitted for.
    grid_state: GridState,
    next_seq: u32,
}

impl ChargingCoordination {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            sessions: HashMap::new(),
            rreh_queue: VecDeque::new(),
            grid_state: GridState::Normal,
            next_seq: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether this node has a consumer-side session in flight, i.e. not
    /// yet `ALLOCATED`/`CANCELLED`. `RoleManager` uses this to decide
    /// whether the PLATOON_HEAD transition is available and whether a new
    /// consumer session should be started for an existing charging need.
    pub fn has_active_consumer_session(&self) -> bool {
        self.sessions.values().any(|s| {
            matches!(
                s.state,
                SessionState::Consumer(
                    ConsumerState::Discover
                        | ConsumerState::Evaluate
                        | ConsumerState::SendOffer
                        | ConsumerState::WaitAccept
                        | ConsumerState::Ack
                        | ConsumerState::WaitAckAck
                        | ConsumerState::Allocated
                        | ConsumerState::Travel
                        | ConsumerState::Charge
                )
            )
        })
    }

    /// Switches the active role, cancelling every session in flight. Each
    /// cancelled session's id is returned so the caller can log/count it;
    /// the sessions themselves are dropped from the table.
    pub fn switch_role(&mut self, new_role: Role) -> Vec<(SessionId, CoreError)> {
        let mut cancelled = Vec::new();
        for (id, session) in self.sessions.drain() {
            let terminal = matches!(
                session.state,
                SessionState::Consumer(ConsumerState::Allocated)
                    | SessionState::Consumer(ConsumerState::Charge)
                    | SessionState::Consumer(ConsumerState::Leave)
                    | SessionState::Consumer(ConsumerState::Cancelled)
                    | SessionState::Provider(ProviderState::Charge)
                    | SessionState::Provider(ProviderState::Cancelled)
            );
            if !terminal {
                cancelled.push((id, CoreError::RoleSwitched(format!("{:?}", id))));
            }
        }
        self.role = new_role;
        cancelled
    }

    fn next_seq(&mut self) -> u32 {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq
    }

    /// Consumer side: begins discovery/evaluation against `provider_id`,
    /// immediately advancing through `DISCOVER`/`EVALUATE` to `SEND_OFFER`
    /// since both are local decisions with no wire round-trip.
    pub fn start_consumer_session(
        &mut self,
        ctx: &Context,
        provider_id: NodeIdentity,
        required_energy_kw: f32,
    ) -> SessionId {
        let seq = self.next_seq();
        let id = SessionId {
            consumer_id: ctx.node_id(),
            provider_id,
            seq,
        };
        let mut session = Session::new_consumer(id, required_energy_kw);
        session.state = SessionState::Consumer(ConsumerState::SendOffer);
        session.deadline = Some(ctx.current_time() + ctx.config().join_accept_timeout);
        self.sessions.insert(id, session);
        tracing::debug!(?id, "consumer session entering SEND_OFFER");
        id
    }

    /// Encodes and sends the JOIN_OFFER for a session currently in
    /// `SEND_OFFER`, advancing it to `WAIT_ACCEPT`.
    pub fn encode_join_offer(&mut self, ctx: &Context, id: SessionId) -> CoreResult<Vec<u8>> {
        let session = self.get_mut(id)?;
        if session.state != SessionState::Consumer(ConsumerState::SendOffer) {
            return Err(CoreError::StaleProvider(format!(
                "encode_join_offer called outside SEND_OFFER for {:?}",
                id
            )));
        }
        let tlvs = vec![RawTlv {
            type_code: TlvType::RequiredEnergy as u8,
            value: session.required_energy_kw.to_be_bytes().to_vec(),
        }];
        session.state = SessionState::Consumer(ConsumerState::WaitAccept);
        let frame = Frame::new(MsgType::JoinOffer, 1, id.seq, ctx.node_id(), tlvs);
        Codec::encode(&frame)
    }

    /// Encodes and sends the JOIN_ACCEPT for a session in `SEND_ACCEPT`,
    /// advancing it to `WAIT_ACK`.
    pub fn encode_join_accept(&mut self, ctx: &Context, id: SessionId) -> CoreResult<Vec<u8>> {
        let session = self.get_mut(id)?;
        if session.state != SessionState::Provider(ProviderState::SendAccept) {
            return Err(CoreError::StaleProvider(format!(
                "encode_join_accept called outside SEND_ACCEPT for {:?}",
                id
            )));
        }
        session.state = SessionState::Provider(ProviderState::WaitAck);
        session.deadline = Some(ctx.current_time() + ctx.config().join_accept_timeout);
        let frame = Frame::new(MsgType::JoinAccept, 1, id.seq, ctx.node_id(), vec![]);
        Codec::encode(&frame)
    }

    /// Encodes and sends the ACK for a session in `ACK`, advancing it to
    /// `WAIT_ACKACK`.
    pub fn encode_ack(&mut self, ctx: &Context, id: SessionId) -> CoreResult<Vec<u8>> {
        let session = self.get_mut(id)?;
        if session.state != SessionState::Consumer(ConsumerState::Ack) {
            return Err(CoreError::StaleProvider(format!(
                "encode_ack called outside ACK for {:?}",
                id
            )));
        }
        session.state = SessionState::Consumer(ConsumerState::WaitAckAck);
        session.deadline = Some(ctx.current_time() + ctx.config().join_accept_timeout);
        let frame = Frame::new(MsgType::Ack, 1, id.seq, ctx.node_id(), vec![]);
        Codec::encode(&frame)
    }

    /// Encodes and sends the ACKACK for a session in `SEND_ACKACK`,
    /// completing the provider side of the handshake into `CHARGE`.
    pub fn encode_ackack(&mut self, ctx: &Context, id: SessionId) -> CoreResult<Vec<u8>> {
        let session = self.get_mut(id)?;
        if session.state != SessionState::Provider(ProviderState::SendAckAck) {
            return Err(CoreError::StaleProvider(format!(
                "encode_ackack called outside SEND_ACKACK for {:?}",
                id
            )));
        }
        session.state = SessionState::Provider(ProviderState::Charge);
        let frame = Frame::new(MsgType::AckAck, 1, id.seq, ctx.node_id(), vec![]);
        Codec::encode(&frame)
    }

    /// Consumer side: JOIN_ACCEPT arrived for `id`. Advances
    /// `WAIT_ACCEPT -> ACK` and resets the deadline for the ACK round.
    pub fn on_join_accept(&mut self, ctx: &Context, id: SessionId) -> CoreResult<()> {
        let session = self.get_mut(id)?;
        match session.state {
            SessionState::Consumer(ConsumerState::WaitAccept) => {
                session.state = SessionState::Consumer(ConsumerState::Ack);
                session.deadline = Some(ctx.current_time() + ctx.config().join_accept_timeout);
                Ok(())
            }
            _ => Err(CoreError::StaleProvider(format!(
                "unexpected JOIN_ACCEPT for session in state {:?}",
                session.state
            ))),
        }
    }

    /// Consumer side: ACKACK arrived, completing the handshake.
    pub fn on_ackack(&mut self, id: SessionId) -> CoreResult<()> {
        let session = self.get_mut(id)?;
        match session.state {
            SessionState::Consumer(ConsumerState::WaitAckAck) => {
                session.state = SessionState::Consumer(ConsumerState::Allocated);
                session.deadline = None;
                Ok(())
            }
            _ => Err(CoreError::AckAckTimeout(format!("{:?}", id))),
        }
    }

    /// Provider side: a JOIN_OFFER arrived during the offer window;
    /// records it against a (possibly new) provider-side session entry
    /// keyed by the consumer that sent it.
    pub fn on_join_offer(
        &mut self,
        ctx: &Context,
        consumer_id: NodeIdentity,
        consumer_seq: u32,
        required_energy_kw: f32,
    ) -> SessionId {
        let id = SessionId {
            consumer_id,
            provider_id: ctx.node_id(),
            seq: consumer_seq,
        };
        let session = self
            .sessions
            .entry(id)
            .or_insert_with(|| Session::new_provider(id));
        session.state = SessionState::Provider(ProviderState::WaitOffers);
        session.deadline = Some(ctx.current_time() + ctx.config().offer_window);
        session.required_energy_kw = required_energy_kw;
        id
    }

    /// Provider side: offer window has elapsed; accepts every candidate
    /// session currently in `WAIT_OFFERS`, in ascending `consumer_id`
    /// order, that still fits within `available_slots` and the remaining
    /// `shareable_energy_kw` — rather than a single winner, since a
    /// provider/platoon head may have capacity for several consumers at
    /// once. Candidates that don't fit are cancelled (or queued, under
    /// the `Rreh` role, instead of dropped).
    pub fn select_offer(
        &mut self,
        ctx: &Context,
        available_slots: usize,
    ) -> Vec<SessionId> {
        let now = ctx.current_time();
        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                matches!(s.state, SessionState::Provider(ProviderState::WaitOffers))
                    && s.deadline.map(|d| now >= d).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut sorted = candidates;
        sorted.sort_by_key(|id| id.consumer_id);

        let mut remaining_energy = ctx.state().shareable_energy_kw;
        let mut winners = Vec::new();
        for id in &sorted {
            if winners.len() >= available_slots {
                break;
            }
            let required = self
                .sessions
                .get(id)
                .map(|s| s.required_energy_kw)
                .unwrap_or(0.0);
            if required > remaining_energy {
                continue;
            }
            remaining_energy -= required;
            winners.push(*id);
        }

        for id in &sorted {
            if winners.contains(id) {
                continue;
            }
            if self.role == Role::Rreh {
                self.rreh_queue.push_back(id.consumer_id);
            }
            self.sessions.remove(id);
        }
        for id in &winners {
            if let Some(session) = self.sessions.get_mut(id) {
                session.state = SessionState::Provider(ProviderState::SendAccept);
                session.deadline = Some(now + ctx.config().join_accept_timeout);
            }
        }
        winners
    }

    /// Provider side: ACK arrived for the selected session.
    pub fn on_ack(&mut self, id: SessionId) -> CoreResult<()> {
        let session = self.get_mut(id)?;
        match session.state {
            SessionState::Provider(ProviderState::WaitAck) => {
                session.state = SessionState::Provider(ProviderState::SendAckAck);
                session.deadline = None;
                Ok(())
            }
            _ => Err(CoreError::AckTimeout(format!("{:?}", id))),
        }
    }

    /// Checked once per `tick`: any session whose deadline has passed
    /// without the expected reply times out, moves to `Cancelled`, and is
    /// reported to the caller as the specific timeout error spec.md names
    /// for that state.
    pub fn expire_timeouts(&mut self, now: f64) -> Vec<(SessionId, CoreError)> {
        let mut expired = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            let due = session.deadline.map(|d| now >= d).unwrap_or(false);
            if !due {
                continue;
            }
            let err = match session.state {
                SessionState::Consumer(ConsumerState::SendOffer)
                | SessionState::Consumer(ConsumerState::WaitAccept) => {
                    session.state = SessionState::Consumer(ConsumerState::Cancelled);
                    CoreError::AcceptTimeout(format!("{:?}", id))
                }
                SessionState::Consumer(ConsumerState::Ack) => {
                    session.state = SessionState::Consumer(ConsumerState::Cancelled);
                    CoreError::AckTimeout(format!("{:?}", id))
                }
                SessionState::Consumer(ConsumerState::WaitAckAck) => {
                    session.state = SessionState::Consumer(ConsumerState::Cancelled);
                    CoreError::AckAckTimeout(format!("{:?}", id))
                }
                SessionState::Provider(ProviderState::SendAccept) => {
                    session.state = SessionState::Provider(ProviderState::Cancelled);
                    CoreError::AckTimeout(format!("{:?}", id))
                }
                _ => continue,
            };
            session.deadline = None;
            expired.push((*id, err));
        }
        expired
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    fn get_mut(&mut self, id: SessionId) -> CoreResult<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| CoreError::StaleProvider(format!("{:?}", id)))
    }

    pub fn rreh_queue_len(&self) -> usize {
        self.rreh_queue.len()
    }

    pub fn grid_state(&self) -> GridState {
        self.grid_state
    }

    /// RREH only: recomputes grid congestion from queue depth (worsening as
    /// more consumers wait) and remaining shareable capacity, returning the
    /// new state only when it differs from the last one computed — the
    /// caller treats `Some` as the trigger to emit GRID_STATUS immediately.
    /// A no-op (always `None`) for every other role.
    pub fn recompute_grid_state(
        &mut self,
        shareable_energy_kw: f32,
        cfg: &ProtocolConfig,
    ) -> Option<GridState> {
        if self.role != Role::Rreh {
            return None;
        }
        let next = if shareable_energy_kw <= 0.0 {
            GridState::Offline
        } else if self.rreh_queue.len() >= cfg.rreh_congested_queue_len {
            GridState::Congested
        } else if self.rreh_queue.len() >= cfg.rreh_limited_queue_len {
            GridState::Limited
        } else {
            GridState::Normal
        };
        if next == self.grid_state {
            None
        } else {
            self.grid_state = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;

    fn ctx(id: u64) -> Context {
        Context::new(NodeIdentity::from_u64(id), ProtocolConfig::default())
    }

    #[test]
    fn consumer_session_reaches_allocated_within_one_timeout_window() {
        let mut c = ctx(1);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::Consumer);
        let id = layer.start_consumer_session(&c, NodeIdentity::from_u64(2), 5.0);
        layer.get_mut(id).unwrap().state = SessionState::Consumer(ConsumerState::WaitAccept);
        layer.on_join_accept(&c, id).unwrap();
        layer.get_mut(id).unwrap().state = SessionState::Consumer(ConsumerState::WaitAckAck);
        layer.on_ackack(id).unwrap();
        assert_eq!(
            layer.session(id).unwrap().state,
            SessionState::Consumer(ConsumerState::Allocated)
        );
    }

    #[test]
    fn accept_timeout_cancels_session() {
        let mut c = ctx(1);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::Consumer);
        let id = layer.start_consumer_session(&c, NodeIdentity::from_u64(2), 5.0);
        let expired = layer.expire_timeouts(1000.0);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, id);
        assert!(matches!(expired[0].1, CoreError::AcceptTimeout(_)));
    }

    #[test]
    fn role_switch_cancels_in_flight_sessions() {
        let mut c = ctx(1);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::Consumer);
        layer.start_consumer_session(&c, NodeIdentity::from_u64(2), 5.0);
        let cancelled = layer.switch_role(Role::MobileProvider);
        assert_eq!(cancelled.len(), 1);
        assert!(matches!(cancelled[0].1, CoreError::RoleSwitched(_)));
    }

    #[test]
    fn rreh_queues_non_selected_offers_instead_of_dropping() {
        let mut c = ctx(9);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::Rreh);
        layer.on_join_offer(&c, NodeIdentity::from_u64(1), 1, 5.0);
        layer.on_join_offer(&c, NodeIdentity::from_u64(2), 1, 5.0);
        c.update_time(100.0).unwrap();
        let winners = layer.select_offer(&c, 1);
        assert_eq!(winners, vec![SessionId {
            consumer_id: NodeIdentity::from_u64(1),
            provider_id: c.node_id(),
            seq: 1,
        }]);
        assert_eq!(layer.rreh_queue_len(), 1);
    }

    #[test]
    fn select_offer_accepts_multiple_offers_within_slots_and_energy() {
        let mut c = ctx(9);
        c.set_shareable_energy_kw(20.0);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::PlatoonHead);
        layer.on_join_offer(&c, NodeIdentity::from_u64(1), 1, 8.0);
        layer.on_join_offer(&c, NodeIdentity::from_u64(2), 1, 8.0);
        layer.on_join_offer(&c, NodeIdentity::from_u64(3), 1, 8.0);
        c.update_time(100.0).unwrap();
        let winners = layer.select_offer(&c, 5);
        assert_eq!(winners.len(), 2, "third offer must not fit the energy budget");
        assert!(winners.iter().all(|id| id.consumer_id != NodeIdentity::from_u64(3)));
    }

    #[test]
    fn select_offer_respects_available_slots_even_with_surplus_energy() {
        let mut c = ctx(9);
        c.update_time(0.0).unwrap();
        let mut layer = ChargingCoordination::new(Role::MobileProvider);
        layer.on_join_offer(&c, NodeIdentity::from_u64(1), 1, 0.0);
        layer.on_join_offer(&c, NodeIdentity::from_u64(2), 1, 0.0);
        c.update_time(100.0).unwrap();
        let winners = layer.select_offer(&c, 1);
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn grid_state_transitions_fire_only_on_change() {
        let cfg = ProtocolConfig::default();
        let mut layer = ChargingCoordination::new(Role::Rreh);
        assert_eq!(layer.recompute_grid_state(10.0, &cfg), None);
        for i in 0..cfg.rreh_limited_queue_len {
            layer.rreh_queue.push_back(NodeIdentity::from_u64(i as u64));
        }
        assert_eq!(layer.recompute_grid_state(10.0, &cfg), Some(GridState::Limited));
        assert_eq!(layer.recompute_grid_state(10.0, &cfg), None, "unchanged state must not re-fire");
        assert_eq!(layer.recompute_grid_state(0.0, &cfg), Some(GridState::Offline));
    }

    #[test]
    fn non_rreh_role_never_computes_grid_state() {
        let cfg = ProtocolConfig::default();
        let mut layer = ChargingCoordination::new(Role::MobileProvider);
        assert_eq!(layer.recompute_grid_state(0.0, &cfg), None);
    }
}
