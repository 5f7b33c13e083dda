use crate::codec::{Codec, Frame, MsgType, RawTlv, TlvType};
use crate::config::ProtocolConfig;
use crate::context::{Context, Position, Velocity};
use crate::error::{CoreError, CoreResult};
use crate::identity::NodeIdentity;
use crate::layers::charging::SessionId;
use crate::layers::{ChargingCoordination, NeighborDiscovery, PlatoonCoordination, ProviderAnnounce, Role};
use crate::tables::DedupCache;

/// Outbound transport the embedding harness implements. This crate never
/// opens a socket or owns a channel itself — every entry point that
/// produces wire traffic hands the encoded bytes to a `Sink` instead.
pub trait Sink {
    fn send(&mut self, frame: Vec<u8>);
}

/// Ties the four protocol layers to the shared `Context` and exposes the
/// engine's external entry points: `tick`, `receive`, and
/// `apply_mobility_and_energy`. One `Engine` per simulated node.
pub struct Engine {
    pub ctx: Context,
    pub neighbor_discovery: NeighborDiscovery,
    pub provider_announce: ProviderAnnounce,
    pub charging: ChargingCoordination,
    pub platoon: PlatoonCoordination,
    grid_status_dedup: DedupCache,
    grid_status_seq: u32,
}

impl Engine {
    pub fn new(node_id: NodeIdentity, config: ProtocolConfig, role: Role) -> Self {
        let dedup_cache_size = config.dedup_cache_size;
        Self {
            ctx: Context::new(node_id, config),
            neighbor_discovery: NeighborDiscovery::new(),
            provider_announce: ProviderAnnounce::new(dedup_cache_size),
            charging: ChargingCoordination::new(role),
            platoon: PlatoonCoordination::new(),
            grid_status_dedup: DedupCache::new(dedup_cache_size),
            grid_status_seq: 0,
        }
    }

    fn next_grid_status_seq(&mut self) -> u32 {
        self.grid_status_seq = self.grid_status_seq.wrapping_add(1);
        self.grid_status_seq
    }

    /// Switches the active charging-coordination role, cancelling any
    /// session in flight. Cancellations are logged, not propagated — per
    /// the crate-wide rule that the core never raises out of an entry
    /// point.
    pub fn switch_role(&mut self, new_role: Role) {
        for (id, err) in self.charging.switch_role(new_role) {
            tracing::warn!(?id, %err, "session cancelled by role switch");
        }
    }

    /// Drives every layer's periodic behavior for the current tick. Must
    /// be called with a monotonically non-decreasing `t`.
    pub fn tick(&mut self, t: f64, sink: &mut dyn Sink) -> CoreResult<()> {
        self.ctx.update_time(t)?;

        let desired_role = self.evaluate_role();
        if desired_role != self.charging.role() {
            self.switch_role(desired_role);
        }

        if let Some(hello) = self.neighbor_discovery.on_tick(&mut self.ctx)? {
            sink.send(hello);
        }
        if let Some(pa) = self.provider_announce.on_tick(
            &mut self.ctx,
            &self.neighbor_discovery,
            self.charging.role(),
        )? {
            sink.send(pa);
        }
        for frame in self.platoon.on_tick(&mut self.ctx)? {
            sink.send(frame);
        }

        for (id, err) in self.charging.expire_timeouts(t) {
            if matches!(err, CoreError::AcceptTimeout(_)) {
                self.provider_announce.providers.remove(id.provider_id);
            }
            tracing::debug!(?id, %err, "charging session timed out");
        }
        let available_slots = if self.charging.role() == Role::PlatoonHead {
            self.ctx
                .config()
                .platoon_max_size
                .saturating_sub(self.platoon.members().len() + 1)
        } else {
            usize::MAX
        };
        for id in self.charging.select_offer(&self.ctx, available_slots) {
            match self.charging.encode_join_accept(&self.ctx, id) {
                Ok(bytes) => sink.send(bytes),
                Err(err) => tracing::debug!(%err, "failed to encode join accept"),
            }
        }

        match self.platoon.maybe_handoff(&mut self.ctx) {
            Ok(Some((new_head_id, bytes))) => {
                sink.send(bytes);
                self.switch_role(if new_head_id == self.ctx.node_id() {
                    Role::PlatoonHead
                } else {
                    Role::PlatoonMember
                });
            }
            Ok(None) => {}
            Err(err) => tracing::debug!(%err, "failed to encode handoff beacon"),
        }

        if let Some(new_state) = self
            .charging
            .recompute_grid_state(self.ctx.state().shareable_energy_kw, self.ctx.config())
        {
            tracing::warn!(?new_state, "grid state transition, emitting grid status");
            let seq = self.next_grid_status_seq();
            self.grid_status_dedup.insert((self.ctx.node_id(), seq));
            let tlvs = vec![
                RawTlv {
                    type_code: TlvType::GridState as u8,
                    value: vec![new_state as u8],
                },
                RawTlv {
                    type_code: TlvType::PreviousHop as u8,
                    value: self.ctx.node_id().as_bytes().to_vec(),
                },
            ];
            let frame = Frame::new(
                MsgType::GridStatus,
                self.ctx.config().pa_ttl_default,
                seq,
                self.ctx.node_id(),
                tlvs,
            );
            sink.send(Codec::encode(&frame)?);
        }

        if self.charging.role() == Role::Consumer {
            if let Some(kw) = self.ctx.state().charging_need_kw {
                if !self.charging.has_active_consumer_session() {
                    // EVALUATE ranks ProviderTable and PlatoonTable
                    // candidates together; a direct charging provider is
                    // preferred over joining a platoon when both are known,
                    // since the former is the lighter-weight commitment.
                    let chosen = self
                        .provider_announce
                        .providers
                        .ranked_by_policy(
                            self.ctx.state().position,
                            self.ctx.state().velocity,
                            self.ctx.current_time(),
                            None,
                            self.ctx.config(),
                        )
                        .first()
                        .map(|p| p.provider_id)
                        .or_else(|| {
                            self.platoon
                                .candidates
                                .find_best_platoon(
                                    self.ctx.state().position,
                                    self.ctx.state().velocity,
                                    self.ctx.config(),
                                )
                                .map(|advert| advert.head_id)
                        });
                    if let Some(provider_id) = chosen {
                        let id = self.charging.start_consumer_session(&self.ctx, provider_id, kw);
                        match self.charging.encode_join_offer(&self.ctx, id) {
                            Ok(bytes) => sink.send(bytes),
                            Err(err) => tracing::debug!(%err, "failed to encode join offer"),
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// `RoleManager`: derives the role this node should hold given its
    /// current battery/willingness/charging-need state, applied once per
    /// tick before the layers run. `Rreh` is permanent and an active
    /// charging need always wins. A node already a `PlatoonMember` is left
    /// alone unless it develops a charging need — platoon membership
    /// itself is driven externally by `PlatoonCoordination::on_beacon`,
    /// not by this evaluation.
    fn evaluate_role(&self) -> Role {
        let current = self.charging.role();
        if current == Role::Rreh {
            return Role::Rreh;
        }
        if self.ctx.state().charging_need_kw.is_some() {
            return Role::Consumer;
        }
        if current == Role::PlatoonMember {
            return Role::PlatoonMember;
        }
        let cfg = self.ctx.config();
        if self.ctx.state().battery_percent >= cfg.ph_energy_threshold_percent
            && self.ctx.state().willingness >= cfg.ph_willingness_threshold
            && !self.charging.has_active_consumer_session()
        {
            return Role::PlatoonHead;
        }
        Role::MobileProvider
    }

    /// Decodes and routes one inbound frame. Malformed frames are logged
    /// and dropped rather than propagated, per this crate's error policy.
    pub fn receive(&mut self, bytes: &[u8], event_time: f64, sink: &mut dyn Sink) -> CoreResult<()> {
        self.ctx.update_time(event_time)?;

        let frame = match Codec::decode(bytes) {
            Ok(f) => f,
            Err(err) => {
                tracing::debug!(%err, "dropping undecodable frame");
                return Ok(());
            }
        };

        if let Err(err) = self.route(&frame, sink) {
            tracing::debug!(%err, msg_type = ?frame.header.msg_type, "dropping frame after routing error");
        }
        Ok(())
    }

    fn route(&mut self, frame: &Frame, sink: &mut dyn Sink) -> CoreResult<()> {
        match frame.header.msg_type {
            MsgType::Hello => self.neighbor_discovery.on_hello(&self.ctx, frame),
            MsgType::ProviderAnnounce => {
                if let Some(fwd) = self
                    .provider_announce
                    .on_pa(&self.ctx, &self.neighbor_discovery, frame)?
                {
                    sink.send(fwd);
                }
                Ok(())
            }
            MsgType::JoinOffer => {
                let required_energy_kw = frame
                    .find(TlvType::RequiredEnergy)
                    .filter(|t| t.value.len() == 4)
                    .map(|t| f32::from_be_bytes(t.value[0..4].try_into().unwrap()))
                    .unwrap_or(0.0);
                self.charging.on_join_offer(
                    &self.ctx,
                    frame.header.sender_id,
                    frame.header.seq_num,
                    required_energy_kw,
                );
                Ok(())
            }
            MsgType::JoinAccept => {
                let id = SessionId {
                    consumer_id: self.ctx.node_id(),
                    provider_id: frame.header.sender_id,
                    seq: frame.header.seq_num,
                };
                self.charging.on_join_accept(&self.ctx, id)?;
                let ack = self.charging.encode_ack(&self.ctx, id)?;
                sink.send(ack);
                Ok(())
            }
            MsgType::Ack => {
                let id = SessionId {
                    consumer_id: frame.header.sender_id,
                    provider_id: self.ctx.node_id(),
                    seq: frame.header.seq_num,
                };
                self.charging.on_ack(id)?;
                let ackack = self.charging.encode_ackack(&self.ctx, id)?;
                sink.send(ackack);
                Ok(())
            }
            MsgType::AckAck => {
                let id = SessionId {
                    consumer_id: self.ctx.node_id(),
                    provider_id: frame.header.sender_id,
                    seq: frame.header.seq_num,
                };
                self.charging.on_ackack(id)?;
                // If the other side of this session was advertising a
                // platoon, the handshake was this node's join procedure:
                // fold it into the formal platoon roster now that it's
                // booked.
                if let Some(advert) = self.platoon.candidates.get(id.provider_id) {
                    let platoon_id = advert.platoon_id;
                    let head_id = advert.head_id;
                    let rel_index = self
                        .ctx
                        .config()
                        .platoon_max_size
                        .saturating_sub(advert.available_slots as usize)
                        .saturating_sub(1) as u8;
                    self.platoon.join(platoon_id, head_id, rel_index);
                    self.switch_role(Role::PlatoonMember);
                }
                Ok(())
            }
            MsgType::PlatoonBeacon => {
                self.platoon.on_beacon(&self.ctx, frame);
                Ok(())
            }
            MsgType::PlatoonAnnounce => {
                if let Some(fwd) =
                    self.platoon
                        .on_announce(&self.ctx, &self.neighbor_discovery, frame)?
                {
                    sink.send(fwd);
                }
                Ok(())
            }
            MsgType::PlatoonStatus => {
                self.platoon.on_status(&self.ctx, &self.neighbor_discovery, frame);
                Ok(())
            }
            MsgType::GridStatus => {
                let key = (frame.header.sender_id, frame.header.seq_num);
                if self.grid_status_dedup.contains(key) {
                    return Ok(());
                }
                self.grid_status_dedup.insert(key);
                let previous_hop = match frame.previous_hop() {
                    Some(h) => h,
                    None => return Err(CoreError::Codec("grid status missing previous hop".into())),
                };
                if previous_hop == self.ctx.node_id() || !self.neighbor_discovery.is_mpr_active() {
                    return Ok(());
                }
                let ttl = match frame.decremented_ttl() {
                    Some(t) => t,
                    None => return Ok(()),
                };
                let mut forwarded = frame.clone();
                forwarded.header.ttl = ttl;
                forwarded.set_previous_hop(self.ctx.node_id());
                sink.send(Codec::encode(&forwarded)?);
                Ok(())
            }
        }
    }

    /// Feeds externally-simulated mobility/energy state into the node.
    /// Must be called with a monotonically non-decreasing `t`; does not
    /// itself produce outbound traffic.
    pub fn apply_mobility_and_energy(
        &mut self,
        t: f64,
        position: Position,
        velocity: Velocity,
        battery_percent: f32,
    ) -> CoreResult<()> {
        self.ctx.update_time(t)?;
        self.ctx
            .apply_mobility_and_energy(position, velocity, battery_percent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;

    struct Collector(Vec<Vec<u8>>);
    impl Sink for Collector {
        fn send(&mut self, frame: Vec<u8>) {
            self.0.push(frame);
        }
    }

    #[test]
    fn tick_emits_hello_on_first_call() {
        let mut engine = Engine::new(NodeIdentity::from_u64(1), ProtocolConfig::default(), Role::Consumer);
        let mut sink = Collector(Vec::new());
        engine.tick(0.0, &mut sink).unwrap();
        assert!(!sink.0.is_empty());
    }

    #[test]
    fn receive_rejects_time_regression_without_panicking() {
        let mut engine = Engine::new(NodeIdentity::from_u64(1), ProtocolConfig::default(), Role::Consumer);
        let mut sink = Collector(Vec::new());
        engine.tick(10.0, &mut sink).unwrap();
        let err = engine.receive(&[], 3.0, &mut sink).unwrap_err();
        assert!(matches!(err, CoreError::TimeRegression { .. }));
    }

    #[test]
    fn malformed_frame_is_dropped_not_propagated() {
        let mut engine = Engine::new(NodeIdentity::from_u64(1), ProtocolConfig::default(), Role::Consumer);
        let mut sink = Collector(Vec::new());
        engine.tick(0.0, &mut sink).unwrap();
        assert!(engine.receive(&[0xFF, 0xFF], 1.0, &mut sink).is_ok());
    }
}
