use std::collections::HashSet;

use crate::codec::{Codec, Frame, MsgType, RawTlv, TlvType};
use crate::context::{Context, Position, Velocity};
use crate::error::CoreResult;
use crate::identity::NodeIdentity;
use crate::tables::{NeighborEntry, NeighborTable};

fn encode_position(position: Position) -> Vec<u8> {
    let mut v = Vec::with_capacity(8);
    v.extend_from_slice(&position.x.to_be_bytes());
    v.extend_from_slice(&position.y.to_be_bytes());
    v
}

fn decode_position(bytes: &[u8]) -> Option<Position> {
    if bytes.len() != 8 {
        return None;
    }
    let x = f32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let y = f32::from_be_bytes(bytes[4..8].try_into().ok()?);
    Some(Position { x, y })
}

fn encode_velocity(velocity: Velocity) -> Vec<u8> {
    let mut v = Vec::with_capacity(8);
    v.extend_from_slice(&velocity.vx.to_be_bytes());
    v.extend_from_slice(&velocity.vy.to_be_bytes());
    v
}

fn decode_velocity(bytes: &[u8]) -> Option<Velocity> {
    if bytes.len() != 8 {
        return None;
    }
    let vx = f32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let vy = f32::from_be_bytes(bytes[4..8].try_into().ok()?);
    Some(Velocity { vx, vy })
}

/// Layer A: HELLO emission/reception, one-hop and two-hop neighbor
/// bookkeeping, and MPR recomputation.
///
/// Each HELLO's NEIGHBOR_LIST TLV carries, per advertised one-hop neighbor,
/// a 7-byte entry: the neighbor's 48-bit identity followed by a one-byte
/// flag set when the sender has elected that neighbor as one of its own
/// MPRs. A node forwarding a PA/beacon it received therefore only needs
/// its own `selected_as_mpr_by` set (built from that flag) to know whether
/// the previous hop expects it to relay on its behalf.
#[derive(Debug, Default)]
pub struct NeighborDiscovery {
    pub table: NeighborTable,
    selected_as_mpr_by: HashSet<NodeIdentity>,
    last_hello_sent: Option<f64>,
    seq: u32,
}

impl NeighborDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// Called once per `tick`. Emits a HELLO if `hello_interval` has
    /// elapsed since the last one, and prunes neighbors that have gone
    /// silent for longer than `neighbor_timeout`.
    pub fn on_tick(&mut self, ctx: &mut Context) -> CoreResult<Option<Vec<u8>>> {
        let now = ctx.current_time();
        self.table.prune_stale(now, ctx.config().neighbor_timeout);

        let due = match self.last_hello_sent {
            None => true,
            Some(last) => now - last >= ctx.config().hello_interval,
        };
        if !due {
            return Ok(None);
        }
        self.last_hello_sent = Some(now);
        let seq = self.next_seq();

        let mut tlvs = Vec::new();
        tlvs.push(RawTlv {
            type_code: TlvType::Position as u8,
            value: encode_position(ctx.state().position),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::Velocity as u8,
            value: encode_velocity(ctx.state().velocity),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::BatteryPct as u8,
            value: vec![ctx.state().battery_percent.clamp(0.0, 255.0) as u8],
        });
        tlvs.push(RawTlv {
            type_code: TlvType::Willingness as u8,
            value: (ctx.state().willingness.clamp(0.0, 1.0) * 255.0)
                .to_be_bytes()
                .to_vec(),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::ProviderFlag as u8,
            value: vec![ctx.state().provider_flag as u8],
        });
        tlvs.push(RawTlv {
            type_code: TlvType::Etx as u8,
            value: ctx.state().link_etx.to_be_bytes().to_vec(),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::JitterMs as u8,
            value: ctx.state().link_jitter_ms.to_be_bytes().to_vec(),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::LaneWeight as u8,
            value: ctx.state().lane_weight.to_be_bytes().to_vec(),
        });
        tlvs.push(RawTlv {
            type_code: TlvType::StabilityScore as u8,
            value: ctx.state().stability_score.to_be_bytes().to_vec(),
        });
        for id in self.table.neighbor_ids().copied().collect::<Vec<_>>() {
            let is_mpr = self.table.mpr_set().contains(id);
            let mut value = id.as_bytes().to_vec();
            value.push(is_mpr as u8);
            tlvs.push(RawTlv {
                type_code: TlvType::NeighborList as u8,
                value,
            });
        }

        let frame = Frame::new(MsgType::Hello, 1, seq, ctx.node_id(), tlvs);
        Ok(Some(Codec::encode(&frame)?))
    }

    /// Called when a HELLO frame arrives. Updates the sender's neighbor
    /// entry, folds its advertised neighbor list into the local two-hop
    /// topology, records whether the sender has elected this node as one
    /// of its MPRs, then recomputes the local MPR set.
    pub fn on_hello(&mut self, ctx: &Context, frame: &Frame) -> CoreResult<()> {
        let sender = frame.header.sender_id;
        let position = frame
            .find(TlvType::Position)
            .and_then(|t| decode_position(&t.value))
            .unwrap_or_default();
        let velocity = frame
            .find(TlvType::Velocity)
            .and_then(|t| decode_velocity(&t.value))
            .unwrap_or_default();
        let battery_percent = frame
            .find(TlvType::BatteryPct)
            .and_then(|t| t.value.first())
            .map(|b| *b as f32)
            .unwrap_or(0.0);
        let willingness = frame
            .find(TlvType::Willingness)
            .and_then(|t| t.value.as_slice().try_into().ok())
            .map(|b: [u8; 4]| f32::from_be_bytes(b) / 255.0)
            .unwrap_or(0.0);
        let provider_flag = frame
            .find(TlvType::ProviderFlag)
            .and_then(|t| t.value.first())
            .map(|b| *b != 0)
            .unwrap_or(false);
        let etx = frame
            .find(TlvType::Etx)
            .and_then(|t| t.value.as_slice().try_into().ok())
            .map(f32::from_be_bytes)
            .unwrap_or(1.0);
        let jitter_ms = frame
            .find(TlvType::JitterMs)
            .and_then(|t| t.value.as_slice().try_into().ok())
            .map(f32::from_be_bytes)
            .unwrap_or(0.0);
        let lane_weight = frame
            .find(TlvType::LaneWeight)
            .and_then(|t| t.value.as_slice().try_into().ok())
            .map(f32::from_be_bytes)
            .unwrap_or(0.0);
        let stability_score = frame
            .find(TlvType::StabilityScore)
            .and_then(|t| t.value.as_slice().try_into().ok())
            .map(f32::from_be_bytes)
            .unwrap_or(1.0);

        let entry = NeighborEntry {
            id: sender,
            position,
            velocity,
            battery_percent,
            willingness,
            provider_flag,
            etx,
            jitter_ms,
            lane_weight,
            stability_score,
            last_heard: ctx.current_time(),
            is_mpr: false,
        };
        self.table.upsert(entry);
        self.table.two_hop_mut().clear_via(sender);

        let mut sender_selected_us = false;
        for tlv in frame.find_all(TlvType::NeighborList) {
            if tlv.value.len() != 7 {
                continue;
            }
            let mut b = [0u8; 6];
            b.copy_from_slice(&tlv.value[..6]);
            let listed = NodeIdentity::new(b);
            let flagged_mpr = tlv.value[6] != 0;
            if listed == ctx.node_id() {
                sender_selected_us = flagged_mpr;
            } else {
                self.table.two_hop_mut().record(sender, listed);
            }
        }
        if sender_selected_us {
            self.selected_as_mpr_by.insert(sender);
        } else {
            self.selected_as_mpr_by.remove(&sender);
        }

        self.table.recompute_mpr(ctx.config());
        tracing::debug!(neighbor = %sender, mpr_count = self.table.mpr_set().len(), "neighbor table updated");
        Ok(())
    }

    pub fn is_mpr(&self, id: NodeIdentity) -> bool {
        self.table.mpr_set().contains(id)
    }

    /// Whether `by` has elected this node as one of its MPRs.
    pub fn selected_as_mpr_by(&self, by: NodeIdentity) -> bool {
        self.selected_as_mpr_by.contains(&by)
    }

    /// A node is MPR-active iff at least one one-hop neighbor has elected
    /// it as an MPR. MPR-active status, not which neighbor conferred it,
    /// gates PA/PLATOON_ANNOUNCE/GRID_STATUS origination and forwarding.
    pub fn is_mpr_active(&self) -> bool {
        !self.selected_as_mpr_by.is_empty()
    }

    pub fn forget_neighbor(&mut self, id: NodeIdentity) {
        self.selected_as_mpr_by.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::context::Context;

    fn ctx() -> Context {
        Context::new(NodeIdentity::from_u64(1), ProtocolConfig::default())
    }

    #[test]
    fn hello_is_emitted_on_first_tick_then_respects_interval() {
        let mut ctx = ctx();
        let mut layer = NeighborDiscovery::new();
        ctx.update_time(0.0).unwrap();
        assert!(layer.on_tick(&mut ctx).unwrap().is_some());
        ctx.update_time(0.5).unwrap();
        assert!(layer.on_tick(&mut ctx).unwrap().is_none());
        ctx.update_time(1.0).unwrap();
        assert!(layer.on_tick(&mut ctx).unwrap().is_some());
    }

    #[test]
    fn hello_from_neighbor_registers_it() {
        let ctx = ctx();
        let mut layer = NeighborDiscovery::new();
        let frame = Frame::new(MsgType::Hello, 1, 1, NodeIdentity::from_u64(2), vec![]);
        layer.on_hello(&ctx, &frame).unwrap();
        assert!(layer.table.get(NodeIdentity::from_u64(2)).is_some());
    }

    #[test]
    fn mpr_selector_flag_is_tracked() {
        let ctx = ctx();
        let mut layer = NeighborDiscovery::new();
        let mut value = ctx.node_id().as_bytes().to_vec();
        value.push(1);
        let tlvs = vec![RawTlv {
            type_code: TlvType::NeighborList as u8,
            value,
        }];
        let frame = Frame::new(MsgType::Hello, 1, 1, NodeIdentity::from_u64(2), tlvs);
        layer.on_hello(&ctx, &frame).unwrap();
        assert!(layer.selected_as_mpr_by(NodeIdentity::from_u64(2)));
    }
}
