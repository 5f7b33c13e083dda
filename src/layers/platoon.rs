use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::codec::{Codec, Frame, MsgType, RawTlv, TlvType};
use crate::config::ProtocolConfig;
use crate::context::{Context, Position, Velocity};
use crate::error::CoreResult;
use crate::identity::NodeIdentity;
use crate::layers::neighbor_discovery::NeighborDiscovery;
use crate::tables::{DedupCache, PlatoonAdvert, PlatoonTable};

/// A member of a platoon this node belongs to (including, for the head
/// itself, an entry for the head). Distinct from `PlatoonAdvert` in
/// `tables::platoon_table`, which describes *other* platoons this node
/// could join.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatoonMember {
    pub id: NodeIdentity,
    pub position: Position,
    pub velocity: Velocity,
    pub battery_percent: f32,
    pub surplus_energy_kw: f32,
    pub willingness: f32,
    pub last_beacon: f64,
}

/// Directed, weighted intra-platoon graph: an edge from `a` to `b` exists
/// iff the pair is within `edge_max_range_m` and the resulting transfer
/// efficiency meets `edge_min_efficiency`.
#[derive(Debug, Default, Clone)]
pub struct EdgeGraph {
    adjacency: Vec<Vec<(usize, f32)>>,
}

fn efficiency(distance: f32, cfg: &ProtocolConfig) -> f32 {
    1.0 / (1.0 + cfg.edge_efficiency_scale * distance * distance)
}

/// Mean head-to-member transfer efficiency, advertised in PLATOON_ANNOUNCE
/// as the `formation_efficiency` EVALUATE factor. `1.0` for a headless or
/// member-less platoon (nothing to drag the score down).
fn mean_formation_efficiency(head: &PlatoonMember, members: &[PlatoonMember], cfg: &ProtocolConfig) -> f32 {
    if members.is_empty() {
        return 1.0;
    }
    let sum: f32 = members
        .iter()
        .map(|m| efficiency(head.position.distance_to(&m.position), cfg))
        .sum();
    sum / members.len() as f32
}

impl EdgeGraph {
    pub fn build(members: &[PlatoonMember], cfg: &ProtocolConfig) -> Self {
        let n = members.len();
        let mut adjacency = vec![Vec::new(); n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let distance = members[i].position.distance_to(&members[j].position);
                if distance > cfg.edge_max_range_m {
                    continue;
                }
                let eff = efficiency(distance, cfg);
                if eff < cfg.edge_min_efficiency {
                    continue;
                }
                let transfer_time = if eff > f32::EPSILON { 1.0 / eff } else { f32::MAX };
                let weight = 0.5 * distance + 0.3 * (1.0 - eff) + 0.2 * transfer_time;
                adjacency[i].push((j, weight));
            }
        }
        Self { adjacency }
    }

    pub fn neighbors_of(&self, idx: usize) -> &[(usize, f32)] {
        &self.adjacency[idx]
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }
}

#[derive(PartialEq)]
struct HeapEntry {
    cost: f32,
    node: usize,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shortest-path cost and predecessor from `source` to every other member,
/// used to route surplus energy from a provider-capable member to a
/// deficit member along the cheapest chain of edges.
pub fn dijkstra_energy_paths(graph: &EdgeGraph, source: usize) -> (Vec<f32>, Vec<Option<usize>>) {
    let n = graph.node_count();
    let mut dist = vec![f32::INFINITY; n];
    let mut prev = vec![None; n];
    let mut heap = BinaryHeap::new();
    dist[source] = 0.0;
    heap.push(HeapEntry {
        cost: 0.0,
        node: source,
    });
    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if cost > dist[node] {
            continue;
        }
        for &(next, weight) in graph.neighbors_of(node) {
            let candidate = cost + weight;
            if candidate < dist[next] {
                dist[next] = candidate;
                prev[next] = Some(node);
                heap.push(HeapEntry {
                    cost: candidate,
                    node: next,
                });
            }
        }
    }
    (dist, prev)
}

/// Picks, among members with `surplus_energy_kw > 0`, the cheapest path to
/// the member at `deficit_idx`. Returns the path as a sequence of member
/// indices from source to destination, inclusive.
pub fn cheapest_surplus_path(
    graph: &EdgeGraph,
    members: &[PlatoonMember],
    deficit_idx: usize,
) -> Option<Vec<usize>> {
    let mut best: Option<(f32, usize, Vec<Option<usize>>)> = None;
    for (idx, member) in members.iter().enumerate() {
        if member.surplus_energy_kw <= 0.0 || idx == deficit_idx {
            continue;
        }
        let (dist, prev) = dijkstra_energy_paths(graph, idx);
        if !dist[deficit_idx].is_finite() {
            continue;
        }
        let better = match &best {
            None => true,
            Some((best_cost, best_idx, _)) => {
                dist[deficit_idx] < *best_cost
                    || (dist[deficit_idx] == *best_cost && idx < *best_idx)
            }
        };
        if better {
            best = Some((dist[deficit_idx], idx, prev));
        }
    }
    let (_, source, prev) = best?;
    let mut path = vec![deficit_idx];
    let mut cur = deficit_idx;
    while cur != source {
        cur = prev[cur]?;
        path.push(cur);
    }
    path.reverse();
    Some(path)
}

/// Advisory target position for each member relative to the head, a
/// straight-line formation spaced `spacing_m` apart along the head's
/// current heading. Purely advisory — this crate never actuates motion.
pub fn compute_optimal_formation(
    head: &PlatoonMember,
    members: &[PlatoonMember],
    spacing_m: f32,
) -> Vec<(NodeIdentity, Position)> {
    let heading = head.velocity.heading();
    let (dx, dy) = (heading.cos(), heading.sin());
    members
        .iter()
        .enumerate()
        .map(|(rank, m)| {
            let offset = spacing_m * (rank as f32 + 1.0);
            let pos = Position {
                x: head.position.x - dx * offset,
                y: head.position.y - dy * offset,
            };
            (m.id, pos)
        })
        .collect()
}

/// Layer D: the platoon this node currently belongs to (if any), its
/// intra-platoon edge graph, beaconing cadence, and inter-platoon
/// discovery table.
pub struct PlatoonCoordination {
    pub candidates: PlatoonTable,
    platoon_id: Option<NodeIdentity>,
    head_id: Option<NodeIdentity>,
    /// This node's own rank among members, assigned at `join` time. `None`
    /// for the head itself (head has no rel index relative to itself).
    self_rel_index: Option<u8>,
    /// Head's last-advertised position/velocity, learned from its own
    /// PLATOON_BEACON. Used by a plain member to estimate its own
    /// `receive_rate` in PLATOON_STATUS.
    head_position: Option<Position>,
    head_velocity: Option<Velocity>,
    members: Vec<PlatoonMember>,
    graph: EdgeGraph,
    last_beacon_sent: Option<f64>,
    last_announce_sent: Option<f64>,
    last_head_beacon_heard: Option<f64>,
    safe_mode: bool,
    seq: u32,
    announce_dedup: DedupCache,
}

impl PlatoonCoordination {
    pub fn new() -> Self {
        Self {
            candidates: PlatoonTable::new(),
            platoon_id: None,
            head_id: None,
            self_rel_index: None,
            head_position: None,
            head_velocity: None,
            members: Vec::new(),
            graph: EdgeGraph::default(),
            last_beacon_sent: None,
            last_announce_sent: None,
            last_head_beacon_heard: None,
            safe_mode: false,
            seq: 0,
            announce_dedup: DedupCache::new(1024),
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn is_member(&self) -> bool {
        self.platoon_id.is_some()
    }

    pub fn head_id(&self) -> Option<NodeIdentity> {
        self.head_id
    }

    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// Joins `platoon_id` as a plain member at `rel_index`, called once the
    /// charging-coordination handshake against the head completes with
    /// ACKACK. `rel_index` is advisory bookkeeping only; the head is the
    /// authority on formation and never consults a member's own view of it.
    pub fn join(&mut self, platoon_id: NodeIdentity, head_id: NodeIdentity, rel_index: u8) {
        self.platoon_id = Some(platoon_id);
        self.head_id = Some(head_id);
        self.self_rel_index = Some(rel_index);
        self.safe_mode = false;
    }

    pub fn leave(&mut self) {
        self.platoon_id = None;
        self.head_id = None;
        self.self_rel_index = None;
        self.head_position = None;
        self.head_velocity = None;
        self.members.clear();
        self.graph = EdgeGraph::default();
        self.safe_mode = false;
    }

    pub fn rebuild_graph(&mut self, cfg: &ProtocolConfig) {
        self.graph = EdgeGraph::build(&self.members, cfg);
    }

    pub fn graph(&self) -> &EdgeGraph {
        &self.graph
    }

    pub fn members(&self) -> &[PlatoonMember] {
        &self.members
    }

    pub fn upsert_member(&mut self, member: PlatoonMember) {
        if let Some(existing) = self.members.iter_mut().find(|m| m.id == member.id) {
            *existing = member;
        } else {
            self.members.push(member);
        }
    }

    /// Called once per `tick`. Emits a PLATOON_BEACON if a member of a
    /// platoon and `beacon_interval` has elapsed (checking for beacon-loss
    /// from the head first), and, if this node is the head, a
    /// PLATOON_ANNOUNCE once `platoon_announce_interval` has elapsed.
    pub fn on_tick(&mut self, ctx: &mut Context) -> CoreResult<Vec<Vec<u8>>> {
        if !self.is_member() {
            return Ok(Vec::new());
        }
        let now = ctx.current_time();
        let cfg = ctx.config().clone();
        let mut out = Vec::new();

        let loss_threshold = cfg.beacon_interval * 3.0;
        if self.head_id != Some(ctx.node_id()) {
            let silent_for = self
                .last_head_beacon_heard
                .map(|last| now - last)
                .unwrap_or(0.0);
            if silent_for > loss_threshold {
                if !self.safe_mode {
                    self.safe_mode = true;
                    tracing::warn!("platoon head beacon lost, entering safe mode");
                } else if silent_for > loss_threshold * 2 {
                    tracing::warn!("platoon head unreachable too long, leaving platoon");
                    self.leave();
                    return Ok(out);
                }
            }
        }

        let beacon_due = match self.last_beacon_sent {
            None => true,
            Some(last) => now - last >= cfg.beacon_interval,
        };
        if beacon_due {
            self.last_beacon_sent = Some(now);
            let seq = self.next_seq();
            if self.head_id == Some(ctx.node_id()) {
                self.rebuild_graph(&cfg);
                let head_member = PlatoonMember {
                    id: ctx.node_id(),
                    position: ctx.state().position,
                    velocity: ctx.state().velocity,
                    battery_percent: ctx.state().battery_percent,
                    surplus_energy_kw: ctx.state().shareable_energy_kw,
                    willingness: ctx.state().willingness,
                    last_beacon: now,
                };
                let formation = compute_optimal_formation(&head_member, &self.members, cfg.formation_spacing_m);

                if let Some(deficit_idx) = self
                    .members
                    .iter()
                    .position(|m| m.battery_percent < cfg.ph_handoff_battery_threshold_percent)
                {
                    if let Some(path) = cheapest_surplus_path(&self.graph, &self.members, deficit_idx) {
                        tracing::debug!(
                            deficit = %self.members[deficit_idx].id,
                            hops = path.len(),
                            "surplus energy routing path available"
                        );
                    }
                }

                let mut tlvs = vec![
                    RawTlv {
                        type_code: TlvType::PlatoonId as u8,
                        value: self.platoon_id.unwrap().as_bytes().to_vec(),
                    },
                    RawTlv {
                        type_code: TlvType::Position as u8,
                        value: {
                            let mut v = ctx.state().position.x.to_be_bytes().to_vec();
                            v.extend_from_slice(&ctx.state().position.y.to_be_bytes());
                            v
                        },
                    },
                    RawTlv {
                        type_code: TlvType::Velocity as u8,
                        value: {
                            let mut v = ctx.state().velocity.vx.to_be_bytes().to_vec();
                            v.extend_from_slice(&ctx.state().velocity.vy.to_be_bytes());
                            v
                        },
                    },
                    RawTlv {
                        type_code: TlvType::AvailableSlots as u8,
                        value: vec![cfg
                            .platoon_max_size
                            .saturating_sub(self.members.len() + 1) as u8],
                    },
                ];
                for (id, pos) in formation {
                    let mut value = id.as_bytes().to_vec();
                    value.extend_from_slice(&pos.x.to_be_bytes());
                    value.extend_from_slice(&pos.y.to_be_bytes());
                    tlvs.push(RawTlv {
                        type_code: TlvType::FormationPositions as u8,
                        value,
                    });
                }
                let frame = Frame::new(MsgType::PlatoonBeacon, 1, seq, ctx.node_id(), tlvs);
                out.push(Codec::encode(&frame)?);
            } else {
                // Plain member: PLATOON_STATUS instead of PLATOON_BEACON,
                // which is reserved for the head's own roster broadcast.
                let receive_rate = self
                    .head_position
                    .map(|head_pos| efficiency(ctx.state().position.distance_to(&head_pos), &cfg))
                    .unwrap_or(0.0);
                let tlvs = vec![
                    RawTlv {
                        type_code: TlvType::BatteryPct as u8,
                        value: vec![ctx.state().battery_percent.clamp(0.0, 255.0) as u8],
                    },
                    RawTlv {
                        type_code: TlvType::RelIndex as u8,
                        value: vec![self.self_rel_index.unwrap_or(0)],
                    },
                    RawTlv {
                        type_code: TlvType::ReceiveRate as u8,
                        value: receive_rate.to_be_bytes().to_vec(),
                    },
                ];
                let frame = Frame::new(MsgType::PlatoonStatus, 1, seq, ctx.node_id(), tlvs);
                out.push(Codec::encode(&frame)?);
            }
        }

        if self.head_id == Some(ctx.node_id()) {
            let announce_due = match self.last_announce_sent {
                None => true,
                Some(last) => now - last >= cfg.platoon_announce_interval,
            };
            if announce_due {
                self.last_announce_sent = Some(now);
                let seq = self.next_seq();
                self.announce_dedup.insert((ctx.node_id(), seq));
                let open_slots = cfg
                    .platoon_max_size
                    .saturating_sub(self.members.len() + 1) as u8;
                let head_member = PlatoonMember {
                    id: ctx.node_id(),
                    position: ctx.state().position,
                    velocity: ctx.state().velocity,
                    battery_percent: ctx.state().battery_percent,
                    surplus_energy_kw: ctx.state().shareable_energy_kw,
                    willingness: ctx.state().willingness,
                    last_beacon: now,
                };
                let formation_efficiency = mean_formation_efficiency(&head_member, &self.members, &cfg);
                let mut tlvs = vec![
                    RawTlv {
                        type_code: TlvType::PlatoonId as u8,
                        value: self.platoon_id.unwrap().as_bytes().to_vec(),
                    },
                    RawTlv {
                        type_code: TlvType::Position as u8,
                        value: {
                            let mut v = ctx.state().position.x.to_be_bytes().to_vec();
                            v.extend_from_slice(&ctx.state().position.y.to_be_bytes());
                            v
                        },
                    },
                    RawTlv {
                        type_code: TlvType::Velocity as u8,
                        value: {
                            let mut v = ctx.state().velocity.vx.to_be_bytes().to_vec();
                            v.extend_from_slice(&ctx.state().velocity.vy.to_be_bytes());
                            v
                        },
                    },
                    RawTlv {
                        type_code: TlvType::AvailableSlots as u8,
                        value: vec![open_slots],
                    },
                    RawTlv {
                        type_code: TlvType::SurplusEnergy as u8,
                        value: ctx.state().shareable_energy_kw.to_be_bytes().to_vec(),
                    },
                    RawTlv {
                        type_code: TlvType::FormationEfficiency as u8,
                        value: formation_efficiency.to_be_bytes().to_vec(),
                    },
                    RawTlv {
                        type_code: TlvType::PreviousHop as u8,
                        value: ctx.node_id().as_bytes().to_vec(),
                    },
                ];
                if let Some(destination) = ctx.state().destination {
                    tlvs.push(RawTlv {
                        type_code: TlvType::Destination as u8,
                        value: {
                            let mut v = destination.x.to_be_bytes().to_vec();
                            v.extend_from_slice(&destination.y.to_be_bytes());
                            v
                        },
                    });
                }
                let frame = Frame::new(MsgType::PlatoonAnnounce, cfg.pa_ttl_default, seq, ctx.node_id(), tlvs);
                out.push(Codec::encode(&frame)?);
            }
        }

        Ok(out)
    }

    /// Processes an inbound PLATOON_BEACON. A handoff beacon (carrying a
    /// HEAD_ID TLV) from the current head updates this node's view of who
    /// leads the platoon and nothing else; an ordinary beacon updates the
    /// cached head position/velocity used for `receive_rate` estimation.
    pub fn on_beacon(&mut self, ctx: &Context, frame: &Frame) {
        if let Some(tlv) = frame.find(TlvType::HeadId) {
            if Some(frame.header.sender_id) == self.head_id && tlv.value.len() == 6 {
                let mut b = [0u8; 6];
                b.copy_from_slice(&tlv.value);
                let new_head = NodeIdentity::new(b);
                self.head_id = Some(new_head);
                self.last_head_beacon_heard = Some(ctx.current_time());
                self.safe_mode = false;
                tracing::warn!(new_head = %new_head, "platoon head handoff received");
            }
            return;
        }
        if Some(frame.header.sender_id) == self.head_id {
            self.last_head_beacon_heard = Some(ctx.current_time());
            self.safe_mode = false;
            if let Some(tlv) = frame.find(TlvType::Position) {
                if tlv.value.len() == 8 {
                    let x = f32::from_be_bytes(tlv.value[0..4].try_into().unwrap());
                    let y = f32::from_be_bytes(tlv.value[4..8].try_into().unwrap());
                    self.head_position = Some(Position { x, y });
                }
            }
            if let Some(tlv) = frame.find(TlvType::Velocity) {
                if tlv.value.len() == 8 {
                    let vx = f32::from_be_bytes(tlv.value[0..4].try_into().unwrap());
                    let vy = f32::from_be_bytes(tlv.value[4..8].try_into().unwrap());
                    self.head_velocity = Some(Velocity { vx, vy });
                }
            }
        }
    }

    /// Processes an inbound PLATOON_STATUS. Only the head maintains a
    /// roster, so this is a no-op everywhere else. The member's current
    /// position/velocity/willingness come from the neighbor table, since
    /// PLATOON_STATUS itself carries only battery/rank/link-quality —
    /// platoon members are expected to be within ordinary HELLO range of
    /// the head.
    pub fn on_status(&mut self, ctx: &Context, neighbors: &NeighborDiscovery, frame: &Frame) {
        if self.head_id != Some(ctx.node_id()) {
            return;
        }
        let sender = frame.header.sender_id;
        let battery_percent = frame
            .find(TlvType::BatteryPct)
            .and_then(|t| t.value.first())
            .map(|b| *b as f32)
            .unwrap_or(0.0);
        let (position, velocity, willingness) = neighbors
            .table
            .get(sender)
            .map(|n| (n.position, n.velocity, n.willingness))
            .unwrap_or_default();
        self.upsert_member(PlatoonMember {
            id: sender,
            position,
            velocity,
            battery_percent,
            surplus_energy_kw: 0.0,
            willingness,
            last_beacon: ctx.current_time(),
        });
        self.rebuild_graph(ctx.config());
    }

    /// Processes an inbound PLATOON_ANNOUNCE: records the advertising
    /// platoon as a join candidate and, if this node is itself MPR-active,
    /// returns a re-encoded frame to forward.
    pub fn on_announce(
        &mut self,
        ctx: &Context,
        neighbors: &NeighborDiscovery,
        frame: &Frame,
    ) -> CoreResult<Option<Vec<u8>>> {
        let key = (frame.header.sender_id, frame.header.seq_num);
        if self.announce_dedup.contains(key) {
            return Ok(None);
        }
        self.announce_dedup.insert(key);

        if let (Some(pos_tlv), Some(slots_tlv)) = (
            frame.find(TlvType::Position),
            frame.find(TlvType::AvailableSlots),
        ) {
            if pos_tlv.value.len() == 8 {
                let x = f32::from_be_bytes(pos_tlv.value[0..4].try_into().unwrap());
                let y = f32::from_be_bytes(pos_tlv.value[4..8].try_into().unwrap());
                let (vx, vy) = frame
                    .find(TlvType::Velocity)
                    .filter(|t| t.value.len() == 8)
                    .map(|t| {
                        (
                            f32::from_be_bytes(t.value[0..4].try_into().unwrap()),
                            f32::from_be_bytes(t.value[4..8].try_into().unwrap()),
                        )
                    })
                    .unwrap_or((0.0, 0.0));
                let platoon_id = frame
                    .find(TlvType::PlatoonId)
                    .filter(|t| t.value.len() == 6)
                    .map(|t| {
                        let mut b = [0u8; 6];
                        b.copy_from_slice(&t.value);
                        NodeIdentity::new(b)
                    })
                    .unwrap_or(frame.header.sender_id);
                let destination = frame
                    .find(TlvType::Destination)
                    .filter(|t| t.value.len() == 8)
                    .map(|t| Position {
                        x: f32::from_be_bytes(t.value[0..4].try_into().unwrap()),
                        y: f32::from_be_bytes(t.value[4..8].try_into().unwrap()),
                    });
                let surplus_energy_kw = frame
                    .find(TlvType::SurplusEnergy)
                    .and_then(|t| t.value.as_slice().try_into().ok())
                    .map(f32::from_be_bytes)
                    .unwrap_or(0.0);
                let formation_efficiency = frame
                    .find(TlvType::FormationEfficiency)
                    .and_then(|t| t.value.as_slice().try_into().ok())
                    .map(f32::from_be_bytes)
                    .unwrap_or(0.0);
                self.candidates.upsert(PlatoonAdvert {
                    platoon_id,
                    head_id: frame.header.sender_id,
                    head_position: Position { x, y },
                    head_velocity: Velocity { vx, vy },
                    destination,
                    available_slots: slots_tlv.value.first().copied().unwrap_or(0),
                    surplus_energy_kw,
                    formation_efficiency,
                    last_seen: ctx.current_time(),
                });
            }
        }

        let previous_hop = match frame.previous_hop() {
            Some(h) => h,
            None => return Ok(None),
        };
        if previous_hop == ctx.node_id() || !neighbors.is_mpr_active() {
            return Ok(None);
        }
        let ttl = match frame.decremented_ttl() {
            Some(t) => t,
            None => return Ok(None),
        };
        let mut forwarded = frame.clone();
        forwarded.header.ttl = ttl;
        forwarded.set_previous_hop(ctx.node_id());
        Ok(Some(Codec::encode(&forwarded)?))
    }

    /// Deterministic platoon-head handoff: among current members, the one
    /// with the highest willingness (tie-broken by lowest identity)
    /// becomes the new head.
    pub fn elect_new_head(&self) -> Option<NodeIdentity> {
        self.members
            .iter()
            .max_by(|a, b| {
                a.willingness
                    .partial_cmp(&b.willingness)
                    .unwrap_or(Ordering::Equal)
                    .then(b.id.cmp(&a.id))
            })
            .map(|m| m.id)
    }

    /// Called once per `tick` after the session/grid-state housekeeping.
    /// Triggers a head handoff when this node is the head and its battery
    /// has dropped to `ph_handoff_battery_threshold_percent`: elects the
    /// highest-willingness member, broadcasts a distinguished PLATOON_BEACON
    /// (HEAD_ID TLV only, no telemetry) announcing the promotion, and
    /// updates this node's own view of who leads the platoon. Returns the
    /// elected identity and the encoded beacon so the caller can switch its
    /// own role accordingly.
    pub fn maybe_handoff(&mut self, ctx: &mut Context) -> CoreResult<Option<(NodeIdentity, Vec<u8>)>> {
        if self.head_id != Some(ctx.node_id()) {
            return Ok(None);
        }
        if ctx.state().battery_percent > ctx.config().ph_handoff_battery_threshold_percent {
            return Ok(None);
        }
        let Some(new_head) = self.elect_new_head() else {
            return Ok(None);
        };
        let seq = self.next_seq();
        let tlvs = vec![
            RawTlv {
                type_code: TlvType::PlatoonId as u8,
                value: self.platoon_id.unwrap().as_bytes().to_vec(),
            },
            RawTlv {
                type_code: TlvType::HeadId as u8,
                value: new_head.as_bytes().to_vec(),
            },
        ];
        let frame = Frame::new(MsgType::PlatoonBeacon, 1, seq, ctx.node_id(), tlvs);
        let bytes = Codec::encode(&frame)?;
        tracing::warn!(new_head = %new_head, "platoon head handoff triggered by low battery");
        self.head_id = Some(new_head);
        Ok(Some((new_head, bytes)))
    }
}

impl Default for PlatoonCoordination {
    fn default() -> Self {
        Self::new()
    }
}
