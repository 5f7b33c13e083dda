use std::collections::{HashMap, HashSet};

use crate::config::ProtocolConfig;
use crate::context::{Position, Velocity};
use crate::identity::NodeIdentity;

/// A directly-heard neighbor. `qos_rank` folds link/vehicle quality signals
/// (willingness, battery, advertised as-a-provider status, link ETX/jitter,
/// relative speed, lane congestion, historical stability) into one scalar
/// used only to break ties during MPR selection — never to decide
/// reachability itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborEntry {
    pub id: NodeIdentity,
    pub position: Position,
    pub velocity: Velocity,
    pub battery_percent: f32,
    pub willingness: f32,
    pub provider_flag: bool,
    /// Estimated transmission count (expected transmission count) on the
    /// link to this neighbor. Lower is a better link.
    pub etx: f32,
    /// Inter-arrival jitter of this neighbor's HELLOs, milliseconds. Lower
    /// is a more stable link.
    pub jitter_ms: f32,
    /// Congestion weight of the lane this neighbor currently occupies.
    /// Lower means less congested.
    pub lane_weight: f32,
    /// Historical link-stability score in `[0, 1]`, higher meaning the
    /// neighbor has stayed in range consistently.
    pub stability_score: f32,
    pub last_heard: f64,
    pub is_mpr: bool,
}

impl NeighborEntry {
    /// Higher is a more attractive MPR tie-break candidate. Deterministic
    /// function of fields carried on the wire — no randomness, matching
    /// the crate-wide determinism requirement. Weights are exposed on
    /// `ProtocolConfig` rather than hardcoded.
    pub fn qos_rank(&self, cfg: &ProtocolConfig) -> f32 {
        let battery = (self.battery_percent / 100.0).clamp(0.0, 1.0);
        let provider_bonus = if self.provider_flag { 1.0 } else { 0.0 };
        let etx_term = 1.0 / (1.0 + self.etx.max(0.0));
        let jitter_term = 1.0 / (1.0 + self.jitter_ms.max(0.0) / 100.0);
        let speed_term = 1.0 / (1.0 + self.velocity.speed().max(0.0));
        let lane_term = 1.0 / (1.0 + self.lane_weight.max(0.0));
        let stability = self.stability_score.clamp(0.0, 1.0);

        cfg.qos_weight_willingness * self.willingness.clamp(0.0, 1.0)
            + cfg.qos_weight_battery * battery
            + cfg.qos_weight_provider * provider_bonus
            + cfg.qos_weight_etx * etx_term
            + cfg.qos_weight_jitter * jitter_term
            + cfg.qos_weight_speed * speed_term
            + cfg.qos_weight_lane * lane_term
            + cfg.qos_weight_stability * stability
    }
}

/// Maps each two-hop neighbor to the set of one-hop neighbors that can
/// reach it — the structure MPR selection covers against.
#[derive(Debug, Default, Clone)]
pub struct TwoHopSet {
    reachable_via: HashMap<NodeIdentity, HashSet<NodeIdentity>>,
}

impl TwoHopSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, one_hop: NodeIdentity, two_hop: NodeIdentity) {
        self.reachable_via.entry(two_hop).or_default().insert(one_hop);
    }

    pub fn clear_via(&mut self, one_hop: NodeIdentity) {
        self.reachable_via.retain(|_, via| {
            via.remove(&one_hop);
            !via.is_empty()
        });
    }

    pub fn two_hop_neighbors(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.reachable_via.keys()
    }

    pub fn reachers_of(&self, two_hop: NodeIdentity) -> Option<&HashSet<NodeIdentity>> {
        self.reachable_via.get(&two_hop)
    }
}

/// The locally-computed Multi-Point Relay set: the minimal subset of
/// one-hop neighbors required to reach every two-hop neighbor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MprSet {
    members: HashSet<NodeIdentity>,
}

impl MprSet {
    pub fn contains(&self, id: NodeIdentity) -> bool {
        self.members.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One-hop neighbor table plus derived two-hop topology and MPR set.
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: HashMap<NodeIdentity, NeighborEntry>,
    two_hop: TwoHopSet,
    mpr: MprSet,
    prune_count: u64,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, entry: NeighborEntry) {
        self.neighbors.insert(entry.id, entry);
    }

    pub fn get(&self, id: NodeIdentity) -> Option<&NeighborEntry> {
        self.neighbors.get(&id)
    }

    pub fn neighbor_ids(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.neighbors.keys()
    }

    pub fn two_hop_mut(&mut self) -> &mut TwoHopSet {
        &mut self.two_hop
    }

    pub fn mpr_set(&self) -> &MprSet {
        &self.mpr
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn prune_count(&self) -> u64 {
        self.prune_count
    }

    /// Drops every neighbor entry not refreshed since `now - timeout`,
    /// clearing its two-hop contribution and MPR membership along with it.
    pub fn prune_stale(&mut self, now: f64, timeout: f64) {
        let stale: Vec<NodeIdentity> = self
            .neighbors
            .values()
            .filter(|n| now - n.last_heard > timeout)
            .map(|n| n.id)
            .collect();
        for id in stale {
            self.neighbors.remove(&id);
            self.two_hop.clear_via(id);
            self.mpr.members.remove(&id);
            self.prune_count += 1;
            tracing::debug!(neighbor = %id, "pruned stale neighbor entry");
        }
    }

    /// Recomputes the MPR set from scratch: greedy coverage of two-hop
    /// neighbors, breaking ties by `qos_rank` (higher wins) and finally by
    /// lowest `NodeIdentity`. Deterministic given the current table state.
    pub fn recompute_mpr(&mut self, cfg: &ProtocolConfig) {
        let mut covered: HashSet<NodeIdentity> = HashSet::new();
        let mut chosen: HashSet<NodeIdentity> = HashSet::new();
        let all_two_hop: HashSet<NodeIdentity> =
            self.two_hop.two_hop_neighbors().copied().collect();

        // Step 1: any two-hop neighbor reachable via exactly one one-hop
        // neighbor forces that one-hop neighbor into the MPR set.
        let mut forced: Vec<NodeIdentity> = Vec::new();
        for two_hop in &all_two_hop {
            if let Some(via) = self.two_hop.reachers_of(*two_hop) {
                if via.len() == 1 {
                    forced.push(*via.iter().next().unwrap());
                }
            }
        }
        forced.sort();
        forced.dedup();
        for id in forced {
            chosen.insert(id);
            if let Some(reached) = self.reached_by(id, &all_two_hop) {
                covered.extend(reached);
            }
        }

        // Step 2: greedily add the one-hop neighbor covering the most
        // still-uncovered two-hop neighbors, tie-broken by qos_rank then
        // NodeIdentity, until full coverage is reached.
        loop {
            let uncovered: HashSet<NodeIdentity> =
                all_two_hop.difference(&covered).copied().collect();
            if uncovered.is_empty() {
                break;
            }
            let mut candidates: Vec<(NodeIdentity, usize, f32)> = Vec::new();
            for id in self.neighbors.keys() {
                if chosen.contains(id) {
                    continue;
                }
                let reach_count = uncovered
                    .iter()
                    .filter(|two_hop| {
                        self.two_hop
                            .reachers_of(**two_hop)
                            .map(|via| via.contains(id))
                            .unwrap_or(false)
                    })
                    .count();
                if reach_count == 0 {
                    continue;
                }
                let rank = self.neighbors.get(id).map(|n| n.qos_rank(cfg)).unwrap_or(0.0);
                candidates.push((*id, reach_count, rank));
            }
            if candidates.is_empty() {
                // Remaining two-hop neighbors are unreachable via any
                // current one-hop neighbor; nothing left to select.
                break;
            }
            candidates.sort_by(|a, b| {
                b.1.cmp(&a.1)
                    .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.0.cmp(&b.0))
            });
            let best = candidates[0].0;
            chosen.insert(best);
            if let Some(reached) = self.reached_by(best, &all_two_hop) {
                covered.extend(reached);
            }
        }

        for id in &chosen {
            if let Some(n) = self.neighbors.get_mut(id) {
                n.is_mpr = true;
            }
        }
        for (id, n) in self.neighbors.iter_mut() {
            if !chosen.contains(id) {
                n.is_mpr = false;
            }
        }
        self.mpr = MprSet { members: chosen };
    }

    fn reached_by(
        &self,
        one_hop: NodeIdentity,
        universe: &HashSet<NodeIdentity>,
    ) -> Option<HashSet<NodeIdentity>> {
        let mut out = HashSet::new();
        for two_hop in universe {
            if self
                .two_hop
                .reachers_of(*two_hop)
                .map(|via| via.contains(&one_hop))
                .unwrap_or(false)
            {
                out.insert(*two_hop);
            }
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, willingness: f32) -> NeighborEntry {
        NeighborEntry {
            id: NodeIdentity::from_u64(id),
            position: Position::default(),
            velocity: Velocity::default(),
            battery_percent: 80.0,
            willingness,
            provider_flag: false,
            etx: 1.0,
            jitter_ms: 0.0,
            lane_weight: 0.0,
            stability_score: 1.0,
            last_heard: 0.0,
            is_mpr: false,
        }
    }

    /// Worked example: one-hop {B, D}, two-hop neighbors each reachable via
    /// exactly one of B or D, so the minimal MPR set is exactly {B, D}.
    #[test]
    fn mpr_selection_picks_minimal_cover() {
        let mut table = NeighborTable::new();
        let b = NodeIdentity::from_u64(2);
        let d = NodeIdentity::from_u64(4);
        table.upsert(entry(2, 0.5));
        table.upsert(entry(4, 0.5));
        table.two_hop_mut().record(b, NodeIdentity::from_u64(20));
        table.two_hop_mut().record(b, NodeIdentity::from_u64(21));
        table.two_hop_mut().record(d, NodeIdentity::from_u64(22));
        table.recompute_mpr(&ProtocolConfig::default());
        let mpr = table.mpr_set();
        assert!(mpr.contains(b));
        assert!(mpr.contains(d));
        assert_eq!(mpr.len(), 2);
    }

    #[test]
    fn prune_removes_stale_entries_and_their_two_hop_contribution() {
        let mut table = NeighborTable::new();
        let mut e = entry(1, 0.5);
        e.last_heard = 0.0;
        table.upsert(e);
        table.two_hop_mut().record(NodeIdentity::from_u64(1), NodeIdentity::from_u64(9));
        table.prune_stale(100.0, 10.0);
        assert!(table.is_empty());
        assert_eq!(table.prune_count(), 1);
    }

    #[test]
    fn tie_break_prefers_higher_qos_rank_then_lowest_identity() {
        let mut table = NeighborTable::new();
        let low_id_low_rank = entry(1, 0.1);
        let high_id_high_rank = entry(9, 0.9);
        table.upsert(low_id_low_rank);
        table.upsert(high_id_high_rank);
        let target = NodeIdentity::from_u64(99);
        table.two_hop_mut().record(NodeIdentity::from_u64(1), target);
        table.two_hop_mut().record(NodeIdentity::from_u64(9), target);
        table.recompute_mpr(&ProtocolConfig::default());
        assert!(table.mpr_set().contains(NodeIdentity::from_u64(9)));
        assert!(!table.mpr_set().contains(NodeIdentity::from_u64(1)));
    }

    #[test]
    fn qos_rank_penalizes_high_etx_and_jitter() {
        let cfg = ProtocolConfig::default();
        let mut clean_link = entry(1, 0.5);
        clean_link.etx = 1.0;
        clean_link.jitter_ms = 0.0;
        let mut noisy_link = entry(2, 0.5);
        noisy_link.etx = 5.0;
        noisy_link.jitter_ms = 200.0;
        assert!(clean_link.qos_rank(&cfg) > noisy_link.qos_rank(&cfg));
    }
}
