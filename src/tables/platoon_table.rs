use std::collections::HashMap;

use crate::config::ProtocolConfig;
use crate::context::{Position, Velocity};
use crate::identity::NodeIdentity;

/// A remotely-advertised platoon, as last heard via PLATOON_ANNOUNCE. This
/// is the *inter*-platoon discovery view — the intra-platoon roster and
/// edge graph for a platoon this node has joined lives in
/// `layers::platoon::Platoon`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatoonAdvert {
    pub platoon_id: NodeIdentity,
    pub head_id: NodeIdentity,
    pub head_position: Position,
    pub head_velocity: Velocity,
    /// Route endpoint of the platoon, if the head advertised one.
    pub destination: Option<Position>,
    pub available_slots: u8,
    pub surplus_energy_kw: f32,
    /// Mean intra-platoon transfer efficiency, advertised by the head as
    /// the `formation_efficiency` EVALUATE factor.
    pub formation_efficiency: f32,
    pub last_seen: f64,
}

impl PlatoonAdvert {
    /// Weighted desirability score combining heading alignment with the
    /// candidate node's own velocity, proximity, available surplus energy,
    /// and the platoon's own formation efficiency. Higher is better; ties
    /// break on `platoon_id`.
    pub fn score(&self, from: Position, heading: Velocity, cfg: &ProtocolConfig) -> f32 {
        let direction_term = heading_alignment(heading, self.head_velocity);
        let distance = from.distance_to(&self.head_position).max(0.001);
        let distance_term = 1.0 / distance;
        let energy_term = self.surplus_energy_kw.max(0.0);
        let efficiency_bonus = self.formation_efficiency.clamp(0.0, 1.0);
        cfg.platoon_score_direction * direction_term
            + cfg.platoon_score_distance * distance_term
            + cfg.platoon_score_energy * energy_term
            + cfg.platoon_score_efficiency * efficiency_bonus
    }
}

fn heading_alignment(a: Velocity, b: Velocity) -> f32 {
    let speed_a = a.speed();
    let speed_b = b.speed();
    if speed_a < f32::EPSILON || speed_b < f32::EPSILON {
        return 0.0;
    }
    ((a.vx * b.vx + a.vy * b.vy) / (speed_a * speed_b)).clamp(-1.0, 1.0)
}

/// Known candidate platoons available to join, pruned on
/// `PLATOON_ENTRY_TIMEOUT` like the neighbor and provider tables.
#[derive(Debug, Default)]
pub struct PlatoonTable {
    platoons: HashMap<NodeIdentity, PlatoonAdvert>,
    prune_count: u64,
}

impl PlatoonTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, advert: PlatoonAdvert) {
        self.platoons.insert(advert.platoon_id, advert);
    }

    pub fn get(&self, platoon_id: NodeIdentity) -> Option<&PlatoonAdvert> {
        self.platoons.get(&platoon_id)
    }

    pub fn len(&self) -> usize {
        self.platoons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platoons.is_empty()
    }

    pub fn prune_count(&self) -> u64 {
        self.prune_count
    }

    pub fn prune_stale(&mut self, now: f64, timeout: f64) {
        let stale: Vec<NodeIdentity> = self
            .platoons
            .values()
            .filter(|p| now - p.last_seen > timeout)
            .map(|p| p.platoon_id)
            .collect();
        for id in stale {
            self.platoons.remove(&id);
            self.prune_count += 1;
            tracing::debug!(platoon = %id, "pruned stale platoon advert");
        }
    }

    /// Highest-scoring platoon with at least one open slot, tie-broken by
    /// lowest `platoon_id`. `None` if no candidate qualifies.
    pub fn find_best_platoon(
        &self,
        from: Position,
        heading: Velocity,
        cfg: &ProtocolConfig,
    ) -> Option<&PlatoonAdvert> {
        self.platoons
            .values()
            .filter(|p| p.available_slots > 0)
            .max_by(|a, b| {
                a.score(from, heading, cfg)
                    .partial_cmp(&b.score(from, heading, cfg))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.platoon_id.cmp(&a.platoon_id))
            })
    }
}
