use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::ProtocolConfig;
use crate::context::{Position, Velocity};
use crate::identity::NodeIdentity;

/// What kind of charging provider an advertisement describes. Drives no
/// behavior on its own; carried so EVALUATE's policy score can weigh a
/// fixed station differently from a provider that will itself be moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Stationary,
    Mobile,
    PlatoonHead,
    Rreh,
}

impl ProviderType {
    pub fn to_u8(self) -> u8 {
        match self {
            ProviderType::Stationary => 0,
            ProviderType::Mobile => 1,
            ProviderType::PlatoonHead => 2,
            ProviderType::Rreh => 3,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ProviderType::Mobile,
            2 => ProviderType::PlatoonHead,
            3 => ProviderType::Rreh,
            _ => ProviderType::Stationary,
        }
    }
}

/// A known charging provider, as last advertised by a provider
/// announcement (directly heard or relayed).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntry {
    pub provider_id: NodeIdentity,
    pub provider_type: ProviderType,
    pub position: Position,
    /// Route endpoint, for a mobile provider following a route.
    pub destination: Option<Position>,
    pub direction: Velocity,
    pub shareable_energy_kw: f32,
    pub willingness: f32,
    /// Fraction of `shareable_energy_kw` drawn from renewable generation.
    pub green_fraction: f32,
    /// Simulation time at which this provider expects to be available.
    pub availability_time_s: f64,
    pub last_seen: f64,
    pub hop_count: u8,
}

fn heading_alignment(a: Velocity, b: Velocity) -> f32 {
    let speed_a = a.speed();
    let speed_b = b.speed();
    if speed_a < f32::EPSILON || speed_b < f32::EPSILON {
        return 0.0;
    }
    ((a.vx * b.vx + a.vy * b.vy) / (speed_a * speed_b)).clamp(-1.0, 1.0)
}

impl ProviderEntry {
    /// Weighted EVALUATE policy score: renewable fraction, inverse detour
    /// distance, deadline feasibility, inverse expected cost, and heading
    /// alignment. Higher is better.
    pub fn policy_score(
        &self,
        from: Position,
        heading: Velocity,
        now: f64,
        deadline_s: Option<f64>,
        cfg: &ProtocolConfig,
    ) -> f32 {
        let detour_distance = from.distance_to(&self.position)
            + self
                .destination
                .map(|d| self.position.distance_to(&d))
                .unwrap_or(0.0);
        let detour_term = 1.0 / (1.0 + detour_distance / 100.0);
        let deadline_term = match deadline_s {
            Some(deadline) => {
                if self.availability_time_s <= deadline.max(now) {
                    1.0
                } else {
                    0.0
                }
            }
            None => 1.0,
        };
        let cost_term = 1.0 - 1.0 / (1.0 + self.shareable_energy_kw.max(0.0));
        let direction_term = heading_alignment(heading, self.direction);

        cfg.provider_score_green * self.green_fraction.clamp(0.0, 1.0)
            + cfg.provider_score_detour * detour_term
            + cfg.provider_score_deadline * deadline_term
            + cfg.provider_score_cost * cost_term
            + cfg.provider_score_direction * direction_term
    }
}

/// Known providers, keyed by provider identity. A later PA (by sequence
/// number, enforced by the dedup cache upstream of this table) simply
/// overwrites the previous entry; this table only tracks the most recent
/// observation of each provider, not announcement history.
#[derive(Debug, Default)]
pub struct ProviderTable {
    providers: HashMap<NodeIdentity, ProviderEntry>,
    prune_count: u64,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, entry: ProviderEntry) {
        self.providers.insert(entry.provider_id, entry);
    }

    pub fn get(&self, provider_id: NodeIdentity) -> Option<&ProviderEntry> {
        self.providers.get(&provider_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.providers.values()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn prune_count(&self) -> u64 {
        self.prune_count
    }

    /// Drops a provider entry outright, used when an offer to it timed out
    /// so the next `EVALUATE` pass doesn't retry the same dead lead.
    pub fn remove(&mut self, provider_id: NodeIdentity) {
        self.providers.remove(&provider_id);
    }

    pub fn prune_stale(&mut self, now: f64, timeout: f64) {
        let stale: Vec<NodeIdentity> = self
            .providers
            .values()
            .filter(|p| now - p.last_seen > timeout)
            .map(|p| p.provider_id)
            .collect();
        for id in stale {
            self.providers.remove(&id);
            self.prune_count += 1;
            tracing::debug!(provider = %id, "pruned stale provider entry");
        }
    }

    /// Providers ranked best-first by the EVALUATE policy score (green
    /// fraction, detour distance, deadline feasibility, expected cost,
    /// direction alignment), tie-broken by lowest `provider_id`.
    pub fn ranked_by_policy(
        &self,
        from: Position,
        heading: Velocity,
        now: f64,
        deadline_s: Option<f64>,
        cfg: &ProtocolConfig,
    ) -> Vec<&ProviderEntry> {
        let mut out: Vec<&ProviderEntry> = self.providers.values().collect();
        out.sort_by(|a, b| {
            b.policy_score(from, heading, now, deadline_s, cfg)
                .partial_cmp(&a.policy_score(from, heading, now, deadline_s, cfg))
                .unwrap_or(Ordering::Equal)
                .then(a.provider_id.cmp(&b.provider_id))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Position;

    fn entry(id: u64, x: f32) -> ProviderEntry {
        ProviderEntry {
            provider_id: NodeIdentity::from_u64(id),
            provider_type: ProviderType::Stationary,
            position: Position { x, y: 0.0 },
            destination: None,
            direction: Velocity::default(),
            shareable_energy_kw: 10.0,
            willingness: 0.5,
            green_fraction: 0.5,
            availability_time_s: 0.0,
            last_seen: 0.0,
            hop_count: 1,
        }
    }

    #[test]
    fn prune_drops_only_stale_entries() {
        let mut table = ProviderTable::new();
        let mut fresh = entry(1, 0.0);
        fresh.last_seen = 90.0;
        let mut stale = entry(2, 0.0);
        stale.last_seen = 0.0;
        table.upsert(fresh);
        table.upsert(stale);
        table.prune_stale(100.0, 15.0);
        assert_eq!(table.len(), 1);
        assert!(table.get(NodeIdentity::from_u64(1)).is_some());
        assert!(table.get(NodeIdentity::from_u64(2)).is_none());
    }

    #[test]
    fn nearer_provider_scores_higher_all_else_equal() {
        let mut table = ProviderTable::new();
        table.upsert(entry(2, 10.0));
        table.upsert(entry(1, 5.0));
        let cfg = ProtocolConfig::default();
        let ordered = table.ranked_by_policy(
            Position { x: 0.0, y: 0.0 },
            Velocity { vx: 1.0, vy: 0.0 },
            0.0,
            None,
            &cfg,
        );
        assert_eq!(ordered[0].provider_id, NodeIdentity::from_u64(1));
        assert_eq!(ordered[1].provider_id, NodeIdentity::from_u64(2));
    }

    #[test]
    fn greener_provider_outranks_closer_non_renewable_one() {
        let mut table = ProviderTable::new();
        let mut near_dirty = entry(1, 1.0);
        near_dirty.green_fraction = 0.0;
        let mut far_green = entry(2, 50.0);
        far_green.green_fraction = 1.0;
        table.upsert(near_dirty);
        table.upsert(far_green);
        let cfg = ProtocolConfig::default();
        let ordered = table.ranked_by_policy(
            Position { x: 0.0, y: 0.0 },
            Velocity { vx: 1.0, vy: 0.0 },
            0.0,
            None,
            &cfg,
        );
        assert_eq!(ordered[0].provider_id, NodeIdentity::from_u64(2));
    }

    #[test]
    fn missed_deadline_is_scored_below_feasible_candidate() {
        let mut table = ProviderTable::new();
        let mut on_time = entry(1, 5.0);
        on_time.availability_time_s = 1.0;
        let mut late = entry(2, 5.0);
        late.availability_time_s = 100.0;
        table.upsert(on_time);
        table.upsert(late);
        let cfg = ProtocolConfig::default();
        let ordered = table.ranked_by_policy(
            Position { x: 0.0, y: 0.0 },
            Velocity { vx: 1.0, vy: 0.0 },
            0.0,
            Some(10.0),
            &cfg,
        );
        assert_eq!(ordered[0].provider_id, NodeIdentity::from_u64(1));
    }
}
