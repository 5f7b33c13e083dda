use serde::{Deserialize, Serialize};

/// TTL assignment policy for originated provider announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlMode {
    /// Every originated PA gets `pa_ttl_default`.
    Fixed,
    /// TTL is derived from local neighbor density: `ceil(log2(neighbor_count + 1))`,
    /// clamped to `[pa_ttl_min, pa_ttl_max]`.
    DensityBased,
}

/// Immutable protocol tunables, fixed for the lifetime of a running
/// `Context`. All time-valued fields are simulation seconds, the same unit
/// `Context::current_time` reports and `tick`/`receive` are driven with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Interval between HELLO emissions.
    pub hello_interval: f64,
    /// Interval between provider-announcement originations.
    pub pa_interval: f64,
    /// Interval between intra-platoon PLATOON_BEACON emissions.
    pub beacon_interval: f64,
    /// Interval between inter-platoon PLATOON_ANNOUNCE emissions.
    pub platoon_announce_interval: f64,
    /// A neighbor entry not refreshed within this many seconds is pruned.
    pub neighbor_timeout: f64,
    /// A provider-table entry not refreshed within this many seconds is pruned.
    pub provider_timeout: f64,
    /// A platoon-table entry not refreshed within this many seconds is pruned.
    pub platoon_entry_timeout: f64,

    /// Default TTL stamped on originated PAs under `TtlMode::Fixed`, and the
    /// unclamped starting point under `TtlMode::DensityBased`.
    pub pa_ttl_default: u8,
    /// Lower clamp for `TtlMode::DensityBased`.
    pub pa_ttl_min: u8,
    /// Upper clamp for `TtlMode::DensityBased`.
    pub pa_ttl_max: u8,
    pub ttl_mode: TtlMode,

    /// Deadline from JOIN_OFFER send to a matching JOIN_ACCEPT.
    pub join_accept_timeout: f64,
    /// How long a provider/PH collects competing consumer offers before
    /// selecting one.
    pub offer_window: f64,

    /// Maximum member count (including the head) of a single platoon.
    pub platoon_max_size: usize,
    /// Battery percentage above which a mobile provider is willing to act
    /// as a platoon head.
    pub ph_energy_threshold_percent: f32,
    /// Minimum advertised willingness score to be considered as a PH
    /// candidate.
    pub ph_willingness_threshold: f32,
    /// Battery percentage below which an active platoon head triggers
    /// handoff to the highest-scoring member candidate.
    pub ph_handoff_battery_threshold_percent: f32,

    /// Scale factor in the inverse-square efficiency falloff
    /// `1 / (1 + scale * distance^2)` used for intra-platoon edge weights.
    pub edge_efficiency_scale: f32,
    /// Maximum member-to-member distance (metres) an edge can span.
    pub edge_max_range_m: f32,
    /// Minimum efficiency an edge must retain to be included in the graph.
    pub edge_min_efficiency: f32,
    /// Spacing (metres) between consecutive advisory formation positions.
    pub formation_spacing_m: f32,

    /// Weight of heading alignment in `PlatoonTable` scoring.
    pub platoon_score_direction: f32,
    /// Weight of distance-to-head in `PlatoonTable` scoring.
    pub platoon_score_distance: f32,
    /// Weight of available surplus energy in `PlatoonTable` scoring.
    pub platoon_score_energy: f32,
    /// Weight of the advertised formation-efficiency bonus in `PlatoonTable`
    /// scoring.
    pub platoon_score_efficiency: f32,

    /// Weight of renewable-energy fraction in the consumer EVALUATE policy.
    pub provider_score_green: f32,
    /// Weight of inverse detour distance in the consumer EVALUATE policy.
    pub provider_score_detour: f32,
    /// Weight of deadline feasibility in the consumer EVALUATE policy.
    pub provider_score_deadline: f32,
    /// Weight of inverse expected cost in the consumer EVALUATE policy.
    pub provider_score_cost: f32,
    /// Weight of direction alignment in the consumer EVALUATE policy.
    pub provider_score_direction: f32,

    /// Weight of willingness in `NeighborEntry::qos_rank`.
    pub qos_weight_willingness: f32,
    /// Weight of battery percentage in `NeighborEntry::qos_rank`.
    pub qos_weight_battery: f32,
    /// Weight of the advertised provider flag in `NeighborEntry::qos_rank`.
    pub qos_weight_provider: f32,
    /// Weight of (inverted) ETX in `NeighborEntry::qos_rank`.
    pub qos_weight_etx: f32,
    /// Weight of (inverted) link jitter in `NeighborEntry::qos_rank`.
    pub qos_weight_jitter: f32,
    /// Weight of (inverted) relative speed in `NeighborEntry::qos_rank`.
    pub qos_weight_speed: f32,
    /// Weight of (inverted) lane congestion weight in `NeighborEntry::qos_rank`.
    pub qos_weight_lane: f32,
    /// Weight of historical stability score in `NeighborEntry::qos_rank`.
    pub qos_weight_stability: f32,

    /// Maximum number of `(originator, seq_num)` entries retained by the
    /// dedup cache before the oldest are evicted.
    pub dedup_cache_size: usize,

    /// RREH queue depth at or above which the grid state becomes `Limited`.
    pub rreh_limited_queue_len: usize,
    /// RREH queue depth at or above which the grid state becomes
    /// `Congested`, superseding `Limited`.
    pub rreh_congested_queue_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            hello_interval: 1.0,
            pa_interval: 5.0,
            beacon_interval: 2.0,
            platoon_announce_interval: 5.0,
            neighbor_timeout: 5.0,
            provider_timeout: 10.0,
            platoon_entry_timeout: 30.0,

            pa_ttl_default: 4,
            pa_ttl_min: 2,
            pa_ttl_max: 8,
            ttl_mode: TtlMode::Fixed,

            join_accept_timeout: 6.0,
            offer_window: 4.0,

            platoon_max_size: 8,
            ph_energy_threshold_percent: 60.0,
            ph_willingness_threshold: 0.5,
            ph_handoff_battery_threshold_percent: 20.0,

            edge_efficiency_scale: 0.01,
            edge_max_range_m: 50.0,
            edge_min_efficiency: 0.2,
            formation_spacing_m: 8.0,

            platoon_score_direction: 0.35,
            platoon_score_distance: 0.25,
            platoon_score_energy: 0.25,
            platoon_score_efficiency: 0.15,

            provider_score_green: 0.25,
            provider_score_detour: 0.2,
            provider_score_deadline: 0.25,
            provider_score_cost: 0.15,
            provider_score_direction: 0.15,

            qos_weight_willingness: 0.28,
            qos_weight_battery: 0.20,
            qos_weight_provider: 0.10,
            qos_weight_etx: 0.15,
            qos_weight_jitter: 0.10,
            qos_weight_speed: 0.07,
            qos_weight_lane: 0.06,
            qos_weight_stability: 0.04,

            dedup_cache_size: 4096,

            rreh_limited_queue_len: 2,
            rreh_congested_queue_len: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_ttl_clamp_order() {
        let cfg = ProtocolConfig::default();
        assert!(cfg.pa_ttl_min <= cfg.pa_ttl_default);
        assert!(cfg.pa_ttl_default <= cfg.pa_ttl_max);
    }
}
