use crate::config::ProtocolConfig;
use crate::error::{CoreError, CoreResult};
use crate::identity::NodeIdentity;

/// A 2D position in the simulation's ground plane, metres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A 2D velocity vector, metres/second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
}

impl Velocity {
    pub fn heading(&self) -> f32 {
        self.vy.atan2(self.vx)
    }

    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

/// Mutable, externally-driven state of the local node. Position, velocity,
/// and battery are never estimated by this crate — they arrive verbatim
/// through `apply_mobility_and_energy`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub position: Position,
    pub velocity: Velocity,
    pub battery_percent: f32,
    pub willingness: f32,
    pub provider_flag: bool,
    pub shareable_energy_kw: f32,
    /// Fraction of `shareable_energy_kw` drawn from renewable generation,
    /// advertised in PROVIDER_ENTRY as the `green_fraction` EVALUATE factor.
    pub green_fraction: f32,
    /// Route endpoint of a mobile provider, if it has one. `None` for a
    /// stationary charger or a provider not currently following a route.
    pub destination: Option<Position>,
    /// Self-reported expected transmission count, advertised in HELLO and
    /// folded into neighbors' `qos_rank` for this node.
    pub link_etx: f32,
    /// Self-reported HELLO inter-arrival jitter, milliseconds.
    pub link_jitter_ms: f32,
    /// Self-reported congestion weight of the lane this node occupies.
    pub lane_weight: f32,
    /// Self-reported historical link-stability score in `[0, 1]`.
    pub stability_score: f32,
    /// Set by the embedding harness when this vehicle needs charging;
    /// `None` means no active need. Drives `RoleManager`'s CONSUMER
    /// transition and the amount requested in JOIN_OFFER.
    pub charging_need_kw: Option<f32>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            position: Position::default(),
            velocity: Velocity::default(),
            battery_percent: 100.0,
            willingness: 0.0,
            provider_flag: false,
            shareable_energy_kw: 0.0,
            green_fraction: 0.0,
            destination: None,
            link_etx: 1.0,
            link_jitter_ms: 0.0,
            lane_weight: 0.0,
            stability_score: 1.0,
            charging_need_kw: None,
        }
    }
}

/// Shared simulation context: the monotonic clock, the local node's
/// identity/state, and the immutable configuration every layer reads from.
/// Owned by the embedding harness and threaded through every entry point;
/// it is not `Clone` on purpose — there is exactly one `Context` per
/// simulated node.
#[derive(Debug)]
pub struct Context {
    node_id: NodeIdentity,
    current_time: f64,
    config: ProtocolConfig,
    state: NodeState,
}

impl Context {
    pub fn new(node_id: NodeIdentity, config: ProtocolConfig) -> Self {
        Self {
            node_id,
            current_time: 0.0,
            config,
            state: NodeState::default(),
        }
    }

    pub fn node_id(&self) -> NodeIdentity {
        self.node_id
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Advances the simulation clock. Every entry point (`tick`, `receive`,
    /// `apply_mobility_and_energy`) must call this before doing anything
    /// else. Rejects any `t` earlier than the current time — the core has
    /// no wall clock and trusts the caller for time, but it still enforces
    /// that time never runs backwards.
    pub fn update_time(&mut self, t: f64) -> CoreResult<()> {
        if t < self.current_time {
            return Err(CoreError::TimeRegression {
                current: self.current_time,
                attempted: t,
            });
        }
        self.current_time = t;
        Ok(())
    }

    pub fn apply_mobility_and_energy(
        &mut self,
        position: Position,
        velocity: Velocity,
        battery_percent: f32,
    ) {
        self.state.position = position;
        self.state.velocity = velocity;
        self.state.battery_percent = battery_percent;
    }

    pub fn set_willingness(&mut self, willingness: f32) {
        self.state.willingness = willingness;
    }

    pub fn set_provider_flag(&mut self, provider_flag: bool) {
        self.state.provider_flag = provider_flag;
    }

    pub fn set_shareable_energy_kw(&mut self, shareable_energy_kw: f32) {
        self.state.shareable_energy_kw = shareable_energy_kw;
    }

    pub fn set_green_fraction(&mut self, green_fraction: f32) {
        self.state.green_fraction = green_fraction;
    }

    pub fn set_destination(&mut self, destination: Option<Position>) {
        self.state.destination = destination;
    }

    pub fn set_link_quality(&mut self, etx: f32, jitter_ms: f32, lane_weight: f32, stability_score: f32) {
        self.state.link_etx = etx;
        self.state.link_jitter_ms = jitter_ms;
        self.state.lane_weight = lane_weight;
        self.state.stability_score = stability_score;
    }

    /// Sets or clears the vehicle's active charging need. A `Some` value
    /// drives `RoleManager`'s automatic CONSUMER transition.
    pub fn set_charging_need_kw(&mut self, charging_need_kw: Option<f32>) {
        self.state.charging_need_kw = charging_need_kw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(NodeIdentity::from_u64(1), ProtocolConfig::default())
    }

    #[test]
    fn time_advances_monotonically() {
        let mut c = ctx();
        c.update_time(5.0).unwrap();
        c.update_time(5.0).unwrap();
        c.update_time(10.3).unwrap();
        assert_eq!(c.current_time(), 10.3);
    }

    #[test]
    fn time_regression_is_rejected() {
        let mut c = ctx();
        c.update_time(10.0).unwrap();
        let err = c.update_time(3.0).unwrap_err();
        assert_eq!(
            err,
            CoreError::TimeRegression {
                current: 10.0,
                attempted: 3.0
            }
        );
    }
}
