use crate::codec::{Codec, Frame, MsgType, RawTlv, TlvType};
use crate::config::TtlMode;
use crate::context::{Context, Position, Velocity};
use crate::error::{CoreError, CoreResult};
use crate::layers::charging::Role;
use crate::layers::neighbor_discovery::NeighborDiscovery;
use crate::tables::{DedupCache, ProviderEntry, ProviderTable, ProviderType};

/// Layer B: provider-announcement origination, MPR-gated forwarding, and
/// the provider table built from what's heard.
pub struct ProviderAnnounce {
    pub providers: ProviderTable,
    dedup: DedupCache,
    last_pa_sent: Option<f64>,
    seq: u32,
}

impl ProviderAnnounce {
    pub fn new(dedup_cache_size: usize) -> Self {
        Self {
            providers: ProviderTable::new(),
            dedup: DedupCache::new(dedup_cache_size),
            last_pa_sent: None,
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn dedup_hit_count(&self) -> u64 {
        self.dedup.hit_count()
    }

    pub fn dedup_miss_count(&self) -> u64 {
        self.dedup.miss_count()
    }

    fn ttl_for_origination(&self, ctx: &Context, neighbor_count: usize) -> u8 {
        let cfg = ctx.config();
        match cfg.ttl_mode {
            TtlMode::Fixed => cfg.pa_ttl_default,
            TtlMode::DensityBased => {
                let density = (neighbor_count.max(1) as f32).log2().floor() as i32;
                (8 - density).clamp(cfg.pa_ttl_min as i32, cfg.pa_ttl_max as i32) as u8
            }
        }
    }

    /// Called once per `tick`. Only an MPR-active node originates a PA —
    /// being selected as at least one neighbor's MPR is what authorizes a
    /// node to speak for the provider population it has aggregated, the
    /// same standing that later authorizes it to forward others' PAs.
    /// When due, the PA aggregates every known provider: self if
    /// provider-flagged, plus every one-hop neighbor currently advertising
    /// `provider_flag = true`. Also prunes providers not refreshed within
    /// `provider_timeout`.
    pub fn on_tick(
        &mut self,
        ctx: &mut Context,
        neighbors: &NeighborDiscovery,
        role: Role,
    ) -> CoreResult<Option<Vec<u8>>> {
        let now = ctx.current_time();
        self.providers.prune_stale(now, ctx.config().provider_timeout);

        if !neighbors.is_mpr_active() {
            return Ok(None);
        }
        let due = match self.last_pa_sent {
            None => true,
            Some(last) => now - last >= ctx.config().pa_interval,
        };
        if !due {
            return Ok(None);
        }

        let mut entries = Vec::new();
        if ctx.state().provider_flag {
            entries.push(encode_provider_entry(&ProviderEntry {
                provider_id: ctx.node_id(),
                provider_type: provider_type_for_role(role),
                position: ctx.state().position,
                destination: ctx.state().destination,
                direction: ctx.state().velocity,
                shareable_energy_kw: ctx.state().shareable_energy_kw,
                willingness: ctx.state().willingness,
                green_fraction: ctx.state().green_fraction,
                availability_time_s: now,
                last_seen: now,
                hop_count: 0,
            }));
        }
        for id in neighbors.table.neighbor_ids().copied().collect::<Vec<_>>() {
            let Some(entry) = neighbors.table.get(id) else { continue };
            if entry.provider_flag {
                entries.push(encode_provider_entry(&ProviderEntry {
                    provider_id: id,
                    provider_type: ProviderType::Mobile,
                    position: entry.position,
                    destination: None,
                    direction: entry.velocity,
                    shareable_energy_kw: 0.0,
                    willingness: entry.willingness,
                    green_fraction: 0.0,
                    availability_time_s: now,
                    last_seen: now,
                    hop_count: 0,
                }));
            }
        }
        if entries.is_empty() {
            return Ok(None);
        }

        self.last_pa_sent = Some(now);
        let seq = self.next_seq();
        self.dedup.insert((ctx.node_id(), seq));

        let ttl = self.ttl_for_origination(ctx, neighbors.table.len());
        let mut tlvs: Vec<RawTlv> = entries
            .into_iter()
            .map(|value| RawTlv {
                type_code: TlvType::ProviderEntry as u8,
                value,
            })
            .collect();
        tlvs.push(RawTlv {
            type_code: TlvType::PreviousHop as u8,
            value: ctx.node_id().as_bytes().to_vec(),
        });
        let frame = Frame::new(MsgType::ProviderAnnounce, ttl, seq, ctx.node_id(), tlvs);
        tracing::debug!(seq, ttl, "originated provider announcement");
        Ok(Some(Codec::encode(&frame)?))
    }

    /// Processes an inbound PA. Upserts every aggregated PROVIDER_ENTRY into
    /// the local provider table, then returns a re-encoded,
    /// TTL-decremented, PREVIOUS_HOP-rewritten frame to forward — but only
    /// if this node is itself MPR-active, the previous hop isn't this
    /// node, the frame hasn't already been seen, and TTL budget remains.
    pub fn on_pa(
        &mut self,
        ctx: &Context,
        neighbors: &NeighborDiscovery,
        frame: &Frame,
    ) -> CoreResult<Option<Vec<u8>>> {
        if frame.header.ttl > ctx.config().pa_ttl_max {
            return Err(CoreError::Codec(format!(
                "provider announce ttl {} exceeds pa_ttl_max {}",
                frame.header.ttl,
                ctx.config().pa_ttl_max
            )));
        }

        let key = (frame.header.sender_id, frame.header.seq_num);
        if self.dedup.contains(key) {
            return Ok(None);
        }
        self.dedup.insert(key);

        for tlv in frame.find_all(TlvType::ProviderEntry) {
            if let Some(mut entry) = decode_provider_entry(&tlv.value) {
                entry.last_seen = ctx.current_time();
                entry.hop_count = frame.header.ttl;
                self.providers.upsert(entry);
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
        tracing::debug!(
            originator = %frame.header.sender_id,
            seq = frame.header.seq_num,
            ttl,
            "forwarding provider announcement"
        );
        Ok(Some(Codec::encode(&forwarded)?))
    }
}

fn provider_type_for_role(role: Role) -> ProviderType {
    match role {
        Role::MobileProvider => ProviderType::Mobile,
        Role::PlatoonHead => ProviderType::PlatoonHead,
        Role::Rreh => ProviderType::Rreh,
        Role::Consumer | Role::PlatoonMember => ProviderType::Stationary,
    }
}

/// Wire layout (52 bytes): id(6) x(4) y(4) shareable_energy_kw(4)
/// willingness(4) provider_type(1) dest_present(1) dest_x(4) dest_y(4)
/// dir_vx(4) dir_vy(4) green_fraction(4) availability_time_s(8).
fn encode_provider_entry(entry: &ProviderEntry) -> Vec<u8> {
    let mut v = Vec::with_capacity(52);
    v.extend_from_slice(entry.provider_id.as_bytes());
    v.extend_from_slice(&entry.position.x.to_be_bytes());
    v.extend_from_slice(&entry.position.y.to_be_bytes());
    v.extend_from_slice(&entry.shareable_energy_kw.to_be_bytes());
    v.extend_from_slice(&entry.willingness.to_be_bytes());
    v.push(entry.provider_type.to_u8());
    v.push(entry.destination.is_some() as u8);
    let dest = entry.destination.unwrap_or_default();
    v.extend_from_slice(&dest.x.to_be_bytes());
    v.extend_from_slice(&dest.y.to_be_bytes());
    v.extend_from_slice(&entry.direction.vx.to_be_bytes());
    v.extend_from_slice(&entry.direction.vy.to_be_bytes());
    v.extend_from_slice(&entry.green_fraction.to_be_bytes());
    v.extend_from_slice(&entry.availability_time_s.to_be_bytes());
    v
}

fn decode_provider_entry(bytes: &[u8]) -> Option<ProviderEntry> {
    if bytes.len() != 52 {
        return None;
    }
    let mut id_bytes = [0u8; 6];
    id_bytes.copy_from_slice(&bytes[0..6]);
    let provider_id = crate::identity::NodeIdentity::new(id_bytes);
    let x = f32::from_be_bytes(bytes[6..10].try_into().ok()?);
    let y = f32::from_be_bytes(bytes[10..14].try_into().ok()?);
    let shareable_energy_kw = f32::from_be_bytes(bytes[14..18].try_into().ok()?);
    let willingness = f32::from_be_bytes(bytes[18..22].try_into().ok()?);
    let provider_type = ProviderType::from_u8(bytes[22]);
    let dest_present = bytes[23] != 0;
    let dest_x = f32::from_be_bytes(bytes[24..28].try_into().ok()?);
    let dest_y = f32::from_be_bytes(bytes[28..32].try_into().ok()?);
    let dir_vx = f32::from_be_bytes(bytes[32..36].try_into().ok()?);
    let dir_vy = f32::from_be_bytes(bytes[36..40].try_into().ok()?);
    let green_fraction = f32::from_be_bytes(bytes[40..44].try_into().ok()?);
    let availability_time_s = f64::from_be_bytes(bytes[44..52].try_into().ok()?);
    Some(ProviderEntry {
        provider_id,
        provider_type,
        position: Position { x, y },
        destination: dest_present.then_some(Position { x: dest_x, y: dest_y }),
        direction: Velocity { vx: dir_vx, vy: dir_vy },
        shareable_energy_kw,
        willingness,
        green_fraction,
        availability_time_s,
        last_seen: 0.0,
        hop_count: 0,
    })
}
