//! End-to-end four-way handshake: a consumer with an active charging need
//! automatically discovers a relayed provider and completes JOIN_OFFER ->
//! JOIN_ACCEPT -> ACK -> ACKACK without any direct call into
//! `ChargingCoordination` from the test itself — everything is driven
//! through `Engine::tick`/`Engine::receive`.

use mvccp::codec::{Codec, MsgType};
use mvccp::{Engine, NodeIdentity, ProtocolConfig, Role};

/// Picks the one frame of `want`'s kind out of a tick's output, tolerating
/// an incidental HELLO emitted in the same tick.
fn pick(frames: Vec<Vec<u8>>, want: MsgType) -> Vec<u8> {
    frames
        .into_iter()
        .find(|f| Codec::decode(f).map(|d| d.header.msg_type == want).unwrap_or(false))
        .unwrap_or_else(|| panic!("no {:?} frame among tick output", want))
}

fn contains(frames: &[Vec<u8>], want: MsgType) -> bool {
    frames
        .iter()
        .any(|f| Codec::decode(f).map(|d| d.header.msg_type == want).unwrap_or(false))
}

struct Recorder(Vec<Vec<u8>>);
impl mvccp::Sink for Recorder {
    fn send(&mut self, frame: Vec<u8>) {
        self.0.push(frame);
    }
}
struct NullSink;
impl mvccp::Sink for NullSink {
    fn send(&mut self, _frame: Vec<u8>) {}
}

fn engine(id: u64) -> Engine {
    Engine::new(NodeIdentity::from_u64(id), ProtocolConfig::default(), Role::MobileProvider)
}

/// Line topology: provider(1) - relay(2) - consumer(3). Only the relay
/// ever becomes MPR-active (neither endpoint has a two-hop neighbor
/// beyond the other endpoint), so it alone forwards the provider's
/// aggregated PA to the consumer.
fn converge_topology(provider: &mut Engine, relay: &mut Engine, consumer: &mut Engine) {
    for t in [0u64, 2, 4, 6, 8] {
        let mut from_p = Recorder(Vec::new());
        let mut from_r = Recorder(Vec::new());
        let mut from_c = Recorder(Vec::new());
        provider.tick(t, &mut from_p).unwrap();
        relay.tick(t, &mut from_r).unwrap();
        consumer.tick(t, &mut from_c).unwrap();

        let mut sink = NullSink;
        for hello in from_p.0.drain(..) {
            relay.receive(&hello, t, &mut sink).unwrap();
        }
        for hello in from_r.0.drain(..) {
            provider.receive(&hello, t, &mut sink).unwrap();
            consumer.receive(&hello, t, &mut sink).unwrap();
        }
        for hello in from_c.0.drain(..) {
            relay.receive(&hello, t, &mut sink).unwrap();
        }
    }
}

#[test]
fn consumer_with_charging_need_completes_handshake_with_relayed_provider() {
    let mut provider = engine(1);
    let mut relay = engine(2);
    let mut consumer = engine(3);
    converge_topology(&mut provider, &mut relay, &mut consumer);

    assert_eq!(relay.stats().mpr_count, 0, "relay has no two-hop neighbor to cover");
    assert!(relay.neighbor_discovery.is_mpr_active(), "relay must be selected by both endpoints");
    assert!(!provider.neighbor_discovery.is_mpr_active());

    provider.ctx.set_provider_flag(true);
    provider.ctx.set_shareable_energy_kw(8.0);

    let t = 10u64;
    let mut from_provider = Recorder(Vec::new());
    provider.tick(t, &mut from_provider).unwrap();
    assert!(
        !contains(&from_provider.0, MsgType::ProviderAnnounce),
        "provider is not MPR-active and must not originate a PA"
    );
    // Deliver the provider's fresh HELLO (now advertising provider_flag)
    // to the relay before the relay originates its own PA, so the
    // relay's NeighborTable reflects the provider's current state.
    for frame in from_provider.0.drain(..) {
        relay.receive(&frame, t, &mut NullSink).unwrap();
    }

    let mut from_relay = Recorder(Vec::new());
    relay.tick(t, &mut from_relay).unwrap();
    let pa = pick(from_relay.0, MsgType::ProviderAnnounce);

    let mut from_consumer = Recorder(Vec::new());
    consumer.receive(&pa, t, &mut from_consumer).unwrap();
    assert_eq!(consumer.stats().provider_count, 1);

    // The consumer now has a charging need and a known provider: the next
    // tick must auto-initiate a session and emit JOIN_OFFER.
    consumer.ctx.set_charging_need_kw(Some(5.0));
    let t = 11u64;
    let mut from_consumer = Recorder(Vec::new());
    consumer.tick(t, &mut from_consumer).unwrap();
    let join_offer = pick(from_consumer.0, MsgType::JoinOffer);

    provider.receive(&join_offer, t, &mut NullSink).unwrap();

    // Offer window elapses; provider selects the (only) offer and emits
    // JOIN_ACCEPT.
    let t = t + provider.ctx.config().offer_window;
    let mut from_provider = Recorder(Vec::new());
    provider.tick(t, &mut from_provider).unwrap();
    let join_accept = pick(from_provider.0, MsgType::JoinAccept);

    let mut from_consumer = Recorder(Vec::new());
    consumer.receive(&join_accept, t, &mut from_consumer).unwrap();
    let ack = from_consumer.0.pop().expect("consumer replies with ACK");

    let mut from_provider = Recorder(Vec::new());
    provider.receive(&ack, t, &mut from_provider).unwrap();
    let ackack = from_provider.0.pop().expect("provider replies with ACKACK");

    consumer.receive(&ackack, t, &mut NullSink).unwrap();

    assert_eq!(
        consumer.charging.session(mvccp::SessionId {
            consumer_id: NodeIdentity::from_u64(3),
            provider_id: NodeIdentity::from_u64(1),
            seq: 1,
        }).map(|s| s.state),
        Some(mvccp::layers::charging::SessionState::Consumer(
            mvccp::layers::charging::ConsumerState::Allocated
        ))
    );
}
