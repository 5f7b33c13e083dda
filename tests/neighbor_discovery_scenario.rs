//! Two-node HELLO exchange: each side should learn the other as a neighbor
//! within one `hello_interval`, and prune it after `neighbor_timeout` of
//! silence.

use mvccp::{Engine, NodeIdentity, ProtocolConfig, Role};

struct NullSink;
impl mvccp::Sink for NullSink {
    fn send(&mut self, _frame: Vec<u8>) {}
}

struct Recorder(Vec<Vec<u8>>);
impl mvccp::Sink for Recorder {
    fn send(&mut self, frame: Vec<u8>) {
        self.0.push(frame);
    }
}

fn engine(id: u64) -> Engine {
    Engine::new(NodeIdentity::from_u64(id), ProtocolConfig::default(), Role::Consumer)
}

#[test]
fn two_nodes_discover_each_other_then_prune_on_silence() {
    let mut a = engine(1);
    let mut b = engine(2);

    let mut from_a = Recorder(Vec::new());
    a.tick(0, &mut from_a).unwrap();
    assert_eq!(from_a.0.len(), 1, "A should emit exactly one HELLO on first tick");

    let mut from_b = Recorder(Vec::new());
    b.tick(0, &mut from_b).unwrap();

    for hello in from_a.0.drain(..) {
        b.receive(&hello, 0, &mut NullSink).unwrap();
    }
    for hello in from_b.0.drain(..) {
        a.receive(&hello, 0, &mut NullSink).unwrap();
    }

    assert_eq!(a.stats().neighbor_count, 1);
    assert_eq!(b.stats().neighbor_count, 1);

    // neighbor_timeout default is 6; advance well past it without any
    // further HELLOs arriving.
    let mut sink = NullSink;
    a.tick(20, &mut sink).unwrap();
    assert_eq!(a.stats().neighbor_count, 0);
    assert_eq!(a.stats().neighbor_prune_count, 1);
}
