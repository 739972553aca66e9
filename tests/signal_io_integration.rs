//! Integration tests for value I/O
//!
//! These tests validate the outgoing and incoming value paths:
//! - Update batching under one timetag per tick
//! - Vector chunking and type checks
//! - Signal properties set from endpoint arguments
//! - Device-to-device routing over the loopback network

mod common;

use common::builders::{device, EndpointBuilder};
use common::mock_helpers::{output_atoms, sent_updates};
use common::{wait_until, Harness};
use mapscope::network::{PROP_MAX, PROP_MIN};
use mapscope::types::PropertyValue;
use mapscope::{Atom, ContainerId, Direction, EndpointOutput, InstanceId, MapScopeError, SignalValue};

#[test]
fn test_updates_share_one_batch_per_tick() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));

    let freq = EndpointBuilder::output("freq").build(&h.ctx);
    let gain = EndpointBuilder::output("gain").build(&h.ctx);
    freq.send_float(440.0).unwrap();
    gain.send_float(0.5).unwrap();
    freq.send_float(220.0).unwrap();
    assert!(h.network.batches("synth").is_empty());

    synth.tick();
    let batches = h.network.batches("synth");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].updates.len(), 3);

    gain.send_float(0.75).unwrap();
    synth.tick();
    // an idle tick sends nothing
    synth.tick();

    let batches = h.network.batches("synth");
    assert_eq!(batches.len(), 2);
    assert!(batches[1].time >= batches[0].time);
}

#[test]
fn test_local_release_follows_update_in_batch() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));

    let ep = EndpointBuilder::output("voice").instance(2).build(&h.ctx);
    ep.send_float(1.0).unwrap();
    ep.release().unwrap();
    synth.tick();

    let updates = sent_updates(&h.network, "synth");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].value, Some(SignalValue::Float(vec![1.0])));
    assert_eq!(updates[1].instance, Some(InstanceId(2)));
    assert_eq!(updates[1].value, None);
    assert!(synth.active_instances("voice", Direction::Out).is_empty());

    // writing again reactivates the instance
    ep.send_float(2.0).unwrap();
    assert_eq!(
        synth.active_instances("voice", Direction::Out),
        vec![InstanceId(2)]
    );
}

#[test]
fn test_release_without_instance_is_noop() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));

    let ep = EndpointBuilder::output("freq").build(&h.ctx);
    ep.release().unwrap();
    synth.tick();
    assert!(h.network.batches("synth").is_empty());
}

#[test]
fn test_list_split_into_vectors() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));

    let ep = EndpointBuilder::output("pos").length(2).build(&h.ctx);
    ep.send_list(&[
        Atom::Float(0.0),
        Atom::Float(1.0),
        Atom::Int(2),
        Atom::Float(3.0),
    ])
    .unwrap();
    synth.tick();

    let values: Vec<_> = sent_updates(&h.network, "synth")
        .into_iter()
        .filter_map(|u| u.value)
        .collect();
    assert_eq!(
        values,
        vec![
            SignalValue::Float(vec![0.0, 1.0]),
            SignalValue::Float(vec![2.0, 3.0]),
        ]
    );
    assert_eq!(
        synth.instance_value("pos", Direction::Out, InstanceId(0)),
        Some(SignalValue::Float(vec![2.0, 3.0]))
    );
}

#[test]
fn test_bad_lists_are_rejected() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let ep = EndpointBuilder::output("pos").length(2).build(&h.ctx);

    let odd = ep.send_list(&[Atom::Float(0.0), Atom::Float(1.0), Atom::Float(2.0)]);
    assert!(matches!(odd, Err(MapScopeError::Type(_))));

    let symbol = ep.send_list(&[Atom::Float(0.0), Atom::symbol("x")]);
    assert!(matches!(symbol, Err(MapScopeError::Type(_))));

    let scalar = ep.send_float(1.0);
    assert!(matches!(scalar, Err(MapScopeError::Type(_))));

    synth.tick();
    synth.tick();
    assert!(sent_updates(&h.network, "synth").is_empty());
}

#[test]
fn test_int_signal_truncates_floats() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let ep = EndpointBuilder::output("step").int().build(&h.ctx);

    ep.send_float(2.9).unwrap();
    assert_eq!(
        synth.instance_value("step", Direction::Out, InstanceId(0)),
        Some(SignalValue::Int(vec![2]))
    );
}

#[test]
fn test_range_properties_expand_to_length() {
    let h = Harness::new();
    let _synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let _ep = EndpointBuilder::output("pos")
        .length(3)
        .property("min", [Atom::Int(0)])
        .property("max", [Atom::Int(1), Atom::Float(2.5)])
        .build(&h.ctx);

    assert_eq!(
        h.network.signal_property("synth", "pos", Direction::Out, PROP_MIN),
        Some(PropertyValue::Float(vec![0.0, 0.0, 0.0]))
    );
    assert_eq!(
        h.network.signal_property("synth", "pos", Direction::Out, PROP_MAX),
        Some(PropertyValue::Float(vec![1.0, 2.5, 1.0]))
    );
}

#[test]
fn test_metadata_properties_forwarded() {
    let h = Harness::new();
    let _synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let _ep = EndpointBuilder::output("freq")
        .property("unit", [Atom::symbol("Hz")])
        .property("weights", [Atom::Int(1), Atom::Float(0.5)])
        .property("bad", [Atom::Int(1), Atom::symbol("x")])
        .build(&h.ctx);

    let prop = |key: &str| h.network.signal_property("synth", "freq", Direction::Out, key);
    assert_eq!(prop("unit"), Some(PropertyValue::Str(vec!["Hz".to_string()])));
    assert_eq!(prop("weights"), Some(PropertyValue::Float(vec![1.0, 0.5])));
    assert_eq!(prop("bad"), None);
}

#[test]
fn test_joining_endpoint_properties_apply_only_at_runtime() {
    let h = Harness::new();
    let _synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let _first = EndpointBuilder::output("freq")
        .property("unit", [Atom::symbol("Hz")])
        .build(&h.ctx);
    let second = EndpointBuilder::output("freq")
        .property("unit", [Atom::symbol("kHz")])
        .build(&h.ctx);

    let unit = || h.network.signal_property("synth", "freq", Direction::Out, "unit");
    assert_eq!(unit(), Some(PropertyValue::Str(vec!["Hz".to_string()])));

    second.add_properties(&[Atom::symbol("@unit"), Atom::symbol("mHz")]);
    assert_eq!(unit(), Some(PropertyValue::Str(vec!["mHz".to_string()])));

    second.add_properties(&[Atom::symbol("@max"), Atom::Int(10)]);
    assert_eq!(
        h.network.signal_property("synth", "freq", Direction::Out, PROP_MAX),
        Some(PropertyValue::Float(vec![10.0]))
    );
}

#[test]
fn test_values_route_between_devices() {
    let h = Harness::new();
    let left = h.container(ContainerId::ROOT);
    let right = h.container(ContainerId::ROOT);

    let synth = device(&h.ctx, left, "synth");
    let monitor = device(&h.ctx, right, "monitor");
    let out = EndpointBuilder::output("freq").container(left).build(&h.ctx);
    let input = EndpointBuilder::input("freq").container(right).build(&h.ctx);
    h.network.connect("synth", "freq", "monitor", "freq");

    assert!(synth.tick_until_ready(1));
    assert!(monitor.tick_until_ready(1));

    out.send_float(440.0).unwrap();
    synth.tick();
    monitor.tick();

    assert_eq!(
        input.drain_outputs(),
        vec![EndpointOutput::Scalar(Atom::Float(440.0))]
    );
}

#[test]
fn test_poll_threads_deliver_routed_values() {
    let h = Harness::new();
    let left = h.container(ContainerId::ROOT);
    let right = h.container(ContainerId::ROOT);

    let mut synth = device(&h.ctx, left, "synth");
    let mut monitor = device(&h.ctx, right, "monitor");
    let out = EndpointBuilder::output("voice")
        .container(left)
        .instance(3)
        .build(&h.ctx);
    let input = EndpointBuilder::input("voice").container(right).build(&h.ctx);
    h.network.connect("synth", "voice", "monitor", "voice");

    synth.start().unwrap();
    monitor.start().unwrap();
    assert!(wait_until(|| synth.is_ready() && monitor.is_ready()));

    out.send_float(0.5).unwrap();
    out.release().unwrap();

    let mut received = Vec::new();
    assert!(wait_until(|| {
        received.extend(input.drain_outputs());
        received.len() >= 2
    }));
    assert_eq!(
        output_atoms(&received),
        vec![
            vec![Atom::Int(3), Atom::Float(0.5)],
            vec![Atom::Int(3), Atom::symbol("release"), Atom::symbol("upstream")],
        ]
    );

    synth.stop();
    monitor.stop();
}

#[test]
fn test_out_of_range_int_is_dropped() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));
    let ep = EndpointBuilder::output("step").int().build(&h.ctx);

    let result = ep.send_int(5_000_000_000);
    assert!(matches!(result, Err(MapScopeError::Type(_))));
    synth.tick();
    assert!(sent_updates(&h.network, "synth").is_empty());

    ep.send_int(i32::MAX as i64).unwrap();
    synth.tick();
    assert_eq!(
        sent_updates(&h.network, "synth")[0].value,
        Some(SignalValue::Int(vec![i32::MAX]))
    );
}
