//! Integration tests for device scopes and endpoint binding
//!
//! These tests validate the binding workflow end to end on the loopback
//! network:
//! - Signal counts as endpoints come and go
//! - Creation order independence
//! - One device per scope
//! - Rebinding after a device goes away

mod common;

use common::builders::{device, EndpointBuilder};
use common::mock_helpers::sent_releases;
use common::Harness;
use mapscope::network::{PROP_INTERFACE, PROP_NAME};
use mapscope::types::PropertyValue;
use mapscope::{Atom, ContainerId, Device, DeviceReport, Direction, InstanceId};

#[test]
fn test_signal_counts_follow_endpoints() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");

    let a = EndpointBuilder::output("freq").build(&h.ctx);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumOutputs(1)]);

    let b = EndpointBuilder::output("freq").build(&h.ctx);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumOutputs(1)]);

    let gain = EndpointBuilder::output("gain").build(&h.ctx);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumOutputs(2)]);

    let input = EndpointBuilder::input("freq").build(&h.ctx);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumInputs(1)]);
    assert_eq!(h.network.signal_count("synth", Direction::Out), 2);

    // dropping a shared signal's endpoint keeps the signal
    drop(a);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumOutputs(2)]);
    assert_eq!(synth.bound_endpoints("freq", Direction::Out), vec![b.id()]);

    drop(b);
    assert_eq!(synth.drain_reports(), vec![DeviceReport::NumOutputs(1)]);
    assert!(synth.bound_endpoints("freq", Direction::Out).is_empty());

    drop(gain);
    drop(input);
    assert_eq!(
        synth.drain_reports(),
        vec![DeviceReport::NumOutputs(0), DeviceReport::NumInputs(0)]
    );
    assert!(h.network.signals("synth").is_empty());
}

#[test]
fn test_endpoints_created_before_device_are_bound() {
    let h = Harness::new();
    let voice = h.container(ContainerId::ROOT);
    let nested = h.container(voice);

    let a = EndpointBuilder::output("freq").container(voice).build(&h.ctx);
    let b = EndpointBuilder::input("gate").container(nested).build(&h.ctx);
    h.tree.place_endpoint(voice, &a).unwrap();
    h.tree.place_endpoint(nested, &b).unwrap();
    assert!(!a.is_bound());
    assert!(!b.is_bound());

    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(a.is_bound());
    assert!(b.is_bound());
    assert_eq!(synth.signal_count(Direction::Out), 1);
    assert_eq!(synth.signal_count(Direction::In), 1);
}

#[test]
fn test_endpoint_outside_scope_stays_unbound() {
    let h = Harness::new();
    let left = h.container(ContainerId::ROOT);
    let right = h.container(ContainerId::ROOT);

    let _synth = device(&h.ctx, left, "synth");
    let stray = EndpointBuilder::output("freq").container(right).build(&h.ctx);
    assert!(!stray.is_bound());
    assert!(h.network.signals("synth").is_empty());
}

#[test]
fn test_device_in_descendant_of_device_fails() {
    let h = Harness::new();
    let child = h.container(ContainerId::ROOT);
    let outer = device(&h.ctx, ContainerId::ROOT, "outer");
    h.tree.place_device(ContainerId::ROOT, &outer).unwrap();

    let err = Device::new(&h.ctx, child, &[Atom::symbol("inner")])
        .err()
        .unwrap();
    assert!(err.is_configuration());
    // the refused device leaves no trace on the network
    assert!(!h.network.is_connected("inner"));
}

#[test]
fn test_device_enclosing_existing_device_fails() {
    let h = Harness::new();
    let child = h.container(ContainerId::ROOT);
    let inner = device(&h.ctx, child, "inner");
    h.tree.place_device(child, &inner).unwrap();

    let err = Device::new(&h.ctx, ContainerId::ROOT, &[Atom::symbol("outer")])
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert_eq!(h.ctx.scopes().len(), 1);
}

#[test]
fn test_sibling_scopes_each_get_a_device() {
    let h = Harness::new();
    let left = h.container(ContainerId::ROOT);
    let right = h.container(ContainerId::ROOT);

    let a = device(&h.ctx, left, "left");
    h.tree.place_device(left, &a).unwrap();
    let b = device(&h.ctx, right, "right");
    h.tree.place_device(right, &b).unwrap();
    assert_eq!(h.ctx.scopes().len(), 2);
}

#[test]
fn test_device_free_scope_can_be_reclaimed() {
    let h = Harness::new();
    let first = device(&h.ctx, ContainerId::ROOT, "synth");
    drop(first);
    assert!(h.ctx.scopes().is_empty());

    let second = Device::new(&h.ctx, ContainerId::ROOT, &[Atom::symbol("synth")]);
    assert!(second.is_ok());
}

#[test]
fn test_endpoint_rebinds_to_new_device() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let ep = EndpointBuilder::output("level")
        .property("unit", [Atom::symbol("dB")])
        .build(&h.ctx);
    h.tree.place_endpoint(ContainerId::ROOT, &ep).unwrap();
    assert!(ep.is_bound());

    drop(synth);
    assert!(!ep.is_bound());
    assert!(ep.send_float(1.0).is_err());

    let replacement = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(ep.is_bound());
    assert_eq!(replacement.signal_count(Direction::Out), 1);
    // deferred properties are applied again on the new signal
    assert_eq!(
        h.network
            .signal_property("synth", "level", Direction::Out, "unit"),
        Some(PropertyValue::Str(vec!["dB".to_string()]))
    );
}

#[test]
fn test_mismatched_endpoint_is_refused() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");

    let first = EndpointBuilder::output("pos").length(2).build(&h.ctx);
    let wrong_type = EndpointBuilder::output("pos").int().length(2).build(&h.ctx);
    let wrong_len = EndpointBuilder::output("pos").length(3).build(&h.ctx);

    assert!(first.is_bound());
    assert!(!wrong_type.is_bound());
    assert!(!wrong_len.is_bound());
    assert_eq!(synth.bound_endpoints("pos", Direction::Out), vec![first.id()]);

    // refused endpoints leave silently
    drop(wrong_type);
    drop(wrong_len);
    assert_eq!(synth.bound_endpoints("pos", Direction::Out), vec![first.id()]);
}

#[test]
fn test_unbinding_instanced_endpoint_releases_its_instance() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    assert!(synth.tick_until_ready(1));

    let a = EndpointBuilder::output("voice").instance(1).build(&h.ctx);
    let b = EndpointBuilder::output("voice").instance(2).build(&h.ctx);
    assert_eq!(
        synth.active_instances("voice", Direction::Out),
        vec![InstanceId(1), InstanceId(2)]
    );

    drop(a);
    synth.tick();
    assert_eq!(sent_releases(&h.network, "synth"), vec![InstanceId(1)]);
    assert_eq!(
        synth.active_instances("voice", Direction::Out),
        vec![InstanceId(2)]
    );
    assert!(b.is_bound());
}

#[test]
fn test_ready_reports_describe_device() {
    let h = Harness::new();
    let synth = Device::new(
        &h.ctx,
        ContainerId::ROOT,
        &[
            Atom::symbol("/synth"),
            Atom::symbol("@interface"),
            Atom::symbol("en0"),
            Atom::symbol("@author"),
            Atom::symbol("jo"),
        ],
    )
    .unwrap();
    let _ep = EndpointBuilder::output("freq").build(&h.ctx);
    synth.drain_reports();

    assert!(synth.tick_until_ready(1));
    assert_eq!(
        synth.drain_reports(),
        vec![
            DeviceReport::Name("synth".to_string()),
            DeviceReport::Interface("en0".to_string()),
            DeviceReport::Address("127.0.0.1".to_string()),
            DeviceReport::Port(9000),
            DeviceReport::NumInputs(0),
            DeviceReport::NumOutputs(1),
        ]
    );
    assert_eq!(
        h.network.device_property("synth", "author"),
        Some(PropertyValue::Str(vec!["jo".to_string()]))
    );
    assert_eq!(
        h.network
            .device_property("synth", PROP_INTERFACE)
            .and_then(|p| p.as_str().map(str::to_string)),
        Some("en0".to_string())
    );
    assert!(h.network.device_property("synth", PROP_NAME).is_some());
}

#[test]
fn test_device_drop_removes_network_signals() {
    let h = Harness::new();
    let synth = device(&h.ctx, ContainerId::ROOT, "synth");
    let _a = EndpointBuilder::output("freq").build(&h.ctx);
    let _b = EndpointBuilder::input("gate").build(&h.ctx);
    assert_eq!(h.network.signals("synth").len(), 2);

    drop(synth);
    assert!(h.network.signals("synth").is_empty());
    assert!(!h.network.is_connected("synth"));
}
