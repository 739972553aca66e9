//! mapscope demo driver
//!
//! Builds a small host tree with two device scopes on the loopback network,
//! routes an output of one to an input of the other, and prints what
//! arrives. An optional first argument names an engine config file.

use anyhow::Context;
use mapscope::{
    config::EngineConfig, network::LoopbackNetwork, Atom, ContainerId, Device, Direction,
    Endpoint, HostContext, HostTree,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mapscope=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::load_or_default(std::env::args().nth(1));
    tracing::info!("Starting mapscope demo (poll every {:?})", config.poll_interval());

    let tree = Arc::new(HostTree::new());
    let network = LoopbackNetwork::from_config(&config);
    let ctx = HostContext::new(tree.clone(), Arc::new(network.clone()), config)
        .with_index_resolver(tree.index_resolver());

    let synth_scope = tree.add_container(ContainerId::ROOT)?;
    let monitor_scope = tree.add_container(ContainerId::ROOT)?;
    let voice_scope = tree.add_container(synth_scope)?;
    tree.set_index(voice_scope, 1)?;

    // endpoints first: the device picks them up when it is created
    let freq_out = Endpoint::new(
        &ctx,
        voice_scope,
        Direction::Out,
        &[
            Atom::symbol("freq"),
            Atom::symbol("f"),
            Atom::symbol("@instance"),
            Atom::symbol("polyindex"),
            Atom::symbol("@min"),
            Atom::Float(20.0),
            Atom::symbol("@max"),
            Atom::Float(20000.0),
        ],
    )?;
    tree.place_endpoint(voice_scope, &freq_out)?;

    let mut synth = Device::new(
        &ctx,
        synth_scope,
        &[Atom::symbol("/synth"), Atom::symbol("@author"), Atom::symbol("demo")],
    )
    .context("synth device")?;
    tree.place_device(synth_scope, &synth)?;

    let mut monitor = Device::new(&ctx, monitor_scope, &[Atom::symbol("monitor")])
        .context("monitor device")?;
    tree.place_device(monitor_scope, &monitor)?;
    let freq_in = Endpoint::new(
        &ctx,
        monitor_scope,
        Direction::In,
        &[Atom::symbol("freq"), Atom::symbol("f")],
    )?;
    tree.place_endpoint(monitor_scope, &freq_in)?;

    network.connect(synth.name(), "freq", monitor.name(), "freq");

    synth.start()?;
    monitor.start()?;

    let deadline = Instant::now() + Duration::from_secs(2);
    while !(synth.is_ready() && monitor.is_ready()) {
        if Instant::now() > deadline {
            anyhow::bail!("devices did not become ready");
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    for report in synth.drain_reports().into_iter().chain(monitor.drain_reports()) {
        tracing::info!("report: {} {}", report.selector(), report.value());
    }

    for step in 0..5 {
        freq_out.send_float(220.0 * f64::from(step + 1))?;
        std::thread::sleep(Duration::from_millis(10));
    }
    freq_out.release()?;
    std::thread::sleep(Duration::from_millis(20));

    for output in freq_in.drain_outputs() {
        let atoms: Vec<String> = output.to_atoms().iter().map(ToString::to_string).collect();
        tracing::info!("monitor/freq: {}", atoms.join(" "));
    }

    synth.stop();
    monitor.stop();
    tracing::info!("Demo finished");
    Ok(())
}
