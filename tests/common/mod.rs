//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use mapscope::config::EngineConfig;
use mapscope::network::LoopbackNetwork;
use mapscope::{ContainerId, HostContext, HostTree};
use std::sync::Arc;
use std::time::Duration;

/// A host tree, loopback network and context wired together
pub struct Harness {
    pub tree: Arc<HostTree>,
    pub network: LoopbackNetwork,
    pub ctx: HostContext,
}

impl Harness {
    /// Devices are ready immediately
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            ready_after_polls: 0,
            ..Default::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let tree = Arc::new(HostTree::new());
        let network = LoopbackNetwork::from_config(&config);
        let ctx = HostContext::new(tree.clone(), Arc::new(network.clone()), config)
            .with_index_resolver(tree.index_resolver());
        Self { tree, network, ctx }
    }

    /// Add a child container of `parent`
    pub fn container(&self, parent: ContainerId) -> ContainerId {
        self.tree.add_container(parent).unwrap()
    }
}

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Poll `condition` until it holds or the test timeout expires
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + test_timeout();
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
