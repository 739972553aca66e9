//! Loopback inspection helpers

use mapscope::network::{LoopbackNetwork, LoopbackUpdate};
use mapscope::{Atom, EndpointOutput, InstanceId, SignalValue};

/// Every update sent by `device`, flattened across batches
pub fn sent_updates(network: &LoopbackNetwork, device: &str) -> Vec<LoopbackUpdate> {
    network
        .batches(device)
        .into_iter()
        .flat_map(|b| b.updates)
        .collect()
}

/// Instance ids released by `device`, in send order
pub fn sent_releases(network: &LoopbackNetwork, device: &str) -> Vec<InstanceId> {
    sent_updates(network, device)
        .into_iter()
        .filter(|u| u.value.is_none())
        .filter_map(|u| u.instance)
        .collect()
}

/// Push a float vector onto an input signal of `device`
pub fn inject_float(network: &LoopbackNetwork, device: &str, signal: &str, id: i64, values: &[f32]) {
    network
        .inject_update(device, signal, InstanceId(id), SignalValue::Float(values.to_vec()))
        .unwrap();
}

/// Flatten outputs into host atoms
pub fn output_atoms(outputs: &[EndpointOutput]) -> Vec<Vec<Atom>> {
    outputs.iter().map(EndpointOutput::to_atoms).collect()
}
