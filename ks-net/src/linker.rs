//! Resolves the tensor names of a node list into a linked stage list.
//!
//! Linking happens in two passes. The first pass walks the nodes in declaration order,
//! resolves every source name and allocates (or aliases) every destination.
//! The second pass only looks at the finished stages and finds the leaf tensors,
//! the tensors that nothing consumes after their latest production.

use itertools::Itertools;
use tracing::{debug, warn};

use crate::layer::Layer;
use crate::result::{NetworkError, NetworkResult};
use crate::table::{TensorId, TensorTable};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StageKind {
    /// Feeds externally supplied values: an `Input` or a `Meta` input.
    Input,
    Compute,
}

/// A layer with its tensors resolved.
#[derive(Debug)]
pub struct Stage {
    pub kind: StageKind,
    pub layer: Box<dyn Layer>,
    pub src: Vec<TensorId>,
    pub dst: Vec<TensorId>,
}

/// The result of linking, everything a network needs to run.
#[derive(Debug, Default)]
pub struct Linked {
    pub table: TensorTable,
    pub stages: Vec<Stage>,
    /// Stage indices of the input stages, in declaration order.
    pub inputs: Vec<usize>,
    /// Stage indices of the compute stages, in declaration order.
    pub computes: Vec<usize>,
    /// Graph input tensors.
    pub src: Vec<TensorId>,
    /// Graph output tensors.
    pub dst: Vec<TensorId>,
    /// For every output, the index of the last stage that produced it.
    pub back: Vec<usize>,
}

/// Link constructed layers, in declaration order.
///
/// If `allowlist` is not empty, only the listed leaf tensors become outputs, in the listed order.
pub fn link(layers: Vec<Box<dyn Layer>>, allowlist: &[String]) -> NetworkResult<Linked> {
    let mut linked = Linked::default();

    // pass 1: name resolution and allocation
    for layer in layers {
        let param = layer.param();
        let node = param.node();

        let src = param
            .src
            .iter()
            .enumerate()
            .map(|(i, name)| {
                linked
                    .table
                    .find(name)
                    .ok_or_else(|| NetworkError::DanglingSource(node.clone(), i, name.clone()))
            })
            .collect::<NetworkResult<Vec<_>>>()?;

        let mut dst = vec![];
        for (i, name) in param.dst.iter().enumerate() {
            let id = if param.src.get(i) == Some(name) {
                src[i]
            } else if linked.table.find(name).is_some() {
                return Err(NetworkError::DuplicateDestination(node, name.clone()));
            } else {
                linked.table.alloc(name)
            };
            dst.push(id);
        }

        let kind = if param.is_input() {
            if param.dst.is_empty() || !param.src.is_empty() {
                return Err(NetworkError::InvalidInputStage(node));
            }
            StageKind::Input
        } else {
            StageKind::Compute
        };

        let index = linked.stages.len();
        match kind {
            StageKind::Input => {
                linked.inputs.push(index);
                linked.src.extend_from_slice(&dst);
            }
            StageKind::Compute => linked.computes.push(index),
        }
        linked.stages.push(Stage { kind, layer, src, dst });
    }

    // pass 2: leaves
    let leaves = find_leaves(&linked.stages, linked.table.len());
    let outputs = if allowlist.is_empty() {
        leaves
    } else {
        allowlist
            .iter()
            .filter_map(|name| {
                let found = linked
                    .table
                    .find(name)
                    .and_then(|id| leaves.iter().find(|&&(leaf, _)| leaf == id).copied());
                if found.is_none() {
                    warn!("Ignoring requested output '{}', it is not a leaf tensor", name);
                }
                found
            })
            .collect_vec()
    };
    let (dst, back): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
    linked.dst = dst;
    linked.back = back;

    debug!(
        "Linked {} stages ({} inputs), {} tensors, outputs {:?}",
        linked.stages.len(),
        linked.inputs.len(),
        linked.table.len(),
        linked.dst.iter().map(|&id| linked.table.name(id)).collect_vec()
    );
    Ok(linked)
}

/// Find every tensor with no consumer after its latest production,
/// together with that producing stage, ordered by tensor allocation order.
pub fn find_leaves(stages: &[Stage], tensor_count: usize) -> Vec<(TensorId, usize)> {
    let mut last_production = vec![None; tensor_count];
    let mut last_consumption = vec![None; tensor_count];

    for (index, stage) in stages.iter().enumerate() {
        for &id in &stage.src {
            last_consumption[id.index()] = Some(index);
        }
        for &id in &stage.dst {
            last_production[id.index()] = Some(index);
        }
    }

    let mut leaves = stages
        .iter()
        .flat_map(|stage| stage.dst.iter().copied())
        .unique()
        .filter_map(|id| {
            let produced = last_production[id.index()]?;
            let consumed_later = matches!(last_consumption[id.index()], Some(c) if c > produced);
            (!consumed_later).then_some((id, produced))
        })
        .collect_vec();
    leaves.sort_by_key(|&(id, _)| id);
    leaves
}
