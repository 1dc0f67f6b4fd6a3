use std::fmt::Debug;

use ndarray::ArrayD;

use crate::param::LayerParam;
use crate::region::RegionSource;
use crate::result::{NetworkError, NetworkResult, Node};
use crate::table::{ScratchPool, StageIo};
use crate::tensor::{DType, Tensor};
use crate::weights::WeightReader;

/// A single compute node of a network.
///
/// The runtime calls the methods of a layer in a fixed protocol:
/// * [Layer::load] once, right after construction, in declaration order.
/// * [Layer::setup] and [Layer::reshape] whenever the shapes of the graph inputs change.
///   Source shapes are final at that point, the layer sets the shapes of its destinations
///   and may compute payloads that only depend on shapes.
/// * [Layer::forward] for every inference pass. Shapes and element types were validated by the
///   preceding reshape, so forward has no error path.
///
/// Destinations can alias the source at the same position, see [StageIo::is_in_place].
/// Layers that change the memory layout must go through [StageIo::compute] or reject aliasing in setup.
///
/// The [ScratchPool] passed to every call is shared by all stages of the network.
/// A layer may resize and overwrite both buffers freely during one call,
/// but must never expect their contents to survive until the next call.
pub trait Layer: Debug {
    fn base(&self) -> &LayerBase;
    fn base_mut(&mut self) -> &mut LayerBase;

    fn param(&self) -> &LayerParam {
        &self.base().param
    }

    fn weights(&self) -> &[ArrayD<f32>] {
        &self.base().weights
    }

    /// Read the weight slices declared in the node description.
    fn load(&mut self, reader: &mut WeightReader) -> NetworkResult<()> {
        self.base_mut().load(reader)
    }

    fn setup(&mut self, io: &mut StageIo, scratch: &mut ScratchPool) -> NetworkResult<()> {
        let _ = (io, scratch);
        Ok(())
    }

    fn reshape(&mut self, io: &mut StageIo, scratch: &mut ScratchPool) -> NetworkResult<()>;

    fn forward(&mut self, io: &mut StageIo, scratch: &mut ScratchPool);

    /// The detection capability, only implemented by detection heads.
    fn as_region_source(&self) -> Option<&dyn RegionSource> {
        None
    }
}

/// The state every layer shares: its description and loaded weights.
#[derive(Debug, Clone)]
pub struct LayerBase {
    pub param: LayerParam,
    pub weights: Vec<ArrayD<f32>>,
}

impl LayerBase {
    pub fn new(param: LayerParam) -> Self {
        LayerBase { param, weights: vec![] }
    }

    pub fn node(&self) -> Node {
        self.param.node()
    }

    pub fn load(&mut self, reader: &mut WeightReader) -> NetworkResult<()> {
        let node = self.node();
        self.weights = self
            .param
            .weight
            .iter()
            .enumerate()
            .map(|(i, shape)| reader.read(&node, i, shape))
            .collect::<NetworkResult<_>>()?;
        Ok(())
    }

    pub fn error(&self, message: impl Into<String>) -> NetworkError {
        NetworkError::InvalidParam(self.node(), message.into())
    }

    pub fn shape_error(&self, message: impl Into<String>) -> NetworkError {
        NetworkError::InvalidShape(self.node(), message.into())
    }

    /// Set the element type and shape of destination `index`, rejecting shapes too large to allocate.
    pub fn reshape_dst(&self, io: &mut StageIo, index: usize, dtype: DType, shape: &[usize]) -> NetworkResult<()> {
        io.dst(index)
            .reshape_as(dtype, shape)
            .map_err(|_| self.shape_error(format!("destination {} shape {:?} is too large", index, shape)))
    }

    pub fn weight(&self, index: usize) -> NetworkResult<&ArrayD<f32>> {
        self.weights
            .get(index)
            .ok_or_else(|| NetworkError::MissingWeight(self.node(), index))
    }

    /// Check the number of sources and destinations, `None` means "at least one".
    pub fn require_io(&self, io: &StageIo, src: Option<usize>, dst: Option<usize>) -> NetworkResult<()> {
        let check = |name: &str, actual: usize, expected: Option<usize>| match expected {
            Some(expected) if actual != expected => Err(self.error(format!(
                "expected {} {} tensors, got {}",
                expected, name, actual
            ))),
            None if actual == 0 => Err(self.error(format!("expected at least one {} tensor", name))),
            _ => Ok(()),
        };
        check("source", io.src_len(), src)?;
        check("destination", io.dst_len(), dst)
    }

    pub fn forbid_in_place(&self, io: &StageIo) -> NetworkResult<()> {
        if io.any_in_place() {
            return Err(self.error("this layer cannot run in place"));
        }
        Ok(())
    }

    pub fn require_dtype(&self, tensor: &Tensor, dtype: DType, what: &str) -> NetworkResult<()> {
        if tensor.dtype() != dtype {
            return Err(self.shape_error(format!("{} must be {:?}, got {:?}", what, dtype, tensor)));
        }
        Ok(())
    }

    pub fn require_rank(&self, tensor: &Tensor, rank: usize, what: &str) -> NetworkResult<()> {
        if tensor.rank() != rank {
            return Err(self.shape_error(format!("{} must have rank {}, got {:?}", what, rank, tensor)));
        }
        Ok(())
    }

    /// Resolve a possibly negative axis against a rank.
    pub fn axis(&self, axis: i64, rank: usize) -> NetworkResult<usize> {
        crate::tensor::resolve_axis(axis as isize, rank)
            .ok_or_else(|| self.shape_error(format!("axis {} out of range for rank {}", axis, rank)))
    }
}
