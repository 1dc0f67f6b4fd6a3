use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::factory::create_layer;
use crate::ftz::FlushToZeroGuard;
use crate::layer::Layer;
use crate::linker::{link, Linked, Stage, StageKind};
use crate::param::{LayerType, MetaType, NetworkParam, Shape};
use crate::region::{NetSize, Region, RegionMerger};
use crate::result::{NetworkError, NetworkResult, ToNetworkResult};
use crate::table::{TensorId, TensorTable};
use crate::tensor::{DType, Tensor};
use crate::weights::WeightReader;

/// A loaded and linked network, ready for reshape and forward passes.
///
/// A network is either empty or fully loaded: any failure during [Network::load] leaves it empty.
///
/// ```no_run
/// # use ks_net::network::Network;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut network = Network::new();
/// network.load("detector.json", "detector.bin")?;
/// network.reshape(&["data"], &[vec![1, 3, 416, 416]], &[])?;
///
/// network.src_mut(0).f32_data_mut().fill(0.5);
/// network.forward();
///
/// let regions = network.get_regions(1920, 1080, 0.5, 0.45);
/// println!("found {} regions", regions.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Network {
    param: NetworkParam,
    linked: Linked,
    empty: bool,
}

impl Network {
    pub fn new() -> Self {
        Network {
            param: NetworkParam::default(),
            linked: Linked::default(),
            empty: true,
        }
    }

    /// Load a JSON description and its little-endian f32 weight file.
    pub fn load(&mut self, param_path: impl AsRef<Path>, weight_path: impl AsRef<Path>) -> NetworkResult<()> {
        let result = NetworkParam::load(param_path).and_then(|param| {
            let weight_path = weight_path.as_ref();
            let file = File::open(weight_path).to_network_result(weight_path)?;
            self.load_from(param, &mut BufReader::new(file))
        });
        if result.is_err() {
            self.clear();
        }
        result
    }

    /// Load from an in-memory description and any weight stream.
    pub fn load_from(&mut self, param: NetworkParam, weights: &mut dyn Read) -> NetworkResult<()> {
        self.clear();
        let result = self.try_load(param, weights);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn try_load(&mut self, param: NetworkParam, weights: &mut dyn Read) -> NetworkResult<()> {
        let mut reader = WeightReader::new(weights);
        let mut layers = Vec::with_capacity(param.layers.len());
        for layer_param in &param.layers {
            let mut layer = create_layer(layer_param)?;
            layer.load(&mut reader)?;
            layers.push(layer);
        }

        let trailing = reader.remaining_bytes();
        if trailing > 0 {
            warn!(
                "Weight stream has {} unused bytes after {} values",
                trailing,
                reader.consumed()
            );
        }

        self.linked = link(layers, &param.dst)?;
        self.param = param;
        self.empty = false;
        info!(
            "Loaded network '{}' with {} layers, {} weights",
            self.param.name,
            self.linked.stages.len(),
            reader.consumed()
        );

        if !self.param.is_dynamic() {
            self.reshape(&[], &[], &[])?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.param = NetworkParam::default();
        self.linked = Linked::default();
        self.empty = true;
    }

    /// Re-specialize every tensor shape.
    ///
    /// * `names` and `shapes` override the shape of the matching input nodes,
    ///   the graph inputs then become exactly these inputs in this order.
    ///   For a `Meta` input the shape values are written as its i32 payload instead.
    /// * `outputs` selects the output tensors by node name, in order.
    ///
    /// On failure the network can be partially reshaped and must not run forward before the next successful reshape.
    pub fn reshape(&mut self, names: &[&str], shapes: &[Shape], outputs: &[&str]) -> NetworkResult<()> {
        if self.empty {
            return Err(NetworkError::Empty);
        }
        if names.len() != shapes.len() {
            return Err(NetworkError::ShapeCountMismatch(names.len(), shapes.len()));
        }

        let Linked {
            table,
            stages,
            inputs,
            computes,
            src,
            dst,
            back,
        } = &mut self.linked;

        if names.is_empty() {
            for &index in inputs.iter() {
                run_reshape(table, &mut stages[index])?;
            }
        } else {
            let mut new_src = vec![];
            for (&name, shape) in names.iter().zip(shapes) {
                let stage = inputs
                    .iter()
                    .map(|&i| &stages[i])
                    .find(|s| s.layer.param().name == name)
                    .ok_or_else(|| NetworkError::UnknownInput(name.to_owned()))?;

                let id = stage.dst[0];
                if stage.layer.param().layer_type() == Some(LayerType::Meta) {
                    let values = shape.iter().map(|&d| d as i32).collect_vec();
                    table[id] = Tensor::i32_vector(&values);
                } else {
                    table[id].reshape_as(DType::F32, shape).map_err(|_| {
                        stage.layer.base().shape_error(format!("input shape {:?} is too large", shape))
                    })?;
                    new_src.push(id);
                }
            }
            *src = new_src;
        }

        for &index in computes.iter() {
            run_reshape(table, &mut stages[index])?;
        }

        if !outputs.is_empty() {
            let mut new_dst = vec![];
            let mut new_back = vec![];
            for &name in outputs {
                let index = computes
                    .iter()
                    .copied()
                    .find(|&i| stages[i].layer.param().name == name)
                    .ok_or_else(|| NetworkError::UnknownOutput(name.to_owned()))?;
                new_dst.push(stages[index].dst[0]);
                new_back.push(index);
            }
            *dst = new_dst;
            *back = new_back;
        }

        debug!(
            "Reshaped inputs {:?} to outputs {:?}",
            src.iter().map(|&id| table[id].shape().to_vec()).collect_vec(),
            dst.iter().map(|&id| table[id].shape().to_vec()).collect_vec(),
        );
        Ok(())
    }

    /// Run every compute stage in order with flush-to-zero enabled.
    pub fn forward(&mut self) {
        let _guard = FlushToZeroGuard::new();
        let Linked {
            table, stages, computes, ..
        } = &mut self.linked;

        for &index in computes.iter() {
            let stage = &mut stages[index];
            let (mut io, scratch) = table.stage_io(&stage.src, &stage.dst);
            stage.layer.forward(&mut io, scratch);
        }
    }

    /// Collect the detected regions of every output produced by a detection head,
    /// scaled to the given image size and merged across all outputs.
    pub fn get_regions(&self, image_width: usize, image_height: usize, threshold: f32, overlap: f32) -> Vec<Region> {
        let net = self.net_size();
        let mut merger = RegionMerger::new(overlap);

        for (&id, &back) in self.linked.dst.iter().zip(&self.linked.back) {
            if let Some(source) = self.linked.stages[back].layer.as_region_source() {
                let candidates = source.candidates(&self.linked.table[id], net, threshold);
                merger.extend(
                    candidates
                        .into_iter()
                        .map(|c| c.scaled(image_width as f32, image_height as f32)),
                );
            }
        }
        merger.finish()
    }

    /// The spatial size of the first graph input, `(0, 0)` if there is none.
    pub fn net_size(&self) -> NetSize {
        match self.linked.src.first() {
            Some(&id) => {
                let tensor = &self.linked.table[id];
                NetSize {
                    width: tensor.axis(-1).unwrap_or(0),
                    height: tensor.axis(-2).unwrap_or(0),
                }
            }
            None => NetSize::default(),
        }
    }

    /// The value of the constant `Meta` node with the given name, without running the network.
    pub fn get_meta_const(&self, name: &str) -> Option<Tensor> {
        self.param
            .layers
            .iter()
            .find(|l| l.name == name && l.layer_type() == Some(LayerType::Meta) && l.meta.meta_type == MetaType::Const)
            .and_then(|l| l.meta.alpha.to_tensor().ok())
    }

    /// Run the network stage by stage, dumping the tensors of every stage to `f`.
    pub fn debug_print(&mut self, f: &mut dyn Write, weights: bool) -> std::io::Result<()> {
        const LIMIT: usize = 16;
        let _guard = FlushToZeroGuard::new();
        let Linked { table, stages, .. } = &mut self.linked;

        for stage in stages.iter_mut() {
            if stage.kind == StageKind::Compute {
                let (mut io, scratch) = table.stage_io(&stage.src, &stage.dst);
                stage.layer.forward(&mut io, scratch);
            }

            let param = stage.layer.param();
            writeln!(f, "Layer: {} : {}", param.name, param.layer_type)?;
            for (i, &id) in stage.src.iter().enumerate() {
                table[id].debug_print(f, &format!("src[{}] {}", i, table.name(id)), LIMIT)?;
            }
            if weights {
                for (i, weight) in stage.layer.weights().iter().enumerate() {
                    Tensor::F32(weight.clone()).debug_print(f, &format!("weight[{}]", i), LIMIT)?;
                }
            }
            for (i, &id) in stage.dst.iter().enumerate() {
                table[id].debug_print(f, &format!("dst[{}] {}", i, table.name(id)), LIMIT)?;
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn param(&self) -> &NetworkParam {
        &self.param
    }

    /// The graph input tensors.
    pub fn src(&self) -> Vec<&Tensor> {
        self.linked.src.iter().map(|&id| &self.linked.table[id]).collect()
    }

    pub fn src_mut(&mut self, index: usize) -> &mut Tensor {
        let id = self.linked.src[index];
        &mut self.linked.table[id]
    }

    pub fn src_names(&self) -> Vec<&str> {
        self.names(&self.linked.src)
    }

    /// The graph output tensors.
    pub fn dst(&self) -> Vec<&Tensor> {
        self.linked.dst.iter().map(|&id| &self.linked.table[id]).collect()
    }

    pub fn dst_names(&self) -> Vec<&str> {
        self.names(&self.linked.dst)
    }

    /// The last layer that produced each output.
    pub fn back(&self) -> Vec<&dyn Layer> {
        self.linked
            .back
            .iter()
            .map(|&i| self.linked.stages[i].layer.as_ref())
            .collect()
    }

    pub fn stage_count(&self) -> usize {
        self.linked.stages.len()
    }

    pub fn input_stage_count(&self) -> usize {
        self.linked.inputs.len()
    }

    /// The number of allocated buffers: every distinct tensor plus the scratch buffers.
    pub fn allocated_tensors(&self) -> usize {
        if self.empty {
            0
        } else {
            self.linked.table.allocated()
        }
    }

    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        let id = self.linked.table.find(name)?;
        Some(&self.linked.table[id])
    }

    pub fn tensor_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        let id = self.linked.table.find(name)?;
        Some(&mut self.linked.table[id])
    }

    fn names(&self, ids: &[TensorId]) -> Vec<&str> {
        ids.iter().map(|&id| self.linked.table.name(id)).collect()
    }
}

fn run_reshape(table: &mut TensorTable, stage: &mut Stage) -> NetworkResult<()> {
    let (mut io, scratch) = table.stage_io(&stage.src, &stage.dst);
    stage.layer.setup(&mut io, scratch)?;
    stage.layer.reshape(&mut io, scratch)
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Linked {
            table,
            stages,
            inputs: _,
            computes: _,
            src,
            dst,
            back,
        } = &self.linked;

        writeln!(f, "Network {{")?;
        writeln!(f, "  name: {:?},", self.param.name)?;
        writeln!(f, "  empty: {},", self.empty)?;
        writeln!(f, "  inputs: {:?},", self.src_names())?;
        writeln!(f, "  outputs: {:?},", self.dst_names())?;
        writeln!(f, "  allocated: {},", self.allocated_tensors())?;

        let input_shapes = src.iter().map(|&id| table[id].shape()).collect_vec();
        let output_shapes = dst.iter().map(|&id| table[id].shape()).collect_vec();
        writeln!(f, "  input_shapes: {:?},", input_shapes)?;
        writeln!(f, "  output_shapes: {:?},", output_shapes)?;
        writeln!(f, "  back: {:?},", back)?;

        writeln!(f, "  stages: [")?;
        for (i, stage) in stages.iter().enumerate() {
            let param = stage.layer.param();
            let names = |ids: &[TensorId]| ids.iter().map(|&id| table.name(id)).collect_vec();
            writeln!(
                f,
                "    {} {:?} {} '{}': {:?} -> {:?} {:?},",
                i,
                stage.kind,
                param.layer_type,
                param.name,
                names(&stage.src),
                names(&stage.dst),
                stage.dst.iter().map(|&id| table[id].shape()).collect_vec(),
            )?;
        }
        writeln!(f, "  ],")?;
        writeln!(f, "}}")?;

        Ok(())
    }
}
