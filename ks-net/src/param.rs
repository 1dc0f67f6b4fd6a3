use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::result::{NetworkError, NetworkResult, Node, ToNetworkResult};
use crate::tensor::{DType, Tensor};

pub type Shape = Vec<usize>;

/// A complete network description: the ordered node list and an optional output allowlist.
///
/// Descriptions are stored as JSON. Every configuration block has defaults,
/// so a node only needs to list the fields that differ:
/// ```
/// # use ks_net::param::NetworkParam;
/// let param = NetworkParam::from_json(r#"{
///     "name": "tiny",
///     "layers": [
///         { "name": "data", "type": "Input", "dst": ["data"], "input": { "shape": [[1, 3, 8, 8]] } },
///         { "name": "relu", "type": "Relu", "src": ["data"], "dst": ["relu"] }
///     ]
/// }"#).unwrap();
/// assert_eq!(param.layers.len(), 2);
/// assert!(!param.is_dynamic());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParam {
    pub name: String,
    pub layers: Vec<LayerParam>,
    /// Explicit output allowlist, empty means every leaf tensor is an output.
    pub dst: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerParam {
    pub name: String,
    /// The type tag, kept as a string so unknown tags can be reported with the node they belong to.
    #[serde(rename = "type")]
    pub layer_type: String,
    pub src: Vec<String>,
    pub dst: Vec<String>,
    /// Shapes of the weight slices this node reads from the weight stream, in order.
    pub weight: Vec<Shape>,

    pub input: InputParam,
    pub meta: MetaParam,
    pub convolution: ConvolutionParam,
    pub pooling: PoolingParam,
    pub inner_product: InnerProductParam,
    pub eltwise: EltwiseParam,
    pub concat: ConcatParam,
    pub softmax: SoftmaxParam,
    pub bias: BiasParam,
    pub scale: ScaleParam,
    pub batch_norm: BatchNormParam,
    pub normalize: NormalizeParam,
    pub relu: ReluParam,
    pub log: LogParam,
    pub restrict_range: RestrictRangeParam,
    pub unary_operation: UnaryOperationParam,
    pub flatten: FlattenParam,
    pub reshape: ReshapeParam,
    pub squeeze: SqueezeParam,
    pub expand_dims: ExpandDimsParam,
    pub permute: PermuteParam,
    pub upsample: UpsampleParam,
    pub pad: PadParam,
    pub slice: SliceParam,
    pub cast: CastParam,
    pub fill: FillParam,
    pub prior_box: PriorBoxParam,
    pub region: RegionParam,
    pub yolo: YoloParam,
    pub detection_output: DetectionOutputParam,
}

macro_rules! layer_types {
    ($($variant:ident),* $(,)?) => {
        /// The closed set of node kinds a description can use.
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub enum LayerType {
            $($variant,)*
        }

        impl LayerType {
            pub const ALL: &'static [LayerType] = &[$(LayerType::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(LayerType::$variant => stringify!($variant),)*
                }
            }

            pub fn from_name(name: &str) -> Option<LayerType> {
                match name {
                    $(stringify!($variant) => Some(LayerType::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

layer_types!(
    BatchNorm,
    Bias,
    Cast,
    Concat,
    Const,
    Convolution,
    DetectionOutput,
    Dropout,
    Eltwise,
    ExpandDims,
    Fill,
    Flatten,
    Gather,
    InnerProduct,
    Input,
    Interp,
    Log,
    Lrn,
    Meta,
    Normalize,
    Pad,
    Permute,
    Pooling,
    PriorBox,
    Region,
    Relu,
    Reorg,
    Reshape,
    RestrictRange,
    Scale,
    Shortcut,
    Sigmoid,
    Slice,
    Softmax,
    Squeeze,
    Stub,
    Switch,
    UnaryOperation,
    Unpack,
    Upsample,
    Yolo,
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParam {
    /// One shape per destination, an empty list leaves the input shape to be specified at reshape time.
    pub shape: Vec<Shape>,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum MetaType {
    #[default]
    Input,
    Const,
    Shape,
    Add,
    Sub,
    Mul,
    Div,
    Pack,
    Gather,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaParam {
    #[serde(rename = "type")]
    pub meta_type: MetaType,
    pub alpha: TensorParam,
}

/// A literal tensor value stored inside the description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorParam {
    #[serde(rename = "type")]
    pub dtype: DType,
    pub shape: Shape,
    pub f32: Vec<f32>,
    pub i32: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvolutionParam {
    /// Output channel count, zero means "take it from the weight shape".
    pub output_num: usize,
    /// `[kernel_h, kernel_w]` or a single square size.
    pub kernel: Vec<usize>,
    pub stride: Vec<usize>,
    pub dilation: Vec<usize>,
    /// `[pad]`, `[pad_y, pad_x]` or `[top, left, bottom, right]`.
    pub pad: Vec<usize>,
    pub group: usize,
    pub bias_term: bool,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum PoolingMethod {
    #[default]
    Max,
    Average,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum RoundingType {
    #[default]
    Ceil,
    Floor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolingParam {
    pub method: PoolingMethod,
    pub kernel: Vec<usize>,
    pub stride: Vec<usize>,
    pub pad: Vec<usize>,
    pub global_pooling: bool,
    pub rounding_type: RoundingType,
    /// Average pooling divides by the count of non-padding elements only.
    pub exclude_pad: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InnerProductParam {
    pub output_num: usize,
    pub bias_term: bool,
    pub transpose_b: bool,
    pub axis: usize,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum EltwiseOperation {
    Product,
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EltwiseParam {
    pub operation: EltwiseOperation,
    /// Per-source coefficients for `Sum`, empty means all ones.
    pub coefficients: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatParam {
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftmaxParam {
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasParam {
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleParam {
    pub axis: usize,
    pub bias_term: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchNormParam {
    pub eps: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParam {
    pub across_spatial: bool,
    pub channel_shared: bool,
    pub eps: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReluParam {
    pub negative_slope: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogParam {
    /// Logarithm base, a non-positive value selects the natural logarithm.
    pub base: f32,
    pub scale: f32,
    pub shift: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictRangeParam {
    pub lower: f32,
    pub upper: f32,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum UnaryOperationType {
    #[default]
    Abs,
    Neg,
    Exp,
    Log,
    Sqrt,
    Rsqrt,
    Tanh,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnaryOperationParam {
    #[serde(rename = "type")]
    pub op: UnaryOperationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlattenParam {
    pub axis: i64,
    pub end_axis: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReshapeParam {
    /// Target shape, `0` copies the input dimension at the same position and a single `-1` is inferred.
    pub shape: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeParam {
    /// Axes to remove, empty removes every axis of size one.
    pub axis: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandDimsParam {
    pub axis: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermuteParam {
    pub order: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpsampleParam {
    pub scale: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PadParam {
    /// All leading paddings followed by all trailing paddings, one of each per axis.
    pub pads: Vec<usize>,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceParam {
    pub axis: usize,
    /// Split points along `axis`, empty splits evenly over the destinations.
    pub slice_point: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastParam {
    #[serde(rename = "type")]
    pub dtype: DType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillParam {
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorBoxParam {
    pub min_size: Vec<f32>,
    pub max_size: Vec<f32>,
    pub aspect_ratio: Vec<f32>,
    pub flip: bool,
    pub clip: bool,
    pub variance: Vec<f32>,
    /// `[step_h, step_w]` in image pixels, empty derives the step from the image and feature map sizes.
    pub step: Vec<f32>,
    pub offset: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParam {
    pub coords: usize,
    pub classes: usize,
    pub num: usize,
    pub softmax: bool,
    pub anchors: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloParam {
    pub classes: usize,
    /// Indices into `anchors` (as pairs) used by this head.
    pub mask: Vec<usize>,
    pub anchors: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmsParam {
    pub nms_threshold: f32,
    /// Maximum candidates per class before suppression, zero keeps all of them.
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOutputParam {
    pub num_classes: usize,
    pub share_location: bool,
    pub background_label_id: i64,
    pub nms: NmsParam,
    pub variance_encoded_in_target: bool,
    /// Maximum detections per image after suppression, zero keeps all of them.
    pub keep_top_k: usize,
    pub confidence_threshold: f32,
}

impl NetworkParam {
    pub fn load(path: impl AsRef<Path>) -> NetworkResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).to_network_result(path)?;
        serde_json::from_str(&text).map_err(|e| NetworkError::Parse(Some(path.to_owned()), e))
    }

    pub fn from_json(text: &str) -> NetworkResult<Self> {
        serde_json::from_str(text).map_err(|e| NetworkError::Parse(None, e))
    }

    pub fn to_json(&self) -> String {
        // serializing plain data structs with string keys cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Whether some input shape is only known at reshape time,
    /// either an `Input` without shapes or a `Meta` input.
    pub fn is_dynamic(&self) -> bool {
        self.layers.iter().any(|layer| match layer.layer_type() {
            Some(LayerType::Input) => layer.input.shape.is_empty(),
            Some(LayerType::Meta) => layer.meta.meta_type == MetaType::Input,
            _ => false,
        })
    }
}

impl LayerParam {
    pub fn new(name: &str, layer_type: LayerType, src: &[&str], dst: &[&str]) -> Self {
        LayerParam {
            name: name.to_owned(),
            layer_type: layer_type.name().to_owned(),
            src: src.iter().map(|&s| s.to_owned()).collect(),
            dst: dst.iter().map(|&s| s.to_owned()).collect(),
            ..Default::default()
        }
    }

    pub fn layer_type(&self) -> Option<LayerType> {
        LayerType::from_name(&self.layer_type)
    }

    pub fn node(&self) -> Node {
        Node::from(self)
    }

    /// Whether this node feeds externally supplied values: a true input or a `Meta` input.
    pub fn is_input(&self) -> bool {
        match self.layer_type() {
            Some(LayerType::Input) => true,
            Some(LayerType::Meta) => self.meta.meta_type == MetaType::Input,
            _ => false,
        }
    }
}

impl TensorParam {
    pub fn is_empty(&self) -> bool {
        self.f32.is_empty() && self.i32.is_empty()
    }

    pub fn from_i32(values: &[i32]) -> Self {
        TensorParam {
            dtype: DType::I32,
            shape: vec![values.len()],
            f32: vec![],
            i32: values.to_vec(),
        }
    }

    /// Build the tensor this literal describes, an empty `shape` means a flat vector of all values.
    pub fn to_tensor(&self) -> NetworkResult<Tensor> {
        let len = match self.dtype {
            DType::F32 => self.f32.len(),
            DType::I32 => self.i32.len(),
        };
        let shape = if self.shape.is_empty() { vec![len] } else { self.shape.clone() };

        let tensor = match self.dtype {
            DType::F32 => Tensor::from_f32(&shape, self.f32.clone()),
            DType::I32 => Tensor::from_i32(&shape, self.i32.clone()),
        };
        tensor.map_err(|e| NetworkError::InvalidTensor(format!("literal of shape {:?}: {}", shape, e)))
    }
}

impl Default for ConvolutionParam {
    fn default() -> Self {
        ConvolutionParam {
            output_num: 0,
            kernel: vec![],
            stride: vec![],
            dilation: vec![],
            pad: vec![],
            group: 1,
            bias_term: true,
        }
    }
}

impl Default for InnerProductParam {
    fn default() -> Self {
        InnerProductParam {
            output_num: 0,
            bias_term: true,
            transpose_b: false,
            axis: 1,
        }
    }
}

impl Default for ConcatParam {
    fn default() -> Self {
        ConcatParam { axis: 1 }
    }
}

impl Default for SoftmaxParam {
    fn default() -> Self {
        SoftmaxParam { axis: 1 }
    }
}

impl Default for BiasParam {
    fn default() -> Self {
        BiasParam { axis: 1 }
    }
}

impl Default for ScaleParam {
    fn default() -> Self {
        ScaleParam {
            axis: 1,
            bias_term: false,
        }
    }
}

impl Default for BatchNormParam {
    fn default() -> Self {
        BatchNormParam { eps: 1e-5 }
    }
}

impl Default for NormalizeParam {
    fn default() -> Self {
        NormalizeParam {
            across_spatial: false,
            channel_shared: false,
            eps: 1e-10,
        }
    }
}

impl Default for LogParam {
    fn default() -> Self {
        LogParam {
            base: -1.0,
            scale: 1.0,
            shift: 0.0,
        }
    }
}

impl Default for RestrictRangeParam {
    fn default() -> Self {
        RestrictRangeParam {
            lower: -f32::MAX,
            upper: f32::MAX,
        }
    }
}

impl Default for FlattenParam {
    fn default() -> Self {
        FlattenParam { axis: 1, end_axis: -1 }
    }
}

impl Default for UpsampleParam {
    fn default() -> Self {
        UpsampleParam { scale: 2 }
    }
}

impl Default for SliceParam {
    fn default() -> Self {
        SliceParam {
            axis: 1,
            slice_point: vec![],
        }
    }
}

impl Default for PriorBoxParam {
    fn default() -> Self {
        PriorBoxParam {
            min_size: vec![],
            max_size: vec![],
            aspect_ratio: vec![],
            flip: true,
            clip: false,
            variance: vec![0.1],
            step: vec![],
            offset: 0.5,
        }
    }
}

impl Default for RegionParam {
    fn default() -> Self {
        RegionParam {
            coords: 4,
            classes: 20,
            num: 5,
            softmax: true,
            anchors: vec![],
        }
    }
}

impl Default for NmsParam {
    fn default() -> Self {
        NmsParam {
            nms_threshold: 0.3,
            top_k: 0,
        }
    }
}

impl Default for DetectionOutputParam {
    fn default() -> Self {
        DetectionOutputParam {
            num_classes: 0,
            share_location: true,
            background_label_id: 0,
            nms: NmsParam::default(),
            variance_encoded_in_target: false,
            keep_top_k: 0,
            confidence_threshold: 0.0,
        }
    }
}
