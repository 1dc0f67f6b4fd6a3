use crate::layer::{Layer, LayerBase};
use crate::layers::activation::ElementwiseLayer;
use crate::layers::affine::{ChannelAffineLayer, NormalizeLayer};
use crate::layers::combine::{ConcatLayer, EltwiseLayer, SliceLayer};
use crate::layers::conv::ConvolutionLayer;
use crate::layers::convert::{CastLayer, FillLayer};
use crate::layers::dense::InnerProductLayer;
use crate::layers::detection_output::DetectionOutputLayer;
use crate::layers::input::{ConstLayer, InputLayer, StubLayer};
use crate::layers::meta::MetaLayer;
use crate::layers::pooling::PoolingLayer;
use crate::layers::prior_box::PriorBoxLayer;
use crate::layers::region::RegionLayer;
use crate::layers::softmax::SoftmaxLayer;
use crate::layers::spatial::{PadLayer, UpsampleLayer};
use crate::layers::view::{PermuteLayer, ViewLayer};
use crate::layers::yolo::YoloLayer;
use crate::param::{LayerParam, LayerType};
use crate::result::{NetworkError, NetworkResult};

/// Whether this workspace ships an implementation for the given layer type.
pub fn is_supported(ty: LayerType) -> bool {
    !matches!(
        ty,
        LayerType::Gather | LayerType::Interp | LayerType::Lrn | LayerType::Reorg | LayerType::Switch | LayerType::Unpack
    )
}

/// Construct the layer described by `param`.
///
/// Unknown type tags and known tags without an implementation are errors, nothing is silently dropped.
pub fn create_layer(param: &LayerParam) -> NetworkResult<Box<dyn Layer>> {
    let ty = param
        .layer_type()
        .ok_or_else(|| NetworkError::UnknownLayerType(param.node()))?;
    if !is_supported(ty) {
        return Err(NetworkError::UnsupportedLayerType(param.node()));
    }

    let base = LayerBase::new(param.clone());
    let layer: Box<dyn Layer> = match ty {
        LayerType::Input => Box::new(InputLayer::new(base)),
        LayerType::Meta => Box::new(MetaLayer::new(base)),
        LayerType::Const => Box::new(ConstLayer::new(base)),
        LayerType::Stub | LayerType::Dropout => Box::new(StubLayer::new(base)),

        LayerType::Relu | LayerType::Sigmoid | LayerType::Log | LayerType::UnaryOperation | LayerType::RestrictRange => {
            Box::new(ElementwiseLayer::new(base, ty))
        }
        LayerType::Bias | LayerType::Scale | LayerType::BatchNorm => Box::new(ChannelAffineLayer::new(base, ty)),
        LayerType::Normalize => Box::new(NormalizeLayer::new(base)),

        LayerType::Eltwise | LayerType::Shortcut => Box::new(EltwiseLayer::new(base, ty)),
        LayerType::Concat => Box::new(ConcatLayer::new(base)),
        LayerType::Slice => Box::new(SliceLayer::new(base)),

        LayerType::Flatten | LayerType::Reshape | LayerType::Squeeze | LayerType::ExpandDims => {
            Box::new(ViewLayer::new(base, ty))
        }
        LayerType::Permute => Box::new(PermuteLayer::new(base)),
        LayerType::Softmax => Box::new(SoftmaxLayer::new(base)),

        LayerType::InnerProduct => Box::new(InnerProductLayer::new(base)),
        LayerType::Convolution => Box::new(ConvolutionLayer::new(base)),
        LayerType::Pooling => Box::new(PoolingLayer::new(base)),
        LayerType::Upsample => Box::new(UpsampleLayer::new(base)),
        LayerType::Pad => Box::new(PadLayer::new(base)),
        LayerType::Cast => Box::new(CastLayer::new(base)),
        LayerType::Fill => Box::new(FillLayer::new(base)),

        LayerType::PriorBox => Box::new(PriorBoxLayer::new(base)),
        LayerType::Region => Box::new(RegionLayer::new(base)),
        LayerType::Yolo => Box::new(YoloLayer::new(base)),
        LayerType::DetectionOutput => Box::new(DetectionOutputLayer::new(base)),

        LayerType::Gather | LayerType::Interp | LayerType::Lrn | LayerType::Reorg | LayerType::Switch | LayerType::Unpack => {
            return Err(NetworkError::UnsupportedLayerType(param.node()))
        }
    };
    Ok(layer)
}
