use crate::error::Error;
use crate::unmixing::blend_mode::BlendMode;
use crate::unmixing::color_model::ColorModel;
use crate::unmixing::comp_op::CompOp;

/// Immutable description of one output layer: how it composites, how it
/// blends, and which color distribution it is expected to follow.
pub struct LayerDescriptor {
    comp_op: CompOp,
    blend_mode: BlendMode,
    color_model: Box<dyn ColorModel>,
}

impl LayerDescriptor {
    pub fn new(comp_op: CompOp, blend_mode: BlendMode, color_model: Box<dyn ColorModel>) -> Self {
        LayerDescriptor {
            comp_op,
            blend_mode,
            color_model,
        }
    }

    pub fn comp_op(&self) -> CompOp {
        self.comp_op
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn color_model(&self) -> &dyn ColorModel {
        self.color_model.as_ref()
    }
}

/// Ordered, owning registry of layer descriptors for one decomposition run.
///
/// Index 0 is the bottom-most (background) layer. The stack owns every color
/// model; callers address layers by index instead of sharing model
/// ownership. The sequence is fixed once constructed.
pub struct LayerStack {
    layers: Vec<LayerDescriptor>,
}

impl LayerStack {
    /// # Errors
    ///
    /// Returns [`Error::EmptyLayerStack`] when `layers` is empty.
    pub fn new(layers: Vec<LayerDescriptor>) -> Result<Self, Error> {
        if layers.is_empty() {
            return Err(Error::EmptyLayerStack);
        }
        Ok(LayerStack { layers })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    // A stack is never empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn layer(&self, index: usize) -> &LayerDescriptor {
        &self.layers[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    pub fn comp_ops(&self) -> Vec<CompOp> {
        self.layers.iter().map(|l| l.comp_op).collect()
    }

    pub fn blend_modes(&self) -> Vec<BlendMode> {
        self.layers.iter().map(|l| l.blend_mode).collect()
    }

    pub fn color_models(&self) -> Vec<&dyn ColorModel> {
        self.layers.iter().map(|l| l.color_model()).collect()
    }
}
