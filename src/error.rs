use thiserror::Error;

/// Error type for layer decomposition and recompositing operations
///
/// Inputs are assumed structurally valid; every variant here is a
/// precondition failure reported before any per-pixel work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The layer stack contains no layers
    ///
    /// A decomposition run needs at least a background layer; an empty
    /// descriptor sequence cannot produce any output.
    #[error("Layer stack must contain at least one layer")]
    EmptyLayerStack,

    /// Image and layer dimensions do not match
    ///
    /// Returned during refinement when a prior layer image does not have
    /// the same dimensions as the original image.
    #[error("Image and layer dimensions do not match: expected {expected:?}, actual {actual:?}")]
    DimensionMismatch {
        /// Expected dimensions (width, height)
        expected: (u32, u32),
        /// Actual dimensions (width, height)
        actual: (u32, u32),
    },

    /// The number of prior layer images does not match the layer stack
    #[error("Expected {expected} layer images, got {actual}")]
    LayerCountMismatch { expected: usize, actual: usize },

    /// A Gaussian color model was given a non-symmetric or singular
    /// covariance matrix
    #[error("Covariance matrix must be symmetric and invertible")]
    InvalidCovariance,

    /// Matte refinement renormalization is only defined for homogeneous
    /// composite-operator families
    ///
    /// All layers must use the source-over operator, or all must use the
    /// plus operator; mixing families within one stack is unsupported.
    #[error("Matte refinement requires all layers to share one composite-operator family")]
    MixedCompositeOperators,

    /// Background smoothing was requested without an opaque background
    #[error("Smooth background requires an opaque background")]
    SmoothBackgroundRequiresOpaque,

    /// A gray-layer index refers to a layer outside the stack
    #[error("Gray layer index {index} is out of range for a stack of {layers} layers")]
    GrayLayerOutOfRange { index: usize, layers: usize },

    /// The worker thread pool could not be constructed
    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(String),

    /// A blend mode name did not match any known mode
    #[error("Unknown blend mode name: {0}")]
    UnknownBlendMode(String),

    /// The guided smoothing filter rejected its inputs
    #[error(transparent)]
    Filter(#[from] GuidedFilterError),
}

/// Error type for the guided smoothing filter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuidedFilterError {
    /// The window radius must be at least one pixel
    #[error("Invalid radius: {radius} (must be >= 1)")]
    InvalidRadius { radius: u32 },

    /// The regularization term must be strictly positive
    #[error("Invalid epsilon: {epsilon} (must be > 0)")]
    InvalidEpsilon { epsilon: f32 },

    /// Input and guidance dimensions do not match
    #[error("Guidance dimensions {guidance_dims:?} do not match input dimensions {input_dims:?}")]
    DimensionMismatch {
        guidance_dims: (u32, u32),
        input_dims: (u32, u32),
    },
}
