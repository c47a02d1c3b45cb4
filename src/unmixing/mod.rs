pub mod blend_mode;
pub mod color_model;
pub mod comp_op;
pub mod decompose;
pub mod equations;
pub mod guided_filter;
pub mod layer_stack;
pub mod lbfgs;
pub mod solver;

/// 3-component color vector (RGB, components semantically in [0,1]).
pub type Vec3 = nalgebra::Vector3<f64>;
/// RGBA vector: three color components followed by alpha.
pub type Vec4 = nalgebra::Vector4<f64>;
pub type Mat3 = nalgebra::Matrix3<f64>;
pub type Mat4 = nalgebra::Matrix4<f64>;
/// Dynamically sized vector (per-pixel unknowns, constraints, multipliers).
pub type VecX = nalgebra::DVector<f64>;
pub type MatX = nalgebra::DMatrix<f64>;

/// Clamps a scalar into the valid color/alpha range.
pub(crate) fn crop_value(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Clamps every component of a color into [0,1].
pub(crate) fn crop_vec3(v: &Vec3) -> Vec3 {
    Vec3::new(crop_value(v[0]), crop_value(v[1]), crop_value(v[2]))
}

pub(crate) fn crop_vec4(v: &Vec4) -> Vec4 {
    Vec4::new(
        crop_value(v[0]),
        crop_value(v[1]),
        crop_value(v[2]),
        crop_value(v[3]),
    )
}
