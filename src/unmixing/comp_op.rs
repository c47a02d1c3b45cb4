/// Generalized Porter-Duff composite operator.
///
/// The three weights control how source and destination contribute to the
/// composited alpha: `X` weighs the overlap region, `Y` the source-only
/// region, and `Z` the destination-only region. `composed alpha =
/// X·aₛ·a_d + Y·aₛ·(1−a_d) + Z·a_d·(1−aₛ)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompOp {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CompOp {
    /// Standard source-over compositing.
    pub const SOURCE_OVER: CompOp = CompOp {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };

    /// Additive (plus) compositing.
    pub const PLUS: CompOp = CompOp {
        x: 2.0,
        y: 1.0,
        z: 1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        CompOp { x, y, z }
    }

    pub fn is_source_over(&self) -> bool {
        self.x == 1.0 && self.y == 1.0 && self.z == 1.0
    }

    pub fn is_plus(&self) -> bool {
        self.x == 2.0 && self.y == 1.0 && self.z == 1.0
    }

    /// Composited alpha for a source over a destination under this operator.
    pub fn composite_alpha(&self, a_s: f64, a_d: f64) -> f64 {
        self.x * a_s * a_d + self.y * a_s * (1.0 - a_d) + self.z * a_d * (1.0 - a_s)
    }
}
