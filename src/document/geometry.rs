//! Node geometry resolution.
//!
//! Two property shapes describe where a node sits: a parent-relative affine
//! transform plus an untransformed size, or an absolute bounding box. The
//! transform is preferred. The bounding-box path subtracts the parent's
//! origin to get parent-relative coordinates.

use super::Node;

/// Row-major 2x3 affine matrix `[[a, c, tx], [b, d, ty]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform(pub [[f64; 3]; 2]);

impl AffineTransform {
    /// The identity transform
    pub const IDENTITY: AffineTransform = AffineTransform([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);

    /// Pure rotation by `radians`
    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        AffineTransform([[cos, -sin, 0.0], [sin, cos, 0.0]])
    }

    /// Translation column
    pub fn translation(&self) -> (f64, f64) {
        (self.0[0][2], self.0[1][2])
    }

    /// Rotation angle of the linear part, in radians
    pub fn angle(&self) -> f64 {
        self.0[1][0].atan2(self.0[0][0])
    }

    /// `self * other`
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        let [[a1, c1, tx1], [b1, d1, ty1]] = self.0;
        let [[a2, c2, tx2], [b2, d2, ty2]] = other.0;
        AffineTransform([
            [a1 * a2 + c1 * b2, a1 * c2 + c1 * d2, a1 * tx2 + c1 * ty2 + tx1],
            [b1 * a2 + d1 * b2, b1 * c2 + d1 * d2, b1 * tx2 + d1 * ty2 + ty1],
        ])
    }

    /// Apply the linear part only
    pub fn apply_vector(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, c, _], [b, d, _]] = self.0;
        (a * x + c * y, b * x + d * y)
    }
}

impl From<[[f64; 3]; 2]> for AffineTransform {
    fn from(matrix: [[f64; 3]; 2]) -> Self {
        AffineTransform(matrix)
    }
}

/// Parent-relative position, size and rotation of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Horizontal offset from the parent origin
    pub x: f64,
    /// Vertical offset from the parent origin
    pub y: f64,
    /// Untransformed width
    pub width: f64,
    /// Untransformed height
    pub height: f64,
    /// Rotation in radians
    pub rotation: f64,
}

/// Resolve a node's geometry relative to `parent`.
///
/// Returns `None` when neither shape is usable: no transform/size pair and a
/// null bounding box, or a bounding box whose parent has none. Canvases and
/// the document root have no bounding box and act as the origin.
pub fn resolve_geometry(node: &Node, parent: Option<&Node>) -> Option<Geometry> {
    if let (Some(transform), Some(size)) = (node.relative_transform(), node.size()) {
        let (x, y) = transform.translation();
        return Some(Geometry {
            x,
            y,
            width: size.x,
            height: size.y,
            rotation: transform.angle(),
        });
    }

    let bounds = node.absolute_bounding_box()?;
    let (origin_x, origin_y) = match parent {
        None => (0.0, 0.0),
        Some(parent) => match parent.absolute_bounding_box() {
            Some(parent_bounds) => (parent_bounds.x, parent_bounds.y),
            None if is_origin_node(parent) => (0.0, 0.0),
            None => return None,
        },
    };

    Some(Geometry {
        x: bounds.x - origin_x,
        y: bounds.y - origin_y,
        width: bounds.width,
        height: bounds.height,
        rotation: node.rotation(),
    })
}

fn is_origin_node(node: &Node) -> bool {
    node.is_canvas() || node.node_type == "DOCUMENT"
}
