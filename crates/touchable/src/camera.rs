use glam::{Mat4, Vec3, Vec4};

/// Index of each plane in [`Frustum::planes`].
pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;
pub const BOTTOM: usize = 2;
pub const TOP: usize = 3;
pub const NEAR: usize = 4;
pub const FAR: usize = 5;

/// Plane `normal . p + d = 0` with a unit normal pointing into the frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    /// Normalizes a raw `(a, b, c, d)` row combination.
    fn from_row(v: Vec4) -> Self {
        let normal = v.truncate();
        let inv_len = normal.length().recip();
        Self {
            normal: normal * inv_len,
            d: v.w * inv_len,
        }
    }

    /// Positive inside the frustum, negative outside.
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the six planes of a right-handed, `[0, 1]`-depth view-projection.
    pub fn from_view_proj(m: Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// `false` only if the sphere lies entirely outside one of the left,
    /// right, bottom, top or near planes. The far plane is not tested.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes[LEFT..=NEAR]
            .iter()
            .rev()
            .all(|plane| plane.signed_distance(center) >= -radius)
    }
}

/// Perspective viewer used for culling and point budgets.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world units.
    pub eye: Vec3,
    /// Point the camera looks at.
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_rad: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Creates a camera at `eye` looking at `target` with a 60 degree vertical field of view.
    pub fn new(eye: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            eye,
            target,
            up: Vec3::Y,
            fov_y_rad: 60f32.to_radians(),
            aspect,
            near: 0.05,
            far: 1000.0,
        }
    }

    /// Unit viewing direction.
    #[inline]
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// glam's right-handed projection maps depth to [0, 1].
    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_rad, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj() * self.view()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_proj(self.view_proj())
    }
}
