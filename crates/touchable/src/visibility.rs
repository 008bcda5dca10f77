//! Whole-cloud frustum culling and the adaptive draw budget.

use crate::camera::Camera;
use glam::{Mat4, Vec3};
use std::f32::consts::FRAC_2_PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityConfig {
    pub culling: bool,
    pub adaptive_density: bool,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            culling: true,
            adaptive_density: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub visible: bool,
    /// Suggested number of leading points of `current` to draw.
    pub draw_count: usize,
}

/// Smooth falloff from 1 at distance 0 towards 0 far away.
pub fn distance_factor(distance: f32) -> f32 {
    let d = distance.max(0.0);
    (-d * d * 0.25).atan() * FRAC_2_PI + 1.0
}

/// Attenuation for clouds seen away from the view axis. `direction` points
/// from the eye to the cloud center and is expected to be normalized.
pub fn angle_factor(distance: f32, direction: Vec3, forward: Vec3) -> f32 {
    if distance <= 0.0 {
        return 1.0;
    }
    let a = direction.dot(forward) - 1.0;
    (1.0 - a * a).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityController {
    pub config: VisibilityConfig,
}

impl VisibilityController {
    pub fn new(config: VisibilityConfig) -> Self {
        Self { config }
    }

    /// Evaluates one instance whose local origin is the cloud center.
    pub fn evaluate(
        &self,
        camera: &Camera,
        transform: &Mat4,
        bounding_radius: f32,
        point_count: usize,
    ) -> Visibility {
        let center = transform.w_axis.truncate();
        let radius = bounding_radius * transform.x_axis.truncate().length();

        if self.config.culling && !camera.frustum().intersects_sphere(center, radius) {
            return Visibility {
                visible: false,
                draw_count: 0,
            };
        }

        if !self.config.adaptive_density {
            return Visibility {
                visible: true,
                draw_count: point_count,
            };
        }

        let to_center = center - camera.eye;
        let distance = to_center.length() - radius;
        let budget = distance_factor(distance)
            * angle_factor(distance, to_center.normalize_or_zero(), camera.forward());
        let draw_count = ((point_count as f32 * budget) as usize).min(point_count);

        Visibility {
            visible: true,
            draw_count,
        }
    }
}
