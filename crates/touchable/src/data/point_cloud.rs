use crate::data::types::{Point, Style};
use anyhow::{Context, Result};
use bply::{read_file, Bounds, DecodeOptions, PlyCloud, RawPoint, DEFAULT_POINT_CAP};
use glam::Vec3;
use rayon::prelude::*;
use std::path::Path;

/// A device-side allocation derived from a model's buffers.
///
/// The renderer owns allocation; the model only guarantees that every attached
/// resource is released exactly once when the model is torn down.
pub trait DeviceResource: std::fmt::Debug + Send {
    fn release(&mut self);
}

/// Import settings exposed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Maximum number of points kept after the shuffle.
    pub point_cap: usize,
    /// Broadcast [`Style::Heal`] instead of [`Style::Normal`].
    pub healing: bool,
    /// Fixed shuffle seed, mainly for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            point_cap: DEFAULT_POINT_CAP,
            healing: false,
            seed: None,
        }
    }
}

/// Decoded cloud with an immutable original copy and a mutable current copy.
#[derive(Debug)]
pub struct PointCloudModel {
    current: Vec<Point>,
    original: Vec<Point>,
    style: Style,
    bounds: Bounds,
    bounding_sphere_radius: f32,
    local_center: Vec3,
    density: f32,
    resources: Vec<Box<dyn DeviceResource>>,
}

impl PointCloudModel {
    /// Builds `current` from `points` and `original` from the same positions
    /// with every color replaced by `style`.
    pub fn initialize(points: &[RawPoint], bounds: Bounds, radius: f32, style: Style) -> Self {
        let tag = style.tag();
        let (current, original): (Vec<Point>, Vec<Point>) = points
            .par_iter()
            .map(|p| {
                (
                    Point {
                        position: p.position,
                        color: p.color,
                    },
                    Point {
                        position: p.position,
                        color: tag,
                    },
                )
            })
            .unzip();

        let volume = bounds.volume();
        let density = if volume > 0.0 {
            current.len() as f32 / volume
        } else {
            0.0
        };

        Self {
            current,
            original,
            style,
            bounds,
            bounding_sphere_radius: radius,
            local_center: Vec3::ZERO,
            density,
            resources: Vec::new(),
        }
    }

    /// Wraps decoder output, keeping the recentering translation as the local center.
    pub fn from_ply(cloud: &PlyCloud, style: Style) -> Self {
        let mut model = Self::initialize(&cloud.points, cloud.bounds, cloud.bounding_radius, style);
        model.local_center = Vec3::from(cloud.center);
        model
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.current.len()
    }

    #[inline]
    pub fn bounding_box(&self) -> Bounds {
        self.bounds
    }

    #[inline]
    pub fn bounding_sphere_radius(&self) -> f32 {
        self.bounding_sphere_radius
    }

    /// Points per unit volume of the bounding box; 0 for a flat box.
    #[inline]
    pub fn density(&self) -> f32 {
        self.density
    }

    /// Translation removed from the source positions during import.
    #[inline]
    pub fn local_center(&self) -> Vec3 {
        self.local_center
    }

    #[inline]
    pub fn style(&self) -> Style {
        self.style
    }

    #[inline]
    pub fn current(&self) -> &[Point] {
        &self.current
    }

    #[inline]
    pub fn original(&self) -> &[Point] {
        &self.original
    }

    /// `current` as raw bytes, ready for a vertex/storage buffer upload.
    pub fn current_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.current)
    }

    pub fn original_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.original)
    }

    /// Split borrow for the simulator: `current` mutable, `original` shared.
    pub(crate) fn buffers_mut(&mut self) -> (&mut [Point], &[Point]) {
        (&mut self.current, &self.original)
    }

    /// Ties a device-side buffer to the lifetime of this model.
    pub fn attach_resource(&mut self, resource: Box<dyn DeviceResource>) {
        self.resources.push(resource);
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Explicit teardown; equivalent to dropping the model.
    pub fn destroy(self) {}

    fn release_resources(&mut self) {
        for mut resource in self.resources.drain(..) {
            log::debug!("Releasing device resource {:?}", resource);
            resource.release();
        }
    }
}

impl Drop for PointCloudModel {
    fn drop(&mut self) {
        self.release_resources();
    }
}

/// Read one binary PLY file from disk and build its model.
///
/// Any decode failure aborts the whole import; no partial model is returned.
pub fn import_ply(path: &Path, options: &ImportOptions) -> Result<PointCloudModel> {
    let decode = DecodeOptions {
        point_cap: options.point_cap,
        seed: options.seed,
    };
    let cloud = read_file(path, &decode)
        .with_context(|| format!("Failed importing {}", path.display()))?;

    let model = PointCloudModel::from_ply(&cloud, Style::from_healing(options.healing));

    // Extent analysis and logging is confined to debug builds.
    #[cfg(debug_assertions)]
    {
        use std::f32::{INFINITY, NEG_INFINITY};
        let (min, max) = model
            .current()
            .par_iter()
            .map(|p| (p.position, p.position))
            .reduce(
                || ([INFINITY; 3], [NEG_INFINITY; 3]),
                |(a_min, a_max), (b_min, b_max)| {
                    (
                        [
                            a_min[0].min(b_min[0]),
                            a_min[1].min(b_min[1]),
                            a_min[2].min(b_min[2]),
                        ],
                        [
                            a_max[0].max(b_max[0]),
                            a_max[1].max(b_max[1]),
                            a_max[2].max(b_max[2]),
                        ],
                    )
                },
            );

        log::debug!(
            "PLY {:?}: pts={}, center=({:.3},{:.3},{:.3}), kept_AABB=min({:.2},{:.2},{:.2}) max({:.2},{:.2},{:.2}), radius={:.3}, density={:.1}",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("?"),
            model.point_count(),
            model.local_center().x, model.local_center().y, model.local_center().z,
            min[0], min[1], min[2],
            max[0], max[1], max[2],
            model.bounding_sphere_radius(),
            model.density()
        );
    }

    log::info!(
        "Imported {} ({} points, style {:?})",
        path.display(),
        model.point_count(),
        model.style()
    );

    Ok(model)
}
