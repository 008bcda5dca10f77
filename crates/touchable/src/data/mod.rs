// src/data/mod.rs
//! Data handling modules for touchable point clouds.
//!
//! This module provides functionality for:
//! - Importing binary PLY clouds into a [`PointCloudModel`].
//! - Defining the POD point layout shared with device buffers.

pub mod point_cloud;
pub mod types;

// Re-export commonly used types for convenience.
pub use self::point_cloud::{import_ply, DeviceResource, ImportOptions, PointCloudModel};
pub use self::types::{Point, Style};
