//! Touchable point clouds: hand-driven deformation with healing.
//!
//! A cloud is imported once into a [`PointCloudModel`]. Every frame the
//! [`HandPoseTracker`] turns tracked joints into capsules, the
//! [`DeformationSimulator`] pushes points out of them and relaxes them back,
//! and the [`VisibilityController`] decides how many points to draw.

pub mod camera;
pub mod data;
pub mod hands;
pub mod session;
pub mod simulator;
pub mod visibility;

pub use camera::{Camera, Frustum, Plane};
pub use data::{import_ply, DeviceResource, ImportOptions, Point, PointCloudModel, Style};
pub use hands::{Capsule, Hand, HandFrame, HandJoint, HandPoseTracker, HandTrackingProvider};
pub use session::{FrameReport, Session, TouchableInstance};
pub use simulator::{
    DeformationSimulator, PointDispatch, RayonDispatch, SerialDispatch, SimState, SimulatorConfig,
    TickReport,
};
pub use visibility::{Visibility, VisibilityConfig, VisibilityController};
