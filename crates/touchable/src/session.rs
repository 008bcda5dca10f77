//! Per-frame driver tying the tracker, the simulators and visibility together.

use crate::camera::Camera;
use crate::data::PointCloudModel;
use crate::hands::{HandPoseTracker, HandTrackingProvider};
use crate::simulator::{DeformationSimulator, SimulatorConfig, TickReport};
use crate::visibility::{Visibility, VisibilityConfig, VisibilityController};
use anyhow::Result;
use glam::Mat4;

/// One placed cloud. `model` is `None` until an import succeeds.
#[derive(Debug)]
pub struct TouchableInstance {
    pub name: String,
    pub model: Option<PointCloudModel>,
    pub transform: Mat4,
    pub simulator: DeformationSimulator,
    pub visibility: VisibilityController,
}

impl TouchableInstance {
    pub fn new(
        name: impl Into<String>,
        model: Option<PointCloudModel>,
        transform: Mat4,
        simulator: SimulatorConfig,
        visibility: VisibilityConfig,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            model,
            transform,
            simulator: DeformationSimulator::new(simulator)?,
            visibility: VisibilityController::new(visibility),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub name: String,
    /// `None` when the instance had no model this frame.
    pub tick: Option<TickReport>,
    pub visibility: Visibility,
}

#[derive(Debug, Default)]
pub struct Session {
    pub tracker: HandPoseTracker,
    pub instances: Vec<TouchableInstance>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, instance: TouchableInstance) -> &mut TouchableInstance {
        self.instances.push(instance);
        let last = self.instances.len() - 1;
        &mut self.instances[last]
    }

    /// Runs one frame: poll hands, then per instance deform and decide the
    /// draw count. Each instance's dispatch completes before its visibility
    /// is evaluated.
    pub fn frame(
        &mut self,
        camera: &Camera,
        provider: Option<&mut dyn HandTrackingProvider>,
    ) -> Vec<FrameReport> {
        self.tracker.poll(provider);

        let tracker = &self.tracker;
        self.instances
            .iter_mut()
            .map(|instance| {
                let Some(model) = instance.model.as_mut() else {
                    log::debug!("{}: no model loaded; skipping", instance.name);
                    return FrameReport {
                        name: instance.name.clone(),
                        tick: None,
                        visibility: Visibility {
                            visible: false,
                            draw_count: 0,
                        },
                    };
                };

                let tick = instance.simulator.tick(model, &instance.transform, tracker);
                let visibility = instance.visibility.evaluate(
                    camera,
                    &instance.transform,
                    model.bounding_sphere_radius(),
                    model.point_count(),
                );

                FrameReport {
                    name: instance.name.clone(),
                    tick: Some(tick),
                    visibility,
                }
            })
            .collect()
    }
}
