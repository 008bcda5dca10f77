//! Per-frame deformation of a cloud's `current` buffer by hand capsules.
//!
//! A tick selects the capsule window of the hands near the cloud, moves the
//! capsules into the cloud's local frame and runs one independent update per
//! point through a [`PointDispatch`]. The only value read back is the healing
//! counter, which keeps the simulator active after the hands withdraw.

use crate::data::{Point, PointCloudModel, Style};
use crate::hands::{Capsule, Hand, HandPoseTracker, JOINTS_PER_HAND};
use anyhow::{ensure, Result};
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    /// Fraction of the remaining offset removed per tick, in `[0, 1]`.
    pub heal_parameter: f32,
    /// Remaining offset (local units) at which a healing point snaps home.
    pub heal_epsilon: f32,
    /// Margin added to the cloud's radius when gating hands, in `[0, 0.3]`.
    pub hand_proximity_radius: f32,
    /// Upper bound on the hand gate distance for clouds smaller than it,
    /// world units. A cloud's own radius always gates.
    pub max_interaction_distance: f32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            heal_parameter: 0.001,
            heal_epsilon: 1e-4,
            hand_proximity_radius: 0.15,
            max_interaction_distance: 2.0,
        }
    }
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.heal_parameter),
            "heal_parameter must be within [0, 1], got {}",
            self.heal_parameter
        );
        ensure!(
            self.heal_epsilon.is_finite() && self.heal_epsilon > 0.0,
            "heal_epsilon must be positive, got {}",
            self.heal_epsilon
        );
        ensure!(
            (0.0..=0.3).contains(&self.hand_proximity_radius),
            "hand_proximity_radius must be within [0, 0.3], got {}",
            self.hand_proximity_radius
        );
        ensure!(
            self.max_interaction_distance.is_finite() && self.max_interaction_distance > 0.0,
            "max_interaction_distance must be positive, got {}",
            self.max_interaction_distance
        );
        Ok(())
    }

    /// Ticks needed for a point displaced by `distance` to snap home with no
    /// further contact; `None` when healing never progresses.
    pub fn ticks_to_heal(&self, distance: f32) -> Option<u32> {
        if distance <= self.heal_epsilon {
            return Some(0);
        }
        if self.heal_parameter <= 0.0 {
            return None;
        }
        if self.heal_parameter >= 1.0 {
            return Some(1);
        }
        let ticks = ((self.heal_epsilon / distance).ln() / (1.0 - self.heal_parameter).ln()).ceil();
        Some(ticks.max(1.0) as u32)
    }
}

/// Constants shared by every point of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub heal_parameter: f32,
    pub heal_epsilon: f32,
}

impl From<&SimulatorConfig> for KernelParams {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            heal_parameter: config.heal_parameter,
            heal_epsilon: config.heal_epsilon,
        }
    }
}

struct Contact {
    closest: Vec3,
    axis: Vec3,
    distance: f32,
    radius: f32,
}

/// The capsule `p` penetrates deepest, if `p` lies strictly inside any.
fn deepest_contact(p: Vec3, capsules: &[Capsule]) -> Option<Contact> {
    let mut best: Option<Contact> = None;
    for capsule in capsules.iter().filter(|c| c.radius > 0.0) {
        let closest = capsule.closest_point(p);
        let distance = (p - closest).length();
        let nearer = best
            .as_ref()
            .map_or(true, |b| distance - capsule.radius < b.distance - b.radius);
        if nearer {
            best = Some(Contact {
                closest,
                axis: capsule.b - capsule.a,
                distance,
                radius: capsule.radius,
            });
        }
    }
    best.filter(|c| c.distance < c.radius)
}

fn push_out(contact: &Contact, p: Vec3) -> Vec3 {
    let dir = if contact.distance > f32::EPSILON {
        (p - contact.closest) / contact.distance
    } else {
        // On the axis: any direction perpendicular to it.
        contact
            .axis
            .try_normalize()
            .map_or(Vec3::Y, |axis| axis.any_orthonormal_vector())
    };
    contact.closest + dir * contact.radius
}

fn heal_step(p: Vec3, home: Vec3, params: &KernelParams) -> Vec3 {
    let next = p.lerp(home, params.heal_parameter);
    if next.distance(home) <= params.heal_epsilon {
        home
    } else {
        next
    }
}

/// Updates one point. Returns `true` when the point heals and is still away
/// from its original position afterwards.
#[inline]
pub fn update_point(
    current: &mut Point,
    original: &Point,
    capsules: &[Capsule],
    params: &KernelParams,
) -> bool {
    let p = current.pos();
    let home = original.pos();
    let healing = original.color == Style::Heal.tag();

    let next = match deepest_contact(p, capsules) {
        Some(contact) => push_out(&contact, p),
        None if healing => heal_step(p, home, params),
        None => p,
    };
    current.position = next.to_array();

    healing && next != home
}

/// Execution substrate for the per-point pass.
pub trait PointDispatch {
    /// Runs [`update_point`] over every pair and returns the healing counter.
    fn dispatch(
        &self,
        current: &mut [Point],
        original: &[Point],
        capsules: &[Capsule],
        params: &KernelParams,
    ) -> u32;
}

/// Parallel pass on the rayon pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonDispatch;

impl PointDispatch for RayonDispatch {
    fn dispatch(
        &self,
        current: &mut [Point],
        original: &[Point],
        capsules: &[Capsule],
        params: &KernelParams,
    ) -> u32 {
        let healing = AtomicU32::new(0);
        current
            .par_iter_mut()
            .zip(original.par_iter())
            .for_each(|(point, home)| {
                if update_point(point, home, capsules, params) {
                    healing.fetch_add(1, Ordering::Relaxed);
                }
            });
        healing.into_inner()
    }
}

/// Single-threaded pass, mostly for tests and tiny clouds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialDispatch;

impl PointDispatch for SerialDispatch {
    fn dispatch(
        &self,
        current: &mut [Point],
        original: &[Point],
        capsules: &[Capsule],
        params: &KernelParams,
    ) -> u32 {
        let mut healing = 0;
        for (point, home) in current.iter_mut().zip(original) {
            if update_point(point, home, capsules, params) {
                healing += 1;
            }
        }
        healing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// No hand in range and nothing left to heal.
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub state: SimState,
    /// Whether the per-point pass ran this tick.
    pub dispatched: bool,
    /// Capsule indices tested this tick.
    pub window: Range<usize>,
    pub healing: u32,
}

#[derive(Debug)]
pub struct DeformationSimulator<D: PointDispatch = RayonDispatch> {
    config: SimulatorConfig,
    dispatcher: D,
    state: SimState,
    healing: u32,
}

impl DeformationSimulator<RayonDispatch> {
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        Self::with_dispatcher(config, RayonDispatch)
    }
}

impl<D: PointDispatch> DeformationSimulator<D> {
    pub fn with_dispatcher(config: SimulatorConfig, dispatcher: D) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher,
            state: SimState::Idle,
            healing: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> SimState {
        self.state
    }

    /// Healing counter read back after the last dispatch.
    #[inline]
    pub fn pending_healing(&self) -> u32 {
        self.healing
    }

    /// World distance from the cloud center within which a hand takes part.
    /// Never smaller than the cloud itself; `max_interaction_distance` only
    /// limits how far the proximity margin extends it.
    pub fn interaction_radius(&self, bounding_radius: f32, scale: f32) -> f32 {
        let surface = bounding_radius * scale;
        surface.max(
            (surface + self.config.hand_proximity_radius).min(self.config.max_interaction_distance),
        )
    }

    /// Contiguous capsule window of the tracked hands whose representative
    /// fingertip lies within `reach` of `center`.
    pub fn active_window(&self, tracker: &HandPoseTracker, center: Vec3, reach: f32) -> Range<usize> {
        let in_range = |hand: Hand| {
            tracker.is_tracked(hand) && tracker.representative_fingertip(hand).distance(center) <= reach
        };

        let mut from = JOINTS_PER_HAND;
        let mut to = JOINTS_PER_HAND;
        if in_range(Hand::Left) {
            from = Hand::Left.joint_range().start;
        }
        if in_range(Hand::Right) {
            to = Hand::Right.joint_range().end;
        }
        from..to
    }

    /// Advances the model by one frame. Either the whole pass runs or none of it.
    pub fn tick(
        &mut self,
        model: &mut PointCloudModel,
        transform: &Mat4,
        tracker: &HandPoseTracker,
    ) -> TickReport {
        let scale = transform.x_axis.truncate().length();
        let center = transform.w_axis.truncate();
        let reach = self.interaction_radius(model.bounding_sphere_radius(), scale);
        let window = self.active_window(tracker, center, reach);

        if window.is_empty() && self.healing == 0 {
            if self.state == SimState::Active {
                log::debug!("Deformation settled; simulator idle");
            }
            self.state = SimState::Idle;
            return TickReport {
                state: self.state,
                dispatched: false,
                window,
                healing: 0,
            };
        }

        if !(scale.is_finite() && scale > 0.0) {
            log::warn!("Skipping deformation for degenerate instance scale {scale}");
            return TickReport {
                state: self.state,
                dispatched: false,
                window,
                healing: self.healing,
            };
        }

        let to_local = transform.inverse();
        let world = tracker.capsules();
        let capsules: Vec<Capsule> = world[window.clone()]
            .iter()
            .map(|c| Capsule {
                a: to_local.transform_point3(c.a),
                b: to_local.transform_point3(c.b),
                radius: c.radius / scale,
            })
            .collect();

        let params = KernelParams::from(&self.config);
        let (current, original) = model.buffers_mut();
        self.healing = self.dispatcher.dispatch(current, original, &capsules, &params);

        self.state = if !window.is_empty() || self.healing > 0 {
            SimState::Active
        } else {
            SimState::Idle
        };
        log::trace!(
            "tick: window={:?} healing={} state={:?}",
            window,
            self.healing,
            self.state
        );

        TickReport {
            state: self.state,
            dispatched: true,
            window,
            healing: self.healing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hands::{HandFrame, HandJoint, CAPSULE_COUNT};
    use bply::{pack_color, Bounds, RawPoint};
    use glam::Quat;

    fn point(position: [f32; 3], style: Style) -> (Point, Point) {
        (
            Point {
                position,
                color: pack_color(200, 10, 10, 255),
            },
            Point {
                position,
                color: style.tag(),
            },
        )
    }

    fn model(points: &[[f32; 3]], style: Style) -> PointCloudModel {
        let raw: Vec<RawPoint> = points
            .iter()
            .map(|&position| RawPoint {
                position,
                color: pack_color(1, 2, 3, 255),
            })
            .collect();
        PointCloudModel::initialize(&raw, Bounds::ZERO, 0.0, style)
    }

    fn hand_at(p: Vec3, tracked: bool) -> HandFrame {
        HandFrame::from_joints([p; JOINTS_PER_HAND], tracked, 1.0)
    }

    fn unit_capsule() -> [Capsule; 1] {
        [Capsule {
            a: Vec3::ZERO,
            b: Vec3::X,
            radius: 0.5,
        }]
    }

    fn params(heal_parameter: f32) -> KernelParams {
        KernelParams {
            heal_parameter,
            heal_epsilon: 1e-4,
        }
    }

    #[test]
    fn collision_is_strictly_inside_the_radius() {
        let capsules = unit_capsule();

        let (mut on_surface, home) = point([0.5, 0.5, 0.0], Style::Normal);
        assert!(!update_point(&mut on_surface, &home, &capsules, &params(0.1)));
        assert_eq!(on_surface.position, [0.5, 0.5, 0.0]);

        let (mut inside, home) = point([0.5, 0.25, 0.0], Style::Normal);
        assert!(!update_point(&mut inside, &home, &capsules, &params(0.1)));
        assert_eq!(inside.position, [0.5, 0.5, 0.0]);
        assert_eq!(inside.color, pack_color(200, 10, 10, 255));
    }

    #[test]
    fn point_on_the_axis_is_pushed_sideways() {
        let capsules = unit_capsule();
        let (mut p, home) = point([0.5, 0.0, 0.0], Style::Heal);
        assert!(update_point(&mut p, &home, &capsules, &params(0.1)));
        assert!((capsules[0].axis_distance(p.pos()) - 0.5).abs() < 1e-5);
        assert!((p.pos().x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn deepest_penetration_wins() {
        let capsules = [
            Capsule {
                a: Vec3::ZERO,
                b: Vec3::ZERO,
                radius: 1.0,
            },
            Capsule {
                a: Vec3::new(0.0, 0.9, 0.0),
                b: Vec3::new(0.0, 0.9, 0.0),
                radius: 0.2,
            },
            Capsule {
                a: Vec3::new(0.0, 0.8, 0.0),
                b: Vec3::new(0.0, 0.8, 0.0),
                radius: 0.0,
            },
        ];
        let (mut p, home) = point([0.0, 0.8, 0.0], Style::Normal);
        update_point(&mut p, &home, &capsules, &params(0.0));
        // 0.8 is 0.2 inside the big sphere but only 0.1 inside the small one.
        assert!((p.pos() - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn config_bounds() {
        assert!(SimulatorConfig::default().validate().is_ok());

        let bad = SimulatorConfig {
            heal_parameter: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = SimulatorConfig {
            hand_proximity_radius: 0.31,
            ..Default::default()
        };
        assert!(DeformationSimulator::new(bad).is_err());

        let config = SimulatorConfig {
            heal_parameter: 0.5,
            heal_epsilon: 0.3,
            ..Default::default()
        };
        assert_eq!(config.ticks_to_heal(0.1), Some(0));
        assert_eq!(config.ticks_to_heal(1.0), Some(2));
        let frozen = SimulatorConfig {
            heal_parameter: 0.0,
            ..Default::default()
        };
        assert_eq!(frozen.ticks_to_heal(1.0), None);
    }

    #[test]
    fn idle_without_hands_or_pending_healing() {
        let mut sim = DeformationSimulator::new(SimulatorConfig::default()).unwrap();
        let mut model = model(&[[0.0, 0.0, 0.0]], Style::Heal);
        model.buffers_mut().0[0].position = [1.0, 0.0, 0.0];

        let report = sim.tick(&mut model, &Mat4::IDENTITY, &HandPoseTracker::new());
        assert_eq!(report.state, SimState::Idle);
        assert!(!report.dispatched);
        assert!(report.window.is_empty());
        assert_eq!(model.current()[0].position, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn window_covers_only_hands_in_range() {
        let sim = DeformationSimulator::new(SimulatorConfig::default()).unwrap();
        let near = Vec3::new(0.0, 0.1, 0.0);
        let far = Vec3::new(5.0, 0.0, 0.0);
        let reach = sim.interaction_radius(0.0, 1.0);
        assert_eq!(reach, 0.15);

        let mut tracker = HandPoseTracker::new();
        tracker.update(Some(&hand_at(near, true)), Some(&hand_at(far, true)));
        assert_eq!(sim.active_window(&tracker, Vec3::ZERO, reach), 0..JOINTS_PER_HAND);

        tracker.update(Some(&hand_at(far, true)), Some(&hand_at(near, true)));
        assert_eq!(
            sim.active_window(&tracker, Vec3::ZERO, reach),
            JOINTS_PER_HAND..CAPSULE_COUNT
        );

        tracker.update(Some(&hand_at(near, true)), Some(&hand_at(near, true)));
        assert_eq!(sim.active_window(&tracker, Vec3::ZERO, reach), 0..CAPSULE_COUNT);

        tracker.update(Some(&hand_at(near, false)), Some(&hand_at(near, false)));
        assert!(sim.active_window(&tracker, Vec3::ZERO, reach).is_empty());
        tracker.force_tracked = true;
        assert_eq!(sim.active_window(&tracker, Vec3::ZERO, reach), 0..CAPSULE_COUNT);

        assert_eq!(sim.interaction_radius(1.9, 1.0), 2.0);
        assert_eq!(sim.interaction_radius(0.5, 2.0), 1.15);
        assert_eq!(sim.interaction_radius(10.0, 1.0), 10.0);
    }

    #[test]
    fn hand_inside_a_large_cloud_deforms_it() {
        let mut sim = DeformationSimulator::new(SimulatorConfig::default()).unwrap();
        let raw = [RawPoint {
            position: [3.0, 0.0, 0.0],
            color: pack_color(1, 2, 3, 255),
        }];
        let bounds = Bounds {
            min: [-5.0; 3],
            max: [5.0; 3],
        };
        let radius = Vec3::splat(5.0).length();
        let mut room = PointCloudModel::initialize(&raw, bounds, radius, Style::Normal);
        assert!(radius > sim.config().max_interaction_distance);

        let mut tracker = HandPoseTracker::new();
        tracker.update(None, Some(&hand_at(Vec3::new(3.0, 0.01, 0.0), true)));
        let report = sim.tick(&mut room, &Mat4::IDENTITY, &tracker);

        assert!(report.dispatched);
        assert_eq!(report.window, JOINTS_PER_HAND..CAPSULE_COUNT);
        assert_eq!(report.state, SimState::Active);
        assert_ne!(room.current()[0].position, [3.0, 0.0, 0.0]);
    }

    #[test]
    fn healing_converges_after_the_hand_withdraws() {
        let config = SimulatorConfig {
            heal_parameter: 0.1,
            ..Default::default()
        };
        let mut sim = DeformationSimulator::with_dispatcher(config, SerialDispatch).unwrap();
        let mut model = model(&[[0.0, 0.0, 0.0]], Style::Heal);
        let touch = Vec3::new(0.0, 0.01, 0.0);

        let mut tracker = HandPoseTracker::new();
        tracker.update(None, Some(&hand_at(touch, true)));
        let report = sim.tick(&mut model, &Mat4::IDENTITY, &tracker);
        assert!(report.dispatched);
        assert_eq!(report.window, JOINTS_PER_HAND..CAPSULE_COUNT);
        assert_eq!(report.healing, 1);
        assert_eq!(report.state, SimState::Active);

        let pushed = model.current()[0].pos();
        let largest = HandJoint::Index1.base_radius();
        assert!((pushed.distance(touch) - largest).abs() < 1e-6);

        tracker.update(None, Some(&hand_at(touch, false)));
        let bound = config.ticks_to_heal(pushed.length()).unwrap() + 1;
        let mut last = pushed.length();
        let mut ticks = 0;
        while last > 0.0 {
            let report = sim.tick(&mut model, &Mat4::IDENTITY, &tracker);
            assert!(report.dispatched);
            assert!(report.window.is_empty());
            ticks += 1;
            let now = model.current()[0].pos().length();
            assert!(now < last, "tick {ticks}: {now} >= {last}");
            last = now;
            assert!(ticks <= bound, "not healed within {bound} ticks");
        }

        assert_eq!(model.current()[0].position, model.original()[0].position);
        assert_eq!(sim.pending_healing(), 0);
        assert_eq!(sim.state(), SimState::Idle);

        let report = sim.tick(&mut model, &Mat4::IDENTITY, &tracker);
        assert!(!report.dispatched);
    }

    #[test]
    fn normal_style_stays_displaced() {
        let mut sim = DeformationSimulator::new(SimulatorConfig::default()).unwrap();
        let mut model = model(&[[0.0, 0.0, 0.0]], Style::Normal);
        let mut tracker = HandPoseTracker::new();

        tracker.update(Some(&hand_at(Vec3::new(0.0, 0.01, 0.0), true)), None);
        let report = sim.tick(&mut model, &Mat4::IDENTITY, &tracker);
        assert_eq!(report.healing, 0);
        assert_eq!(report.state, SimState::Active);
        let pushed = model.current()[0].position;
        assert_ne!(pushed, [0.0, 0.0, 0.0]);

        tracker.update(None, None);
        let report = sim.tick(&mut model, &Mat4::IDENTITY, &tracker);
        assert_eq!(report.state, SimState::Idle);
        assert!(!report.dispatched);
        assert_eq!(model.current()[0].position, pushed);
    }

    #[test]
    fn capsules_follow_the_instance_transform() {
        let mut sim = DeformationSimulator::new(SimulatorConfig::default()).unwrap();
        let mut tracker = HandPoseTracker::new();

        let offset = Vec3::new(5.0, 0.0, 0.0);
        let transform = Mat4::from_scale_rotation_translation(Vec3::splat(2.0), Quat::IDENTITY, offset);
        let mut scaled = model(&[[0.0, 0.0, 0.0]], Style::Normal);
        tracker.update(Some(&hand_at(offset + Vec3::new(0.0, 0.03, 0.0), true)), None);
        let report = sim.tick(&mut scaled, &transform, &tracker);
        assert!(report.dispatched);
        // 0.015 local units away, beyond every radius once halved.
        assert_eq!(scaled.current()[0].position, [0.0, 0.0, 0.0]);

        let mut plain = model(&[[0.0, 0.0, 0.0]], Style::Normal);
        tracker.update(Some(&hand_at(Vec3::new(0.0, 0.015, 0.0), true)), None);
        sim.tick(&mut plain, &Mat4::IDENTITY, &tracker);
        assert_ne!(plain.current()[0].position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rayon_and_serial_agree() {
        let grid: Vec<[f32; 3]> = (0..4096)
            .map(|i| {
                let (x, y, z) = (i % 16, (i / 16) % 16, i / 256);
                [x as f32 * 0.005 - 0.04, y as f32 * 0.005 - 0.04, z as f32 * 0.005 - 0.04]
            })
            .collect();

        let mut tracker = HandPoseTracker::new();
        let joints = std::array::from_fn(|j| Vec3::new(0.0, j as f32 * 0.004 - 0.04, 0.0));
        tracker.update(Some(&HandFrame::from_joints(joints, true, 1.0)), None);

        let config = SimulatorConfig {
            heal_parameter: 0.2,
            ..Default::default()
        };
        let mut parallel = DeformationSimulator::new(config).unwrap();
        let mut serial = DeformationSimulator::with_dispatcher(config, SerialDispatch).unwrap();
        let mut a = model(&grid, Style::Heal);
        let mut b = model(&grid, Style::Heal);

        let ra = parallel.tick(&mut a, &Mat4::IDENTITY, &tracker);
        let rb = serial.tick(&mut b, &Mat4::IDENTITY, &tracker);
        assert_eq!(ra, rb);
        assert!(ra.healing > 0);
        assert_eq!(a.current(), b.current());
    }
}
