//! Tracked hand skeleton and the capsule colliders derived from it.
//!
//! Each hand is a fixed, ordered array of [`JOINTS_PER_HAND`] joints. Joint `j`
//! owns one capsule spanning `parent(j) -> j` with a calibrated radius; joints
//! without a parent (wrist, palm center) are spheres. Left-hand capsules occupy
//! `0..23`, right-hand capsules `23..46`, so a per-hand selection is always a
//! contiguous window.

use glam::Vec3;
use std::ops::Range;

pub const JOINTS_PER_HAND: usize = 23;
pub const FINGERTIPS_PER_HAND: usize = 5;
pub const CAPSULE_COUNT: usize = 2 * JOINTS_PER_HAND;

/// Fingertip marker order within a hand.
pub const FINGERTIP_ORDER: [HandJoint; FINGERTIPS_PER_HAND] = [
    HandJoint::IndexTip,
    HandJoint::MiddleTip,
    HandJoint::RingTip,
    HandJoint::PinkyTip,
    HandJoint::ThumbTip,
];

/// Marker used for coarse hand-to-cloud proximity (the index tip).
pub const REPRESENTATIVE_FINGERTIP: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; 2] = [Hand::Left, Hand::Right];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    /// Capsule indices owned by this hand.
    #[inline]
    pub const fn joint_range(self) -> Range<usize> {
        let start = self.index() * JOINTS_PER_HAND;
        start..start + JOINTS_PER_HAND
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum HandJoint {
    Wrist = 0,
    Thumb1,
    Thumb2,
    Thumb3,
    ThumbTip,
    Index1,
    Index2,
    Index3,
    IndexTip,
    Middle1,
    Middle2,
    Middle3,
    MiddleTip,
    Ring1,
    Ring2,
    Ring3,
    RingTip,
    Pinky0,
    Pinky1,
    Pinky2,
    Pinky3,
    PinkyTip,
    PalmCenter,
}

use HandJoint::*;

/// `(parent, base radius in metres)` per joint, for a hand of scale 1.
const SKELETON: [(Option<HandJoint>, f32); JOINTS_PER_HAND] = [
    (None, 0.0),                    // Wrist
    (Some(Wrist), 0.018_228_28),    // Thumb1
    (Some(Thumb1), 0.010_282_96),   // Thumb2
    (Some(Thumb2), 0.009_768_807),  // Thumb3
    (Some(Thumb3), 0.008_5),        // ThumbTip
    (Some(Wrist), 0.023_460_85),    // Index1
    (Some(Index1), 0.010_295_26),   // Index2
    (Some(Index2), 0.008_038_101),  // Index3
    (Some(Index3), 0.007_636_196),  // IndexTip
    (Some(Wrist), 0.023_231_96),    // Middle1
    (Some(Middle1), 0.011_173_94),  // Middle2
    (Some(Middle2), 0.008_030_958), // Middle3
    (Some(Middle3), 0.007_629_41),  // MiddleTip
    (Some(Wrist), 0.018_228_28),    // Ring1
    (Some(Ring1), 0.009_922_139),   // Ring2
    (Some(Ring2), 0.007_611_674),   // Ring3
    (Some(Ring3), 0.007_231_09),    // RingTip
    (Some(Wrist), 0.016_088_28),    // Pinky0
    (Some(Pinky0), 0.010_282_96),   // Pinky1
    (Some(Pinky1), 0.008_483_353),  // Pinky2
    (Some(Pinky2), 0.006_764_191),  // Pinky3
    (Some(Pinky3), 0.006_425_982),  // PinkyTip
    (None, 0.023_231_96),           // PalmCenter
];

impl HandJoint {
    pub const ALL: [HandJoint; JOINTS_PER_HAND] = [
        Wrist, Thumb1, Thumb2, Thumb3, ThumbTip, Index1, Index2, Index3, IndexTip, Middle1,
        Middle2, Middle3, MiddleTip, Ring1, Ring2, Ring3, RingTip, Pinky0, Pinky1, Pinky2, Pinky3,
        PinkyTip, PalmCenter,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn parent(self) -> Option<HandJoint> {
        SKELETON[self.index()].0
    }

    /// Capsule radius before calibration.
    #[inline]
    pub fn base_radius(self) -> f32 {
        SKELETON[self.index()].1
    }
}

/// A line segment with a radius. `a == b` degenerates to a sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub a: Vec3,
    pub b: Vec3,
    pub radius: f32,
}

impl Capsule {
    /// Closest point to `p` on the capsule's axis segment.
    #[inline]
    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        let ab = self.b - self.a;
        let len_sq = ab.length_squared();
        if len_sq <= f32::EPSILON * f32::EPSILON {
            return self.a;
        }
        let t = ((p - self.a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.a + ab * t
    }

    /// Distance from `p` to the axis segment.
    #[inline]
    pub fn axis_distance(&self, p: Vec3) -> f32 {
        (p - self.closest_point(p)).length()
    }
}

/// One hand's sample from the tracking provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandFrame {
    /// World positions in [`HandJoint`] order.
    pub joints: [Vec3; JOINTS_PER_HAND],
    /// World positions in [`FINGERTIP_ORDER`].
    pub fingertips: [Vec3; FINGERTIPS_PER_HAND],
    pub is_tracked: bool,
    /// User hand size relative to the reference skeleton.
    pub hand_scale: f32,
}

impl HandFrame {
    /// Builds a frame whose fingertip markers coincide with the tip joints.
    pub fn from_joints(joints: [Vec3; JOINTS_PER_HAND], is_tracked: bool, hand_scale: f32) -> Self {
        let fingertips = FINGERTIP_ORDER.map(|j| joints[j.index()]);
        Self {
            joints,
            fingertips,
            is_tracked,
            hand_scale,
        }
    }
}

/// Upstream hand-tracking SDK seam.
pub trait HandTrackingProvider {
    /// Latest sample for `hand`, or `None` when the SDK has nothing for it.
    fn frame(&mut self, hand: Hand) -> Option<HandFrame>;
}

/// Holds the latest joint positions of both hands and their calibrated radii.
#[derive(Debug, Clone)]
pub struct HandPoseTracker {
    joints: [Vec3; CAPSULE_COUNT],
    fingertips: [[Vec3; FINGERTIPS_PER_HAND]; 2],
    tracked: [bool; 2],
    radii: [f32; CAPSULE_COUNT],
    calibrated: bool,
    /// Treat both hands as tracked for proximity pruning (manual debugging).
    pub force_tracked: bool,
}

impl Default for HandPoseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HandPoseTracker {
    pub fn new() -> Self {
        let radii = std::array::from_fn(|i| HandJoint::ALL[i % JOINTS_PER_HAND].base_radius());
        Self {
            joints: [Vec3::ZERO; CAPSULE_COUNT],
            fingertips: [[Vec3::ZERO; FINGERTIPS_PER_HAND]; 2],
            tracked: [false; 2],
            radii,
            calibrated: false,
            force_tracked: false,
        }
    }

    /// Ingests this frame's samples. Untracked or missing hands keep their
    /// last known positions.
    pub fn update(&mut self, left: Option<&HandFrame>, right: Option<&HandFrame>) {
        for (hand, frame) in [(Hand::Left, left), (Hand::Right, right)] {
            let h = hand.index();
            match frame {
                Some(frame) if frame.is_tracked => {
                    self.joints[hand.joint_range()].copy_from_slice(&frame.joints);
                    self.fingertips[h] = frame.fingertips;
                    self.tracked[h] = true;
                }
                _ => self.tracked[h] = false,
            }
        }

        // Debug sessions calibrate from whatever sample arrives, tracked or not.
        let sampled = self.force_tracked && (left.is_some() || right.is_some());
        if !self.calibrated && (self.tracked[0] || self.tracked[1] || sampled) {
            let scale = match (left, right) {
                (_, Some(r)) if r.is_tracked => r.hand_scale,
                (Some(l), _) if l.is_tracked => l.hand_scale,
                (_, Some(r)) => r.hand_scale,
                (Some(l), _) => l.hand_scale,
                _ => 1.0,
            };
            self.calibrate(scale);
        }
    }

    /// Pulls both hands from `provider`; a missing provider only holds state.
    pub fn poll(&mut self, provider: Option<&mut dyn HandTrackingProvider>) {
        match provider {
            Some(provider) => {
                let left = provider.frame(Hand::Left);
                let right = provider.frame(Hand::Right);
                self.update(left.as_ref(), right.as_ref());
            }
            None => {
                log::debug!("No hand-tracking provider; holding last known hand pose");
                self.update(None, None);
            }
        }
    }

    fn calibrate(&mut self, scale: f32) {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            log::warn!("Ignoring invalid hand scale {scale}; calibrating with 1.0");
            1.0
        };
        for r in self.radii.iter_mut() {
            *r *= scale;
        }
        self.calibrated = true;
        log::info!("Hand capsules calibrated with scale {scale:.3}");
    }

    #[inline]
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Whether `hand` counts as present for proximity pruning.
    #[inline]
    pub fn is_tracked(&self, hand: Hand) -> bool {
        self.force_tracked || self.tracked[hand.index()]
    }

    #[inline]
    pub fn joint(&self, hand: Hand, joint: HandJoint) -> Vec3 {
        self.joints[hand.joint_range().start + joint.index()]
    }

    #[inline]
    pub fn fingertips(&self, hand: Hand) -> &[Vec3; FINGERTIPS_PER_HAND] {
        &self.fingertips[hand.index()]
    }

    #[inline]
    pub fn representative_fingertip(&self, hand: Hand) -> Vec3 {
        self.fingertips[hand.index()][REPRESENTATIVE_FINGERTIP]
    }

    #[inline]
    pub fn radii(&self) -> &[f32; CAPSULE_COUNT] {
        &self.radii
    }

    /// World-space capsules for both hands, indexed like the joints.
    pub fn capsules(&self) -> [Capsule; CAPSULE_COUNT] {
        std::array::from_fn(|i| {
            let hand_start = i - i % JOINTS_PER_HAND;
            let joint = HandJoint::ALL[i % JOINTS_PER_HAND];
            let b = self.joints[i];
            let a = joint
                .parent()
                .map_or(b, |parent| self.joints[hand_start + parent.index()]);
            Capsule {
                a,
                b,
                radius: self.radii[i],
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_frame(offset: Vec3, tracked: bool, scale: f32) -> HandFrame {
        let joints = std::array::from_fn(|j| offset + Vec3::new(j as f32 * 0.01, 0.0, 0.0));
        HandFrame::from_joints(joints, tracked, scale)
    }

    #[test]
    fn skeleton_parents_precede_children() {
        for joint in HandJoint::ALL {
            assert_eq!(HandJoint::ALL[joint.index()], joint);
            if let Some(parent) = joint.parent() {
                assert!(parent.index() < joint.index(), "{joint:?}");
            }
        }
        assert_eq!(Hand::Right.joint_range(), 23..46);
    }

    #[test]
    fn calibration_happens_once() {
        let mut tracker = HandPoseTracker::new();
        let base = tracker.radii()[HandJoint::Index2.index()];

        tracker.update(Some(&offset_frame(Vec3::ZERO, false, 2.0)), None);
        assert!(!tracker.is_calibrated());

        tracker.update(Some(&offset_frame(Vec3::ZERO, true, 1.5)), None);
        assert!(tracker.is_calibrated());
        let scaled = tracker.radii()[HandJoint::Index2.index()];
        assert!((scaled - base * 1.5).abs() < 1e-7);
        assert!((tracker.radii()[23 + HandJoint::Index2.index()] - base * 1.5).abs() < 1e-7);

        tracker.update(None, Some(&offset_frame(Vec3::ONE, true, 3.0)));
        assert_eq!(tracker.radii()[HandJoint::Index2.index()], scaled);
    }

    #[test]
    fn right_hand_scale_wins_on_first_frame() {
        let mut tracker = HandPoseTracker::new();
        let base = tracker.radii()[HandJoint::Middle1.index()];
        tracker.update(
            Some(&offset_frame(Vec3::ZERO, true, 0.5)),
            Some(&offset_frame(Vec3::ONE, true, 2.0)),
        );
        assert!((tracker.radii()[HandJoint::Middle1.index()] - base * 2.0).abs() < 1e-7);
    }

    #[test]
    fn forced_tracking_calibrates_from_untracked_samples() {
        let mut tracker = HandPoseTracker::new();
        tracker.force_tracked = true;
        let base = tracker.radii()[HandJoint::Ring2.index()];

        tracker.poll(None);
        assert!(!tracker.is_calibrated());

        tracker.update(
            Some(&offset_frame(Vec3::ZERO, false, 0.5)),
            Some(&offset_frame(Vec3::ONE, false, 1.25)),
        );
        assert!(tracker.is_calibrated());
        assert!(!tracker.tracked[Hand::Right.index()]);
        assert!((tracker.radii()[HandJoint::Ring2.index()] - base * 1.25).abs() < 1e-7);

        tracker.update(None, Some(&offset_frame(Vec3::ONE, true, 3.0)));
        assert!((tracker.radii()[HandJoint::Ring2.index()] - base * 1.25).abs() < 1e-7);
    }

    #[test]
    fn untracked_hands_hold_last_pose() {
        let mut tracker = HandPoseTracker::new();
        let frame = offset_frame(Vec3::new(1.0, 2.0, 3.0), true, 1.0);
        tracker.update(Some(&frame), None);
        assert!(tracker.is_tracked(Hand::Left));
        assert!(!tracker.is_tracked(Hand::Right));

        tracker.update(Some(&offset_frame(Vec3::splat(9.0), false, 1.0)), None);
        assert!(!tracker.is_tracked(Hand::Left));
        assert_eq!(tracker.joint(Hand::Left, HandJoint::Wrist), Vec3::new(1.0, 2.0, 3.0));

        tracker.poll(None);
        assert_eq!(
            tracker.representative_fingertip(Hand::Left),
            frame.joints[HandJoint::IndexTip.index()]
        );

        tracker.force_tracked = true;
        assert!(tracker.is_tracked(Hand::Right));
    }

    #[test]
    fn capsules_span_parent_to_joint() {
        let mut tracker = HandPoseTracker::new();
        tracker.update(None, Some(&offset_frame(Vec3::ZERO, true, 1.0)));

        let capsules = tracker.capsules();
        let index3 = capsules[23 + HandJoint::Index3.index()];
        assert_eq!(index3.a, tracker.joint(Hand::Right, HandJoint::Index2));
        assert_eq!(index3.b, tracker.joint(Hand::Right, HandJoint::Index3));

        let palm = capsules[23 + HandJoint::PalmCenter.index()];
        assert_eq!(palm.a, palm.b);
        assert_eq!(capsules[HandJoint::Wrist.index()].radius, 0.0);
    }

    #[test]
    fn closest_point_clamps_to_segment() {
        let c = Capsule {
            a: Vec3::ZERO,
            b: Vec3::X,
            radius: 0.1,
        };
        assert_eq!(c.closest_point(Vec3::new(0.5, 2.0, 0.0)), Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(c.closest_point(Vec3::new(-3.0, 0.0, 0.0)), Vec3::ZERO);
        assert_eq!(c.closest_point(Vec3::new(4.0, 1.0, 0.0)), Vec3::X);
        assert_eq!(c.axis_distance(Vec3::new(2.0, 0.0, 0.0)), 1.0);

        let sphere = Capsule {
            a: Vec3::ONE,
            b: Vec3::ONE,
            radius: 0.1,
        };
        assert_eq!(sphere.closest_point(Vec3::ZERO), Vec3::ONE);
    }

    struct Fixed(Option<HandFrame>);

    impl HandTrackingProvider for Fixed {
        fn frame(&mut self, hand: Hand) -> Option<HandFrame> {
            match hand {
                Hand::Left => self.0,
                Hand::Right => None,
            }
        }
    }

    #[test]
    fn poll_reads_the_provider() {
        let mut tracker = HandPoseTracker::new();
        let mut provider = Fixed(Some(offset_frame(Vec3::Y, true, 1.0)));
        tracker.poll(Some(&mut provider));
        assert!(tracker.is_tracked(Hand::Left));
        assert!(tracker.is_calibrated());
        assert_eq!(tracker.joint(Hand::Left, HandJoint::Wrist), Vec3::Y);
    }
}
