//! Scripted right hand that pokes into each cloud in turn and then withdraws.

use glam::Vec3;
use touchable::hands::{HandJoint, JOINTS_PER_HAND};
use touchable::{Hand, HandFrame, HandTrackingProvider};

/// Open hand with the fingers along +Y, wrist at `wrist`.
pub fn hand_pose(wrist: Vec3, scale: f32) -> [Vec3; JOINTS_PER_HAND] {
    // (first joint of the chain, chain length, lateral offset)
    const CHAINS: [(HandJoint, usize, f32); 5] = [
        (HandJoint::Thumb1, 4, -0.04),
        (HandJoint::Index1, 4, -0.02),
        (HandJoint::Middle1, 4, 0.0),
        (HandJoint::Ring1, 4, 0.02),
        (HandJoint::Pinky0, 5, 0.04),
    ];

    let mut joints = [wrist; JOINTS_PER_HAND];
    for (first, len, x) in CHAINS {
        for k in 0..len {
            joints[first.index() + k] = wrist + Vec3::new(x, 0.03 + 0.025 * k as f32, 0.0) * scale;
        }
    }
    joints[HandJoint::PalmCenter.index()] = wrist + Vec3::new(0.0, 0.04, 0.0) * scale;
    joints
}

#[derive(Debug, Clone)]
pub struct HandSweep {
    /// Wrist path, one `(from, to)` pair per leg.
    legs: Vec<(Vec3, Vec3)>,
    ticks_per_leg: u32,
    scale: f32,
    tick: u32,
}

impl HandSweep {
    /// For each `(center, radius)` target: rise from below the cloud until the
    /// index tip reaches the center, then drop back out.
    pub fn through(targets: &[(Vec3, f32)], ticks_per_leg: u32, scale: f32) -> Self {
        let tip = hand_pose(Vec3::ZERO, scale)[HandJoint::IndexTip.index()];
        let legs = targets
            .iter()
            .flat_map(|&(center, radius)| {
                let below = center - Vec3::new(0.0, radius + 0.3, 0.0) - tip;
                let inside = center - tip;
                [(below, inside), (inside, below)]
            })
            .collect();

        Self {
            legs,
            ticks_per_leg: ticks_per_leg.max(1),
            scale,
            tick: 0,
        }
    }

    pub fn total_ticks(&self) -> u32 {
        self.legs.len() as u32 * self.ticks_per_leg
    }

    /// Wrist position at `tick`, or `None` once the sweep is over.
    pub fn wrist_at(&self, tick: u32) -> Option<Vec3> {
        let leg = (tick / self.ticks_per_leg) as usize;
        let (from, to) = *self.legs.get(leg)?;
        let t = (tick % self.ticks_per_leg) as f32 / self.ticks_per_leg as f32;
        Some(from.lerp(to, t))
    }
}

impl HandTrackingProvider for HandSweep {
    /// The left hand is never tracked; the script advances one frame per
    /// right-hand query.
    fn frame(&mut self, hand: Hand) -> Option<HandFrame> {
        if hand == Hand::Left {
            return None;
        }
        let frame = match self.wrist_at(self.tick) {
            Some(wrist) => HandFrame::from_joints(hand_pose(wrist, self.scale), true, self.scale),
            None => HandFrame::from_joints([Vec3::ZERO; JOINTS_PER_HAND], false, self.scale),
        };
        self.tick += 1;
        Some(frame)
    }
}
