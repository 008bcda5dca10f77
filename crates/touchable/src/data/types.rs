//! Core data types for touchable clouds, focused on device buffer layout.

use glam::Vec3;

/// One entry of the `current` and `original` point buffers.
///
/// 16 bytes, matching a `float4` structured buffer element.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct Point {
    /// Position in the cloud's local (recentered) frame.
    pub position: [f32; 3],
    /// Packed RGBA in `current`; the broadcast [`Style`] tag in `original`.
    pub color: u32,
}

impl Point {
    #[inline]
    pub fn pos(&self) -> Vec3 {
        Vec3::from(self.position)
    }
}

/// Per-cloud behavior tag stored in the color field of every `original` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Style {
    Normal = 2,
    /// Displaced points relax back to their original position.
    Heal = 16,
}

impl Style {
    pub fn from_healing(healing: bool) -> Self {
        if healing {
            Style::Heal
        } else {
            Style::Normal
        }
    }

    #[inline]
    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            2 => Some(Style::Normal),
            16 => Some(Style::Heal),
            _ => None,
        }
    }
}
