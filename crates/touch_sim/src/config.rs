use anyhow::Result;
use bply::DEFAULT_POINT_CAP;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use touchable::{ImportOptions, SimulatorConfig, VisibilityConfig};

/// `touch_sim` - headless driver for touchable point clouds.
///
/// Imports binary PLY clouds, sweeps a scripted hand through each of them and
/// logs how the deformation and healing evolve frame by frame.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate hand interaction with one or more clouds.
    Run(RunArgs),
    /// Write a synthetic sphere-shell cloud.
    Synth(SynthArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// A `.ply` file, or a directory searched recursively for `.ply` files.
    pub path: PathBuf,

    /// Maximum number of points kept per cloud after the shuffle.
    #[arg(long, env = "TOUCH_POINT_CAP", default_value_t = DEFAULT_POINT_CAP)]
    pub point_cap: usize,

    /// Let displaced points relax back to their original position.
    #[arg(long, env = "TOUCH_HEALING", default_value_t = true, action = ArgAction::Set)]
    pub healing: bool,

    /// Fraction of the remaining offset healed per tick. Higher than the
    /// library default so short headless runs settle.
    #[arg(long, env = "TOUCH_HEAL_RATE", default_value_t = 0.05)]
    pub heal_rate: f32,

    /// Margin around each cloud within which a hand takes part, in metres.
    #[arg(long, env = "TOUCH_HAND_PROXIMITY", default_value_t = 0.15)]
    pub hand_proximity_radius: f32,

    #[arg(long, env = "TOUCH_MAX_INTERACTION", default_value_t = 2.0)]
    pub max_interaction_distance: f32,

    #[arg(long, env = "TOUCH_CULLING", default_value_t = true, action = ArgAction::Set)]
    pub culling: bool,

    #[arg(long, env = "TOUCH_ADAPTIVE_DENSITY", default_value_t = true, action = ArgAction::Set)]
    pub adaptive_density: bool,

    /// Fixed shuffle seed for reproducible imports.
    #[arg(long, env = "TOUCH_SEED")]
    pub seed: Option<u64>,

    /// Hand size relative to the reference skeleton.
    #[arg(long, env = "TOUCH_HAND_SCALE", default_value_t = 1.0)]
    pub hand_scale: f32,

    /// Frames spent on each leg of the hand sweep.
    #[arg(long, env = "TOUCH_TICKS_PER_LEG", default_value_t = 30)]
    pub ticks_per_leg: u32,

    /// Frames simulated after the sweep has finished.
    #[arg(long, env = "TOUCH_SETTLE_TICKS", default_value_t = 240)]
    pub settle_ticks: u32,

    /// Distance between neighbouring clouds along X, in metres.
    #[arg(long, env = "TOUCH_SPACING", default_value_t = 1.5)]
    pub spacing: f32,

    /// Treat both hands as tracked for proximity pruning.
    #[arg(long, env = "TOUCH_FORCE_TRACKED")]
    pub force_tracked: bool,
}

impl RunArgs {
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            point_cap: self.point_cap,
            healing: self.healing,
            seed: self.seed,
        }
    }

    pub fn simulator(&self) -> SimulatorConfig {
        SimulatorConfig {
            heal_parameter: self.heal_rate,
            hand_proximity_radius: self.hand_proximity_radius,
            max_interaction_distance: self.max_interaction_distance,
            ..Default::default()
        }
    }

    pub fn visibility(&self) -> VisibilityConfig {
        VisibilityConfig {
            culling: self.culling,
            adaptive_density: self.adaptive_density,
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.point_cap > 0, "point cap must be positive");
        anyhow::ensure!(self.ticks_per_leg > 0, "ticks per leg must be positive");
        self.simulator().validate()
    }
}

#[derive(Args, Debug)]
pub struct SynthArgs {
    /// Output `.ply` path.
    pub out: PathBuf,

    #[arg(long, default_value_t = 20_000)]
    pub points: usize,

    /// Shell radius in metres.
    #[arg(long, default_value_t = 0.3)]
    pub radius: f32,
}
