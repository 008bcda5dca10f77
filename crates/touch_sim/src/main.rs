//! Headless driver for touchable point clouds.

mod config;
mod sweep;

use crate::config::{Command, Config, RunArgs, SynthArgs};
use crate::sweep::HandSweep;
use anyhow::{bail, Context, Result};
use bply::{pack_color, RawPoint};
use clap::Parser;
use glam::{Mat4, Vec3};
use std::path::{Path, PathBuf};
use touchable::{import_ply, Camera, PointCloudModel, Session, SimState, TouchableInstance};
use walkdir::WalkDir;

const PROGRESS_EVERY: u32 = 60;

fn main() -> Result<()> {
    // Initialize logging; default to "info" if RUST_LOG is unset.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    log::debug!("Starting with {:?}", config);

    match &config.command {
        Command::Run(args) => run(args),
        Command::Synth(args) => synth(args),
    }
}

/// `path` itself if it is a file, else every `*.ply` below it in sorted order.
fn collect_ply_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("ply"))
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn displaced(model: &PointCloudModel) -> usize {
    model
        .current()
        .iter()
        .zip(model.original())
        .filter(|(c, o)| c.position != o.position)
        .count()
}

fn run(args: &RunArgs) -> Result<()> {
    args.validate()?;

    let files = collect_ply_files(&args.path);
    if files.is_empty() {
        bail!("No .ply files found under {}", args.path.display());
    }
    log::info!("Found {} cloud(s) under {}", files.len(), args.path.display());

    let mut session = Session::new();
    session.tracker.force_tracked = args.force_tracked;

    let options = args.import_options();
    let mut targets = Vec::with_capacity(files.len());
    for (i, path) in files.iter().enumerate() {
        let at = Vec3::new(i as f32 * args.spacing, 0.0, 0.0);
        // A failed import keeps its slot; the session skips it every frame.
        let model = match import_ply(path, &options) {
            Ok(model) => {
                targets.push((at, model.bounding_sphere_radius()));
                Some(model)
            }
            Err(err) => {
                log::error!("{:#}", err);
                None
            }
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cloud")
            .to_owned();
        session.add(TouchableInstance::new(
            name,
            model,
            Mat4::from_translation(at),
            args.simulator(),
            args.visibility(),
        )?);
    }

    if targets.is_empty() {
        bail!("None of the {} cloud(s) could be imported", files.len());
    }

    let row_center = Vec3::new((files.len() - 1) as f32 * args.spacing * 0.5, 0.0, 0.0);
    let camera = Camera::new(row_center + Vec3::new(0.0, 0.5, 3.0), row_center, 16.0 / 9.0);

    let mut sweep = HandSweep::through(&targets, args.ticks_per_leg, args.hand_scale);
    let total = sweep.total_ticks() + args.settle_ticks;
    let mut dispatched = vec![0u32; session.instances.len()];

    for frame in 0..total {
        let reports = session.frame(&camera, Some(&mut sweep));

        for (count, report) in dispatched.iter_mut().zip(&reports) {
            if let Some(tick) = &report.tick {
                if tick.dispatched {
                    *count += 1;
                }
                log::trace!(
                    "frame {frame} {}: {:?} window={:?} healing={} draw={}",
                    report.name,
                    tick.state,
                    tick.window,
                    tick.healing,
                    report.visibility.draw_count
                );
            }
        }

        if frame % PROGRESS_EVERY == 0 {
            let active = reports
                .iter()
                .filter(|r| matches!(&r.tick, Some(t) if t.state == SimState::Active))
                .count();
            let healing: u32 = reports
                .iter()
                .filter_map(|r| r.tick.as_ref())
                .map(|t| t.healing)
                .sum();
            log::info!("frame {frame}/{total}: {active} active, {healing} point(s) healing");
        }
    }

    for (instance, count) in session.instances.iter().zip(&dispatched) {
        match &instance.model {
            Some(model) => log::info!(
                "{}: {} points, {} dispatched frame(s), {} still displaced, final state {:?}",
                instance.name,
                model.point_count(),
                count,
                displaced(model),
                instance.simulator.state()
            ),
            None => log::warn!("{}: skipped (no model)", instance.name),
        }
    }

    Ok(())
}

/// Fibonacci sphere shell, colored by height.
fn sphere_shell(count: usize, radius: f32) -> Vec<RawPoint> {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    (0..count)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
            let ring = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f32;
            let p = Vec3::new(theta.cos() * ring, y, theta.sin() * ring) * radius;
            let shade = ((y + 1.0) * 127.5) as u8;
            RawPoint {
                position: p.to_array(),
                color: pack_color(shade, 96, 255 - shade, 255),
            }
        })
        .collect()
}

fn synth(args: &SynthArgs) -> Result<()> {
    let points = sphere_shell(args.points, args.radius);
    bply::write_file(&args.out, &points)
        .with_context(|| format!("Failed writing {}", args.out.display()))?;
    log::info!(
        "Wrote {} points (radius {:.2}) to {}",
        points.len(),
        args.radius,
        args.out.display()
    );
    Ok(())
}
