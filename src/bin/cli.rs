//! Stereo Targeting - laser targeting rig tools
//!
//! This is the CLI entry point for the stereo-targeting tool.
//! Run with: cargo run --bin stereo-targeting -- <command>

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use stereo_targeting::settings::{AlignmentRecord, CalibrationSource};
use stereo_targeting::{
    compute_max_angle_deg, run_alignment_pattern, AimCommand, AlignmentConfig, DryRunActuator,
    Settings, SharedCalibration, StopSignal, TriangulationEngine,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: stereo-targeting [--config PATH] <command>

Commands:
  aim LX LY RX RY        Triangulate a left/right pixel correspondence
  max-angle D W H        Mirror range for a W x H rectangle at D metres
      --save             Store the result in the settings file
  align                  Run the alignment pattern on the dry-run actuator
  check-config           Load, validate and print the settings

Environment:
  STEREO_TARGETING_CONFIG  Settings file (default: platform config dir)
  RUST_LOG                 Log filter (default: info)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_config_path(&mut args)?;

    let Some(command) = args.first().cloned() else {
        println!("{USAGE}");
        return Ok(());
    };
    let rest = &args[1..];

    match command.as_str() {
        "aim" => aim(&config_path, rest),
        "max-angle" => max_angle(&config_path, rest),
        "align" => align(&config_path).await,
        "check-config" => check_config(&config_path),
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("Unknown command '{other}'\n\n{USAGE}"),
    }
}

/// Remove `--config PATH` from the arguments, falling back to the default path.
fn take_config_path(args: &mut Vec<String>) -> anyhow::Result<PathBuf> {
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            bail!("--config requires a path");
        }
        let path = args.remove(pos + 1);
        args.remove(pos);
        return Ok(PathBuf::from(path));
    }
    Settings::default_path().context("Cannot determine config directory")
}

fn parse_numbers<const N: usize>(args: &[String], names: [&str; N]) -> anyhow::Result<[f64; N]> {
    let values: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    if values.len() != N {
        bail!("Expected {} arguments: {}", N, names.join(" "));
    }

    let mut out = [0.0; N];
    for (i, (value, name)) in values.iter().zip(names).enumerate() {
        out[i] = value
            .parse()
            .with_context(|| format!("{name} is not a number: '{value}'"))?;
    }
    Ok(out)
}

fn aim(config_path: &Path, args: &[String]) -> anyhow::Result<()> {
    let [lx, ly, rx, ry] = parse_numbers(args, ["LX", "LY", "RX", "RY"])?;
    let settings = Settings::load_or_default(config_path)?;
    let (model, source) = settings.calibration_model()?;

    let engine = TriangulationEngine::new(SharedCalibration::with_model(model))
        .with_min_disparity(settings.optics.min_disparity_px);
    let solution = engine.compute_angles(lx, ly, rx, ry)?;
    let command = AimCommand::new(
        solution.yaw_deg,
        solution.pitch_deg,
        settings.laser.max_angle_deg,
    );

    println!("🎯 Stereo Targeting - Aim");
    println!("================================================");
    print_source(&source);
    println!("Left:  ({lx:.1}, {ly:.1})");
    println!("Right: ({rx:.1}, {ry:.1})");
    println!("Disparity: {:.2} px", solution.disparity_px);
    println!(
        "Point: X={:.3} m, Y={:.3} m, Z={:.3} m",
        solution.point_m[0], solution.point_m[1], solution.point_m[2]
    );
    println!("Distance: {:.3} m", solution.distance_m);
    println!(
        "Angles: yaw={:.2}°, pitch={:.2}°",
        solution.yaw_deg, solution.pitch_deg
    );
    if command.clamped {
        println!(
            "⚠️ Clamped to ±{:.1}°: yaw={:.2}°, pitch={:.2}°",
            settings.laser.max_angle_deg, command.yaw_deg, command.pitch_deg
        );
    }
    println!("================================================");
    Ok(())
}

fn max_angle(config_path: &Path, args: &[String]) -> anyhow::Result<()> {
    let [distance, width, height] = parse_numbers(args, ["D", "W", "H"])?;
    if !(distance > 0.0 && width > 0.0 && height > 0.0) {
        bail!("Distance and rectangle size must be positive");
    }

    let angle = compute_max_angle_deg(distance, width, height);
    println!("📐 Max angle for {width} m x {height} m at {distance} m: {angle:.2}°");

    if args.iter().any(|a| a == "--save") {
        let mut settings = Settings::load_or_default(config_path)?;
        settings.laser.max_angle_deg = angle;
        settings.laser.alignment = Some(AlignmentRecord {
            distance_wall_m: distance,
            rect_w_m: width,
            rect_h_m: height,
        });
        settings.validate()?;
        settings.save(config_path)?;
        println!("✅ Saved to {}", config_path.display());
    }
    Ok(())
}

async fn align(config_path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load_or_default(config_path)?;
    let max_angle = settings.laser.max_angle_deg;

    println!("🔦 Alignment pattern (dry run) at ±{max_angle:.2}°");
    println!("Press Ctrl+C to cancel.\n");

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_stop.stop();
        }
    });

    let actuator = tokio::task::spawn_blocking(move || {
        let mut actuator = DryRunActuator::new();
        let result =
            run_alignment_pattern(&mut actuator, max_angle, &AlignmentConfig::default(), &stop);
        result.map(|()| actuator)
    })
    .await
    .context("Alignment task panicked")??;

    for command in actuator.commands() {
        println!("  {command:?}");
    }
    println!("\n✅ Alignment finished, laser off and mirror released");
    Ok(())
}

fn check_config(config_path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load_or_default(config_path)?;
    let (model, source) = settings.calibration_model()?;

    println!("⚙️ Stereo Targeting - Configuration");
    println!("================================================");
    println!("Settings file: {}", config_path.display());
    print_source(&source);
    println!(
        "Model: fx={:.1}, fy={:.1}, cx={:.1}, cy={:.1}, baseline={:.3} m, offset={:.3} m, {}x{}",
        model.fx(),
        model.fy(),
        model.cx(),
        model.cy(),
        model.baseline_m(),
        model.vertical_offset_m(),
        model.image_width(),
        model.image_height()
    );
    println!("================================================");
    println!("{}", serde_json::to_string_pretty(&settings)?);
    println!("\n✅ Configuration valid");
    Ok(())
}

fn print_source(source: &CalibrationSource) {
    match source {
        CalibrationSource::Artifact(path) => println!("Calibration: {}", path.display()),
        CalibrationSource::Datasheet => println!("Calibration: datasheet intrinsics (no artifact)"),
    }
}
