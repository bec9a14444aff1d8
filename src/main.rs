use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, trace};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use tumor_common::{SimulationConfig, Snapshot};
use tumor_engine::TumorSimulation;

/// Batch runner for the tumor/immune lattice model.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides `timing.total_ticks`.
    #[arg(short, long)]
    ticks: Option<u32>,

    /// Overrides `initial_conditions.seed`.
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init(); // RUST_LOG controls verbosity
    let args = Args::parse();

    info!("Starting tumor simulation engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(ticks) = args.ticks {
        config.timing.total_ticks = ticks;
    }
    if let Some(seed) = args.seed {
        config.initial_conditions.seed = seed;
    }
    // Rayon only serves the snapshot statistics; the tick itself is sequential.
    info!("Using {} Rayon threads for snapshot statistics.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = TumorSimulation::new(config).context("Failed to initialize simulation")?;
    info!("Initialized with {} cells.", sim.population());
    debug!("Simulation parameters: {:#?}", sim.params());

    // --- Simulation Loop ---
    let total_ticks = sim.config().timing.total_ticks;
    let record_interval = sim.config().timing.record_interval_ticks.max(1); // Avoid modulo by zero
    info!(
        "Running {} ticks, recording a snapshot every {} ticks.",
        total_ticks, record_interval
    );

    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot (tick 0) ---
    sim.record_snapshot();

    for tick in 0..total_ticks {
        // Treatments scheduled for this tick land before any cell acts.
        sim.apply_scheduled_treatments(u64::from(tick))
            .with_context(|| format!("Treatment before tick {} failed", tick + 1))?;

        let tick_start = Instant::now();
        let summary = match sim.step() {
            Ok(summary) => summary,
            Err(e) => {
                error!("Error during tick {}: {}", tick + 1, e);
                anyhow::bail!("Simulation tick failed.");
            }
        };
        let tick_duration = tick_start.elapsed();

        // Print status periodically
        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_tick = (tick + 1) % record_interval == 0;
        let is_last_tick = tick + 1 == total_ticks;
        let died_out = summary.population == 0; // Nothing left to simulate

        if should_print_status || is_record_tick || is_last_tick || died_out {
            let counts = sim.counts();
            info!(
                "Tick [{}/{}] | Tumor: {} (stem {}) | Immune: {} | Kills: {} | Tick Time: {:6.2} ms | Elapsed: {:.2} s",
                tick + 1,
                total_ticks,
                counts.tumor(),
                counts.stem_tumor,
                counts.immune(),
                summary.successes,
                tick_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;
            // --- Record Snapshot ---
            if is_record_tick || is_last_tick || died_out {
                sim.record_snapshot();
            }
        } else {
            // Other ticks only show up at trace level
            trace!(
                "Tick [{}/{}] completed in {:.2} ms",
                tick + 1,
                total_ticks,
                tick_duration.as_secs_f64() * 1000.0
            );
        }

        if died_out {
            info!("Population died out after tick {}; stopping early.", tick + 1);
            break;
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        save_snapshots(sim.get_recorded_snapshots(), &output.base_filename, format)?;
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    // Final cell positions go to CSV, separate from the snapshots
    if output.save_positions {
        let filename = format!("{}_final_cells.csv", output.base_filename);
        save_final_cells(&sim, &filename)
            .with_context(|| format!("Failed to write final cells to '{}'", filename))?;
        info!("Final cells saved to {}", filename);
    } else {
        info!("Skipping saving final cells as per config.");
    }

    info!("Simulation complete.");
    Ok(())
}

fn save_snapshots(snapshots: &[Snapshot], base_filename: &str, format: &str) -> Result<()> {
    let (extension, format) = match format {
        "json" => ("json", "json"),
        "bincode" => ("bin", "bincode"), // Compact binary
        "messagepack" => ("msgpack", "messagepack"), // Compact and cross-language
        other => {
            error!("Unknown output format: {}. Using JSON instead.", other);
            ("json", "json")
        }
    };
    let filename = format!("{}_snapshots.{}", base_filename, extension);
    let file = File::create(&filename)
        .with_context(|| format!("Failed to create snapshot file '{}'", filename))?;
    let mut writer = BufWriter::new(file);

    match format {
        "bincode" => bincode::serialize_into(&mut writer, snapshots)
            .context("Failed to serialize snapshots to bincode")?,
        "messagepack" => rmp_serde::encode::write(&mut writer, snapshots)
            .context("Failed to serialize snapshots to MessagePack")?,
        _ => serde_json::to_writer(&mut writer, snapshots)
            .context("Failed to serialize snapshots to JSON")?,
    }
    writer.flush()?;
    info!("{} snapshots saved to {} ({} format)", snapshots.len(), filename, format);
    Ok(())
}

fn save_final_cells(sim: &TumorSimulation, filename: &str) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)?;
    writer.write_record(["x", "y", "species", "immune_type", "variant"])?;
    for record in sim.cells() {
        writer.write_record([
            record.x.to_string(),
            record.y.to_string(),
            record.species.name().to_string(),
            record.immune_type.map(|t| t.name().to_string()).unwrap_or_default(),
            record.variant.unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
