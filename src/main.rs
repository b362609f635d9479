use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use pourover_lbm::{Config, CoupledSimulation, Geometry};
use std::env;

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <config.json> [geometry.stl]", args[0]);
        eprintln!("  config.json  - JSON file containing simulation parameters");
        eprintln!("  geometry.stl - optional STL file with the brewer and filter walls");
        std::process::exit(1);
    }

    let config_path = &args[1];
    info!("Loading configuration from: {}", config_path);
    let config = Config::from_file(config_path)?;

    info!("Simulation parameters:");
    info!("  Domain: {}x{}x{}", config.domain.nx, config.domain.ny, config.domain.nz);
    info!("  Tau (water): {}", config.physics.calculate_tau());
    info!("  Tau (air): {}", config.physics.tau_air);
    info!("  Gravity: {:?}", config.physics.gravity);
    info!("  Steps: {}", config.simulation.steps);
    if let Some(bed) = &config.particles.bed {
        info!(
            "  Bed: {} particles, r = {} +/- {}, z in [{}, {}]",
            bed.count, bed.radius_mean, bed.radius_std, bed.z_min, bed.z_max
        );
    }

    let mut geometry = Geometry::from_domain(&config.domain);
    if let Some(stl_path) = args.get(2) {
        info!("Loading STL geometry from: {}", stl_path);
        let marked = geometry.add_stl(stl_path)?;
        info!("Marked {} solid nodes from STL", marked);
    }

    let steps = config.simulation.steps;
    let mut simulation = CoupledSimulation::new(config, geometry)?;

    let progress = ProgressBar::new(steps as u64);
    progress.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} steps [{elapsed_precise}] {msg}",
    )?);

    info!("Starting simulation...");
    let outcome = simulation.run(steps, |fluid, coupling| {
        progress.inc(1);
        progress.set_message(format!(
            "|u|max {:.4}, {} particles",
            fluid.max_speed, coupling.active
        ));
    });

    match outcome {
        Ok(()) => {
            progress.finish_with_message("done");
            info!("Simulation completed successfully!");
            info!("  Final mass: {:.6}", simulation.core().total_mass());
            info!(
                "  Active particles: {} of {}",
                simulation.particles().active_count(),
                simulation.particles().len()
            );
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            error!("Simulation stopped: {}", e);
            std::process::exit(2);
        }
    }
}
