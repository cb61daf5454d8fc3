mod error;

use ag_core::display;
use ag_sim::{
    Completion, GunConfig, PrecompressedAirConfig, ResultSeries, RunControl, SimProgress,
    SpringPistonConfig, Summary, SweepDefinition, SweepParameter, SweepResult, SweepType,
    Sweepable, precompressed, run_sweep, spring_piston,
};
use clap::{Parser, Subcommand, ValueEnum};
use error::{CliError, CliResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ag-cli")]
#[command(
    about = "Airgun interior ballistics - spring-piston and precompressed-air shots",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Gun {
    /// Spring-piston gun
    Spring,
    /// Precompressed-air ("Nomad") gun
    Nomad,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration as YAML
    Defaults {
        #[arg(value_enum)]
        gun: Gun,
    },
    /// Simulate one shot
    Run {
        #[arg(value_enum)]
        gun: Gun,
        /// YAML configuration; omitted fields take their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Time step in seconds
        #[arg(long)]
        dt: Option<f64>,
        /// Maximum simulated time in seconds
        #[arg(long)]
        t_end: Option<f64>,
        /// Write every recorded snapshot to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Write the full result series to this JSON file
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Vary one parameter and tabulate the results
    Sweep {
        #[arg(value_enum)]
        gun: Gun,
        /// Parameter to vary (e.g. charge-pressure, spring-rate, projectile-mass)
        #[arg(long)]
        param: SweepParameter,
        /// First value, SI units
        #[arg(long)]
        start: f64,
        /// Last value, SI units
        #[arg(long)]
        end: f64,
        #[arg(long, default_value_t = 5)]
        points: usize,
        /// Space points logarithmically
        #[arg(long)]
        log: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Defaults { gun } => cmd_defaults(gun),
        Commands::Run {
            gun,
            config,
            dt,
            t_end,
            csv,
            json,
        } => {
            let outputs = Outputs {
                csv: csv.as_deref(),
                json: json.as_deref(),
            };
            match gun {
                Gun::Spring => {
                    let mut cfg: SpringPistonConfig = load_config(config.as_deref())?;
                    apply_overrides(&mut cfg, dt, t_end);
                    describe_spring(&cfg);
                    cmd_run(&cfg, spring_piston::simulate_with_control, outputs)
                }
                Gun::Nomad => {
                    let mut cfg: PrecompressedAirConfig = load_config(config.as_deref())?;
                    apply_overrides(&mut cfg, dt, t_end);
                    describe_nomad(&cfg);
                    cmd_run(&cfg, precompressed::simulate_with_control, outputs)
                }
            }
        }
        Commands::Sweep {
            gun,
            param,
            start,
            end,
            points,
            log,
            config,
        } => {
            let sweep_type = if log {
                SweepType::Logarithmic
            } else {
                SweepType::Linear
            };
            let definition = SweepDefinition::new(param, start, end, points, sweep_type)?;
            match gun {
                Gun::Spring => {
                    let cfg: SpringPistonConfig = load_config(config.as_deref())?;
                    cmd_sweep(&cfg, &definition)
                }
                Gun::Nomad => {
                    let cfg: PrecompressedAirConfig = load_config(config.as_deref())?;
                    cmd_sweep(&cfg, &definition)
                }
            }
        }
    }
}

fn cmd_defaults(gun: Gun) -> CliResult<()> {
    let yaml = match gun {
        Gun::Spring => serde_yaml::to_string(&SpringPistonConfig::default())?,
        Gun::Nomad => serde_yaml::to_string(&PrecompressedAirConfig::default())?,
    };
    print!("{yaml}");
    Ok(())
}

fn load_config<C: DeserializeOwned + Default>(path: Option<&Path>) -> CliResult<C> {
    let Some(path) = path else {
        return Ok(C::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    let config = serde_yaml::from_str(&text)?;
    debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

fn apply_overrides<C: GunConfig>(config: &mut C, dt: Option<f64>, t_end: Option<f64>) {
    let numerics = config.numerics_mut();
    if let Some(dt) = dt {
        numerics.dt = dt;
    }
    if let Some(t_end) = t_end {
        numerics.t_end = t_end;
    }
}

fn describe_spring(c: &SpringPistonConfig) {
    println!("Spring-piston gun:");
    println!(
        "  piston {:.2} mm x {:.1} mm stroke, {:.1} g",
        display::mm(c.piston_diameter_m),
        display::mm(c.stroke_m),
        display::grams(c.piston_mass_kg)
    );
    println!(
        "  spring {:.0} N/m, preload {:.1} mm",
        c.spring_rate_n_per_m,
        display::mm(c.spring_precompression_m)
    );
    println!(
        "  bore {:.2} mm, barrel {:.0} mm, dart {:.2} g",
        display::mm(c.bore_diameter_m),
        display::mm(c.barrel_length_m),
        display::grams(c.projectile_mass_kg)
    );
}

fn describe_nomad(c: &PrecompressedAirConfig) {
    println!("Precompressed-air gun:");
    println!(
        "  chamber {:.1} mL at {:.2} bar, expansion {:.1} mL",
        display::ml(c.chamber_volume_m3),
        display::bar(c.chamber_pressure_pa),
        display::ml(c.expansion_volume_m3)
    );
    println!(
        "  valve opens in {:.3} ms, cracks at {:.0}% lift ({:?})",
        display::ms(c.valve.opening_time_s),
        100.0 * c.valve.crack_fraction,
        c.valve.law
    );
    println!(
        "  bore {:.2} mm, barrel {:.0} mm, dart {:.2} g",
        display::mm(c.bore_diameter_m),
        display::mm(c.barrel_length_m),
        display::grams(c.projectile_mass_kg)
    );
}

#[derive(Clone, Copy)]
struct Outputs<'a> {
    csv: Option<&'a Path>,
    json: Option<&'a Path>,
}

fn cmd_run<C>(
    config: &C,
    simulate: fn(&C, RunControl<'_>) -> ag_sim::SimResult<ResultSeries>,
    outputs: Outputs<'_>,
) -> CliResult<()>
where
    C: GunConfig,
{
    println!("Simulating {} shot", config.kind());
    println!(
        "  dt = {:.3e} s, t_end = {:.3} ms",
        config.numerics().dt,
        display::ms(config.numerics().t_end)
    );

    let started = Instant::now();
    let mut last_emit = Instant::now();
    let mut last_fraction = -1.0f64;
    let mut on_progress = |p: &SimProgress| {
        let emit_now = (p.fraction_complete - last_fraction).abs() >= 0.005
            || last_emit.elapsed().as_millis() >= 100;
        if emit_now {
            render_progress(p, started.elapsed().as_secs_f64());
            last_fraction = p.fraction_complete;
            last_emit = Instant::now();
        }
    };
    let result = simulate(
        config,
        RunControl {
            cancel: None,
            progress: Some(&mut on_progress),
        },
    );
    clear_progress_line();
    let series = result?;

    match series.completion {
        Completion::Finished => {
            println!("✓ Shot completed in {:.2}s", started.elapsed().as_secs_f64())
        }
        Completion::StepBudgetExhausted => {
            println!("! Step budget exhausted, results are partial")
        }
        Completion::Cancelled => println!("! Run cancelled, results are partial"),
    }
    print_summary(&series.summary);
    print_events(&series);

    if let Some(path) = outputs.csv {
        std::fs::write(path, series_csv(&series)).map_err(|e| CliError::io(path, e))?;
        println!(
            "✓ Exported {} snapshots to {}",
            series.snapshots.len(),
            path.display()
        );
    }
    if let Some(path) = outputs.json {
        write_json(path, &series)?;
        println!("✓ Wrote result series to {}", path.display());
    }
    Ok(())
}

fn cmd_sweep<C: Sweepable>(config: &C, definition: &SweepDefinition) -> CliResult<()> {
    println!("{definition} on the {} gun", config.kind());
    let started = Instant::now();
    let result = run_sweep(config, definition)?;
    println!(
        "✓ {} points in {:.2}s\n",
        result.points.len(),
        started.elapsed().as_secs_f64()
    );
    print!("{}", sweep_table(&result));
    Ok(())
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(100));
    let _ = io::stdout().flush();
}

fn render_progress(p: &SimProgress, elapsed_s: f64) {
    let width = 28usize;
    let filled = ((p.fraction_complete * width as f64).round() as usize).min(width);
    print!(
        "\r[{}{}] {:>6.2}%  phase={}  t={:.3}/{:.3} ms  step={}  elapsed={:.1}s",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled)),
        p.fraction_complete * 100.0,
        p.phase,
        display::ms(p.time_s),
        display::ms(p.t_end_s),
        p.step,
        elapsed_s
    );
    let _ = io::stdout().flush();
}

fn print_summary(s: &Summary) {
    println!("\nShot summary:");
    println!(
        "  Peak pressure:   {:.2} bar ({:.0} psi) at {:.3} ms",
        display::bar(s.peak_pressure_pa),
        display::psi(s.peak_pressure_pa),
        display::ms(s.peak_pressure_time_s)
    );
    println!(
        "  Peak velocity:   {:.1} fps",
        display::fps(s.peak_projectile_velocity_mps)
    );
    if let Some(v) = s.peak_piston_velocity_mps {
        println!("  Piston peak:     {:.2} m/s", v);
    }
    match (s.muzzle_velocity_mps, s.muzzle_energy_j, s.exit_time_s) {
        (Some(v), Some(e), Some(t)) => {
            println!("  Muzzle velocity: {:.1} fps ({:.1} m/s)", display::fps(v), v);
            println!(
                "  Muzzle energy:   {:.2} J ({:.2} ft·lbf)",
                e,
                display::foot_pounds(e)
            );
            println!("  Exit time:       {:.3} ms", display::ms(t));
        }
        _ => println!("  Projectile did not leave the barrel"),
    }
    println!("  Stored energy:   {:.2} J", s.stored_energy_j);
    if let Some(eff) = s.efficiency {
        println!("  Efficiency:      {:.1}%", 100.0 * eff);
    }
    println!(
        "  Final phase:     {} after {:.3} ms ({} steps)",
        s.final_phase,
        display::ms(s.total_time_s),
        s.steps
    );
}

fn print_events(series: &ResultSeries) {
    if series.events.is_empty() {
        return;
    }
    println!("\nPhase events:");
    for e in &series.events {
        println!("  {:>9.4} ms  {} -> {}", display::ms(e.time_s), e.from, e.to);
    }
}

fn series_csv(series: &ResultSeries) -> String {
    fn opt(v: Option<f64>) -> String {
        v.map(|v| v.to_string()).unwrap_or_default()
    }

    let mut csv = String::from(
        "time_s,phase,pressure_pa,volume_m3,projectile_position_m,projectile_velocity_mps,\
         piston_position_m,piston_velocity_mps,spring_force_n,valve_lift\n",
    );
    for s in &series.snapshots {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            s.time_s,
            s.phase,
            s.pressure_pa,
            s.volume_m3,
            s.projectile.position_m,
            s.projectile.velocity_mps,
            opt(s.piston.map(|p| p.position_m)),
            opt(s.piston.map(|p| p.velocity_mps)),
            opt(s.spring_force_n),
            opt(s.valve_lift),
        ));
    }
    csv
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).map_err(|e| CliError::io(path, e))
}

fn sweep_table(result: &SweepResult) -> String {
    let mut out = format!(
        "{:>14}  {:>10}  {:>10}  {:>8}  {:>12}\n",
        result.definition.parameter.name(),
        "muzzle fps",
        "energy J",
        "eff %",
        "final phase"
    );
    for point in &result.points {
        match &point.outcome {
            Ok(s) => {
                let fps = s.muzzle_velocity_mps.map(display::fps);
                let eff = s.efficiency.map(|e| 100.0 * e);
                out.push_str(&format!(
                    "{:>14.6e}  {:>10}  {:>10}  {:>8}  {:>12}\n",
                    point.value,
                    fmt_opt(fps, 1),
                    fmt_opt(s.muzzle_energy_j, 2),
                    fmt_opt(eff, 1),
                    s.final_phase
                ));
            }
            Err(msg) => out.push_str(&format!("{:>14.6e}  failed: {msg}\n", point.value)),
        }
    }
    out
}

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    v.map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| "-".to_string())
}
