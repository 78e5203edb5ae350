// ============================================================================
// main.rs — Linestream
// Entry point. Initializes logging, parses CLI flags and runs either the
// windowed viewer or the headless runner.
// ============================================================================

use std::path::PathBuf;

use anyhow::{bail, Context};
use winit::event_loop::EventLoop;

use linestream::app::App;
use linestream::config::StreamConfig;
use linestream::headless::{run_headless, HeadlessConfig};

const USAGE: &str = "\
Usage: linestream [--config FILE.json] [--seed N] [--particles N]
                  [--headless [--frames N] [--output FILE.png]]";

#[derive(Debug, Default)]
struct Cli {
    config: Option<PathBuf>,
    headless: bool,
    frames: Option<u32>,
    output: Option<PathBuf>,
    seed: Option<u32>,
    particles: Option<i64>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Cli> {
    let mut cli = Cli::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("{name} expects a value\n{USAGE}"))
        };
        match arg.as_str() {
            "--config" => cli.config = Some(PathBuf::from(value("--config")?)),
            "--headless" => cli.headless = true,
            "--frames" => {
                cli.frames = Some(value("--frames")?.parse().context("--frames expects an integer")?)
            }
            "--output" => cli.output = Some(PathBuf::from(value("--output")?)),
            "--seed" => cli.seed = Some(value("--seed")?.parse().context("--seed expects an integer")?),
            "--particles" => {
                cli.particles =
                    Some(value("--particles")?.parse().context("--particles expects an integer")?)
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument `{other}`\n{USAGE}"),
        }
    }
    Ok(cli)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = parse_args(std::env::args().skip(1))?;

    let mut stream = match &cli.config {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("loading stream config {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(seed) = cli.seed {
        stream.random_seed = seed;
    }
    if let Some(particles) = cli.particles {
        stream.max_particles = particles;
    }

    if cli.headless {
        let mut config = HeadlessConfig {
            output_path: cli.output,
            ..Default::default()
        };
        if let Some(frames) = cli.frames {
            config.frames = frames;
        }
        run_headless(stream, &config).context("headless run failed")?;
        return Ok(());
    }

    let event_loop = EventLoop::new().context("creating event loop")?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = App::new(stream, PathBuf::from("."));
    event_loop.run_app(&mut app).context("event loop failed")?;
    if let Some(err) = app.take_error() {
        return Err(err).context("viewer startup failed");
    }
    Ok(())
}
