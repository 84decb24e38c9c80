use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, ValueEnum};
use spectra_core::{
    analyze_offline_for, audio::list_input_devices, AppConfig, BarGeometry, FrameLoop,
    RenderParameters, RenderSynchronizer, SceneRenderer, Session, SessionState, SourceSpec,
    VisualMode,
};
use tracing_subscriber::EnvFilter;

fn main() -> spectra_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mapping.mode = mode.into();
    }
    let limit = cli.seconds.map(Duration::from_secs_f64);

    match cli.command {
        Commands::Live { device } => run_session(&config, SourceSpec::Capture { device }, limit),
        Commands::Play { input } => run_session(&config, SourceSpec::File { path: input }, limit),
        Commands::Tone {
            frequency,
            amplitude,
        } => run_session(
            &config,
            SourceSpec::Tone {
                frequency,
                amplitude,
            },
            limit,
        ),
        Commands::Devices => list_devices(),
        Commands::Analyze { input, output } => run_analyze(&config, &input, &output, cli.seconds),
    }
}

fn run_session(
    config: &AppConfig,
    source: SourceSpec,
    limit: Option<Duration>,
) -> spectra_core::Result<()> {
    tracing::info!(?source, mode = ?config.mapping.mode, "starting session");

    let mut session = Session::start(config, source)?;
    let reader = session.reader();
    let synchronizer = RenderSynchronizer::new(reader.clone(), config.mapping.clone());
    let mut frames = FrameLoop::new(synchronizer, config.render.fps)?;
    let mut renderer = TerminalRenderer::new(config.render.fps);

    let started = Instant::now();
    let stats = frames.run(&mut renderer, |_| {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            return true;
        }
        // Let a finished file fade out before exiting.
        session.state() == SessionState::Idle && reader.snapshot().energy < 1e-3
    });

    session.stop();
    tracing::info!(
        frames = stats.frames,
        renderer_errors = stats.renderer_errors,
        session = ?session.stats(),
        "session finished"
    );
    Ok(())
}

fn list_devices() -> spectra_core::Result<()> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("no input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        match device.format {
            Some(format) => println!(
                "{marker} {} ({} Hz, {} ch)",
                device.name, format.sample_rate, format.channels
            ),
            None => println!("{marker} {}", device.name),
        }
    }
    Ok(())
}

fn run_analyze(
    config: &AppConfig,
    input: &Path,
    output: &Path,
    seconds: Option<f64>,
) -> spectra_core::Result<()> {
    tracing::info!(?input, ?output, "running offline analysis");
    let mut source = SourceSpec::File {
        path: input.to_path_buf(),
    }
    .open(&config.audio)?;
    let analysis = analyze_offline_for(&mut source, config, seconds)?;
    std::fs::write(output, serde_json::to_vec_pretty(&analysis)?)?;
    tracing::info!(
        windows = analysis.summary.windows,
        tempo = ?analysis.summary.tempo_bpm,
        "analysis written"
    );
    Ok(())
}

/// Renders the bar spectrum as a line of block characters in the log.
struct TerminalRenderer {
    report_every: u64,
    frame: u64,
}

impl TerminalRenderer {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    fn new(fps: u32) -> Self {
        Self {
            report_every: u64::from(fps / 4).max(1),
            frame: 0,
        }
    }
}

impl SceneRenderer for TerminalRenderer {
    fn draw(&mut self, params: &RenderParameters) -> spectra_core::Result<()> {
        self.frame += 1;
        if self.frame % self.report_every != 0 {
            return Ok(());
        }

        let height = Self::LEVELS.len() as f32;
        let geometry = BarGeometry::build(params, params.displacement.len() as f32, height);
        let bars: String = geometry
            .vertices
            .chunks_exact(4)
            .map(|quad| {
                let level = (quad[2].y.round() as usize).min(Self::LEVELS.len());
                if level == 0 {
                    ' '
                } else {
                    Self::LEVELS[level - 1]
                }
            })
            .collect();

        tracing::info!(
            target: "spectra::frame",
            idle = params.idle,
            scale = params.scale,
            flash = params.flash,
            "|{bars}|"
        );
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive spectrum visualiser", long_about = None)]
struct Cli {
    /// JSON configuration file; every field is optional.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Visual mode, overriding the configuration.
    #[arg(short, long, global = true, value_enum)]
    mode: Option<ModeArg>,
    /// Stop after this many seconds.
    #[arg(short, long, global = true)]
    seconds: Option<f64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Visualise a live capture device.
    Live {
        /// Input device name; the default device when omitted.
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Visualise an audio file in real time.
    Play {
        input: PathBuf,
    },
    /// Visualise a generated sine tone.
    Tone {
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,
        #[arg(short, long, default_value_t = 0.5)]
        amplitude: f32,
    },
    /// List capture devices.
    Devices,
    /// Analyse an audio file ahead of time and write the results as JSON.
    Analyze {
        /// Path to the audio file that should be analysed.
        input: PathBuf,
        /// Output path for the generated analysis.
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Bars,
    Pulse,
    Radial,
}

impl From<ModeArg> for VisualMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Bars => VisualMode::Bars,
            ModeArg::Pulse => VisualMode::Pulse,
            ModeArg::Radial => VisualMode::Radial,
        }
    }
}
