use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use obscura::{
    FfmpegCli, FrameCodec, PerturbationConfig, ProgressCallback, ProgressUpdate, VideoPipeline,
    configuration::{
        DEFAULT_BLOCK_SIZE, DEFAULT_PERTURB_PROBABILITY, DEFAULT_PIXEL_RATIO,
        DEFAULT_REPLACEMENT_PROBABILITY,
    },
};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  obscura image photo.png --out photo_perturbed.png\n  obscura video input.mp4 --out output.mp4 --strategy block --progress\n  obscura frames frames/ --out processed/ --threads 8\n  obscura probe input.mp4 --json\n  obscura completions zsh > _obscura";

#[derive(Debug, Parser)]
#[command(
    name = "obscura",
    version,
    about = "Imperceptibly perturb the pixels of images and videos",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Path to the ffmpeg executable.
    #[arg(long, global = true, env = "OBSCURA_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Path to the ffprobe executable.
    #[arg(long, global = true, env = "OBSCURA_FFPROBE", default_value = "ffprobe")]
    ffprobe: PathBuf,

    /// Parallel frame workers (defaults to all cores but two).
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyName {
    Sparse,
    Block,
}

#[derive(Debug, Args, Clone)]
struct PerturbOptions {
    /// Perturbation strategy.
    #[arg(long, value_enum, default_value_t = StrategyName::Sparse)]
    strategy: StrategyName,

    /// Fraction of pixels to nudge (sparse strategy).
    #[arg(long, default_value_t = DEFAULT_PERTURB_PROBABILITY)]
    probability: f64,

    /// Block edge length in pixels (block strategy).
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Probability that a block is selected (block strategy).
    #[arg(long, default_value_t = DEFAULT_REPLACEMENT_PROBABILITY)]
    replacement_probability: f64,

    /// Fraction of a selected block's pixels to perturb (block strategy).
    #[arg(long, default_value_t = DEFAULT_PIXEL_RATIO)]
    pixel_ratio: f64,

    /// Paint perturbed pixels or blocks in red.
    #[arg(long)]
    visual_debug: bool,

    /// Seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,
}

impl PerturbOptions {
    fn config(&self) -> Result<PerturbationConfig, Box<dyn std::error::Error>> {
        let mut config = match self.strategy {
            StrategyName::Sparse => PerturbationConfig::sparse(self.probability),
            StrategyName::Block => PerturbationConfig::block(
                self.block_size,
                self.replacement_probability,
                self.pixel_ratio,
            ),
        }
        .with_visual_debug(self.visual_debug);
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Perturb a single image file.
    #[command(
        about = "Perturb an image",
        after_help = "Examples:\n  obscura image photo.jpg --out out.jpg\n  obscura image photo.png --out out.png --strategy block --visual-debug"
    )]
    Image {
        /// Input image path.
        input: PathBuf,
        /// Output image path. The format follows its extension.
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        perturb: PerturbOptions,
    },

    /// Perturb every image in a directory.
    #[command(
        about = "Perturb a directory of images",
        after_help = "Examples:\n  obscura frames frames/ --out processed/ --progress"
    )]
    Frames {
        /// Input directory.
        input: PathBuf,
        /// Output directory.
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        perturb: PerturbOptions,
    },

    /// Perturb every frame of a video, keeping its audio.
    #[command(
        about = "Perturb a video",
        after_help = "Examples:\n  obscura video input.mp4 --out output.mp4 --progress\n  obscura video input.mov --out output.mp4 --strategy block --block-size 32"
    )]
    Video {
        /// Input video path.
        input: PathBuf,
        /// Output video path.
        #[arg(long)]
        out: PathBuf,
        /// Print the job result as JSON.
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        perturb: PerturbOptions,
    },

    /// Print stream properties of a video.
    #[command(
        about = "Probe a video",
        after_help = "Examples:\n  obscura probe input.mp4\n  obscura probe input.mp4 --json"
    )]
    Probe {
        /// Input video path.
        input: PathBuf,
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(global: &GlobalOptions) {
    let mut builder = env_logger::Builder::from_default_env();
    if global.verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.try_init().ok();
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn codec(global: &GlobalOptions) -> FfmpegCli {
    FfmpegCli::new()
        .with_ffmpeg(global.ffmpeg.clone())
        .with_ffprobe(global.ffprobe.clone())
}

/// Renders pipeline progress as one bar, restyled per stage.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.green} {msg:>15} {bar:40.cyan/blue} {pos}/{len}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_with_message("done");
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.bar.set_message(update.stage.label());
        self.bar.set_length(update.total);
        self.bar.set_position(update.current);
    }
}

struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        log::debug!(
            "{} {}/{} ({}%)",
            update.stage,
            update.current,
            update.total,
            update.percent()
        );
    }
}

fn reporter(global: &GlobalOptions) -> Result<(Box<dyn ProgressCallback>, Option<ProgressBar>), Box<dyn std::error::Error>> {
    if global.progress {
        let progress = TerminalProgress::new()?;
        let bar = progress.bar.clone();
        Ok((Box::new(progress), Some(bar)))
    } else {
        Ok((Box::new(LogProgress), None))
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global);
    let workers = cli
        .global
        .threads
        .filter(|threads| *threads > 0)
        .unwrap_or_else(|| obscura::ServiceSettings::default().frame_workers);

    match cli.command {
        Commands::Image { input, out, perturb } => {
            let config = perturb.config()?;
            ensure_writable_path(&out, cli.global.overwrite)?;
            ensure_parent(&out)?;
            obscura::perturb_file(&input, &out, &config)?;
            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Wrote {}", out.display()).green()
            );
        }

        Commands::Frames { input, out, perturb } => {
            let config = perturb.config()?;
            if out.exists() {
                if !cli.global.overwrite {
                    return Err(format!(
                        "output directory already exists: {} (use --overwrite)",
                        out.display()
                    )
                    .into());
                }
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("writing into existing directory {}", out.display()).yellow()
                );
            }

            let (progress, bar) = reporter(&cli.global)?;
            let report = obscura::process_directory(&input, &out, &config, progress.as_ref(), workers)?;
            if let Some(bar) = bar {
                bar.finish_with_message("done");
            }

            for failure in report.failures() {
                eprintln!(
                    "{} {}: {}",
                    "failed:".red().bold(),
                    failure.item,
                    failure.error.as_deref().unwrap_or("unknown error")
                );
            }
            let summary = format!("Perturbed {} of {} image(s) into {}", report.succeeded(), report.total, out.display());
            if report.is_success() {
                println!("{} {}", "success:".green().bold(), summary.green());
            } else {
                println!("{} {}", "partial:".yellow().bold(), summary.yellow());
                if let Err(error) = report.into_result() {
                    return Err(error.into());
                }
            }
        }

        Commands::Video {
            input,
            out,
            json,
            perturb,
        } => {
            let config = perturb.config()?;
            ensure_writable_path(&out, cli.global.overwrite)?;
            ensure_parent(&out)?;

            let pipeline = VideoPipeline::new(Arc::new(codec(&cli.global))).with_worker_count(workers);
            let outcome = if cli.global.progress {
                let progress = TerminalProgress::new()?;
                let outcome = pipeline.run(&input, &out, &config, &progress);
                progress.finish();
                outcome
            } else {
                pipeline.run(&input, &out, &config, &LogProgress)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            match (&outcome.metadata, &outcome.error) {
                (Some(metadata), _) => {
                    if !json {
                        println!(
                            "{} {}",
                            "success:".green().bold(),
                            format!(
                                "Wrote {} ({} frames @ {:.2} fps, audio: {})",
                                out.display(),
                                metadata.frame_count,
                                metadata.frame_rate,
                                if metadata.has_audio { "yes" } else { "no" }
                            )
                            .green()
                        );
                    }
                }
                (None, error) => {
                    return Err(error.clone().unwrap_or_else(|| "unknown error".to_string()).into());
                }
            }
        }

        Commands::Probe { input, json } => {
            let probe = codec(&cli.global).probe(&input)?;
            if json {
                let payload = json!({
                    "width": probe.width,
                    "height": probe.height,
                    "fps": probe.frame_rate,
                    "frame_count": probe.frame_count,
                    "duration_seconds": probe.duration.as_secs_f64(),
                    "has_audio": probe.has_audio,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Video: {}x{} @ {:.2} fps",
                    probe.width, probe.height, probe.frame_rate
                );
                println!("Frames: {}", probe.frame_count);
                println!("Duration: {:?}", probe.duration);
                println!("Audio: {}", if probe.has_audio { "yes" } else { "no" });
            }
        }

        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "obscura", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
