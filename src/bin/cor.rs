//! cor - gaze heatmaps and confidence reports for recorded video

use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use cor_gaze::batch::{BatchOptions, BatchOrchestrator, BatchResult};
use cor_gaze::calibration::{KeyValueFile, DEFAULT_PARAMETER_FILE};
use cor_gaze::detect::BackendRegistry;
use cor_gaze::ingest::{FileSourceOpener, SourceOpener};
use cor_gaze::output::OutputWriter;
use cor_gaze::paths::{video_name, PathConfig, PathResolver, Resolution, DEFAULT_PATHS_FILE};
use cor_gaze::pipeline::{self, run_single, RunOptions};
use cor_gaze::{CorConfig, CorError, HeatmapMode};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(long, global = true, env = "COR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
    /// Persistent input/output/search path settings.
    #[arg(
        long,
        global = true,
        env = "COR_PATHS_FILE",
        default_value = DEFAULT_PATHS_FILE,
        value_name = "FILE"
    )]
    paths_file: PathBuf,
    /// Detector backend (overrides configuration).
    #[arg(long, global = true, value_name = "NAME")]
    detector: Option<String>,
    /// Heatmap images to draw: density, fixation or saccade (overrides configuration).
    #[arg(long, global = true, value_name = "MODE")]
    heatmap_mode: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, default_value = "auto", value_name = "MODE")]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single video.
    Run(RunArgs),
    /// Process every video matched by files, folders and patterns.
    Batch(BatchArgs),
    /// Show or edit the persistent path settings.
    Paths {
        #[command(subcommand)]
        action: PathsAction,
    },
    /// Read or write key=value parameter files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the detector backends compiled into this build.
    Detectors,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Video file, name, or `stub://WxH?frames=N` synthetic source.
    video: String,
    /// Also write an annotated overlay video.
    #[arg(long)]
    visualize: bool,
    /// Only report the video's properties.
    #[arg(long)]
    validate: bool,
    /// Save N evenly spaced frames instead of processing.
    #[arg(long, value_name = "N")]
    extract_frames: Option<usize>,
    /// Time detection over up to N frames instead of processing.
    #[arg(long, value_name = "N")]
    benchmark: Option<u64>,
    /// Output folder (default: `<output>/<name>_output`).
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Also write fixations and saccade statistics to `<name>_analysis.json`.
    #[arg(long)]
    export_analysis: bool,
}

#[derive(ClapArgs, Debug)]
struct BatchArgs {
    /// Video files, folders, or glob patterns.
    references: Vec<String>,
    /// Add every video in this folder.
    #[arg(long, value_name = "DIR")]
    folder: Vec<String>,
    /// Add every video matching this pattern.
    #[arg(long, value_name = "GLOB")]
    pattern: Vec<String>,
    /// Descend into sub-folders.
    #[arg(long)]
    recursive: bool,
    /// Restrict folders to these extensions (comma separated).
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    ext: Vec<String>,
    /// Also write annotated overlay videos.
    #[arg(long)]
    visualize: bool,
    /// Also write `<name>_analysis.json` for every video.
    #[arg(long)]
    export_analysis: bool,
}

#[derive(Subcommand, Debug)]
enum PathsAction {
    Show,
    SetInput { path: PathBuf },
    SetOutput { path: PathBuf },
    AddSearch { path: PathBuf },
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Get {
        key: String,
        #[arg(long, default_value = DEFAULT_PARAMETER_FILE, value_name = "FILE")]
        file: PathBuf,
    },
    Set {
        key: String,
        value: String,
        #[arg(long, default_value = DEFAULT_PARAMETER_FILE, value_name = "FILE")]
        file: PathBuf,
    },
    /// Copy every entry into TARGET under a timestamped header.
    Snapshot {
        target: PathBuf,
        #[arg(long, default_value = DEFAULT_PARAMETER_FILE, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value = "Cor")]
        title: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    ctrlc::set_handler(move || {
        log::warn!("interrupted, stopping");
        std::process::exit(130);
    })
    .expect("error setting Ctrl-C handler");

    match args.command {
        Command::Paths { action } => paths_command(&args.paths_file, action),
        Command::Config { action } => config_command(action),
        Command::Detectors => {
            for name in BackendRegistry::with_builtin().list() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Run(run) => {
            let config = load_config(
                args.config.as_deref(),
                &args.paths_file,
                args.detector.as_deref(),
                args.heatmap_mode.as_deref(),
                &ui,
            )?;
            run_command(&config, run, &ui)
        }
        Command::Batch(batch) => {
            let config = load_config(
                args.config.as_deref(),
                &args.paths_file,
                args.detector.as_deref(),
                args.heatmap_mode.as_deref(),
                &ui,
            )?;
            batch_command(&config, batch, &ui)
        }
    }
}

fn load_config(
    config_file: Option<&Path>,
    paths_file: &Path,
    detector: Option<&str>,
    heatmap_mode: Option<&str>,
    ui: &ui::Ui,
) -> Result<CorConfig> {
    let _stage = ui.stage("Load configuration");
    let mut config = CorConfig::load_layered(config_file, Some(paths_file))?;
    if let Some(name) = detector {
        config.detector.name = name.to_string();
    }
    if let Some(mode) = heatmap_mode {
        config.heatmap.mode = mode.parse::<HeatmapMode>()?.to_string();
    }
    Ok(config)
}

fn run_command(config: &CorConfig, run: RunArgs, ui: &ui::Ui) -> Result<()> {
    let opener = FileSourceOpener;
    let registry = BackendRegistry::with_builtin();

    if run.validate || run.extract_frames.is_some() || run.benchmark.is_some() {
        let resolver = PathResolver::new(&config.paths);
        let path = match resolver.resolve(&run.video) {
            Resolution::Found(path) => path,
            Resolution::Unresolved(reference) => {
                return Err(CorError::ResolutionFailure { reference }.into())
            }
        };

        if run.validate {
            let report = pipeline::validate_video(&path, &opener);
            println!("{report}");
            if !report.valid {
                return Err(anyhow!("video failed validation: {}", path.display()));
            }
        }
        if let Some(count) = run.extract_frames {
            let _stage = ui.stage("Extract frames");
            let folder = run
                .output
                .clone()
                .unwrap_or_else(|| default_output_folder(config, &path));
            let format = config.image_format()?;
            let writer = OutputWriter::new(
                &folder,
                format,
                config.color_scheme()?,
                config.heatmap.overlay_alpha,
            );
            let mut source = opener.open(&path)?;
            let written =
                pipeline::extract_frames(source.as_mut(), &folder, count, &writer, format.extension())?;
            println!("Extracted {} frames into {}", written.len(), folder.join("frames").display());
        }
        if let Some(max_frames) = run.benchmark {
            let mut detector = registry.select(&config.detector)?;
            let mut source = opener.open(&path)?;
            let report = {
                let _stage = ui.stage("Benchmark");
                pipeline::benchmark(&path, source.as_mut(), detector.as_mut(), max_frames)?
            };
            println!("{report}");
        }
        return Ok(());
    }

    let mut detector = {
        let _stage = ui.stage("Select detector");
        registry.select(&config.detector)?
    };
    let mut progress = ui.frame_progress();
    let options = RunOptions {
        visualize: run.visualize,
        export_analysis: run.export_analysis,
        output: run.output,
    };
    let outcome = run_single(
        config,
        &run.video,
        &opener,
        detector.as_mut(),
        &options,
        &mut progress,
    )?;

    println!("{}", outcome.report);
    println!();
    for path in &outcome.outputs {
        println!("wrote {}", path.display());
    }
    for error in &outcome.output_errors {
        eprintln!("output error: {error}");
    }
    Ok(())
}

fn default_output_folder(config: &CorConfig, video: &Path) -> PathBuf {
    config
        .paths
        .output_root()
        .join(format!("{}_output", video_name(video)))
}

fn batch_command(config: &CorConfig, batch: BatchArgs, ui: &ui::Ui) -> Result<()> {
    let mut references = batch.references;
    references.extend(batch.folder);
    references.extend(batch.pattern);
    if references.is_empty() {
        return Err(anyhow!("no videos, folders, or patterns given"));
    }

    let options = BatchOptions {
        recursive: batch.recursive,
        extensions: batch.ext,
        visualize: batch.visualize,
        export_analysis: batch.export_analysis,
    };
    let opener = FileSourceOpener;
    let mut detector = {
        let _stage = ui.stage("Select detector");
        BackendRegistry::with_builtin().select(&config.detector)?
    };
    let mut progress = ui.frame_progress();
    let result = BatchOrchestrator::new(config, &opener).run(
        &references,
        &options,
        detector.as_mut(),
        &mut progress,
    )?;

    print_batch_summary(&result);
    if !result.success {
        return Err(anyhow!("no video in the batch was processed"));
    }
    Ok(())
}

fn print_batch_summary(result: &BatchResult) {
    println!("Batch folder: {}", result.batch_folder.display());
    println!(
        "Videos: {} processed, {} failed",
        result.succeeded(),
        result.failed()
    );
    for entry in &result.results {
        match (&entry.report, &entry.error) {
            (Some(report), _) => println!(
                "  ok    {} ({:.1}% accuracy confidence, {})",
                entry.video_path.display(),
                report.accuracy_confidence,
                report.interpretation()
            ),
            (None, Some(error)) => println!("  FAIL  {}: {}", entry.video_path.display(), error),
            (None, None) => println!("  FAIL  {}", entry.video_path.display()),
        }
        for error in &entry.output_errors {
            println!("        output error: {error}");
        }
    }
    for reference in &result.unresolved {
        println!("  skipped unresolved reference '{reference}'");
    }
}

fn paths_command(paths_file: &Path, action: PathsAction) -> Result<()> {
    let mut paths = PathConfig::load(paths_file)?;
    match action {
        PathsAction::Show => {
            let show = |p: &Option<PathBuf>| {
                p.as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            };
            println!("Paths file: {}", paths_file.display());
            println!("Input path: {}", show(&paths.input_path));
            println!("Output path: {}", show(&paths.output_path));
            if paths.search_paths.is_empty() {
                println!("Search paths: (none)");
            } else {
                println!("Search paths:");
                for path in &paths.search_paths {
                    println!("  {}", path.display());
                }
            }
            return Ok(());
        }
        PathsAction::SetInput { path } => {
            let input = paths.set_input_path(&path)?;
            println!("Input path set to {}", input.display());
        }
        PathsAction::SetOutput { path } => {
            let output = paths.set_output_path(&path)?;
            println!("Output path set to {}", output.display());
        }
        PathsAction::AddSearch { path } => {
            if paths.add_search_path(&path)? {
                println!("Added search path {}", path.display());
            } else {
                println!("Search path already present: {}", path.display());
            }
        }
        PathsAction::Clear => {
            paths.clear();
            println!("Cleared all paths");
        }
    }
    paths.save(paths_file)
}

fn config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key, file } => {
            let values = KeyValueFile::load(&file)?;
            match values.get(&key) {
                Some(value) => {
                    println!("{value}");
                    Ok(())
                }
                None => Err(anyhow!("{} has no key '{}'", file.display(), key)),
            }
        }
        ConfigAction::Set { key, value, file } => {
            let mut values = KeyValueFile::load(&file)?;
            values.set(&key, &value);
            values.save()?;
            log::info!("{}: {}={}", file.display(), key, value);
            Ok(())
        }
        ConfigAction::Snapshot {
            target,
            file,
            title,
        } => {
            let values = KeyValueFile::load(&file)?;
            values.save_snapshot(&target, &title)?;
            println!("Wrote {}", target.display());
            Ok(())
        }
    }
}
