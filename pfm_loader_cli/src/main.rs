//! # pfm_loader_cli
//!
//! Part of the pfm_loader crate family.
//!
//! Command line front end for parallel sounding loads.
//!
//! ## Use
//!
//! Make a template configuration, edit it, then run the load:
//!
//! ```bash
//! pfm_loader_cli -p config.yml new
//! pfm_loader_cli -p config.yml
//! pfm_loader_cli -p config.yml extra_line_1.xyz extra_line_2.llz
//! ```
//!
//! Input files given on the command line are loaded after the ones listed in the config.
//! Terminal output is kept short; the full record of a load goes to `pfm_loader.log`.
use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libpfm_loader::config::Config;
use libpfm_loader::error::ConfigError;
use libpfm_loader::loader::run_parallel_load;
use libpfm_loader::worker_status::{LoadPhase, WorkerStatus};

const REFRESH_INTERVAL_MS: u64 = 100;

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

/// Send the library's spdlog output to a log file, truncated each run
fn init_file_logger() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./pfm_loader.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// One bar per reader, per tile buffer, and one for the merge
struct ProgressBoard {
    manager: MultiProgress,
    bars: HashMap<(u8, usize), ProgressBar>,
}

impl ProgressBoard {
    fn new(manager: MultiProgress) -> Self {
        Self {
            manager,
            bars: HashMap::new(),
        }
    }

    fn update(&mut self, status: &WorkerStatus) {
        let (key, label, color) = match status.phase {
            LoadPhase::Reading => (0, format!("reader {}", status.worker_id), "cyan"),
            LoadPhase::Writing => (1, format!("tile {} buffer", status.worker_id), "yellow"),
            LoadPhase::Merging => (2, String::from("merge"), "green"),
        };
        let manager = &self.manager;
        let bar = self
            .bars
            .entry((key, status.worker_id))
            .or_insert_with(|| {
                let bar = manager.add(ProgressBar::new(100));
                let template = format!("{{msg:>16}} [{{bar:40.{color}/blue}}] {{pos:>3}}%");
                match ProgressStyle::with_template(&template) {
                    Ok(style) => bar.set_style(style),
                    Err(e) => log::warn!("Could not style progress bar: {e}"),
                }
                bar.set_message(label);
                bar
            });
        bar.set_position(status.percent_complete() as u64);
    }

    fn finish(&self) {
        for bar in self.bars.values() {
            bar.finish();
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("pfm_loader_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("inputs")
                .action(ArgAction::Append)
                .help("Additional input files to load"),
        )
        .get_matches();

    if let Err(e) = init_file_logger() {
        eprintln!("Could not create log file, library messages will not be saved: {e}");
    }

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let pb_manager = MultiProgress::new();
    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration path is required");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("{e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }
    log::info!("Config successfully loaded.");

    let mut inputs = config.input_files.clone();
    if let Some(extra) = matches.get_many::<String>("inputs") {
        inputs.extend(extra.map(PathBuf::from));
    }
    log::info!("Destination: {}", config.destination.to_string_lossy());
    log::info!(
        "Area: lat {} to {}, lon {} to {}, {} m bins",
        config.min_latitude,
        config.max_latitude,
        config.min_longitude,
        config.max_longitude,
        config.bin_size_meters
    );
    log::info!(
        "Input files: {} Readers: {} Tiles: {} Buffer: {} Cache: {}",
        inputs.len(),
        config.reader_threads,
        config.tile_count,
        config.buffer_size,
        config.cache_size
    );

    // Spawn the task!
    let (tx, rx) = std::sync::mpsc::channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || run_parallel_load(&config, &inputs, &tx));

    let mut board = ProgressBoard::new(pb_manager);
    loop {
        std::thread::sleep(std::time::Duration::from_millis(REFRESH_INTERVAL_MS));
        for status in rx.try_iter() {
            board.update(&status);
        }

        if handle.is_finished() {
            for status in rx.try_iter() {
                board.update(&status);
            }
            board.finish();
            match handle.join() {
                Ok(Ok(summary)) => {
                    for line in summary.to_string().lines() {
                        log::info!("{line}");
                    }
                    log::info!("Successfully loaded data!");
                }
                Ok(Err(e)) => {
                    log::error!("Load failed with error: {e}");
                    log::error!("Check pfm_loader.log for details.");
                }
                Err(_) => log::error!("Failed to join loading task!"),
            }
            break;
        }
    }

    log::info!("Done.");
}
