use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libcomtrade::config::Config;
use libcomtrade::process::process;
use libcomtrade::worker_status::Stage;

fn make_template_config(path: &Path) -> Result<(), String> {
    let yaml_str = serde_yaml::to_string(&Config::default()).map_err(|e| e.to_string())?;
    std::fs::write(path, yaml_str).map_err(|e| format!("Could not write template config: {e}"))
}

fn stage_style(stage: Stage) -> ProgressStyle {
    let color = match stage {
        Stage::Loading => "green",
        Stage::Merging => "cyan",
        Stage::Computing => "magenta",
    };
    let template = format!("{{msg:10}} [{{bar:40.{color}}}] {{percent}}%");
    ProgressStyle::with_template(&template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Loading => "Loading",
        Stage::Merging => "Merging",
        Stage::Computing => "Computing",
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("comtrade_merger_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

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
        return;
    }

    let Some(path_arg) = matches.get_one::<String>("path") else {
        log::error!("A configuration path is required");
        return;
    };
    let config_path = PathBuf::from(path_arg);

    if let Some(("new", _)) = matches.subcommand() {
        log::info!("Making a template config at {}...", config_path.display());
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("{e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if !config.is_window_valid() {
        log::error!("window_seconds must be a non-negative number of seconds");
        return;
    }
    if !config.is_threshold_valid() {
        log::error!("similarity_threshold must be between 0 and 1");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Input Path: {}", config.input_path.display());
    log::info!("Output Path: {}", config.output_path.display());
    log::info!("Window: {} s", config.window_seconds);
    log::info!(
        "Remove duplicates: {} Remove similar: {} (threshold {})",
        config.remove_duplicates,
        config.remove_similar,
        config.similarity_threshold
    );
    if config.has_computed_channels() {
        if let Some(path) = config.computed_channels_path.as_ref() {
            log::info!("Computed channels: {}", path.display());
        }
    }

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let mut current_stage = Stage::Loading;
    pb.set_style(stage_style(current_stage));
    pb.set_message(stage_name(current_stage));

    // Spawn the task!
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || process(config, tx, 0));

    // The sender is dropped when processing ends, which ends this loop
    for status in rx.iter() {
        if status.stage != current_stage {
            current_stage = status.stage;
            pb.set_style(stage_style(current_stage));
            pb.set_message(stage_name(current_stage));
        }
        pb.set_position((status.progress * 100.0) as u64);
    }
    pb.finish();

    match handle.join() {
        Ok(Ok(())) => log::info!("Successfully merged data!"),
        Ok(Err(e)) => log::error!("Merging failed with error: {e}"),
        Err(_) => log::error!("Failed to join merging task!"),
    }

    log::info!("Done.");
}
