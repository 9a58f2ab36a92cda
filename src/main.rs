mod app;
mod error;
mod manager;
mod models;
mod router;
mod settings;
mod worker;

use clap::Parser;
use log::{error, warn};

use app::{
    args::Args,
    cli,
    surface::{SummaryRenderer, TerminalSurface, Theme},
};
use manager::task_manager::TaskManager;
use router::exception_router;
use settings::store::SettingsStore;
use worker::worker::PivWorkerFactory;

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let router = exception_router::install();

    let settings = SettingsStore::new(&args.settings);
    let saved = settings.load().unwrap_or_else(|e| {
        warn!("Ignoring {}: {}", settings.path().display(), e);
        None
    });
    let defaults = args.initial_config(saved);

    let theme = Theme::default();
    let manager = TaskManager::new(
        Box::new(TerminalSurface::new(theme)),
        Box::new(SummaryRenderer::new(theme)),
        settings,
        Box::new(PivWorkerFactory),
    );

    let exit_code = cli::run_cli(manager, router, defaults, theme).unwrap_or_else(|e| {
        error!("Terminal error: {}", e);
        cli::EXIT_AFTER_ERROR
    });
    std::process::exit(exit_code);
}
