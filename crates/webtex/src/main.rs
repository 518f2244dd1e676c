//! Entry point: parses the CLI, initialises tracing and dispatches to the
//! run, probe and config commands.

mod cli;
mod paths;
mod producer;
mod run;

use std::path::Path;

use anyhow::Result;
use bridgeconfig::BridgeConfig;
use cli::{Command, ConfigAction};
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Command::Run(args) => run::run(args),
        Command::Probe(args) => run::probe(args),
        Command::Config(config) => match config.action {
            ConfigAction::Where => run_config_where(),
            ConfigAction::Check { path } => run_config_check(path.as_deref()),
        },
    }
}

fn run_config_where() -> Result<()> {
    let paths = AppPaths::discover()?;
    let file = paths.config_file();
    println!("Configuration:");
    println!(
        "  directory:  {}{}",
        paths.config_dir().display(),
        if paths.overridden() {
            format!(" (from {})", paths::ENV_CONFIG_DIR)
        } else {
            String::new()
        }
    );
    println!(
        "  file:       {} ({})",
        file.display(),
        if file.is_file() { "present" } else { "missing" }
    );
    Ok(())
}

fn run_config_check(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => AppPaths::discover()?.config_file(),
    };
    let config = BridgeConfig::load(&path)?;
    let options = config.to_presenter_options();

    println!("{}: ok", path.display());
    println!("  capacity:        {}", options.capacity.frames());
    println!("  enqueue timeout: {}ms", options.enqueue_timeout.as_millis());
    println!("  fences:          {}", options.use_fences);
    println!("  color space:     {}", config.color_space());
    println!("  origin:          {:?}", options.origin);
    println!("  size mode:       {:?}", options.size_mode);
    println!("  scale factor:    {}", options.scale_factor);
    Ok(())
}
