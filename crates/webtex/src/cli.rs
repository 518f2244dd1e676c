use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "webtex",
    author,
    version,
    about = "Drive the browser frame handoff against a headless GPU host"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Paint synthetic browser frames and present them into an offscreen target.
    Run(RunArgs),
    /// Print the selected GPU adapter and the paint path it supports.
    Probe(ProbeArgs),
    /// Inspect or validate configuration files.
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of host frames to render before exiting.
    #[arg(long, value_name = "N", default_value_t = 120)]
    pub frames: u32,

    /// Host render target size in device pixels (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "1280x720")]
    pub size: (u32, u32),

    /// Device scale factor; overrides `size.scale_factor` from the config.
    #[arg(long, value_name = "FACTOR", value_parser = parse_scale)]
    pub scale: Option<f32>,

    /// Paint rate of the synthetic browser.
    #[arg(long, value_name = "FPS", value_parser = parse_fps, default_value_t = 120.0)]
    pub producer_fps: f32,

    /// Render rate of the host loop.
    #[arg(long, value_name = "FPS", value_parser = parse_fps, default_value_t = 60.0)]
    pub host_fps: f32,

    /// Configuration file; defaults to `webtex.toml` in the config directory.
    #[arg(long, value_name = "PATH", env = "WEBTEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the last presented frame to this PNG path.
    #[arg(long, value_name = "PATH", value_parser = parse_export_path)]
    pub export: Option<PathBuf>,

    /// Paint into GPU textures shared in process instead of CPU buffers.
    #[arg(long)]
    pub accelerated: bool,

    #[command(flatten)]
    pub gpu: GpuArgs,
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Configuration file used to pick the host color space.
    #[arg(long, value_name = "PATH", env = "WEBTEX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub gpu: GpuArgs,
}

#[derive(Parser, Debug, Clone, Copy)]
pub struct GpuArgs {
    /// Adapter power preference.
    #[arg(long, value_enum, default_value_t = PowerArg::Low)]
    pub power: PowerArg,

    /// Force the software fallback adapter.
    #[arg(long)]
    pub fallback_adapter: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerArg {
    Low,
    High,
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print where webtex looks for its configuration.
    Where,
    /// Parse and validate a configuration file.
    Check {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size must be greater than zero".into());
    }
    Ok((width, height))
}

pub fn parse_scale(value: &str) -> Result<f32, String> {
    let scale = value
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("invalid scale factor '{value}'"))?;
    if !scale.is_finite() || scale <= 0.0 {
        return Err("scale factor must be a positive number".into());
    }
    Ok(scale)
}

pub fn parse_fps(value: &str) -> Result<f32, String> {
    let fps = value
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("invalid frame rate '{value}'"))?;
    if !fps.is_finite() || fps <= 0.0 {
        return Err("frame rate must be greater than zero".into());
    }
    Ok(fps)
}

pub fn parse_export_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    match extension(&path).as_deref() {
        Some("png") => Ok(path),
        None => Err("export path has no extension; expected .png".to_string()),
        Some(other) => Err(format!("unsupported export format '.{other}'; expected .png")),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_size(" 64 X 32 ").unwrap(), (64, 32));
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn rejects_non_positive_rates_and_scales() {
        assert!(parse_scale("0").is_err());
        assert!(parse_scale("-2").is_err());
        assert_eq!(parse_scale("1.25").unwrap(), 1.25);
        assert!(parse_fps("0").is_err());
        assert!(parse_fps("inf").is_err());
    }

    #[test]
    fn export_requires_png() {
        assert!(parse_export_path("frame.png").is_ok());
        assert!(parse_export_path("frame.PNG").is_ok());
        assert!(parse_export_path("frame.exr").is_err());
        assert!(parse_export_path("frame").is_err());
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["webtex", "run"]).expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.frames, 120);
        assert_eq!(args.size, (1280, 720));
        assert_eq!(args.scale, None);
        assert_eq!(args.gpu.power, PowerArg::Low);
        assert!(!args.gpu.fallback_adapter);
        assert!(!args.accelerated);
    }

    #[test]
    fn run_flags() {
        let cli = Cli::try_parse_from([
            "webtex",
            "run",
            "--frames",
            "10",
            "--size",
            "320x200",
            "--scale",
            "2",
            "--producer-fps",
            "30",
            "--export",
            "out.png",
            "--power",
            "high",
            "--accelerated",
        ])
        .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.frames, 10);
        assert_eq!(args.size, (320, 200));
        assert_eq!(args.scale, Some(2.0));
        assert_eq!(args.producer_fps, 30.0);
        assert_eq!(args.export, Some(PathBuf::from("out.png")));
        assert_eq!(args.gpu.power, PowerArg::High);
        assert!(args.accelerated);
    }

    #[test]
    fn config_check_takes_optional_path() {
        let cli = Cli::try_parse_from(["webtex", "config", "check", "a.toml"]).expect("parse");
        let Command::Config(ConfigCommand {
            action: ConfigAction::Check { path },
        }) = cli.command
        else {
            panic!("expected config check");
        };
        assert_eq!(path, Some(PathBuf::from("a.toml")));
    }
}
