//! CLI tool for nvreport

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use nvreport::{Config, OutputFormat, ReportOptions, SamplingMode};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "nvreport")]
#[command(
    about = "Report NVIDIA GPU telemetry: memory, utilization, power, temperature and fan speed per device",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/nvreport/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Averaging window in seconds for the average power and utilization
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    window: Option<u64>,

    /// Wait out the averaging window, or read samples already buffered
    #[arg(long, value_enum)]
    sampling: Option<SamplingMode>,

    /// Report a single device by index
    #[arg(short = 'i', long, allow_negative_numbers = true)]
    device: Option<i64>,

    /// Graphics process ids to attribute memory for (comma separated)
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    graphics_pids: Option<Vec<u32>>,

    /// Compute process ids to attribute memory for (comma separated)
    #[arg(long, value_delimiter = ',', num_args = 0..)]
    compute_pids: Option<Vec<u32>>,
}

#[cfg(feature = "cli")]
impl Cli {
    fn load_config(&self) -> nvreport::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(window) = self.window {
            config.sampling.window_secs = window;
        }
        if let Some(mode) = self.sampling {
            config.sampling.mode = mode;
        }
        if let Some(pids) = &self.graphics_pids {
            config.processes.graphics_pids = pids.clone();
        }
        if let Some(pids) = &self.compute_pids {
            config.processes.compute_pids = pids.clone();
        }

        Ok(config)
    }

    fn report_options(&self, config: &Config) -> ReportOptions {
        ReportOptions {
            device: self.device,
            ..ReportOptions::from(config)
        }
    }
}

#[cfg(all(feature = "cli", feature = "nvidia"))]
fn report<W: std::io::Write>(
    config: &Config,
    options: &ReportOptions,
    out: &mut W,
) -> nvreport::Result<nvreport::Report> {
    let mode = config.sampling.mode;
    nvreport::report::run(|| nvreport::NvmlSession::init(mode), options, out)
}

#[cfg(all(feature = "cli", not(feature = "nvidia")))]
fn report<W: std::io::Write>(
    _config: &Config,
    _options: &ReportOptions,
    out: &mut W,
) -> nvreport::Result<nvreport::Report> {
    let err = nvreport::Error::Init("NVIDIA support not compiled in".to_string());
    writeln!(out, "{}", nvreport::report::error_line(&err))?;
    Err(err)
}

#[cfg(feature = "cli")]
fn main() -> std::process::ExitCode {
    use std::process::ExitCode;

    let cli = Cli::parse();

    env_logger::init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let options = cli.report_options(&config);
    log::debug!("Report options: {:?}", options);

    let mut stdout = std::io::stdout().lock();
    match report(&config, &options, &mut stdout) {
        Ok(report) => {
            log::info!("Reported {} device(s)", report.devices.len());
            ExitCode::SUCCESS
        }
        // Already printed by the reporter
        Err(_) => ExitCode::FAILURE,
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
