use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hydrophone_downloader::audio::{AudioToolkit, FfmpegToolkit};
use hydrophone_downloader::config::{
    Config, ConfigLoader, ConvertMode, resolve_token, store_token,
};
use hydrophone_downloader::domain::TargetFormat;
use hydrophone_downloader::download::Downloader;
use hydrophone_downloader::error::HydroError;
use hydrophone_downloader::merge::Converter;
use hydrophone_downloader::onc::OncHttpClient;
use hydrophone_downloader::output::{
    ConsolePrompt, FixedChoice, FolderChoice, JsonOutput, OutputMode, print_conversion_summary,
    print_download_summary,
};

#[derive(Parser)]
#[command(name = "hydrophone-dl")]
#[command(about = "Download ONC hydrophone audio by deployment day and merge it for listening")]
#[command(version, author)]
struct Cli {
    /// JSON config file (defaults to ./hydrophone.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every matching hydrophone deployment day")]
    Download(DownloadArgs),
    #[command(about = "List matching deployment days as JSON without downloading")]
    Deployments(DownloadArgs),
    #[command(about = "Convert or merge downloaded segment files")]
    Convert(ConvertArgs),
    #[command(about = "Store the ONC API token for later runs")]
    SetToken(SetTokenArgs),
}

#[derive(Args, Clone)]
struct DownloadArgs {
    #[arg(long, allow_hyphen_values = true)]
    min_lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max_lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    min_lon: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max_lon: Option<f64>,
    #[arg(long)]
    min_depth: Option<f64>,
    #[arg(long)]
    max_depth: Option<f64>,
    #[arg(long)]
    license: Option<String>,
    /// First deployment day to keep (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last deployment day to keep (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ConvertArgs {
    /// Convert every folder to this format instead of prompting
    #[arg(long)]
    format: Option<TargetFormat>,
    #[arg(long)]
    mode: Option<ConvertMode>,
    /// Sonifications directory holding one folder per deployment
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Args)]
struct SetTokenArgs {
    token: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HydroError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HydroError) -> u8 {
    match error {
        HydroError::MissingToken
        | HydroError::ConfigRead(_)
        | HydroError::ConfigParse(_)
        | HydroError::InvalidConfig(_) => 2,
        HydroError::OncHttp(_)
        | HydroError::OncStatus { .. }
        | HydroError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Download(args) => run_download(cli.config.as_deref(), args, output_mode),
        Commands::Deployments(args) => run_deployments(cli.config.as_deref(), args),
        Commands::Convert(args) => run_convert(cli.config.as_deref(), args, output_mode),
        Commands::SetToken(args) => {
            let path = store_token(&args.token)?;
            println!("token saved to {}", path.display());
            Ok(())
        }
    }
}

fn load_with_overrides(config: Option<&str>, args: &DownloadArgs) -> Result<Config, HydroError> {
    let mut config = ConfigLoader::load(config)?;
    let download = &mut config.download;
    let overrides = [
        (&mut download.min_latitude, args.min_lat),
        (&mut download.max_latitude, args.max_lat),
        (&mut download.min_longitude, args.min_lon),
        (&mut download.max_longitude, args.max_lon),
        (&mut download.min_depth, args.min_depth),
        (&mut download.max_depth, args.max_depth),
    ];
    for (field, value) in overrides {
        if value.is_some() {
            *field = value;
        }
    }
    if args.license.is_some() {
        download.license = args.license.clone();
    }
    if args.start.is_some() {
        download.start_time = args.start;
    }
    if args.end.is_some() {
        download.end_time = args.end;
    }
    if args.save_dir.is_some() {
        download.save_dir = args.save_dir.clone();
    }
    Ok(config)
}

fn run_download(
    config: Option<&str>,
    args: DownloadArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve_config(load_with_overrides(config, &args)?)?;
    let client = OncHttpClient::new(&resolve_token()?)?;
    let downloader = Downloader::new(client);

    let report = downloader.download_data(&resolved.download, Local::now().naive_local())?;
    match output_mode {
        OutputMode::Interactive => print_download_summary(&report),
        OutputMode::NonInteractive => JsonOutput::print_json(&report).into_diagnostic()?,
    }
    Ok(())
}

fn run_deployments(config: Option<&str>, args: DownloadArgs) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve_config(load_with_overrides(config, &args)?)?;
    let client = OncHttpClient::new(&resolve_token()?)?;
    let downloader = Downloader::new(client);

    let days = downloader.available_days(&resolved.download, Local::now().naive_local());
    info!(count = days.len(), "deployment days available");
    JsonOutput::print_json(&days).into_diagnostic()?;
    Ok(())
}

fn run_convert(
    config: Option<&str>,
    args: ConvertArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut settings = ConfigLoader::resolve(config)?.convert;
    if let Some(dir) = args.dir {
        settings.sonifications_dir = dir;
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    if args.format.is_some() {
        settings.format = args.format;
    }

    let toolkit = FfmpegToolkit::new();
    toolkit.check_available()?;
    if let Some(version) = toolkit.version() {
        info!("using {version}");
    }

    let summary = match (settings.format, output_mode) {
        (Some(format), _) => {
            let prompt = FixedChoice(FolderChoice::Convert(format));
            Converter::new(toolkit, prompt, settings).run()?
        }
        (None, OutputMode::Interactive) => {
            Converter::new(toolkit, ConsolePrompt::stdio(), settings).run()?
        }
        (None, OutputMode::NonInteractive) => {
            return Err(HydroError::InvalidConfig(
                "--format is required with --non-interactive".to_string(),
            )
            .into());
        }
    };

    match output_mode {
        OutputMode::Interactive => print_conversion_summary(&summary),
        OutputMode::NonInteractive => JsonOutput::print_json(&summary).into_diagnostic()?,
    }
    Ok(())
}
