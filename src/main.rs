use anyhow::{bail, Context, Result};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use licensehub_installer::config::InstallerConfig;
use licensehub_installer::models::state::AppState;
use licensehub_installer::requirements::{HostProbe, RequirementsProbe};
use licensehub_installer::security::secret_protector::default_key_path;
use licensehub_installer::utils::{logging, os_detection, path_resolver};
use licensehub_installer::Server;

const USAGE: &str = "\
Usage: licensehub-installer [OPTIONS]

Options:
  --config <PATH>          Installer configuration file (default: ./installer.toml if present)
  --port <PORT>            Override the listen port
  --quiet                  Do not mirror logs to stdout
  --check-requirements     Print the requirements report as JSON and exit
  -h, --help               Show this help";

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    quiet: bool,
    check_requirements: bool,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                cli.config = Some(PathBuf::from(value));
            }
            "--port" => {
                let value = args.next().context("--port requires a number")?;
                cli.port = Some(
                    value
                        .parse()
                        .with_context(|| format!("Invalid port: {}", value))?,
                );
            }
            "--quiet" => cli.quiet = true,
            "--check-requirements" => cli.check_requirements = true,
            "-h" | "--help" => cli.help = true,
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(cli)
}

async fn run(cli: CliArgs) -> Result<ExitCode> {
    let mut config = InstallerConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let deployment = path_resolver::resolve_deployment_folder()?;
    config.paths.app_root = path_resolver::resolve_against(&deployment, &config.paths.app_root);
    let log_folder =
        path_resolver::resolve_log_folder(&config.paths.app_root, config.paths.log_dir.as_deref());

    let level = if cli.check_requirements {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    logging::init_logging(&log_folder, level, !cli.quiet && !cli.check_requirements)?;

    info!("[PHASE: initialization] Installer starting");
    info!("[PHASE: initialization] Log directory: {}", log_folder.display());
    info!(
        "[PHASE: initialization] Operating system: {}",
        os_detection::os_description()
    );
    info!(
        "[PHASE: initialization] Application root: {}",
        config.paths.app_root.display()
    );

    if cli.check_requirements {
        let probe = HostProbe::new(config.paths.clone(), config.requirements.clone());
        let report = probe.check().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.passed() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let address = config.socket_addr()?;
    let state = AppState::builder(config)
        .secrets_key(default_key_path(&log_folder))
        .build()?;
    if state.is_installed() {
        info!("[PHASE: initialization] Application already installed; wizard routes are closed");
    }

    Server::new(state, address).run().await?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{:#}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    if cli.help {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("[PHASE: initialization] Fatal: {:#}", e);
            eprintln!("licensehub-installer: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_known_flags() {
        let cli = parse_args(args(&["--config", "a.toml", "--port", "9001", "--quiet"])).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert_eq!(cli.port, Some(9001));
        assert!(cli.quiet);
        assert!(!cli.check_requirements);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(args(&["--port", "high"])).is_err());
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
    }
}
