use anyhow::{Context, Result};
use clap::Parser;
use monitoring_prometheus::{config, logging};
use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info};

/// Directory scanned for alerting rule files.
const RULES_DIR: &str = "/workspace/rules";

/// Where the rendered configuration is written before Prometheus takes over.
const CONFIG_FILE: &str = "/tmp/prometheus.yml";

/// The Prometheus binary placed there by the `install` companion binary.
const PROMETHEUS_BIN: &str = "/workspace/bin/prometheus";

/// How long Prometheus keeps time series data around.
const RETENTION_TIME: &str = "90d";

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Render the Prometheus configuration and hand the process over to Prometheus",
    long_about = None
)]
struct Arguments {
    /// Base directory for data that must survive container restarts.
    #[clap(long, env)]
    tool_data_dir: PathBuf,
}

fn main() {
    let args = Arguments::parse();

    if let Err(err) = logging::init() {
        eprintln!("Unable to initialize logging: {:#}", err);
        std::process::exit(1);
    }

    // On success exec never returns, so anything that comes back here is a
    // failure.
    if let Err(err) = handle_command(args) {
        error!("Command failed: {:?}", err);
        std::process::exit(1);
    }
}

fn handle_command(args: Arguments) -> Result<()> {
    let storage_path = ensure_persistent_dir(&args.tool_data_dir)?;

    write_configuration(Path::new(RULES_DIR), Path::new(CONFIG_FILE))?;

    info!(bin_path = PROMETHEUS_BIN, "Starting prometheus");

    // Most metrics are pushed to this instance over remote write (by
    // grafana-alloy), hence the receiver flag.
    let err = Command::new(PROMETHEUS_BIN)
        .arg("--web.enable-remote-write-receiver")
        .arg("--config.file")
        .arg(CONFIG_FILE)
        .arg("--storage.tsdb.path")
        .arg(&storage_path)
        .arg("--storage.tsdb.retention.time")
        .arg(RETENTION_TIME)
        .exec();

    Err(err).with_context(|| format!("unable to execute {PROMETHEUS_BIN}"))
}

/// Create the directory Prometheus stores its TSDB in.
///
/// The directory is nested under the tool data directory so the time series
/// survive container restarts. Existing contents are left alone.
fn ensure_persistent_dir(base: &Path) -> Result<PathBuf> {
    let storage_path = base.join("persistent-data").join("prometheus");

    fs::create_dir_all(&storage_path).with_context(|| {
        format!(
            "unable to create storage directory {}",
            storage_path.display()
        )
    })?;

    Ok(storage_path)
}

/// Render the configuration document and write it to `config_file`,
/// replacing whatever a previous run left there.
fn write_configuration(rules_dir: &Path, config_file: &Path) -> Result<()> {
    let config = config::generate_configuration(rules_dir)?;

    let file = File::create(config_file)
        .with_context(|| format!("unable to create {}", config_file.display()))?;

    serde_yaml::to_writer(&file, &config)
        .with_context(|| format!("unable to write configuration to {}", config_file.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_data_dir_is_required() {
        temp_env::with_var_unset("TOOL_DATA_DIR", || {
            let result = Arguments::try_parse_from(["entrypoint"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn tool_data_dir_is_read_from_the_environment() {
        temp_env::with_var("TOOL_DATA_DIR", Some("/data/project/test"), || {
            let args = Arguments::try_parse_from(["entrypoint"]).expect("expected no error");
            assert_eq!(args.tool_data_dir, PathBuf::from("/data/project/test"));
        });
    }

    #[test]
    fn tool_data_dir_can_be_passed_as_a_flag() {
        temp_env::with_var_unset("TOOL_DATA_DIR", || {
            let args = Arguments::try_parse_from(["entrypoint", "--tool-data-dir", "/elsewhere"])
                .expect("expected no error");
            assert_eq!(args.tool_data_dir, PathBuf::from("/elsewhere"));
        });
    }

    #[test]
    fn persistent_directory_creation_is_idempotent() {
        let base = tempfile::tempdir().expect("expected no error");

        let first = ensure_persistent_dir(base.path()).expect("expected no error");
        let second = ensure_persistent_dir(base.path()).expect("expected no error");

        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.ends_with("persistent-data/prometheus"));
    }

    #[test]
    fn configuration_file_is_overwritten() {
        let rules_dir = tempfile::tempdir().expect("expected no error");
        let out_dir = tempfile::tempdir().expect("expected no error");
        let config_file = out_dir.path().join("prometheus.yml");

        fs::write(&config_file, "leftover: from a previous run\n").expect("expected no error");

        write_configuration(rules_dir.path(), &config_file).expect("expected no error");

        let document = fs::read_to_string(&config_file).expect("expected no error");
        assert!(document.starts_with("global:"));
        assert!(!document.contains("leftover"));

        serde_yaml::from_str::<serde_yaml::Value>(&document).expect("expected valid YAML");
    }
}
