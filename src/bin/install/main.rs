use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use monitoring_prometheus::logging;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{error, info};

use downloader::{download_release, unpack, verify_checksum};

mod downloader;

/// The Prometheus release to install.
const PROMETHEUS_VERSION: &str = "3.7.3";

/// Directory claimed by this tool inside the workspace.
const PACKAGE_DIR: &str = "/workspace/monitoring_prometheus";

/// Where the extracted binaries end up.
const BIN_DIR: &str = "/workspace/bin";

/// The executables to pull out of the release archive.
const BINARIES: [&str; 2] = ["prometheus", "promtool"];

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Download the pinned Prometheus release and install its binaries into the workspace",
    long_about = None
)]
struct Arguments {}

#[tokio::main]
async fn main() {
    let args = Arguments::parse();

    if let Err(err) = logging::init() {
        eprintln!("Unable to initialize logging: {:#}", err);
        std::process::exit(1);
    }

    if let Err(err) = handle_command(args).await {
        error!("Command failed: {:?}", err);
        std::process::exit(1);
    }
}

async fn handle_command(_args: Arguments) -> Result<()> {
    let mp = MultiProgress::new();

    prepare_workspace(Path::new(PACKAGE_DIR), Path::new(BIN_DIR))?;
    install_prometheus(Path::new(BIN_DIR), PROMETHEUS_VERSION, &mp).await?;

    info!(
        "Installed Prometheus {} into {}",
        PROMETHEUS_VERSION, BIN_DIR
    );

    Ok(())
}

/// Claim the package directory and make sure the binary directory exists.
///
/// The package directory must not exist yet; running the installer twice is
/// a setup mistake. The binary directory is shared with other tools and may
/// already be there.
fn prepare_workspace(package_dir: &Path, bin_dir: &Path) -> Result<()> {
    fs::create_dir(package_dir).with_context(|| {
        format!(
            "unable to create package directory {}",
            package_dir.display()
        )
    })?;

    // The build tooling expects the directory to look like a Python package.
    File::create(package_dir.join("__init__.py"))
        .with_context(|| format!("unable to create marker file in {}", package_dir.display()))?;

    fs::create_dir_all(bin_dir)
        .with_context(|| format!("unable to create binary directory {}", bin_dir.display()))?;

    Ok(())
}

/// Install the pinned Prometheus release into `bin_dir`.
///
/// The release archive is downloaded into a temporary file and verified
/// against the published checksum before anything is written to `bin_dir`.
/// The temporary file is removed when it goes out of scope.
async fn install_prometheus(bin_dir: &Path, version: &str, mp: &MultiProgress) -> Result<()> {
    let base = format!("prometheus-{version}.linux-amd64");
    let package = format!("{base}.tar.gz");
    let prefix = format!("{base}/");

    let mut archive = NamedTempFile::new()?;

    let calculated_checksum = download_release(archive.as_file(), version, &package, mp).await?;

    verify_checksum(&calculated_checksum, version, &package).await?;

    // Make sure we set the position to the beginning of the file so that we
    // can unpack it.
    archive.as_file_mut().seek(SeekFrom::Start(0))?;

    unpack(archive.as_file(), bin_dir, &prefix, &BINARIES, mp).await
}
