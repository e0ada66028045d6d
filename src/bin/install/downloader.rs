use anyhow::{anyhow, bail, Result};
use flate2::read::GzDecoder;
use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

/// Base URL for the released Prometheus archives and their checksum list.
const RELEASE_DOWNLOAD_BASE: &str = "https://github.com/prometheus/prometheus/releases/download";

// Create a reqwest client that will be used to make HTTP requests. This allows
// for keep-alives if we are making multiple requests to the same host.
static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("monitoring-prometheus/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("Unable to create reqwest client")
});

/// Downloads the release archive of `version` into `destination`, returning
/// the sha256sum hex-digest of the downloaded file.
pub async fn download_release(
    destination: &File,
    version: &str,
    package: &str,
    multi_progress: &MultiProgress,
) -> Result<String> {
    let url = format!("{RELEASE_DOWNLOAD_BASE}/v{version}/{package}");
    download(&url, destination, multi_progress).await
}

async fn download(url: &str, destination: &File, multi_progress: &MultiProgress) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut response = CLIENT.get(url).send().await?.error_for_status()?;

    let total_size = response
        .content_length()
        .ok_or_else(|| anyhow!("didn't receive content length"))?;
    let mut downloaded = 0;

    let pb = multi_progress.add(ProgressBar::new(total_size));

    // https://github.com/console-rs/indicatif/blob/HEAD/examples/download.rs#L12
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")?
            .with_key("eta", |state: &ProgressState, w: &mut dyn fmt::Write| write!(w, "{:.1}s", state.eta().as_secs_f64()).unwrap())
            .progress_chars("=> ")
    );

    pb.set_message(format!("Downloading {url}"));

    let mut buffer = BufWriter::new(destination);

    while let Some(ref chunk) = response.chunk().await? {
        buffer.write_all(chunk)?;
        hasher.update(chunk);

        let new_size = (downloaded + chunk.len() as u64).min(total_size);
        downloaded = new_size;

        pb.set_position(downloaded);
    }

    buffer.flush()?;

    pb.finish_and_clear();
    multi_progress.remove(&pb);

    let checksum = hex::encode(hasher.finalize());
    Ok(checksum)
}

/// Compare a locally calculated digest against the checksum list published
/// alongside the release.
pub async fn verify_checksum(sha256sum: &str, version: &str, package: &str) -> Result<()> {
    let checksums = CLIENT
        .get(format!("{RELEASE_DOWNLOAD_BASE}/v{version}/sha256sums.txt"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let expected = expected_checksum(&checksums, package)
        .ok_or_else(|| anyhow!("unable to find checksum for {package} in checksum list"))?;

    if expected != sha256sum {
        error!(
            expected_checksum = ?expected,
            calculated_checksum = ?sha256sum,
            "Calculated checksum for downloaded archive did not match expected checksum",
        );
        bail!("checksum did not match");
    }

    Ok(())
}

// Go through all the lines in the checksum file and look for the one that
// belongs to our package.
fn expected_checksum<'a>(checksums: &'a str, package: &str) -> Option<&'a str> {
    checksums
        .lines()
        .find_map(|line| match line.split_once("  ") {
            Some((checksum, filename)) if package == filename => Some(checksum),
            _ => None,
        })
}

/// Unpack the named `binaries` from the gzipped tarball in `archive` into
/// `destination_path`, dropping the leading `prefix` from entry names.
///
/// Everything else in the archive is skipped. An archive that does not
/// contain all requested binaries is an error.
pub async fn unpack(
    archive: &File,
    destination_path: &Path,
    prefix: &str,
    binaries: &[&str],
    multi_progress: &MultiProgress,
) -> Result<()> {
    let tar_file = GzDecoder::new(archive);
    let mut ar = tar::Archive::new(tar_file);

    let pb = multi_progress.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::default_spinner());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Unpacking archive...");

    let mut remaining: Vec<&str> = binaries.to_vec();

    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        let name = match path.strip_prefix(prefix).ok().and_then(|p| p.to_str()) {
            Some(name) => name.to_owned(),
            None => continue,
        };

        let position = match remaining.iter().position(|binary| *binary == name) {
            Some(position) => position,
            None => continue,
        };
        remaining.swap_remove(position);

        debug!("Unpacking {}", name);

        entry.unpack(destination_path.join(&name))?;
    }

    pb.finish_and_clear();
    multi_progress.remove(&pb);

    if !remaining.is_empty() {
        bail!(
            "archive did not contain the expected binaries: {}",
            remaining.join(", ")
        );
    }

    Ok(())
}
