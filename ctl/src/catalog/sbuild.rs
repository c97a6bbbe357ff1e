use crate::catalog::fetch;
use forgectl_common::config::{REGISTRY_HOST, REGISTRY_ORG, SBUILD_LIST_PUBKEY};
use forgectl_common::errors::*;
use forgectl_common::http::Client;
use forgectl_common::utils;
use forgectl_common::RepoClass;
use serde::Deserialize;
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;

/// One entry of the authoritative SBUILD list.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SbuildEntry {
    #[serde(rename = "_disabled", default)]
    pub disabled: bool,
    #[serde(default)]
    pub rebuild: Option<bool>,
    #[serde(default)]
    pub pkg_family: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ghcr_pkg: Option<String>,
    #[serde(default)]
    pub build_script: Option<String>,
}

/// Fetch the SBUILD list for a repo class and project the enabled entries to
/// registry-relative family paths (`bincache/a-utils/official`).
pub async fn fetch_families(client: &Client, repo_class: RepoClass) -> Result<Vec<String>> {
    let (primary, fallback) = repo_class.sbuild_list_urls();

    let (body, url) = match fetch::get_with_retry(client, primary, None, None).await {
        Ok(body) => (body, primary),
        Err(err) => {
            warn!("Failed to fetch SBUILD list from {}: {:#}", primary, err);
            info!("Falling back to {}", fallback);
            let body = fetch::get_with_retry(client, fallback, None, None)
                .await
                .context("Failed to fetch SBUILD list from fallback URL")?;
            (body, fallback)
        }
    };

    verify_signature(client, url, &body).await?;

    let entries = serde_json::from_slice::<Vec<SbuildEntry>>(&body)
        .context("Failed to parse SBUILD list")?;

    let prefix = format!("{}/{}/", REGISTRY_HOST, REGISTRY_ORG);
    let families = entries
        .into_iter()
        .filter(|entry| !entry.disabled)
        .filter_map(|entry| entry.ghcr_pkg)
        .map(|pkg| pkg.strip_prefix(&prefix).map(String::from).unwrap_or(pkg))
        .filter(|pkg| !pkg.is_empty())
        .collect::<Vec<_>>();

    info!("SBUILD list carries {} enabled families", families.len());
    Ok(families)
}

/// Verify the list against its detached minisign signature. A missing
/// signature or missing tool skips verification with a warning; a present
/// but invalid signature aborts.
async fn verify_signature(client: &Client, url: &str, body: &[u8]) -> Result<()> {
    let sig_url = format!("{}.sig", url);
    let signature = match fetch::get_once(client, &sig_url).await {
        Ok(signature) => signature,
        Err(err) => {
            warn!("No signature for SBUILD list, skipping verification: {:#}", err);
            return Ok(());
        }
    };

    match run_minisign_verify(body, &signature).await {
        Ok(true) => {
            info!("SBUILD list signature verified");
            Ok(())
        }
        Ok(false) => bail!("SBUILD list signature verification failed for {}", url),
        Err(err) => {
            warn!("Could not verify SBUILD list signature: {:#}", err);
            Ok(())
        }
    }
}

async fn run_minisign_verify(body: &[u8], signature: &[u8]) -> Result<bool> {
    let minisign = utils::find_tool("minisign")?;

    let mut body_file = tempfile::NamedTempFile::new()?;
    body_file.write_all(body)?;
    body_file.flush()?;
    let mut sig_file = tempfile::NamedTempFile::new()?;
    sig_file.write_all(signature)?;
    sig_file.flush()?;

    let status = Command::new(minisign)
        .arg("-V")
        .arg("-P")
        .arg(SBUILD_LIST_PUBKEY)
        .arg("-m")
        .arg(body_file.path())
        .arg("-x")
        .arg(sig_file.path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    Ok(status.success())
}
