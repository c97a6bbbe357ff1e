use forgectl_common::auth;
use forgectl_common::errors::*;
use forgectl_common::utils;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Sign every non-signature file in the directory in place, producing a
/// detached `<file>.sig` next to each. Per-file failures are warnings; the
/// caller decides what a total failure means.
pub async fn sign_directory(minisign: &Path, pkg_dir: &Path) -> Result<usize> {
    let minisign = utils::find_tool(minisign)
        .context("minisign not found, artifacts will not be signed")?;
    let key_content = auth::find_signing_key()?;
    let password = auth::find_signing_password();

    // the key only ever exists as a temporary file owned by this call
    let mut key_file = tempfile::Builder::new()
        .prefix("minisign-")
        .suffix(".key")
        .tempfile()
        .context("Failed to create temporary key file")?;
    key_file
        .write_all(key_content.as_bytes())
        .context("Failed to write key content")?;
    key_file.flush()?;

    let mut signed = 0;
    let mut entries = tokio::fs::read_dir(pkg_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sig") {
            continue;
        }

        match sign_file(&minisign, key_file.path(), &path, password.as_deref()).await {
            Ok(()) => signed += 1,
            Err(err) => warn!("Failed to sign {:?}: {:#}", path.file_name(), err),
        }
    }

    Ok(signed)
}

async fn sign_file(
    minisign: &Path,
    key_path: &Path,
    file: &Path,
    password: Option<&str>,
) -> Result<()> {
    let sig_path = format!("{}.sig", file.display());

    let mut cmd = Command::new(minisign);
    cmd.arg("-S")
        .arg("-s")
        .arg(key_path)
        .arg("-m")
        .arg(file)
        .arg("-x")
        .arg(&sig_path)
        .stdin(if password.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("Failed to spawn minisign")?;
    if let (Some(password), Some(mut stdin)) = (password, child.stdin.take()) {
        stdin.write_all(format!("{}\n", password).as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        bail!(
            "minisign exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}
