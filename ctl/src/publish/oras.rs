use crate::models::Build;
use crate::publish::ImageRef;
use forgectl_common::config::{CONTACT_URL, DISCORD_URL, REGISTRY_ORG};
use forgectl_common::errors::*;
use forgectl_common::{OneOrMany, PackageInfo};
use serde_json::{Map, Value};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const EMPTY_CONFIG: &str = "/dev/null:application/vnd.oci.empty.v1+json";

fn annotate(args: &mut Vec<String>, key: &str, value: &str) {
    args.push("--annotation".to_string());
    args.push(format!("{}={}", key, value));
}

fn annotate_opt(args: &mut Vec<String>, key: &str, value: &Option<OneOrMany>) {
    if let Some(value) = value.as_ref().and_then(|v| v.first()) {
        annotate(args, key, value);
    }
}

/// Assemble the full `oras push` argument list for one variant: OCI-standard
/// annotations, the `dev.pkgforge.soar.*` vendor set, the self-describing
/// metadata document, the image reference and the payload files (relative
/// basenames, the push runs with the package directory as its working
/// directory).
pub fn push_args(
    image: &ImageRef,
    pkg_info: &PackageInfo,
    build: &Build,
    target: &str,
    metadata: &Map<String, Value>,
    files: &[String],
) -> Vec<String> {
    let mut args = vec![
        "push".to_string(),
        "--disable-path-validation".to_string(),
        "--config".to_string(),
        EMPTY_CONFIG.to_string(),
    ];

    annotate(&mut args, "org.opencontainers.image.created", &pkg_info.build_date);
    annotate(&mut args, "org.opencontainers.image.version", &pkg_info.version);
    annotate(&mut args, "org.opencontainers.image.title", target);
    annotate(&mut args, "org.opencontainers.image.description", &pkg_info.description);
    annotate(&mut args, "org.opencontainers.image.vendor", REGISTRY_ORG);
    annotate(&mut args, "org.opencontainers.image.licenses", "blessing");
    annotate(&mut args, "org.opencontainers.image.authors", CONTACT_URL);
    annotate_opt(&mut args, "org.opencontainers.image.url", &pkg_info.homepage);
    annotate_opt(&mut args, "org.opencontainers.image.source", &pkg_info.src_url);

    annotate(&mut args, "dev.pkgforge.soar.pkg", target);
    annotate(&mut args, "dev.pkgforge.soar.pkg_name", target);
    annotate(&mut args, "dev.pkgforge.soar.pkg_family", &pkg_info.pkg_family);
    annotate(&mut args, "dev.pkgforge.soar.version", &pkg_info.version);
    annotate(&mut args, "dev.pkgforge.soar.build_date", &pkg_info.build_date);
    annotate(&mut args, "dev.pkgforge.soar.build_id", &build.id.to_string());
    annotate(&mut args, "dev.pkgforge.soar.description", &pkg_info.description);
    annotate_opt(&mut args, "dev.pkgforge.soar.homepage", &pkg_info.homepage);
    annotate_opt(&mut args, "dev.pkgforge.soar.src_url", &pkg_info.src_url);
    if !pkg_info.bsum.is_empty() {
        annotate(&mut args, "dev.pkgforge.soar.bsum", &pkg_info.bsum);
    }
    if !pkg_info.shasum.is_empty() {
        annotate(&mut args, "dev.pkgforge.soar.shasum", &pkg_info.shasum);
    }
    if !pkg_info.size.is_empty() {
        annotate(&mut args, "dev.pkgforge.soar.size", &pkg_info.size);
    }
    if pkg_info.size_raw > 0 {
        annotate(&mut args, "dev.pkgforge.soar.size_raw", &pkg_info.size_raw.to_string());
    }
    if !pkg_info.provides.is_empty() {
        if let Ok(provides) = serde_json::to_string(&pkg_info.provides) {
            annotate(&mut args, "dev.pkgforge.soar.provides", &provides);
        }
    }
    // the catalogue builder rehydrates records from this one
    if let Ok(doc) = serde_json::to_string(&Value::Object(metadata.clone())) {
        annotate(&mut args, "dev.pkgforge.soar.json", &doc);
    }
    annotate(&mut args, "dev.pkgforge.discord", DISCORD_URL);

    args.push(image.image());
    args.extend(files.iter().cloned());

    args
}

pub async fn push(oras: &Path, pkg_dir: &Path, args: &[String]) -> Result<()> {
    debug!("Running {:?} with {} args", oras, args.len());
    let status = Command::new(oras)
        .args(args)
        .current_dir(pkg_dir)
        .stdin(Stdio::null())
        .status()
        .await
        .with_context(|| format!("Failed to spawn {:?}", oras))?;

    if !status.success() {
        bail!("oras push exited with {}", status);
    }
    Ok(())
}
