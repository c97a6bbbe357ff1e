use crate::models::Build;
use chrono::prelude::*;
use forgectl_common::config::*;
use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::{PackageInfo, RepoClass};
use std::fs;
use std::path::{Path, PathBuf};

pub mod info;
pub mod meta;
pub mod oras;
pub mod sign;

/// A fully sanitized registry coordinate for one upload variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub repo_class: RepoClass,
    pub family: String,
    pub build_type: String,
    pub target: String,
    pub version: String,
    pub arch: String,
}

impl ImageRef {
    pub fn new(build: &Build, pkg_info: &PackageInfo, target: &str) -> ImageRef {
        ImageRef {
            repo_class: RepoClass::from_recipe_path(&build.recipe_path),
            family: utils::sanitize_pkg_name(&pkg_info.pkg_family),
            build_type: utils::build_type(&build.recipe_path),
            target: utils::sanitize_pkg_name(target),
            version: utils::sanitize_version(&pkg_info.version),
            arch: build.arch.to_lowercase(),
        }
    }

    fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.repo_class, self.family, self.build_type, self.target
        )
    }

    pub fn tag(&self) -> String {
        format!("{}-{}", self.version, self.arch)
    }

    /// `ghcr.io/<org>/<class>/<family>/<build-type>/<target>:<version>-<arch>`
    pub fn image(&self) -> String {
        format!(
            "{}/{}/{}:{}",
            REGISTRY_HOST,
            REGISTRY_ORG,
            self.path(),
            self.tag()
        )
    }

    pub fn ghcr_pkg(&self) -> String {
        self.image()
    }

    pub fn ghcr_url(&self) -> String {
        format!("https://{}/{}/{}", REGISTRY_HOST, REGISTRY_ORG, self.path())
    }

    pub fn download_url(&self, file: &str) -> String {
        format!(
            "{}/{}/{}?tag={}&download={}",
            GHCR_API_BASE,
            REGISTRY_ORG,
            self.path(),
            self.tag(),
            file
        )
    }

    pub fn manifest_url(&self) -> String {
        format!(
            "{}/{}/{}?tag={}&manifest",
            GHCR_API_BASE,
            REGISTRY_ORG,
            self.path(),
            self.tag()
        )
    }

    pub fn build_log_url(&self, target: &str) -> String {
        self.download_url(&format!("{}.log", target))
    }

    pub fn webpage(&self) -> String {
        format!(
            "{}/repo/{}/{}/{}/{}",
            PKG_WEB_BASE, self.repo_class, self.arch, self.family, self.target
        )
    }

    pub fn pipeline_run_url(&self, build_id: i64) -> String {
        format!(
            "https://github.com/{}/{}/actions/runs/{}",
            REGISTRY_ORG, self.repo_class, build_id
        )
    }
}

/// Decide the set of upload target names for a package directory.
///
/// Multiple provided binaries fan out into one upload each; otherwise the
/// best single name wins: provides[0] > pkg_name > pkg_family > pkg (with a
/// trailing extension-like suffix stripped).
pub fn determine_upload_targets(pkg_info: &PackageInfo) -> Result<Vec<String>> {
    if pkg_info.provides.len() > 1 {
        return Ok(pkg_info.provides.clone());
    }

    let target = if let Some(first) = pkg_info.provides.first().filter(|p| !p.is_empty()) {
        first.clone()
    } else if !pkg_info.pkg_name.is_empty() {
        pkg_info.pkg_name.clone()
    } else if !pkg_info.pkg_family.is_empty() {
        pkg_info.pkg_family.clone()
    } else if !pkg_info.pkg.is_empty() {
        utils::strip_pkg_extension(&pkg_info.pkg).to_string()
    } else {
        bail!("no upload targets determined (no pkg, provides, pkg_name, or pkg_family)");
    };

    Ok(vec![target])
}

/// Pick the payload for one variant: everything in the directory except
/// extensionless siblings that are some other variant's binary.
pub fn select_files(files: &[String], provides: &[String], target: &str) -> Vec<String> {
    files
        .iter()
        .filter(|file| {
            let is_other_binary = !file.contains('.')
                && provides.iter().any(|p| p != target && p == *file);
            !is_other_binary
        })
        .cloned()
        .collect()
}

fn list_files(pkg_dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(pkg_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push(name.to_string());
        }
    }
    files.sort();
    Ok(files)
}

pub struct Publisher {
    pub oras_path: PathBuf,
    pub minisign_path: PathBuf,
    pub repo_path: PathBuf,
}

impl Publisher {
    pub fn new<P: Into<PathBuf>>(repo_path: P) -> Publisher {
        Publisher {
            oras_path: PathBuf::from("oras"),
            minisign_path: PathBuf::from("minisign"),
            repo_path: repo_path.into(),
        }
    }

    /// Fan a built package directory out into one registry upload per
    /// target: synthesize metadata, sign what is on disk, then push each
    /// variant with its annotation set.
    pub async fn upload_package(&self, build: &Build, pkg_dir: &Path) -> Result<()> {
        if !pkg_dir.is_dir() {
            bail!("Package directory not found: {:?}", pkg_dir);
        }

        let recipe_path = self.repo_path.join(&build.recipe_path);
        let mut pkg_info = info::collect(build, &recipe_path, pkg_dir)?;
        if pkg_info.version.is_empty() {
            pkg_info.version = format!("latest-{}", Utc::now().format("%Y%m%d"));
        }

        let targets = determine_upload_targets(&pkg_info)?;

        if let Err(err) = meta::generate_metadata(&pkg_info, build, pkg_dir, &targets) {
            warn!("Failed to generate metadata JSON: {:#}", err);
        }

        match sign::sign_directory(&self.minisign_path, pkg_dir).await {
            Ok(signed) => info!("Signed {} package files", signed),
            Err(err) => {
                warn!("Failed to sign package files: {:#}", err);
                warn!("Continuing upload without signatures");
            }
        }

        // re-list after signing so .sig and generated .json files ride along
        let files = list_files(pkg_dir)?;
        if files.is_empty() {
            bail!("No files found in package directory: {:?}", pkg_dir);
        }

        let mut upload_errors = Vec::new();
        let mut succeeded = 0;
        for (i, target) in targets.iter().enumerate() {
            if targets.len() > 1 {
                info!("[{}/{}] Uploading variant: {}", i + 1, targets.len(), target);
            }

            let image = ImageRef::new(build, &pkg_info, target);
            let metadata = meta::target_metadata(&pkg_info, build, target);
            let payload = select_files(&files, &pkg_info.provides, target);
            let args = oras::push_args(&image, &pkg_info, build, target, &metadata, &payload);

            match oras::push(&self.oras_path, pkg_dir, &args).await {
                Ok(()) => {
                    info!("Uploaded {}", image.image());
                    succeeded += 1;
                }
                Err(err) => {
                    let msg = format!("failed to upload {}: {:#}", target, err);
                    error!("{}", msg);
                    upload_errors.push(msg);
                }
            }
        }

        if succeeded == 0 {
            bail!("All uploads failed: {}", upload_errors.join("; "));
        }
        if !upload_errors.is_empty() {
            warn!(
                "{}/{} uploads succeeded, {} failed",
                succeeded,
                targets.len(),
                upload_errors.len()
            );
        }

        info!("Successfully uploaded {} package(s)", succeeded);
        Ok(())
    }
}
