use crate::models::Build;
use chrono::prelude::*;
use chrono::SecondsFormat;
use diesel::SqliteConnection;
use forgectl_common::config::MAX_WARNINGS;
use forgectl_common::errors::*;
use forgectl_common::http;
use forgectl_common::{BuildStatus, OneOrMany, RepoClass};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod fetch;
pub mod formats;
pub mod ghcr;
pub mod sbuild;

/// A package record of the aggregate catalogue, rehydrated from the
/// `dev.pkgforge.soar.json` manifest annotation. The publisher writes that
/// document with `provides`/`pkg_webpage` keys, the catalogue stores them as
/// `provides_pkg`/`web_url`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bsum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shasum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub download_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ghcr_pkg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<OneOrMany>,
    #[serde(default, alias = "provides", skip_serializing_if = "Vec::is_empty")]
    pub provides_pkg: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repology: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_url: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<OneOrMany>,
    #[serde(default, alias = "pkg_webpage", skip_serializing_if = "String::is_empty")]
    pub web_url: String,
}

/// Caps a warning site at the first few occurrences so a broad outage does
/// not flood the log.
pub struct WarnLimiter {
    seen: AtomicUsize,
    limit: usize,
}

impl WarnLimiter {
    pub fn new(limit: usize) -> WarnLimiter {
        WarnLimiter {
            seen: AtomicUsize::new(0),
            limit,
        }
    }

    /// Record one failure; returns whether it should still be logged.
    pub fn note(&self) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed);
        if seen == self.limit {
            warn!("Too many failures, suppressing further warnings");
        }
        seen < self.limit
    }

    pub fn total(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }
}

pub struct GeneratorConfig {
    pub arch: String,
    pub output_dir: PathBuf,
    pub repo_class: RepoClass,
}

pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Generator {
        Generator { config }
    }

    /// Build the per-architecture catalogue: candidate packages from the
    /// SBUILD list joined against the org inventory, one record per package
    /// from its manifest annotation, streamed to `<arch>.json` and derived
    /// into the indexed and compressed variants.
    pub async fn generate(&self) -> Result<()> {
        let class = self.config.repo_class;
        info!(
            "Starting catalogue generation for {} ({})",
            class, self.config.arch
        );

        let client = http::client()?;
        let families = sbuild::fetch_families(&client, class).await?;
        let inventory = ghcr::fetch_org_packages(&client).await?;

        let prefix = format!("{}/", class);
        let packages = inventory
            .iter()
            .filter(|pkg| pkg.visibility == "public")
            .map(|pkg| pkg.name.as_str())
            .filter(|name| name.starts_with(&prefix))
            .filter(|name| {
                families.iter().any(|family| {
                    *name == family.as_str() || name.starts_with(&format!("{}/", family))
                })
            })
            .map(String::from)
            .collect::<Vec<_>>();

        if packages.is_empty() {
            bail!("No packages found for {}", class);
        }
        info!(
            "Found {} {} packages matching the SBUILD list",
            packages.len(),
            class
        );

        let data_dir = self
            .config
            .output_dir
            .join(class.to_string())
            .join("data");
        fs::create_dir_all(&data_dir).context("Failed to create output directory")?;
        let json_path = data_dir.join(format!("{}.json", self.config.arch));

        let registry = ghcr::Registry::new(client);
        let limiter = WarnLimiter::new(MAX_WARNINGS);
        let mut out = BufWriter::new(
            File::create(&json_path)
                .with_context(|| format!("Failed to create {:?}", json_path))?,
        );
        out.write_all(b"[\n")?;

        let mut written = 0usize;
        for (i, pkg) in packages.iter().enumerate() {
            if i % 100 == 0 {
                info!("Progress: {}/{} packages", i, packages.len());
            }

            let entry = match self.fetch_entry(&registry, pkg).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(err) => {
                    if limiter.note() {
                        warn!("Failed to process {}: {:#}", pkg, err);
                    }
                    continue;
                }
            };

            if written > 0 {
                out.write_all(b",\n")?;
            }
            serde_json::to_writer(&mut out, &entry)?;
            written += 1;
        }

        out.write_all(b"\n]\n")?;
        out.flush()?;
        info!(
            "Wrote {} records to {:?} ({} failures)",
            written,
            json_path,
            limiter.total()
        );

        let db_path = data_dir.join(format!("{}.db", self.config.arch));
        formats::json_to_db(&json_path, &db_path)?;

        formats::generate_variants(&json_path).await?;
        formats::generate_variants(&db_path).await?;

        info!(
            "Catalogue generation complete for {} ({})",
            class, self.config.arch
        );
        Ok(())
    }

    async fn fetch_entry(
        &self,
        registry: &ghcr::Registry,
        pkg: &str,
    ) -> Result<Option<CatalogEntry>> {
        let tags = registry.list_tags(pkg).await?;
        let Some(tag) = ghcr::select_tag(&tags, &self.config.arch) else {
            debug!("No tag for {} on {}", pkg, self.config.arch);
            return Ok(None);
        };
        registry.manifest_entry(pkg, &tag).await
    }
}

#[derive(Serialize)]
struct IndexBuild {
    id: i64,
    pkg_name: String,
    pkg_id: String,
    arch: String,
    recipe_path: String,
    created_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_log_url: Option<String>,
}

impl From<&Build> for IndexBuild {
    fn from(build: &Build) -> IndexBuild {
        IndexBuild {
            id: build.id,
            pkg_name: build.pkg_name.clone(),
            pkg_id: build.pkg_id.clone(),
            arch: build.arch.clone(),
            recipe_path: build.recipe_path.clone(),
            created_at: build.created_at,
            started_at: build.started_at,
            completed_at: build.completed_at,
            duration_seconds: build.duration_seconds,
            build_log_url: build.build_log_url.clone(),
        }
    }
}

/// Export `INDEX.json` and `stats.json` from the queue itself.
pub fn write_index(connection: &mut SqliteConnection, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir).context("Failed to create output directory")?;

    let stats = Build::stats(connection)?;
    let successful = Build::list(Some(BuildStatus::Succeeded), None, connection)?;

    let index = serde_json::json!({
        "version": "1.0.0",
        "generated_at": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "statistics": stats,
        "builds": successful.iter().map(IndexBuild::from).collect::<Vec<_>>(),
    });

    let index_path = output_dir.join("INDEX.json");
    fs::write(&index_path, serde_json::to_vec_pretty(&index)?)
        .with_context(|| format!("Failed to write {:?}", index_path))?;
    info!("Generated {:?}", index_path);

    let stats_path = output_dir.join("stats.json");
    fs::write(&stats_path, serde_json::to_vec_pretty(&stats)?)
        .with_context(|| format!("Failed to write {:?}", stats_path))?;
    info!("Generated {:?}", stats_path);

    Ok(())
}
