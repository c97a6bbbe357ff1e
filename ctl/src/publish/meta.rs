use crate::models::Build;
use crate::publish::ImageRef;
use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::PackageInfo;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

/// Keys that stay in the document even when empty so downstream consumers
/// can rely on the schema.
const ALWAYS_KEEP: &[&str] = &["_disabled", "rank", "snapshots", "provides"];

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_i64() == Some(0),
        _ => false,
    }
}

/// Assemble the per-target metadata document: the merged package info plus
/// every URL a consumer may want to derive from the registry coordinates.
pub fn target_metadata(pkg_info: &PackageInfo, build: &Build, target: &str) -> Map<String, Value> {
    let image = ImageRef::new(build, pkg_info, target);

    let mut doc = Map::new();
    let mut put = |key: &str, value: Value| {
        doc.insert(key.to_string(), value);
    };

    put("_disabled", json!(pkg_info.disabled));
    put("host", json!(build.arch));
    put("rank", json!(pkg_info.rank));
    put("pkg", json!(pkg_info.pkg));
    put("pkg_family", json!(pkg_info.pkg_family));
    put("pkg_id", json!(pkg_info.pkg_id));
    put("pkg_name", json!(target));
    put("pkg_type", json!(utils::build_type(&build.recipe_path)));
    put("pkg_webpage", json!(image.webpage()));
    put("app_id", json!(pkg_info.app_id));
    put("appstream", json!(pkg_info.appstream));
    put("category", json!(pkg_info.category));
    put("description", json!(pkg_info.description));
    put("desktop", json!(pkg_info.desktop));
    put("homepage", json!(pkg_info.homepage));
    put("icon", json!(pkg_info.icon));
    put("license", json!(pkg_info.license));
    put("maintainer", json!(pkg_info.maintainer));
    put("provides", json!(pkg_info.provides));
    put("note", json!(pkg_info.note));
    put("repology", json!(pkg_info.repology));
    put("screenshots", json!(pkg_info.screenshots));
    put("src_url", json!(pkg_info.src_url));
    put("tag", json!(pkg_info.tag));
    put("version", json!(pkg_info.version));
    put("version_upstream", json!(pkg_info.version_upstream));
    put("bsum", json!(pkg_info.bsum));
    put("build_date", json!(pkg_info.build_date));
    if build.id > 0 {
        put("build_gha", json!(image.pipeline_run_url(build.id)));
    }
    put("build_id", json!(build.id.to_string()));
    put("build_log", json!(image.build_log_url(target)));
    put("build_script", json!(build.recipe_path));
    put("download_url", json!(image.download_url(target)));
    put("ghcr_pkg", json!(image.ghcr_pkg()));
    put("ghcr_url", json!(image.ghcr_url()));
    put("manifest_url", json!(image.manifest_url()));
    put("shasum", json!(pkg_info.shasum));
    put("size", json!(pkg_info.size));
    put("size_raw", json!(pkg_info.size_raw));
    put("snapshots", json!([]));

    // drop empties, keeping the schema-stable keys
    doc.into_iter()
        .filter(|(key, value)| {
            ALWAYS_KEEP.contains(&key.as_str()) || !is_empty_value(value)
        })
        .collect()
}

/// Write one `<target>.json` per upload target unless the build driver
/// already emitted its own metadata JSON.
pub fn generate_metadata(
    pkg_info: &PackageInfo,
    build: &Build,
    pkg_dir: &Path,
    targets: &[String],
) -> Result<()> {
    for entry in fs::read_dir(pkg_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if super::info::is_driver_metadata(name) {
                debug!("Driver metadata {} already present, skipping generation", name);
                return Ok(());
            }
        }
    }

    for target in targets {
        let doc = target_metadata(pkg_info, build, target);
        let path = pkg_dir.join(format!("{}.json", target));
        let data = serde_json::to_vec_pretty(&Value::Object(doc))?;
        fs::write(&path, data)
            .with_context(|| format!("Failed to write metadata JSON {:?}", path))?;
        info!("Generated metadata JSON: {}.json", target);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::prelude::*;
    use forgectl_common::{BuildStatus, OneOrMany};
    use tempfile::TempDir;

    fn dummy_build() -> Build {
        Build {
            id: 42,
            pkg_name: "a-utils".to_string(),
            pkg_id: "github.com.xplshn.a-utils".to_string(),
            recipe_path: "binaries/a-utils/static.official.yaml".to_string(),
            status: BuildStatus::Building.to_string(),
            priority: 10,
            arch: "x86_64-Linux".to_string(),
            force_build: false,
            created_at: Utc::now().naive_utc(),
            started_at: Some(Utc::now().naive_utc()),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
            build_log_url: None,
        }
    }

    fn dummy_info() -> PackageInfo {
        PackageInfo {
            pkg: "a-utils.static".to_string(),
            pkg_family: "a-utils".to_string(),
            pkg_id: "github.com.xplshn.a-utils".to_string(),
            version: "1.0".to_string(),
            description: "Core utilities".to_string(),
            homepage: Some(OneOrMany::One("https://example.com".to_string())),
            provides: vec!["cal".to_string(), "printf".to_string()],
            build_date: "2026-08-02T00:00:00Z".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_fields_are_dropped_except_schema_stable_ones() {
        let doc = target_metadata(&dummy_info(), &dummy_build(), "cal");

        assert!(doc.contains_key("_disabled"));
        assert!(doc.contains_key("rank"));
        assert!(doc.contains_key("snapshots"));
        assert!(doc.contains_key("provides"));

        // empty scalars vanish
        assert!(!doc.contains_key("icon"));
        assert!(!doc.contains_key("shasum"));
        assert!(!doc.contains_key("size_raw"));
    }

    #[test]
    fn derived_urls_point_at_the_variant() {
        let doc = target_metadata(&dummy_info(), &dummy_build(), "cal");

        assert_eq!(doc["pkg_name"], "cal");
        assert_eq!(doc["pkg_type"], "static/official");
        assert_eq!(
            doc["ghcr_pkg"],
            "ghcr.io/pkgforge/bincache/a-utils/static/official/cal:1.0-x86_64-linux"
        );
        assert_eq!(doc["build_id"], "42");
        assert_eq!(
            doc["build_gha"],
            "https://github.com/pkgforge/bincache/actions/runs/42"
        );
        assert!(doc["build_log"].as_str().unwrap().ends_with("&download=cal.log"));
        assert_eq!(doc["snapshots"], json!([]));
    }

    #[test]
    fn polymorphic_fields_keep_their_shape() {
        let mut pkg_info = dummy_info();
        pkg_info.license = Some(OneOrMany::Many(vec!["MIT".to_string(), "Apache-2.0".to_string()]));

        let doc = target_metadata(&pkg_info, &dummy_build(), "cal");
        assert_eq!(doc["homepage"], "https://example.com");
        assert_eq!(doc["license"], json!(["MIT", "Apache-2.0"]));
    }

    #[test]
    fn one_json_per_target_is_generated() {
        let tmp = TempDir::new().unwrap();
        let targets = vec!["cal".to_string(), "printf".to_string()];

        generate_metadata(&dummy_info(), &dummy_build(), tmp.path(), &targets).unwrap();

        assert!(tmp.path().join("cal.json").is_file());
        assert!(tmp.path().join("printf.json").is_file());

        let parsed: serde_json::Value =
            serde_json::from_slice(&fs::read(tmp.path().join("printf.json")).unwrap()).unwrap();
        assert_eq!(parsed["pkg_name"], "printf");
    }

    #[test]
    fn driver_metadata_suppresses_generation() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a-utils.json"), "{}").unwrap();

        let targets = vec!["cal".to_string()];
        generate_metadata(&dummy_info(), &dummy_build(), tmp.path(), &targets).unwrap();
        assert!(!tmp.path().join("cal.json").exists());
    }
}
