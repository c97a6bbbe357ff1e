use crate::models::Build;
use chrono::prelude::*;
use chrono::SecondsFormat;
use forgectl_common::errors::*;
use forgectl_common::{PackageInfo, RecipeHeader};
use std::fs;
use std::path::Path;

/// Merge package metadata from its three sources. The recipe header supplies
/// defaults, a `*.version` file fills a missing version, and the build
/// driver's own metadata JSON overrides whatever it carries. Checksums,
/// sizes, UI fields and upstream-only arrays exist only in the JSON layer.
pub fn collect(build: &Build, recipe_path: &Path, pkg_dir: &Path) -> Result<PackageInfo> {
    let mut pkg_info = PackageInfo {
        pkg_name: build.pkg_name.clone(),
        build_date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ..Default::default()
    };

    apply_recipe_header(&mut pkg_info, recipe_path);
    apply_version_file(&mut pkg_info, pkg_dir)?;
    apply_driver_metadata(&mut pkg_info, pkg_dir)?;

    if pkg_info.pkg_family.is_empty() {
        pkg_info.pkg_family = family_from_recipe_path(&build.recipe_path);
    }

    Ok(pkg_info)
}

fn set_if_empty(field: &mut String, value: Option<String>) {
    if field.is_empty() {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            *field = value;
        }
    }
}

fn set_if_non_empty(field: &mut String, value: &str) {
    if !value.is_empty() {
        *field = value.to_string();
    }
}

fn apply_recipe_header(pkg_info: &mut PackageInfo, recipe_path: &Path) {
    let content = match fs::read_to_string(recipe_path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read recipe {:?}: {:#}", recipe_path, err);
            return;
        }
    };
    let header = match serde_yaml::from_str::<RecipeHeader>(&content) {
        Ok(header) => header,
        Err(err) => {
            warn!("Failed to parse recipe {:?}: {:#}", recipe_path, err);
            return;
        }
    };

    set_if_empty(&mut pkg_info.pkg, header.pkg);
    set_if_empty(&mut pkg_info.pkg_family, header.pkg_family);
    set_if_empty(&mut pkg_info.pkg_id, header.pkg_id);
    set_if_empty(&mut pkg_info.version, header.version);
    set_if_empty(&mut pkg_info.version_upstream, header.version_upstream);
    set_if_empty(&mut pkg_info.description, header.description);
    if pkg_info.homepage.is_none() {
        pkg_info.homepage = header.homepage;
    }
    if pkg_info.src_url.is_none() {
        pkg_info.src_url = header.src_url;
    }
    if pkg_info.provides.is_empty() {
        pkg_info.provides = header.provides;
    }
    if pkg_info.category.is_none() {
        pkg_info.category = header.category;
    }
    if pkg_info.license.is_none() {
        pkg_info.license = header.license;
    }
    if pkg_info.maintainer.is_none() {
        pkg_info.maintainer = header.maintainer;
    }
    if pkg_info.note.is_none() {
        pkg_info.note = header.note;
    }
    if pkg_info.tag.is_none() {
        pkg_info.tag = header.tag;
    }
}

fn apply_version_file(pkg_info: &mut PackageInfo, pkg_dir: &Path) -> Result<()> {
    if !pkg_info.version.is_empty() {
        return Ok(());
    }

    for entry in fs::read_dir(pkg_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("version") {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read version file {:?}", path))?;
        let version = content.trim();
        if !version.is_empty() {
            pkg_info.version = version.to_string();
            return Ok(());
        }
    }

    Ok(())
}

pub(crate) fn is_driver_metadata(name: &str) -> bool {
    name.ends_with(".json") && !name.ends_with(".sig.json")
}

fn apply_driver_metadata(pkg_info: &mut PackageInfo, pkg_dir: &Path) -> Result<()> {
    let mut json_files = Vec::new();
    for entry in fs::read_dir(pkg_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_driver_metadata(name) {
                json_files.push(entry.path());
            }
        }
    }
    json_files.sort();

    for path in json_files {
        let Ok(data) = fs::read(&path) else {
            continue;
        };
        let Ok(layer) = serde_json::from_slice::<PackageInfo>(&data) else {
            continue;
        };

        merge_json_layer(pkg_info, layer);
        // first valid metadata JSON wins
        return Ok(());
    }

    Ok(())
}

fn merge_json_layer(pkg_info: &mut PackageInfo, layer: PackageInfo) {
    set_if_non_empty(&mut pkg_info.pkg, &layer.pkg);
    set_if_non_empty(&mut pkg_info.pkg_name, &layer.pkg_name);
    set_if_non_empty(&mut pkg_info.pkg_family, &layer.pkg_family);
    set_if_non_empty(&mut pkg_info.pkg_id, &layer.pkg_id);
    set_if_non_empty(&mut pkg_info.version, &layer.version);
    set_if_non_empty(&mut pkg_info.version_upstream, &layer.version_upstream);
    set_if_non_empty(&mut pkg_info.description, &layer.description);
    if layer.homepage.is_some() {
        pkg_info.homepage = layer.homepage;
    }
    if layer.src_url.is_some() {
        pkg_info.src_url = layer.src_url;
    }
    if !layer.provides.is_empty() {
        pkg_info.provides = layer.provides;
    }
    if layer.category.is_some() {
        pkg_info.category = layer.category;
    }
    if layer.license.is_some() {
        pkg_info.license = layer.license;
    }
    if layer.maintainer.is_some() {
        pkg_info.maintainer = layer.maintainer;
    }
    if layer.note.is_some() {
        pkg_info.note = layer.note;
    }
    if layer.tag.is_some() {
        pkg_info.tag = layer.tag;
    }

    // these only ever come from the driver's metadata
    pkg_info.repology = layer.repology.or(pkg_info.repology.take());
    pkg_info.screenshots = layer.screenshots.or(pkg_info.screenshots.take());
    set_if_non_empty(&mut pkg_info.icon, &layer.icon);
    set_if_non_empty(&mut pkg_info.desktop, &layer.desktop);
    set_if_non_empty(&mut pkg_info.app_id, &layer.app_id);
    set_if_non_empty(&mut pkg_info.appstream, &layer.appstream);
    set_if_non_empty(&mut pkg_info.rank, &layer.rank);
    set_if_non_empty(&mut pkg_info.disabled, &layer.disabled);
    set_if_non_empty(&mut pkg_info.bsum, &layer.bsum);
    set_if_non_empty(&mut pkg_info.shasum, &layer.shasum);
    set_if_non_empty(&mut pkg_info.size, &layer.size);
    if layer.size_raw > 0 {
        pkg_info.size_raw = layer.size_raw;
    }
    set_if_non_empty(&mut pkg_info.build_date, &layer.build_date);
}

fn family_from_recipe_path(recipe_path: &str) -> String {
    let path = Path::new(recipe_path);
    if let Some(parent) = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
        if !parent.is_empty() && parent != "binaries" && parent != "packages" {
            return parent.to_string();
        }
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
