use crate::config::*;
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumString};

pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Building,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Cancelled)
    }

    /// The queue state machine: queued -> building|cancelled,
    /// building -> succeeded|failed|cancelled, terminals absorbing.
    pub fn can_transition_to(self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::Queued, BuildStatus::Building)
                | (BuildStatus::Queued, BuildStatus::Cancelled)
                | (BuildStatus::Building, BuildStatus::Succeeded)
                | (BuildStatus::Building, BuildStatus::Failed)
                | (BuildStatus::Building, BuildStatus::Cancelled)
        )
    }

    pub fn fancy(&self) -> String {
        match self {
            BuildStatus::Queued => "QUEUED   ".yellow().to_string(),
            BuildStatus::Building => "BUILDING ".blue().to_string(),
            BuildStatus::Succeeded => "SUCCEEDED".green().to_string(),
            BuildStatus::Failed => "FAILED   ".red().to_string(),
            BuildStatus::Cancelled => "CANCELLED".bright_black().to_string(),
        }
    }
}

/// Which recipe tree a recipe was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Binaries,
    Packages,
}

/// Registry namespace a build is published under, derived from the recipe path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepoClass {
    Bincache,
    Pkgcache,
}

impl RepoClass {
    pub fn from_recipe_path(recipe_path: &str) -> RepoClass {
        if recipe_path.contains("binaries/") {
            RepoClass::Bincache
        } else if recipe_path.contains("packages/") {
            RepoClass::Pkgcache
        } else {
            RepoClass::Bincache
        }
    }

    pub fn sbuild_list_urls(self) -> (&'static str, &'static str) {
        match self {
            RepoClass::Bincache => (BINCACHE_SBUILD_LIST_URL, BINCACHE_SBUILD_LIST_FALLBACK_URL),
            RepoClass::Pkgcache => (PKGCACHE_SBUILD_LIST_URL, PKGCACHE_SBUILD_LIST_FALLBACK_URL),
        }
    }
}

/// A field that upstream metadata may express as either a scalar or a
/// sequence. The original shape is preserved through parse and re-serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        match self {
            OneOrMany::One(s) if !s.is_empty() => Some(s),
            OneOrMany::One(_) => None,
            OneOrMany::Many(v) => v.iter().map(String::as_str).find(|s| !s.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}

impl From<&str> for OneOrMany {
    fn from(s: &str) -> OneOrMany {
        OneOrMany::One(s.to_string())
    }
}

/// The recognized top-level scalars of a recipe file. Unknown keys are
/// ignored by serde.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RecipeHeader {
    pub pkg: Option<String>,
    pub pkg_name: Option<String>,
    pub pkg_family: Option<String>,
    pub pkg_id: Option<String>,
    pub version: Option<String>,
    pub version_upstream: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<OneOrMany>,
    pub src_url: Option<OneOrMany>,
    #[serde(default)]
    pub provides: Vec<String>,
    pub category: Option<OneOrMany>,
    pub license: Option<OneOrMany>,
    pub maintainer: Option<OneOrMany>,
    pub note: Option<OneOrMany>,
    pub tag: Option<OneOrMany>,
}

/// A recipe record as emitted by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub pkg_id: String,
    pub name: String,
    pub family: String,
    pub category: Category,
    pub version: String,
    pub description: String,
    pub homepage: String,
    pub src_url: String,
    pub provides: Vec<String>,
    pub build_type: String,
    /// Repository-relative path to the recipe file.
    pub build_script: String,
    #[serde(skip)]
    pub file_path: PathBuf,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Merged per-upload package metadata. Constructed from the recipe header,
/// any `*.version` file and any driver-emitted metadata JSON, then discarded
/// after the publish operation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg_family: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pkg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_upstream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_url: Option<OneOrMany>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repology: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshots: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desktop: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub appstream: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bsum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shasum: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_raw: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rank: String,
    #[serde(rename = "_disabled", default, skip_serializing_if = "String::is_empty")]
    pub disabled: String,
}

/// Build queue statistics.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_builds: i64,
    pub queued: i64,
    pub building: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub avg_duration_seconds: f64,
    pub success_rate_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_text() {
        for status in [
            BuildStatus::Queued,
            BuildStatus::Building,
            BuildStatus::Succeeded,
            BuildStatus::Failed,
            BuildStatus::Cancelled,
        ] {
            let text = status.to_string();
            assert_eq!(text.parse::<BuildStatus>().unwrap(), status);
        }
        assert_eq!("queued".parse::<BuildStatus>().unwrap(), BuildStatus::Queued);
        assert!("bogus".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn status_transitions_follow_state_machine() {
        use BuildStatus::*;

        assert!(Queued.can_transition_to(Building));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Queued.can_transition_to(Failed));

        assert!(Building.can_transition_to(Succeeded));
        assert!(Building.can_transition_to(Failed));
        assert!(Building.can_transition_to(Cancelled));
        assert!(!Building.can_transition_to(Queued));

        for terminal in [Succeeded, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Building, Succeeded, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn repo_class_from_recipe_path() {
        assert_eq!(RepoClass::from_recipe_path("binaries/btop/static.yaml"), RepoClass::Bincache);
        assert_eq!(RepoClass::from_recipe_path("packages/firefox/appimage.yaml"), RepoClass::Pkgcache);
        assert_eq!(RepoClass::from_recipe_path("misc/foo.yaml"), RepoClass::Bincache);
    }

    #[test]
    fn one_or_many_preserves_shape() {
        let one: OneOrMany = serde_json::from_str("\"https://example.com\"").unwrap();
        assert_eq!(one, OneOrMany::One("https://example.com".to_string()));
        assert_eq!(serde_json::to_string(&one).unwrap(), "\"https://example.com\"");

        let many: OneOrMany = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(many, OneOrMany::Many(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(serde_json::to_string(&many).unwrap(), "[\"a\",\"b\"]");
    }

    #[test]
    fn package_info_drops_empty_fields() {
        let info = PackageInfo {
            pkg: "btop".to_string(),
            version: "1.4.0".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["pkg"], "btop");
        assert!(json.get("description").is_none());
        assert!(json.get("size_raw").is_none());
        // provides is schema-stable and survives even when empty
        assert!(json["provides"].as_array().unwrap().is_empty());
    }
}
