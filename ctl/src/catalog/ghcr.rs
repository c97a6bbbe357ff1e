use crate::catalog::{fetch, CatalogEntry};
use forgectl_common::auth;
use forgectl_common::config::{GITHUB_GRAPHQL_URL, REGISTRY_HOST, REGISTRY_ORG};
use forgectl_common::errors::*;
use forgectl_common::http::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time;

/// Manifest annotation the publisher embeds the metadata document under.
pub const SOAR_JSON_ANNOTATION: &str = "dev.pkgforge.soar.json";

const GRAPHQL_PAGE_SIZE: u32 = 100;
const TAGS_PAGE_SIZE: usize = 1000;

const GRAPHQL_QUERY: &str = "
query($org: String!, $cursor: String, $perPage: Int!) {
  organization(login: $org) {
    packages(first: $perPage, after: $cursor, packageType: CONTAINER) {
      pageInfo {
        hasNextPage
        endCursor
      }
      nodes {
        name
        visibility
        updatedAt
      }
    }
  }
}";

#[derive(Debug, Clone, Deserialize)]
pub struct GhcrPackage {
    pub name: String,
    pub visibility: String,
    #[serde(default, rename = "updatedAt")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    organization: Option<GraphQlOrganization>,
}

#[derive(Debug, Deserialize)]
struct GraphQlOrganization {
    packages: GraphQlPackages,
}

#[derive(Debug, Deserialize)]
struct GraphQlPackages {
    #[serde(rename = "pageInfo")]
    page_info: GraphQlPageInfo,
    nodes: Vec<GhcrPackage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlPageInfo {
    #[serde(rename = "hasNextPage")]
    has_next_page: bool,
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
}

/// Enumerate the organization's container packages through the paginated
/// graph endpoint. This sidesteps the enumeration cap of the REST listing.
pub async fn fetch_org_packages(client: &Client) -> Result<Vec<GhcrPackage>> {
    let token = auth::find_registry_token()
        .context("A registry token is required to enumerate org packages")?;

    let mut packages = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page = 0u32;

    loop {
        page += 1;
        let body = json!({
            "query": GRAPHQL_QUERY,
            "variables": {
                "org": REGISTRY_ORG,
                "perPage": GRAPHQL_PAGE_SIZE,
                "cursor": cursor,
            },
        });

        let response = post_graphql_with_retry(client, &token, &body).await?;
        if !response.errors.is_empty() {
            bail!(
                "GraphQL errors: {}",
                response
                    .errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }

        let Some(organization) = response.data.and_then(|d| d.organization) else {
            bail!("GraphQL response carries no organization data");
        };

        packages.extend(organization.packages.nodes);
        debug!("Fetched page {} ({} packages so far)", page, packages.len());

        if !organization.packages.page_info.has_next_page {
            break;
        }
        cursor = organization.packages.page_info.end_cursor;

        // stay friendly with the rate limiter
        time::sleep(Duration::from_millis(100)).await;
    }

    info!("Fetched {} org packages across {} pages", packages.len(), page);
    Ok(packages)
}

async fn post_graphql_with_retry(
    client: &Client,
    token: &str,
    body: &serde_json::Value,
) -> Result<GraphQlResponse> {
    let mut last_err = None;

    for attempt in 1..=fetch::MAX_ATTEMPTS {
        let result = client
            .post(GITHUB_GRAPHQL_URL)
            .header("Authorization", format!("bearer {}", token))
            .json(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json::<GraphQlResponse>().await.map_err(Error::from);
                }
                if status.is_server_error() && attempt < fetch::MAX_ATTEMPTS {
                    debug!(
                        "Server error {} from graph endpoint, retrying (attempt {}/{})",
                        status, attempt, fetch::MAX_ATTEMPTS
                    );
                    time::sleep(Duration::from_secs(u64::from(attempt) * 3)).await;
                    last_err = Some(anyhow!("graph endpoint returned status {}", status));
                    continue;
                }
                bail!("graph endpoint returned status {}", status);
            }
            Err(err) => {
                last_err = Some(Error::from(err));
                if attempt < fetch::MAX_ATTEMPTS {
                    time::sleep(Duration::from_secs(u64::from(attempt) * 2)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("graph endpoint request failed")))
}

/// Read access to the container registry itself.
pub struct Registry {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Registry {
    pub fn new(client: Client) -> Registry {
        Registry { client }
    }

    async fn pull_token(&self, pkg: &str) -> Result<String> {
        let url = format!(
            "https://{}/token?scope=repository:{}/{}:pull",
            REGISTRY_HOST, REGISTRY_ORG, pkg
        );
        let body = fetch::get_with_retry(&self.client, &url, None, None).await?;
        let response = serde_json::from_slice::<TokenResponse>(&body)
            .context("Failed to parse registry token response")?;
        Ok(response.token)
    }

    pub async fn list_tags(&self, pkg: &str) -> Result<Vec<String>> {
        let token = self.pull_token(pkg).await?;

        let mut tags = Vec::new();
        let mut last: Option<String> = None;
        loop {
            let mut url = format!(
                "https://{}/v2/{}/{}/tags/list?n={}",
                REGISTRY_HOST, REGISTRY_ORG, pkg, TAGS_PAGE_SIZE
            );
            if let Some(last) = &last {
                url.push_str(&format!("&last={}", last));
            }

            let body = fetch::get_with_retry(&self.client, &url, Some(&token), None).await?;
            let page = serde_json::from_slice::<TagList>(&body)
                .context("Failed to parse tag list")?
                .tags
                .unwrap_or_default();

            let full_page = page.len() == TAGS_PAGE_SIZE;
            last = page.last().cloned();
            tags.extend(page);

            if !full_page || last.is_none() {
                break;
            }
        }

        Ok(tags)
    }

    /// Fetch the manifest for one tag and rehydrate the catalogue record
    /// from its metadata annotation. Absent or unparseable annotations yield
    /// `None`, the package is simply skipped.
    pub async fn manifest_entry(&self, pkg: &str, tag: &str) -> Result<Option<CatalogEntry>> {
        let token = self.pull_token(pkg).await?;
        let url = format!(
            "https://{}/v2/{}/{}/manifests/{}",
            REGISTRY_HOST, REGISTRY_ORG, pkg, tag
        );
        let accept = "application/vnd.oci.image.manifest.v1+json";

        let body = fetch::get_with_retry(&self.client, &url, Some(&token), Some(accept)).await?;
        let manifest = serde_json::from_slice::<serde_json::Value>(&body)
            .context("Failed to parse manifest")?;

        let Some(doc) = manifest
            .get("annotations")
            .and_then(|a| a.get(SOAR_JSON_ANNOTATION))
            .and_then(|v| v.as_str())
        else {
            return Ok(None);
        };

        match serde_json::from_str::<CatalogEntry>(doc) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                debug!("Unparseable {} annotation on {}:{}: {:#}", SOAR_JSON_ANNOTATION, pkg, tag, err);
                Ok(None)
            }
        }
    }
}

/// Pick the tag to catalogue for an architecture: it must mention the
/// architecture, must not be a source build, and the lexically greatest
/// match wins (registry tag listings are ordered, so the newest version
/// sorts last).
pub fn select_tag(tags: &[String], arch: &str) -> Option<String> {
    let arch = arch.to_lowercase();
    tags.iter()
        .filter(|tag| {
            let tag = tag.to_lowercase();
            tag.contains(&arch) && !tag.contains("srcbuild")
        })
        .max()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn select_tag_matches_architecture_case_insensitively() {
        let tags = tags(&["1.0-x86_64-linux", "1.0-aarch64-linux"]);
        assert_eq!(
            select_tag(&tags, "x86_64-Linux").as_deref(),
            Some("1.0-x86_64-linux")
        );
        assert_eq!(select_tag(&tags, "riscv64-Linux"), None);
    }

    #[test]
    fn select_tag_skips_source_builds() {
        let tags = tags(&["1.0-x86_64-linux-srcbuild", "0.9-x86_64-linux"]);
        assert_eq!(
            select_tag(&tags, "x86_64-Linux").as_deref(),
            Some("0.9-x86_64-linux")
        );
    }

    #[test]
    fn select_tag_prefers_the_newest_match() {
        let tags = tags(&["1.0-x86_64-linux", "1.2-x86_64-linux", "1.10-aarch64-linux"]);
        assert_eq!(
            select_tag(&tags, "x86_64-Linux").as_deref(),
            Some("1.2-x86_64-linux")
        );
    }

    #[test]
    fn annotation_document_rehydrates_catalog_entries() {
        let doc = r#"{
            "pkg": "cal",
            "pkg_id": "github.com.xplshn.a-utils",
            "version": "1.0",
            "description": "Calendar",
            "homepage": ["https://example.com"],
            "provides": ["cal", "printf"],
            "ghcr_pkg": "ghcr.io/pkgforge/bincache/a-utils/official/cal:1.0-x86_64-linux",
            "pkg_webpage": "https://pkgs.pkgforge.dev/repo/bincache/x86_64-linux/a-utils/cal"
        }"#;

        let entry = serde_json::from_str::<CatalogEntry>(doc).unwrap();
        assert_eq!(entry.pkg, "cal");
        assert_eq!(entry.provides_pkg, vec!["cal", "printf"]);
        assert_eq!(
            entry.web_url,
            "https://pkgs.pkgforge.dev/repo/bincache/x86_64-linux/a-utils/cal"
        );
    }
}
