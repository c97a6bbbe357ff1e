use crate::catalog::CatalogEntry;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use forgectl_common::errors::*;
use forgectl_common::utils;
use forgectl_common::OneOrMany;
use std::fs;
use std::path::Path;
use tokio::process::Command;

diesel::table! {
    packages (pkg) {
        pkg -> Text,
        pkg_id -> Text,
        description -> Text,
        version -> Text,
        size -> Text,
        bsum -> Text,
        shasum -> Text,
        build_date -> Text,
        build_id -> Text,
        build_script -> Text,
        category -> Text,
        checksum -> Text,
        download_url -> Text,
        ghcr_pkg -> Text,
        homepage -> Text,
        icon -> Text,
        license -> Text,
        maintainer -> Text,
        note -> Text,
        provides_pkg -> Text,
        repology -> Text,
        src_url -> Text,
        tag -> Text,
        web_url -> Text,
    }
}

const PACKAGES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packages (
    pkg TEXT PRIMARY KEY,
    pkg_id TEXT,
    description TEXT,
    version TEXT,
    size TEXT,
    bsum TEXT,
    shasum TEXT,
    build_date TEXT,
    build_id TEXT,
    build_script TEXT,
    category TEXT,
    checksum TEXT,
    download_url TEXT,
    ghcr_pkg TEXT,
    homepage TEXT,
    icon TEXT,
    license TEXT,
    maintainer TEXT,
    note TEXT,
    provides_pkg TEXT,
    repology TEXT,
    src_url TEXT,
    tag TEXT,
    web_url TEXT
);
CREATE INDEX IF NOT EXISTS idx_pkg_id ON packages(pkg_id);
CREATE INDEX IF NOT EXISTS idx_ghcr_pkg ON packages(ghcr_pkg);
";

#[derive(Insertable, Queryable, Debug, Clone, PartialEq)]
#[diesel(table_name = packages)]
struct PackageRow {
    pkg: String,
    pkg_id: String,
    description: String,
    version: String,
    size: String,
    bsum: String,
    shasum: String,
    build_date: String,
    build_id: String,
    build_script: String,
    category: String,
    checksum: String,
    download_url: String,
    ghcr_pkg: String,
    homepage: String,
    icon: String,
    license: String,
    maintainer: String,
    note: String,
    provides_pkg: String,
    repology: String,
    src_url: String,
    tag: String,
    web_url: String,
}

fn encode(field: &Option<OneOrMany>) -> String {
    field
        .as_ref()
        .and_then(|f| serde_json::to_string(f).ok())
        .unwrap_or_default()
}

impl From<&CatalogEntry> for PackageRow {
    fn from(entry: &CatalogEntry) -> PackageRow {
        PackageRow {
            pkg: entry.pkg.clone(),
            pkg_id: entry.pkg_id.clone(),
            description: entry.description.clone(),
            version: entry.version.clone(),
            size: entry.size.clone(),
            bsum: entry.bsum.clone(),
            shasum: entry.shasum.clone(),
            build_date: entry.build_date.clone(),
            build_id: entry.build_id.clone(),
            build_script: entry.build_script.clone(),
            category: encode(&entry.category),
            checksum: if entry.checksum.is_empty() {
                entry.shasum.clone()
            } else {
                entry.checksum.clone()
            },
            download_url: entry.download_url.clone(),
            ghcr_pkg: entry.ghcr_pkg.clone(),
            homepage: encode(&entry.homepage),
            icon: entry.icon.clone(),
            license: encode(&entry.license),
            maintainer: encode(&entry.maintainer),
            note: encode(&entry.note),
            provides_pkg: serde_json::to_string(&entry.provides_pkg).unwrap_or_default(),
            repology: encode(&entry.repology),
            src_url: encode(&entry.src_url),
            tag: encode(&entry.tag),
            web_url: entry.web_url.clone(),
        }
    }
}

/// Convert the streamed JSON catalogue into an indexed SQLite database.
/// Array-typed source fields are stored as JSON-encoded strings.
pub fn json_to_db(json_path: &Path, db_path: &Path) -> Result<usize> {
    info!("Converting {:?} to SQLite", json_path);

    let data = fs::read(json_path).context("Failed to read catalogue JSON")?;
    let entries =
        serde_json::from_slice::<Vec<CatalogEntry>>(&data).context("Failed to parse catalogue JSON")?;

    if db_path.exists() {
        fs::remove_file(db_path).context("Failed to remove stale database")?;
    }

    let db_url = db_path
        .to_str()
        .ok_or_else(|| format_err!("Database path contains invalid characters"))?;
    let mut connection = SqliteConnection::establish(db_url)
        .with_context(|| format!("Failed to create database {:?}", db_path))?;
    connection
        .batch_execute(PACKAGES_SCHEMA)
        .context("Failed to create packages schema")?;

    let rows = entries.iter().map(PackageRow::from).collect::<Vec<_>>();
    for chunk in rows.chunks(100) {
        diesel::replace_into(packages::table)
            .values(chunk)
            .execute(&mut connection)?;
    }

    connection
        .batch_execute("VACUUM")
        .context("Failed to vacuum database")?;

    info!("Inserted {} packages into {:?}", rows.len(), db_path);
    Ok(rows.len())
}

/// Produce the compressed siblings and content digests for one artifact:
/// `<file>.xz`, `<file>.zstd` and a `.bsum` per file when the digest tool is
/// around.
pub async fn generate_variants(path: &Path) -> Result<()> {
    let xz_path = sibling(path, "xz");
    let zstd_path = sibling(path, "zstd");

    info!("Generating {:?}", xz_path);
    run_tool("xz", &["-9", "-f", "-k", &path_str(path)?]).await?;

    info!("Generating {:?}", zstd_path);
    run_tool(
        "zstd",
        &["-19", "-q", "-f", &path_str(path)?, "-o", &path_str(&zstd_path)?],
    )
    .await?;

    for file in [path, xz_path.as_path(), zstd_path.as_path()] {
        digest(file).await;
    }

    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", suffix));
    std::path::PathBuf::from(name)
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| format_err!("Path contains invalid characters: {:?}", path))
}

async fn run_tool(name: &str, args: &[&str]) -> Result<()> {
    let tool = utils::find_tool(name)?;
    let status = Command::new(&tool)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to spawn {:?}", tool))?;
    if !status.success() {
        bail!("{} exited with {}", name, status);
    }
    Ok(())
}

/// Content digest is best effort, a missing digest tool only warns.
async fn digest(path: &Path) {
    let b3sum = match utils::find_tool("b3sum") {
        Ok(b3sum) => b3sum,
        Err(err) => {
            warn!("Skipping digest for {:?}: {:#}", path, err);
            return;
        }
    };

    let output = match Command::new(&b3sum).arg(path).output().await {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!("b3sum exited with {} for {:?}", output.status, path);
            return;
        }
        Err(err) => {
            warn!("Failed to run b3sum for {:?}: {:#}", path, err);
            return;
        }
    };

    let bsum_path = sibling(path, "bsum");
    if let Err(err) = fs::write(&bsum_path, &output.stdout) {
        warn!("Failed to write {:?}: {:#}", bsum_path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entries() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry {
                pkg: "cal".to_string(),
                pkg_id: "github.com.xplshn.a-utils".to_string(),
                description: "Calendar".to_string(),
                version: "1.0".to_string(),
                shasum: "sha:abc".to_string(),
                homepage: Some(OneOrMany::Many(vec!["https://example.com".to_string()])),
                provides_pkg: vec!["cal".to_string(), "printf".to_string()],
                ghcr_pkg: "ghcr.io/pkgforge/bincache/a-utils/official/cal:1.0-x86_64-linux"
                    .to_string(),
                ..Default::default()
            },
            CatalogEntry {
                pkg: "btop".to_string(),
                pkg_id: "github.com.aristocratos.btop".to_string(),
                version: "1.4.0".to_string(),
                license: Some(OneOrMany::One("Apache-2.0".to_string())),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn json_and_db_stay_in_parity() {
        let tmp = TempDir::new().unwrap();
        let json_path = tmp.path().join("x86_64-linux.json");
        let db_path = tmp.path().join("x86_64-linux.db");

        let entries = sample_entries();
        fs::write(&json_path, serde_json::to_vec(&entries).unwrap()).unwrap();

        let inserted = json_to_db(&json_path, &db_path).unwrap();
        assert_eq!(inserted, entries.len());

        let mut connection = SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        let mut rows = packages::table.load::<PackageRow>(&mut connection).unwrap();
        rows.sort_by(|a, b| a.pkg.cmp(&b.pkg));

        assert_eq!(rows.len(), entries.len());
        assert_eq!(rows[1].pkg, "cal");
        // array-typed fields round as JSON-encoded strings
        assert_eq!(rows[1].homepage, "[\"https://example.com\"]");
        assert_eq!(rows[1].provides_pkg, "[\"cal\",\"printf\"]");
        assert_eq!(rows[0].license, "\"Apache-2.0\"");
        // checksum falls back to shasum
        assert_eq!(rows[1].checksum, "sha:abc");
    }

    #[test]
    fn rebuilding_the_db_replaces_rows() {
        let tmp = TempDir::new().unwrap();
        let json_path = tmp.path().join("arch.json");
        let db_path = tmp.path().join("arch.db");

        fs::write(&json_path, serde_json::to_vec(&sample_entries()).unwrap()).unwrap();
        json_to_db(&json_path, &db_path).unwrap();

        // second run with fewer entries starts fresh
        fs::write(
            &json_path,
            serde_json::to_vec(&sample_entries()[..1]).unwrap(),
        )
        .unwrap();
        let inserted = json_to_db(&json_path, &db_path).unwrap();
        assert_eq!(inserted, 1);

        let mut connection = SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        let count = packages::table
            .count()
            .get_result::<i64>(&mut connection)
            .unwrap();
        assert_eq!(count, 1);
    }
}
