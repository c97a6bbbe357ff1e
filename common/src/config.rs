/// Seconds a worker sleeps when the queue is empty.
pub const IDLE_DELAY: u64 = 10;
/// Seconds a worker backs off after a store error.
pub const ERROR_DELAY: u64 = 5;
/// How many warnings a counter-limited log site emits before going quiet.
pub const MAX_WARNINGS: usize = 3;

pub const REGISTRY_HOST: &str = "ghcr.io";
pub const REGISTRY_ORG: &str = "pkgforge";

pub const GHCR_API_BASE: &str = "https://api.ghcr.pkgforge.dev";
pub const PKG_WEB_BASE: &str = "https://pkgs.pkgforge.dev";
pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
pub const DISCORD_URL: &str = "https://discord.gg/djJUs48Zbu";
pub const CONTACT_URL: &str = "https://docs.pkgforge.dev/contact/chat";

pub const BINCACHE_SBUILD_LIST_URL: &str =
    "https://github.com/pkgforge/bincache/releases/download/metadata/SBUILD_LIST.json";
pub const BINCACHE_SBUILD_LIST_FALLBACK_URL: &str =
    "https://bincache.pkgforge.dev/SBUILD_LIST.json";
pub const PKGCACHE_SBUILD_LIST_URL: &str =
    "https://github.com/pkgforge/pkgcache/releases/download/metadata/SBUILD_LIST.json";
pub const PKGCACHE_SBUILD_LIST_FALLBACK_URL: &str =
    "https://pkgcache.pkgforge.dev/SBUILD_LIST.json";

/// Minisign public key the SBUILD list is signed with.
pub const SBUILD_LIST_PUBKEY: &str = "RWSGOq2NVecA2UPNdBUZykf1CCb147pkmdtYxgb3Ti+JO916516MwCyO";

/// Architectures queued by default when none is requested.
pub const DEFAULT_ARCHES: &[&str] = &["x86_64-Linux", "aarch64-Linux", "riscv64-Linux"];
