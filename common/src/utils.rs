use crate::errors::*;
use std::env;
use std::path::{Path, PathBuf};

/// Resolve an external tool: an explicit path is used as-is, a bare name is
/// looked up on `PATH`.
pub fn find_tool<P: AsRef<Path>>(tool: P) -> Result<PathBuf> {
    let tool = tool.as_ref();
    if tool.components().count() > 1 {
        if tool.is_file() {
            return Ok(tool.to_path_buf());
        }
        bail!("Tool not found at {:?}", tool);
    }

    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    bail!("{:?} not found in PATH", tool)
}

/// Sanitize a package name for use as a registry path segment.
///
/// Registry paths must be lowercase and may only contain `[a-z0-9_-]`.
/// Dots are folded into hyphens, runs of separators are collapsed until
/// stable, and leading/trailing separators are stripped.
pub fn sanitize_pkg_name(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(name.len());
    for ch in name.to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' | '_' | '-' => out.push(ch),
            _ => out.push('-'),
        }
    }

    let mut sanitized = out.trim_matches(|c| c == '-' || c == '_').to_string();
    while sanitized.contains("--")
        || sanitized.contains("__")
        || sanitized.contains("_-")
        || sanitized.contains("-_")
    {
        sanitized = sanitized.replace("--", "-");
        sanitized = sanitized.replace("__", "_");
        sanitized = sanitized.replace("_-", "-");
        sanitized = sanitized.replace("-_", "-");
    }

    sanitized
}

/// Sanitize a version string for use as a registry tag.
///
/// Tags may contain `[A-Za-z0-9._-]` but must not start with a period or
/// hyphen. Anything else becomes an underscore. An empty result is replaced
/// with the literal `latest`.
pub fn sanitize_version(version: &str) -> String {
    let mut out = String::with_capacity(version.len());
    for ch in version.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '-' => out.push(ch),
            _ => out.push('_'),
        }
    }

    let sanitized = out.trim_start_matches(['.', '-']);
    if sanitized.is_empty() {
        "latest".to_string()
    } else {
        sanitized.to_string()
    }
}

/// Derive the build type from a recipe filename.
///
/// `binaries/btop/static.official.stable.yaml` -> `static/official/stable`
pub fn build_type(recipe_path: &str) -> String {
    let stem = Path::new(recipe_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    stem.split('.').collect::<Vec<_>>().join("/")
}

/// Strip a trailing file-extension-like suffix from a pkg field.
///
/// `a-utils.static` -> `a-utils`, but `github.com.btop` is left alone since
/// the stem still contains a dot.
pub fn strip_pkg_extension(pkg: &str) -> &str {
    if let Some(idx) = pkg.rfind('.') {
        if idx > 0 && !pkg[..idx].contains('.') {
            return &pkg[..idx];
        }
    }
    pkg
}

/// Render a build duration the way the status output wants it: seconds only
/// under a minute, no seconds once hours are involved.
pub fn secs_to_human(duration: i64) -> String {
    let secs = duration % 60;
    let mins = (duration / 60) % 60;
    let hours = duration / 3600;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
