use crate::errors::*;
use std::env;

/// Environment variables that may carry a registry token, checked in order.
const TOKEN_VARS: &[&str] = &["GHCR_TOKEN", "GITHUB_TOKEN", "GH_TOKEN"];

pub fn find_registry_token() -> Result<String> {
    for var in TOKEN_VARS {
        if let Ok(token) = env::var(var) {
            if !token.is_empty() {
                debug!("Using registry token from ${}", var);
                return Ok(token);
            }
        }
    }
    bail!("No registry token found, set one of {}", TOKEN_VARS.join(", "))
}

pub fn find_signing_key() -> Result<String> {
    let key = env::var("MINISIGN_KEY_CONTENT")
        .context("MINISIGN_KEY_CONTENT environment variable not set")?;
    if key.is_empty() {
        bail!("MINISIGN_KEY_CONTENT is empty");
    }
    Ok(key)
}

pub fn find_signing_password() -> Option<String> {
    env::var("MINISIGN_PASSWORD").ok().filter(|p| !p.is_empty())
}
