//! Build script for phenofront-export
//!
//! Stamps the binary with the values its startup line reports: the commit
//! it was built from, when, and under which cargo profile.

use std::process::Command;

const UNKNOWN: &str = "unknown";

fn main() {
    let stamps = [
        ("GIT_HASH", commit_id()),
        ("BUILD_TIMESTAMP", build_time()),
        ("BUILD_PROFILE", std::env::var("PROFILE").unwrap_or_else(|_| UNKNOWN.into())),
    ];
    for (name, value) in stamps {
        println!("cargo:rustc-env={}={}", name, value);
    }
    // Left without rerun-if-changed so every build restamps
}

/// Abbreviated commit id, suffixed `-dirty` for uncommitted changes
///
/// Source tarballs have no repository; they get `unknown`.
fn commit_id() -> String {
    let described = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8", "--exclude=*"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok());

    match described.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// UTC, whole seconds, RFC 3339
fn build_time() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}
