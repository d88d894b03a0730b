// nllb-sidecar: version provenance (3-tier, from original source)

use std::process::Command;

pub const SERVER_VERSION: &str = "0.6.0";

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub version_at: String,
    pub version_source: &'static str,
}

/// Resolves a build timestamp through three tiers: a build-time-baked
/// env var, a live `git log` query, then the running binary's mtime, in
/// that order, falling back to "unknown".
pub fn derive_version_at(git_commit_date_env: Option<&str>) -> VersionInfo {
    if let Some(date) = git_commit_date_env {
        return VersionInfo {
            version: SERVER_VERSION,
            version_at: date.to_string(),
            version_source: "env",
        };
    }

    if let Some(date) = query_git_commit_date() {
        return VersionInfo {
            version: SERVER_VERSION,
            version_at: date,
            version_source: "git",
        };
    }

    if let Some(date) = binary_mtime() {
        return VersionInfo {
            version: SERVER_VERSION,
            version_at: date,
            version_source: "mtime",
        };
    }

    VersionInfo {
        version: SERVER_VERSION,
        version_at: "unknown".to_string(),
        version_source: "unknown",
    }
}

fn query_git_commit_date() -> Option<String> {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%cI"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let s = String::from_utf8(output.stdout).ok()?;
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn binary_mtime() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let meta = std::fs::metadata(exe).ok()?;
    let modified = meta.modified().ok()?;
    let datetime: chrono::DateTime<chrono::Utc> = modified.into();
    Some(datetime.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let info = derive_version_at(Some("2024-01-01T00:00:00Z"));
        assert_eq!(info.version_source, "env");
        assert_eq!(info.version_at, "2024-01-01T00:00:00Z");
    }
}
