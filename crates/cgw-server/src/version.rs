//! Build metadata captured by `build.rs`.

use serde::Serialize;
use std::fmt;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where and from what this binary was built.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub git_branch: &'static str,
    pub git_commit_timestamp: &'static str,
    /// "true" when the tree had uncommitted changes
    pub git_dirty: &'static str,
    pub build_timestamp: &'static str,
    pub rustc: &'static str,
    pub target: &'static str,
}

pub const BUILD: BuildInfo = BuildInfo {
    version: VERSION,
    git_sha: env!("VERGEN_GIT_SHA"),
    git_branch: env!("VERGEN_GIT_BRANCH"),
    git_commit_timestamp: env!("VERGEN_GIT_COMMIT_TIMESTAMP"),
    git_dirty: env!("VERGEN_GIT_DIRTY"),
    build_timestamp: env!("VERGEN_BUILD_TIMESTAMP"),
    rustc: env!("VERGEN_RUSTC_SEMVER"),
    target: env!("VERGEN_CARGO_TARGET_TRIPLE"),
};

impl BuildInfo {
    pub fn is_dirty(&self) -> bool {
        self.git_dirty == "true"
    }

    /// `<version> (<sha>[ dirty])`
    pub fn short(&self) -> String {
        let dirty = if self.is_dirty() { " dirty" } else { "" };
        format!("{} ({}{dirty})", self.version, self.git_sha)
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cgw-server {}", self.version)?;
        writeln!(f, "commit: {} ({})", self.git_sha, self.git_commit_timestamp)?;
        writeln!(f, "branch: {}", self.git_branch)?;
        writeln!(f, "built:  {}", self.build_timestamp)?;
        writeln!(f, "rustc:  {}", self.rustc)?;
        write!(f, "target: {}", self.target)
    }
}
