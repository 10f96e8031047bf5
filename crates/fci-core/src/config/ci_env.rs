//! CI provider environment detection
//!
//! Build id, commit and branch are published under different variable names
//! by every CI service. Detection goes through an [`EnvLookup`] so it can be
//! exercised without touching the process environment.

use std::process::Command;

use crate::types::CiProvider;

/// Source of environment variables
pub trait EnvLookup {
    /// Value of a variable, if set and non-empty
    fn var(&self, key: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, key: &str) -> Option<String> {
        self(key).filter(|v| !v.is_empty())
    }
}

/// Variables consulted for one provider
struct ProviderVars {
    provider: CiProvider,
    /// Presence of any of these selects the provider
    markers: &'static [&'static str],
    build_id: &'static str,
    commit: &'static str,
    branch: &'static str,
}

const PROVIDERS: &[ProviderVars] = &[
    ProviderVars {
        provider: CiProvider::RubyCi,
        markers: &["RUBYCI_SHA", "RUBYCI_BRANCH"],
        build_id: "BUILD_ID",
        commit: "RUBYCI_SHA",
        branch: "RUBYCI_BRANCH",
    },
    ProviderVars {
        provider: CiProvider::GithubActions,
        markers: &["GITHUB_RUN_ID", "GITHUB_ACTIONS"],
        build_id: "GITHUB_RUN_ID",
        commit: "GITHUB_SHA",
        branch: "GITHUB_REF",
    },
    ProviderVars {
        provider: CiProvider::CircleCi,
        markers: &["CIRCLE_BUILD_NUM", "CIRCLECI"],
        build_id: "CIRCLE_BUILD_NUM",
        commit: "CIRCLE_SHA1",
        branch: "CIRCLE_BRANCH",
    },
];

/// Generic build id variable, used when the provider has none
const GENERIC_BUILD_ID: &str = "BUILD_ID";

/// Build coordinates read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiEnvironment {
    /// Detected provider
    pub provider: CiProvider,
    /// Build identifier shared by all nodes of the build
    pub build_id: Option<String>,
    /// Commit under test
    pub commit: Option<String>,
    /// Branch under test
    pub branch: Option<String>,
}

impl CiEnvironment {
    /// Detect the provider and read its variables
    pub fn detect(env: &impl EnvLookup) -> Self {
        let vars = PROVIDERS
            .iter()
            .find(|p| p.markers.iter().any(|m| env.var(m).is_some()));

        match vars {
            Some(vars) => Self {
                provider: vars.provider,
                build_id: env.var(vars.build_id).or_else(|| env.var(GENERIC_BUILD_ID)),
                commit: env.var(vars.commit),
                branch: env.var(vars.branch).map(|b| strip_ref_prefix(&b)),
            },
            None => Self {
                provider: CiProvider::Generic,
                build_id: env.var(GENERIC_BUILD_ID),
                commit: None,
                branch: None,
            },
        }
    }
}

/// `refs/heads/main` -> `main`; other values are returned unchanged
fn strip_ref_prefix(branch: &str) -> String {
    branch
        .strip_prefix("refs/heads/")
        .unwrap_or(branch)
        .to_string()
}

/// Short hash of the checked-out commit
pub(crate) fn git_commit() -> Option<String> {
    git_output(&["rev-parse", "--short", "HEAD"])
}

/// Name of the checked-out branch
pub(crate) fn git_branch() -> Option<String> {
    git_output(&["rev-parse", "--abbrev-ref", "HEAD"])
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Failed to run git {:?}: {}", args, e);
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!("git {:?} exited with {}", args, output.status);
        return None;
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
