//! Run context: which build this node takes part in

use serde::Serialize;
use std::fmt;
use url::Url;

use fci_protocol::Topic;

use super::ci_env::{self, CiEnvironment, EnvLookup};
use crate::error::ConfigError;
use crate::types::CiProvider;

/// Orchestrator host used when `FAST_CI_API_URL` is not set
pub const DEFAULT_API_HOST: &str = "api.fast.ci";

/// Path of the orchestrator socket endpoint
const SOCKET_PATH: &str = "/test_orchestrators/socket/websocket";

/// Placeholder for commit/branch when neither CI nor git can provide them
const UNKNOWN: &str = "unknown";

/// Environment variable names read by [`RunContextBuilder::detect`]
pub mod env_vars {
    pub const RUN_KEY: &str = "FAST_CI_RUN_KEY";
    pub const API_URL: &str = "FAST_CI_API_URL";
    pub const SECRET_KEY: &str = "FAST_CI_SECRET_KEY";
}

/// Identity of one node's participation in a build
///
/// Immutable for the duration of a session.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    /// Name of the test suite being distributed (e.g. `rspec`)
    pub run_key: String,
    /// Build shared by all nodes
    pub build_id: String,
    /// Commit under test
    pub commit: String,
    /// Branch under test
    pub branch: String,
    /// Orchestrator host, optionally with port
    pub api_host: String,
    /// Secret used to authenticate with the orchestrator
    #[serde(skip)]
    pub secret_key: String,
    /// CI service the values were read from
    pub provider: CiProvider,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_key", &self.run_key)
            .field("build_id", &self.build_id)
            .field("commit", &self.commit)
            .field("branch", &self.branch)
            .field("api_host", &self.api_host)
            .field("secret_key", &"[redacted]")
            .field("provider", &self.provider)
            .finish()
    }
}

impl RunContext {
    /// Start building a context
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::default()
    }

    /// Build a context entirely from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().detect_process_env().build()
    }

    /// Build a context from an arbitrary environment lookup
    pub fn from_lookup(env: &impl EnvLookup) -> Result<Self, ConfigError> {
        Self::builder().detect(env).build()
    }

    /// Channel topic for this build
    pub fn topic(&self) -> Topic {
        Topic::for_build(&self.run_key, &self.build_id)
    }

    /// Socket URL including the authentication query
    pub fn socket_url(&self, scheme: &str) -> Result<Url, ConfigError> {
        let mut url = self.base_url(scheme)?;
        url.query_pairs_mut()
            .append_pair("build_id", &self.build_id)
            .append_pair("run_key", &self.run_key)
            .append_pair("secret_key", &self.secret_key)
            .append_pair("commit", &self.commit)
            .append_pair("branch", &self.branch);
        Ok(url)
    }

    /// Socket URL without the query, safe to log
    pub fn endpoint(&self, scheme: &str) -> String {
        self.base_url(scheme)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("{}://{}{}", scheme, self.api_host, SOCKET_PATH))
    }

    fn base_url(&self, scheme: &str) -> Result<Url, ConfigError> {
        let host = self.api_host.trim_end_matches('/');
        let host = host
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(host);

        Url::parse(&format!("{}://{}{}", scheme, host, SOCKET_PATH)).map_err(|e| {
            ConfigError::Invalid(format!("Invalid API host '{}': {}", self.api_host, e))
        })
    }
}

/// Builder for [`RunContext`]
///
/// Explicit values always win over detected ones, whatever the call order.
#[derive(Debug, Default, Clone)]
pub struct RunContextBuilder {
    run_key: Option<String>,
    build_id: Option<String>,
    commit: Option<String>,
    branch: Option<String>,
    api_host: Option<String>,
    secret_key: Option<String>,
    detected: Option<Detected>,
}

#[derive(Debug, Clone)]
struct Detected {
    ci: CiEnvironment,
    run_key: Option<String>,
    api_host: Option<String>,
    secret_key: Option<String>,
}

impl RunContextBuilder {
    /// Set the run key
    pub fn run_key(mut self, run_key: impl Into<String>) -> Self {
        self.run_key = Some(run_key.into());
        self
    }

    /// Set the build id
    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    /// Set the commit
    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Set the branch
    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the orchestrator host
    pub fn api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    /// Set the secret key
    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Fill unset fields from an environment lookup
    pub fn detect(mut self, env: &impl EnvLookup) -> Self {
        self.detected = Some(Detected {
            ci: CiEnvironment::detect(env),
            run_key: env.var(env_vars::RUN_KEY),
            api_host: env.var(env_vars::API_URL),
            secret_key: env.var(env_vars::SECRET_KEY),
        });
        self
    }

    /// Fill unset fields from the process environment
    pub fn detect_process_env(self) -> Self {
        self.detect(&|key: &str| std::env::var(key).ok())
    }

    /// Validate and build the context
    ///
    /// Commit and branch fall back to git, then to `unknown`.
    pub fn build(self) -> Result<RunContext, ConfigError> {
        let detected = self.detected;
        let pick = |explicit: Option<String>, from_env: fn(&Detected) -> Option<String>| {
            explicit.or_else(|| detected.as_ref().and_then(from_env))
        };

        let run_key = pick(self.run_key, |d| d.run_key.clone())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingRunKey)?;
        let build_id = pick(self.build_id, |d| d.ci.build_id.clone())
            .ok_or_else(|| ConfigError::MissingField("build_id".to_string()))?;
        let secret_key = pick(self.secret_key, |d| d.secret_key.clone())
            .ok_or_else(|| ConfigError::MissingField("secret_key".to_string()))?;
        let api_host = pick(self.api_host, |d| d.api_host.clone())
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());
        let commit = pick(self.commit, |d| d.ci.commit.clone())
            .or_else(ci_env::git_commit)
            .unwrap_or_else(|| UNKNOWN.to_string());
        let branch = pick(self.branch, |d| d.ci.branch.clone())
            .or_else(ci_env::git_branch)
            .unwrap_or_else(|| UNKNOWN.to_string());
        let provider = detected
            .as_ref()
            .map(|d| d.ci.provider)
            .unwrap_or(CiProvider::Generic);

        Ok(RunContext {
            run_key,
            build_id,
            commit,
            branch,
            api_host,
            secret_key,
            provider,
        })
    }
}
