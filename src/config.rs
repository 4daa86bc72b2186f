use anyhow::{bail, Context, Result};
use arcyd_conduit::ClientOptions;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::daemon::LoopOptions;
use crate::naming::{NamingChain, SchemeKind};
use crate::notify::SendmailType;

fn default_remote() -> String {
    "origin".to_string()
}

fn default_naming() -> Vec<SchemeKind> {
    vec![
        SchemeKind::PhReview,
        SchemeKind::ArcydReview,
        SchemeKind::RBranch,
    ]
}

/// Everything arcyd needs to look after one repository.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub instance_uri: String,
    pub arcyd_user: String,
    pub arcyd_cert: String,
    pub arcyd_email: String,
    pub admin_email: String,
    pub repo_desc: String,
    pub repo_path: PathBuf,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_naming")]
    pub naming: Vec<SchemeKind>,
}

impl RepoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::from_toml(&s).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: RepoConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("instance_uri", &self.instance_uri),
            ("arcyd_user", &self.arcyd_user),
            ("arcyd_cert", &self.arcyd_cert),
            ("arcyd_email", &self.arcyd_email),
            ("repo_desc", &self.repo_desc),
            ("remote", &self.remote),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                bail!("{field} must not be empty");
            }
        }
        if self.naming.is_empty() {
            bail!("naming must list at least one scheme");
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::new(&self.instance_uri, &self.arcyd_user, &self.arcyd_cert);
        options.https_proxy = self.https_proxy.clone();
        options
    }

    pub fn naming_chain(&self) -> NamingChain {
        NamingChain::from_kinds(&self.naming)
    }
}

/// Settings for the process as a whole rather than any one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub sleep_secs: u64,
    pub retry_delays_secs: Vec<u64>,
    pub sys_admin_emails: Vec<String>,
    pub sendmail_binary: String,
    pub sendmail_type: SendmailType,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sleep_secs: 60,
            retry_delays_secs: vec![600, 3600],
            sys_admin_emails: Vec::new(),
            sendmail_binary: "sendmail".to_string(),
            sendmail_type: SendmailType::Sendmail,
        }
    }
}

impl DaemonConfig {
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            sleep: Duration::from_secs(self.sleep_secs),
            retry_delays: self
                .retry_delays_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect(),
        }
    }
}

/// Expand `@file` arguments into the paths listed in that file, one per
/// line; blank lines and `#` comments are skipped. Other arguments are paths.
pub fn expand_repo_config_args(args: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for arg in args {
        let Some(list) = arg.strip_prefix('@') else {
            paths.push(PathBuf::from(arg));
            continue;
        };

        let s = fs::read_to_string(list).with_context(|| format!("failed to read {list}"))?;
        paths.extend(
            s.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(PathBuf::from),
        );
    }

    if paths.is_empty() {
        bail!("no repository configs given");
    }
    Ok(paths)
}
