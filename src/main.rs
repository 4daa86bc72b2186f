use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use arcyd::config::{expand_repo_config_args, DaemonConfig, RepoConfig};
use arcyd::daemon::{spawn_signal_handler, RepoTick, RepoWorker, RetryLoop, Shutdown};
use arcyd::naming::SchemeKind;
use arcyd::notify::{Notifier, SendmailNotifier, SendmailType};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look after one repository configured on the command line
    Single {
        #[command(flatten)]
        repo: RepoArgs,

        #[command(flatten)]
        daemon: DaemonArgs,
    },
    /// Look after every repository in the given config files
    Multi {
        /// Repository config files; `@list` reads paths from `list`, one per line
        #[arg(long, required = true, num_args = 1..)]
        repo_configs: Vec<String>,

        #[command(flatten)]
        daemon: DaemonArgs,
    },
}

#[derive(clap::Args, Debug)]
struct RepoArgs {
    /// Base URI of the Phabricator instance
    #[arg(long)]
    instance_uri: String,

    /// Username arcyd acts as
    #[arg(long)]
    arcyd_user: String,

    /// Conduit certificate for the arcyd user
    #[arg(long)]
    arcyd_cert: String,

    /// Address mail from arcyd is sent from
    #[arg(long)]
    arcyd_email: String,

    /// Who to copy on user-facing mail for this repository
    #[arg(long)]
    admin_email: String,

    /// Short name for the repository in logs and mail
    #[arg(long)]
    repo_desc: String,

    /// Path of arcyd's clone
    #[arg(long)]
    repo_path: PathBuf,

    #[arg(long)]
    https_proxy: Option<String>,

    #[arg(long, default_value = "origin")]
    remote: String,

    /// Naming schemes to recognise, in priority order
    #[arg(long, value_delimiter = ',', default_value = "ph-review,arcyd-review,rbranch")]
    naming: Vec<SchemeKind>,
}

impl RepoArgs {
    fn into_config(self) -> Result<RepoConfig> {
        let config = RepoConfig {
            instance_uri: self.instance_uri,
            arcyd_user: self.arcyd_user,
            arcyd_cert: self.arcyd_cert,
            arcyd_email: self.arcyd_email,
            admin_email: self.admin_email,
            repo_desc: self.repo_desc,
            repo_path: self.repo_path,
            https_proxy: self.https_proxy,
            remote: self.remote,
            naming: self.naming,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(clap::Args, Debug)]
struct DaemonArgs {
    /// Seconds to sleep between passes over all repositories
    #[arg(long, default_value_t = 60)]
    sleep_secs: u64,

    /// Seconds to wait before each retry of a failed tick
    #[arg(long, value_delimiter = ',', default_value = "600,3600")]
    retry_delays_secs: Vec<u64>,

    /// Who to tell when a repository is paused or arcyd stops
    #[arg(long, value_delimiter = ',')]
    sys_admin_emails: Vec<String>,

    #[arg(long, default_value = "sendmail")]
    sendmail_binary: String,

    #[arg(long, value_enum, default_value_t = SendmailType::Sendmail)]
    sendmail_type: SendmailType,
}

impl From<DaemonArgs> for DaemonConfig {
    fn from(args: DaemonArgs) -> Self {
        DaemonConfig {
            sleep_secs: args.sleep_secs,
            retry_delays_secs: args.retry_delays_secs,
            sys_admin_emails: args.sys_admin_emails,
            sendmail_binary: args.sendmail_binary,
            sendmail_type: args.sendmail_type,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Each clone must be owned by exactly one worker.
fn check_unique(configs: &[RepoConfig]) -> Result<()> {
    let mut descs = HashSet::new();
    let mut paths = HashSet::new();

    for config in configs {
        if !descs.insert(&config.repo_desc) {
            bail!("repo_desc '{}' is used more than once", config.repo_desc);
        }
        if !paths.insert(&config.repo_path) {
            bail!(
                "repo_path '{}' is used more than once",
                config.repo_path.display()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let (configs, daemon): (Vec<RepoConfig>, DaemonConfig) = match args.command {
        Commands::Single { repo, daemon } => (vec![repo.into_config()?], daemon.into()),
        Commands::Multi {
            repo_configs,
            daemon,
        } => {
            let configs = expand_repo_config_args(&repo_configs)?
                .iter()
                .map(|path| RepoConfig::load(path))
                .collect::<Result<Vec<_>>>()?;
            (configs, daemon.into())
        }
    };
    check_unique(&configs)?;

    let from = configs
        .first()
        .map(|c| c.arcyd_email.clone())
        .unwrap_or_default();
    let admin: Arc<dyn Notifier> = Arc::new(SendmailNotifier::new(
        &daemon.sendmail_binary,
        daemon.sendmail_type,
        &from,
        &daemon.sys_admin_emails,
    ));

    let repos: Vec<Arc<dyn RepoTick>> = configs
        .into_iter()
        .map(|config| {
            let notifier = SendmailNotifier::new(
                &daemon.sendmail_binary,
                daemon.sendmail_type,
                &config.arcyd_email,
                std::slice::from_ref(&config.admin_email),
            )
            .for_repo(&config.repo_desc);
            info!(repo = %config.repo_desc, path = %config.repo_path.display(), "configured");
            Arc::new(RepoWorker::new(config, Arc::new(notifier))) as Arc<dyn RepoTick>
        })
        .collect();

    let shutdown = Shutdown::new();
    let _signals = spawn_signal_handler(shutdown.clone())?;

    let result = RetryLoop::new(repos, daemon.loop_options(), Arc::clone(&admin), shutdown)
        .run()
        .await;

    if let Err(err) = &result {
        error!("fatal: {err:#}");
        let message = format!("arcyd stopped on a fatal error:\n\n{err:#}\n");
        let notified = tokio::task::spawn_blocking(move || admin.system_exception(&message)).await;
        if let Ok(Err(e)) = notified {
            error!("failed to notify administrator: {e:#}");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_args() -> Result<()> {
        let args = Args::try_parse_from([
            "arcyd",
            "single",
            "--instance-uri",
            "https://phab.example.com",
            "--arcyd-user",
            "arcyd",
            "--arcyd-cert",
            "xyz",
            "--arcyd-email",
            "arcyd@example.com",
            "--admin-email",
            "admin@example.com",
            "--repo-desc",
            "web",
            "--repo-path",
            "/var/arcyd/web",
            "--naming",
            "rbranch,ph-review",
            "--retry-delays-secs",
            "1,2,3",
            "--sendmail-type",
            "catchmail",
        ])?;

        let Commands::Single { repo, daemon } = args.command else {
            panic!("expected single");
        };
        let config = repo.into_config()?;
        assert_eq!(config.naming, vec![SchemeKind::RBranch, SchemeKind::PhReview]);
        assert_eq!(config.remote, "origin");

        let daemon: DaemonConfig = daemon.into();
        assert_eq!(daemon.retry_delays_secs, vec![1, 2, 3]);
        assert_eq!(daemon.sleep_secs, 60);
        assert_eq!(daemon.sendmail_type, SendmailType::Catchmail);
        Ok(())
    }

    #[test]
    fn test_multi_requires_configs() {
        assert!(Args::try_parse_from(["arcyd", "multi"]).is_err());
        assert!(Args::try_parse_from(["arcyd", "multi", "--repo-configs", "@repos.txt"]).is_ok());
    }

    #[test]
    fn test_duplicate_paths_rejected() -> Result<()> {
        let config = RepoConfig::from_toml(
            r#"
instance_uri = "https://phab.example.com"
arcyd_user = "arcyd"
arcyd_cert = "xyz"
arcyd_email = "arcyd@example.com"
admin_email = "admin@example.com"
repo_desc = "web"
repo_path = "/var/arcyd/web"
"#,
        )?;
        let mut other = config.clone();
        other.repo_desc = "web2".into();

        assert!(check_unique(&[config.clone()]).is_ok());
        assert!(check_unique(&[config, other]).is_err());
        Ok(())
    }
}
