// A configured repository, ticked by the retry loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, info_span};

use super::{CancelToken, RepoTick};
use crate::config::RepoConfig;
use crate::naming::NamingChain;
use crate::notify::Notifier;
use crate::reconcile::{Outcome, RepoReconciler};
use crate::repo::git::GitRepo;
use crate::repo::Author;
use crate::review::conduit::ConduitReviewService;

pub struct RepoWorker {
    config: RepoConfig,
    naming: NamingChain,
    notifier: Arc<dyn Notifier>,
}

impl RepoWorker {
    pub fn new(config: RepoConfig, notifier: Arc<dyn Notifier>) -> Self {
        let naming = config.naming_chain();
        Self {
            config,
            naming,
            notifier,
        }
    }
}

impl RepoTick for RepoWorker {
    fn name(&self) -> &str {
        &self.config.repo_desc
    }

    /// Opens the clone and a fresh Conduit session every time, so nothing
    /// carries over from one tick to the next.
    fn tick(&self, cancel: &CancelToken) -> Result<()> {
        let _span = info_span!("tick", repo = %self.config.repo_desc).entered();

        let repo = GitRepo::open(&self.config.repo_path, &self.config.remote)?
            .with_committer(Author::new(&self.config.arcyd_user, &self.config.arcyd_email));
        let service = ConduitReviewService::connect(self.config.client_options())
            .with_context(|| format!("Failed to connect to {}", self.config.instance_uri))?;

        let report = RepoReconciler::new(&repo, &service, self.notifier.as_ref(), &self.naming)
            .with_cancel(cancel)
            .tick()?;

        info!(
            branches = report.outcomes.len(),
            created = report.count(|o| matches!(o, Outcome::Created(_))),
            updated = report.count(|o| matches!(o, Outcome::Updated(_))),
            landed = report.count(|o| matches!(o, Outcome::Landed(_))),
            bad = report.count(|o| matches!(o, Outcome::MarkedBad(_))),
            cancelled = report.cancelled,
            "tick finished"
        );
        Ok(())
    }
}
