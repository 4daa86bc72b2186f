// Shared setup for reconciler tests: a fake remote with `master`, a mock
// Differential with two users, and a notifier that records.

use anyhow::Result;

use super::{RepoReconciler, TickReport};
use crate::daemon::CancelToken;
use crate::naming::NamingChain;
use crate::notify::RecordingNotifier;
use crate::repo::fake::FakeRepo;
use crate::repo::Author;
use crate::review::mock::MockReviewService;

pub fn alice() -> Author {
    Author::new("Alice", "alice@example.com")
}

pub fn bob() -> Author {
    Author::new("Bob", "bob@example.com")
}

pub fn stranger() -> Author {
    Author::new("Stranger", "stranger@elsewhere.com")
}

pub struct Fixture {
    pub repo: FakeRepo,
    pub service: MockReviewService,
    pub notifier: RecordingNotifier,
    pub naming: NamingChain,
}

impl Fixture {
    pub fn new() -> Self {
        let repo = FakeRepo::new();
        repo.commit("master", &alice(), "initial", "README", "initial");

        let service = MockReviewService::new();
        service.add_user("alice", "alice@example.com");
        service.add_user("bob", "bob@example.com");

        Self {
            repo,
            service,
            notifier: RecordingNotifier::new(),
            naming: NamingChain::default(),
        }
    }

    pub fn master(&self) -> String {
        self.repo.ref_hash("master").unwrap_or_default()
    }

    /// Commit onto `branch`, starting it from `from` if it doesn't exist yet.
    pub fn push(
        &self,
        branch: &str,
        from: &str,
        author: &Author,
        message: &str,
        path: &str,
        content: &str,
    ) -> String {
        if self.repo.ref_hash(branch).is_none() {
            let start = self.repo.ref_hash(from).unwrap_or_default();
            self.repo.set_ref(branch, &start);
        }
        self.repo.commit(branch, author, message, path, content)
    }

    /// Throw away `branch`'s history and start it again from `from`.
    pub fn rewrite(&self, branch: &str, from: &str) {
        let start = self.repo.ref_hash(from).unwrap_or_default();
        self.repo.set_ref(branch, &start);
    }

    pub fn tick(&self) -> Result<TickReport> {
        RepoReconciler::new(&self.repo, &self.service, &self.notifier, &self.naming).tick()
    }

    pub fn tick_cancelled(&self, cancel: &CancelToken) -> Result<TickReport> {
        RepoReconciler::new(&self.repo, &self.service, &self.notifier, &self.naming)
            .with_cancel(cancel)
            .tick()
    }

    pub fn trackers(&self) -> Vec<String> {
        self.repo
            .server_refs()
            .into_iter()
            .filter(|name| name.starts_with("dev/"))
            .collect()
    }
}
