use anyhow::{bail, Result};
use arcyd::naming::NamingChain;
use arcyd::notify::RecordingNotifier;
use arcyd::reconcile::{Outcome, RepoReconciler};
use arcyd::repo::git::GitRepo;
use arcyd::repo::{Author, Repo, SquashOutcome};
use arcyd::review::mock::MockReviewService;
use arcyd::review::{DiffId, RevisionId};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const BRANCH: &str = "ph-review/change/master";

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").current_dir(dir).args(args).output()?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A bare `origin`, a developer's clone and arcyd's clone of it.
struct Setup {
    _dir: TempDir,
    origin: PathBuf,
    dev: PathBuf,
    arcyd: PathBuf,
}

impl Setup {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let origin = dir.path().join("origin.git");
        let dev = dir.path().join("dev");
        let arcyd = dir.path().join("arcyd");
        fs::create_dir_all(&origin)?;
        fs::create_dir_all(&dev)?;

        git(&origin, &["init", "--bare", "-b", "master"])?;

        git(&dev, &["init", "-b", "master"])?;
        git(&dev, &["config", "user.name", "Alice"])?;
        git(&dev, &["config", "user.email", "alice@example.com"])?;
        git(&dev, &["remote", "add", "origin", &origin.to_string_lossy()])?;
        fs::write(dev.join("README"), "initial\n")?;
        git(&dev, &["add", "."])?;
        git(&dev, &["commit", "-m", "initial"])?;
        git(&dev, &["push", "origin", "master"])?;

        git(
            dir.path(),
            &["clone", &origin.to_string_lossy(), &arcyd.to_string_lossy()],
        )?;
        git(&arcyd, &["config", "user.name", "arcyd"])?;
        git(&arcyd, &["config", "user.email", "arcyd@example.com"])?;

        Ok(Self {
            _dir: dir,
            origin,
            dev,
            arcyd,
        })
    }

    /// Commit `content` to `path` on `branch` in the developer clone and push.
    fn dev_commit(
        &self,
        branch: &str,
        message: &str,
        path: &str,
        content: impl AsRef<[u8]>,
    ) -> Result<()> {
        git(&self.dev, &["checkout", "-q", "-B", branch, &format!("origin/{branch}")])
            .or_else(|_| git(&self.dev, &["checkout", "-q", "-B", branch, "origin/master"]))?;
        fs::write(self.dev.join(path), content)?;
        git(&self.dev, &["add", "."])?;
        git(&self.dev, &["commit", "-m", message])?;
        git(&self.dev, &["push", "-q", "origin", &format!("{branch}:{branch}")])?;
        git(&self.dev, &["fetch", "-q", "origin"])?;
        Ok(())
    }

    fn repo(&self) -> Result<GitRepo> {
        Ok(GitRepo::open(&self.arcyd, "origin")?
            .with_committer(Author::new("arcyd", "arcyd@example.com")))
    }

    fn origin_branches(&self) -> Result<Vec<String>> {
        let out = git(&self.origin, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out.lines().map(str::to_string).collect())
    }
}

#[test]
fn test_remote_refs_and_ranges() -> Result<()> {
    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "first\n\nTest Plan: tp", "NEWFILE", "one\n")?;
    setup.dev_commit(BRANCH, "second", "NEWFILE", "one\ntwo\n")?;

    let repo = setup.repo()?;
    repo.fetch_prune()?;

    assert_eq!(repo.list_remote_refs()?, vec!["master", BRANCH]);
    assert_eq!(repo.resolve("refs/remotes/origin/nonesuch")?, None);

    let base = repo.remote_ref("master");
    let tip = repo.remote_ref(BRANCH);
    let hashes = repo.log_range(&base, &tip)?;
    assert_eq!(hashes.len(), 2);
    assert_eq!(hashes.last().cloned(), repo.resolve(&tip)?);

    let messages = repo.messages_of(&hashes)?;
    assert!(messages[0].starts_with("first"));
    assert!(messages[1].starts_with("second"));
    assert_eq!(
        repo.authors_of(&hashes)?,
        vec![Author::new("Alice", "alice@example.com"); 2]
    );

    let diff = repo.raw_diff(&base, &tip, 1000)?;
    assert!(diff.contains("+two"));
    assert!(repo.log_range(&base, &base)?.is_empty());
    Ok(())
}

#[test]
fn test_tracker_pushes() -> Result<()> {
    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "change", "NEWFILE", "new\n")?;

    let repo = setup.repo()?;
    repo.fetch_prune()?;
    let tip = repo.remote_ref(BRANCH);

    let bad = "dev/phab/bad_prereview/change/master/none";
    let ok = "dev/phab/ok/change/master/1";

    repo.push_asymmetrical(&tip, bad)?;
    assert!(setup.origin_branches()?.contains(&bad.to_string()));

    repo.push_asymmetrical_force(&repo.remote_ref("master"), bad)?;
    repo.move_asymmetrical(&tip, bad, ok)?;
    let branches = setup.origin_branches()?;
    assert!(branches.contains(&ok.to_string()));
    assert!(!branches.contains(&bad.to_string()));

    repo.fetch_prune()?;
    assert_eq!(repo.resolve(&repo.remote_ref(ok))?, repo.resolve(&tip)?);

    repo.delete_remote(ok)?;
    repo.fetch_prune()?;
    assert_eq!(repo.list_remote_refs()?, vec!["master", BRANCH]);

    // deleting again is harmless
    let _ = repo.delete_remote(ok);
    assert_eq!(setup.origin_branches()?, vec!["master", BRANCH]);
    Ok(())
}

#[test]
fn test_squash_conflict_then_reset() -> Result<()> {
    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "change README", "README", "review\n")?;
    setup.dev_commit("master", "move on", "README", "master\n")?;

    let repo = setup.repo()?;
    repo.fetch_prune()?;
    repo.checkout_force_from_ref("master", &repo.remote_ref("master"))?;

    let author = Author::new("Alice", "alice@example.com");
    match repo.squash_merge(&repo.remote_ref(BRANCH), "squashed", &author)? {
        SquashOutcome::Failed { output } => assert!(output.contains("CONFLICT")),
        SquashOutcome::Merged { .. } => panic!("expected a conflict"),
    }

    repo.reset_hard()?;
    assert!(git(&setup.arcyd, &["status", "--porcelain"])?.trim().is_empty());
    Ok(())
}

#[test]
fn test_create_and_land_through_real_git() -> Result<()> {
    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "add NEWFILE\n\nTest Plan: looked at it", "NEWFILE", "new\n")?;

    let repo = setup.repo()?;
    let service = MockReviewService::new();
    service.add_user("alice", "alice@example.com");
    let notifier = RecordingNotifier::new();
    let naming = NamingChain::default();
    let reconciler = RepoReconciler::new(&repo, &service, &notifier, &naming);

    let report = reconciler.tick()?;
    assert_eq!(
        report.outcomes,
        vec![(BRANCH.to_string(), Outcome::Created(RevisionId(1)))]
    );
    assert!(setup
        .origin_branches()?
        .contains(&"dev/phab/ok/change/master/1".to_string()));

    service.accept(RevisionId(1));
    let report = reconciler.tick()?;
    assert_eq!(
        report.outcomes,
        vec![(BRANCH.to_string(), Outcome::Landed(RevisionId(1)))]
    );

    assert_eq!(setup.origin_branches()?, vec!["master"]);
    assert_eq!(git(&setup.origin, &["show", "master:NEWFILE"])?, "new\n");
    assert_eq!(
        git(&setup.origin, &["log", "-1", "--format=%ae", "master"])?.trim(),
        "alice@example.com"
    );
    assert!(notifier.sent().is_empty());
    Ok(())
}

#[test]
fn test_land_conflict_through_real_git() -> Result<()> {
    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "change README\n\nTest Plan: tp", "README", "review\n")?;

    let repo = setup.repo()?;
    let service = MockReviewService::new();
    service.add_user("alice", "alice@example.com");
    let notifier = RecordingNotifier::new();
    let naming = NamingChain::default();
    let reconciler = RepoReconciler::new(&repo, &service, &notifier, &naming);

    reconciler.tick()?;
    setup.dev_commit("master", "move on", "README", "master\n")?;
    service.accept(RevisionId(1));

    let report = reconciler.tick()?;
    assert_eq!(report.outcomes.len(), 1);
    assert!(matches!(report.outcomes[0].1, Outcome::MarkedBad(_)));

    let branches = setup.origin_branches()?;
    assert!(branches.contains(&"dev/phab/bad_land/change/master/1".to_string()));
    assert!(branches.contains(&BRANCH.to_string()));
    assert_eq!(git(&setup.origin, &["show", "master:README"])?, "master\n");
    assert!(git(&setup.arcyd, &["status", "--porcelain"])?.trim().is_empty());
    Ok(())
}

#[test]
fn test_non_utf8_branch_still_gets_a_review() -> Result<()> {
    let setup = Setup::new()?;
    git(&setup.dev, &["checkout", "-q", "-B", BRANCH, "origin/master"])?;
    fs::write(setup.dev.join("notes.txt"), b"caf\xe9\n")?;
    fs::write(setup.dev.join("MSG"), b"caf\xe9 notes\n\nTest Plan: tp\n")?;
    git(&setup.dev, &["add", "notes.txt"])?;
    git(&setup.dev, &["commit", "-q", "-F", "MSG"])?;
    git(&setup.dev, &["push", "-q", "origin", &format!("{BRANCH}:{BRANCH}")])?;

    let repo = setup.repo()?;
    let service = MockReviewService::new();
    service.add_user("alice", "alice@example.com");
    let notifier = RecordingNotifier::new();
    let naming = NamingChain::default();

    let report = RepoReconciler::new(&repo, &service, &notifier, &naming).tick()?;
    assert_eq!(
        report.outcomes,
        vec![(BRANCH.to_string(), Outcome::Created(RevisionId(1)))]
    );

    let diff = service.diff(DiffId(1)).unwrap_or_default();
    assert!(diff.contains("+caf\u{FFFD}"));
    let record = service.record(RevisionId(1)).expect("revision exists");
    assert_eq!(record.revision.title, "caf\u{FFFD} notes");
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_tracker_rename_is_all_or_nothing() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let setup = Setup::new()?;
    setup.dev_commit(BRANCH, "change", "NEWFILE", "new\n")?;

    let repo = setup.repo()?;
    repo.fetch_prune()?;
    let tip = repo.remote_ref(BRANCH);
    let old = "dev/phab/ok/change/master/1";
    let new = "dev/phab/bad_inreview/change/master/1";
    repo.push_asymmetrical(&tip, old)?;

    // the remote refuses every branch deletion
    let hook = setup.origin.join("hooks").join("update");
    fs::write(&hook, "#!/bin/sh\ncase \"$3\" in *[!0]*) exit 0;; esac\nexit 1\n")?;
    fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))?;

    assert!(repo.move_asymmetrical(&tip, old, new).is_err());
    let branches = setup.origin_branches()?;
    assert!(branches.contains(&old.to_string()));
    assert!(!branches.contains(&new.to_string()));
    Ok(())
}
