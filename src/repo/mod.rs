//! Git operations the reconciler needs.
//!
//! Remote-side names (`dst`, `name`) are bare branch names such as
//! `dev/phab/ok/change/master/7`; the implementation owns the remote and adds
//! `refs/heads/`. Revisions (`src`, `base`, `tip`) are anything git can
//! resolve: hashes, `refs/remotes/origin/...`, or local branch names.

pub mod fake;
pub mod git;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    /// `Name <email>`, as git expects for `--author`.
    pub fn ident(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

/// Result of squashing a branch onto the checked-out base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SquashOutcome {
    Merged { output: String },
    /// Nothing was committed; the work tree may be dirty.
    Failed { output: String },
}

pub trait Repo {
    /// The remote all pushes, fetches and remote refs refer to.
    fn remote(&self) -> &str;

    /// Full name of the remote-tracking ref for `branch`.
    fn remote_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{}", self.remote(), branch)
    }

    fn fetch_prune(&self) -> Result<()>;

    /// Branch names on the remote, as of the last fetch.
    fn list_remote_refs(&self) -> Result<Vec<String>>;

    /// Commit hash `rev` points at, `None` if it doesn't resolve.
    fn resolve(&self, rev: &str) -> Result<Option<String>>;

    /// Commits reachable from `tip` but not `base`, oldest first.
    fn log_range(&self, base: &str, tip: &str) -> Result<Vec<String>>;

    fn authors_of(&self, hashes: &[String]) -> Result<Vec<Author>>;

    fn messages_of(&self, hashes: &[String]) -> Result<Vec<String>>;

    /// Diff of `tip` against its merge base with `base`.
    fn raw_diff(&self, base: &str, tip: &str, context_lines: u32) -> Result<String>;

    /// Point local branch `local` at `upstream` and check it out, discarding
    /// local changes.
    fn checkout_force_from_ref(&self, local: &str, upstream: &str) -> Result<()>;

    fn push_asymmetrical(&self, src: &str, dst: &str) -> Result<()>;

    fn push_asymmetrical_force(&self, src: &str, dst: &str) -> Result<()>;

    /// Create `new_dst` at `src` and delete `old_dst` in one push.
    fn move_asymmetrical(&self, src: &str, old_dst: &str, new_dst: &str) -> Result<()>;

    fn delete_remote(&self, name: &str) -> Result<()>;

    /// Squash `from` onto the current checkout and commit it as `author`.
    fn squash_merge(&self, from: &str, message: &str, author: &Author) -> Result<SquashOutcome>;

    fn reset_hard(&self) -> Result<()>;
}
