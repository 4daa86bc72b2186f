//! In-memory repository for exercising the reconciler without git.
//!
//! Models three ref namespaces like a real clone does: branches on the
//! remote server, the remote-tracking snapshot taken by the last fetch, and
//! local branches. Commits carry a flat file tree so diffs, squashes and
//! conflicts behave plausibly.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};

use super::{Author, Repo, SquashOutcome};

#[derive(Debug, Clone)]
struct FakeCommit {
    parents: Vec<String>,
    author: Author,
    message: String,
    tree: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    commits: BTreeMap<String, FakeCommit>,
    server: BTreeMap<String, String>,
    fetched: BTreeMap<String, String>,
    local: BTreeMap<String, String>,
    head: Option<String>,
    dirty: bool,
    rejected: BTreeSet<String>,
    offline: bool,
    pushes: usize,
}

#[derive(Clone)]
pub struct FakeRepo {
    state: Arc<Mutex<FakeState>>,
    remote: String,
}

impl Default for FakeRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRepo {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            remote: "origin".to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit `path = content` on top of `branch` on the server, as a
    /// developer pushing would. Creates the branch if it doesn't exist.
    pub fn commit(
        &self,
        branch: &str,
        author: &Author,
        message: &str,
        path: &str,
        content: &str,
    ) -> String {
        let mut state = self.lock();
        let parent = state.server.get(branch).cloned();

        let mut tree = parent
            .as_ref()
            .and_then(|p| state.commits.get(p))
            .map(|c| c.tree.clone())
            .unwrap_or_default();
        tree.insert(path.to_string(), content.to_string());

        let hash = state.add_commit(FakeCommit {
            parents: parent.into_iter().collect(),
            author: author.clone(),
            message: message.to_string(),
            tree,
        });
        state.server.insert(branch.to_string(), hash.clone());
        hash
    }

    /// Point server branch `name` at `hash`.
    pub fn set_ref(&self, name: &str, hash: &str) {
        self.lock().server.insert(name.to_string(), hash.to_string());
    }

    pub fn delete_ref(&self, name: &str) {
        self.lock().server.remove(name);
    }

    /// Where server branch `name` points.
    pub fn ref_hash(&self, name: &str) -> Option<String> {
        self.lock().server.get(name).cloned()
    }

    /// Server branch names, sorted.
    pub fn server_refs(&self) -> Vec<String> {
        self.lock().server.keys().cloned().collect()
    }

    pub fn file_at(&self, hash: &str, path: &str) -> Option<String> {
        self.lock()
            .commits
            .get(hash)
            .and_then(|c| c.tree.get(path).cloned())
    }

    pub fn message_at(&self, hash: &str) -> Option<String> {
        self.lock().commits.get(hash).map(|c| c.message.clone())
    }

    pub fn author_at(&self, hash: &str) -> Option<Author> {
        self.lock().commits.get(hash).map(|c| c.author.clone())
    }

    /// Make every push to `dst` fail, as a protected branch would.
    pub fn reject_push(&self, dst: &str) {
        self.lock().rejected.insert(dst.to_string());
    }

    /// Fail fetches and pushes as if the remote were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Whether the work tree has no leftovers from a failed merge.
    pub fn is_clean(&self) -> bool {
        !self.lock().dirty
    }

    /// Pushes made so far, rejected ones excluded.
    pub fn push_count(&self) -> usize {
        self.lock().pushes
    }
}

impl FakeState {
    fn add_commit(&mut self, commit: FakeCommit) -> String {
        let hash = format!("{:040x}", self.commits.len() + 1);
        self.commits.insert(hash.clone(), commit);
        hash
    }

    fn resolve(&self, remote: &str, rev: &str) -> Option<String> {
        let tracking = format!("refs/remotes/{remote}/");
        let short = format!("{remote}/");

        if let Some(name) = rev.strip_prefix(&tracking).or_else(|| rev.strip_prefix(&short)) {
            return self.fetched.get(name).cloned();
        }
        if let Some(name) = rev.strip_prefix("refs/heads/") {
            return self.local.get(name).cloned();
        }
        if let Some(hash) = self.local.get(rev) {
            return Some(hash.clone());
        }
        self.commits.contains_key(rev).then(|| rev.to_string())
    }

    fn resolve_or_err(&self, remote: &str, rev: &str) -> Result<String> {
        self.resolve(remote, rev)
            .ok_or_else(|| anyhow!("fatal: ambiguous argument '{rev}': unknown revision"))
    }

    fn commit(&self, hash: &str) -> Result<&FakeCommit> {
        self.commits
            .get(hash)
            .ok_or_else(|| anyhow!("fatal: bad object {hash}"))
    }

    fn ancestors(&self, hash: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![hash.to_string()];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Parents-first walk from `tip`, skipping anything in `exclude`.
    fn topo_from(&self, tip: &str, exclude: &HashSet<String>) -> Vec<String> {
        fn visit(
            state: &FakeState,
            hash: &str,
            exclude: &HashSet<String>,
            seen: &mut HashSet<String>,
            out: &mut Vec<String>,
        ) {
            if exclude.contains(hash) || !seen.insert(hash.to_string()) {
                return;
            }
            if let Some(commit) = state.commits.get(hash) {
                for parent in &commit.parents {
                    visit(state, parent, exclude, seen, out);
                }
            }
            out.push(hash.to_string());
        }

        let mut out = Vec::new();
        visit(self, tip, exclude, &mut HashSet::new(), &mut out);
        out
    }

    fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let of_a = self.ancestors(a);
        self.topo_from(b, &HashSet::new())
            .into_iter()
            .rev()
            .find(|hash| of_a.contains(hash))
    }

    fn tree_at(&self, hash: Option<&str>) -> BTreeMap<String, String> {
        hash.and_then(|h| self.commits.get(h))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn push(&mut self, src: Option<&str>, dst: &str, force: bool) -> Result<()> {
        if self.offline {
            bail!("fatal: unable to access remote: Could not resolve host");
        }
        if self.rejected.contains(dst) {
            bail!("! [remote rejected] {dst} (pre-receive hook declined)");
        }

        match src {
            Some(hash) => {
                if let Some(existing) = self.server.get(dst) {
                    if !force && !self.ancestors(hash).contains(existing) {
                        bail!("! [rejected] {dst} (non-fast-forward)");
                    }
                }
                self.server.insert(dst.to_string(), hash.to_string());
                self.fetched.insert(dst.to_string(), hash.to_string());
            }
            None => {
                if self.server.remove(dst).is_none() {
                    bail!("error: unable to delete '{dst}': remote ref does not exist");
                }
                self.fetched.remove(dst);
            }
        }

        self.pushes += 1;
        Ok(())
    }
}

fn render_diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> String {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut out = String::new();

    for path in paths {
        let before = old.get(path);
        let after = new.get(path);
        if before == after {
            continue;
        }
        out.push_str(&format!("diff --git a/{path} b/{path}\n"));
        out.push_str(&format!("--- a/{path}\n+++ b/{path}\n"));
        if let Some(text) = before {
            for line in text.lines() {
                out.push_str(&format!("-{line}\n"));
            }
        }
        if let Some(text) = after {
            for line in text.lines() {
                out.push_str(&format!("+{line}\n"));
            }
        }
    }
    out
}

impl Repo for FakeRepo {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn fetch_prune(&self) -> Result<()> {
        let mut state = self.lock();
        if state.offline {
            bail!("fatal: unable to access remote: Could not resolve host");
        }
        state.fetched = state.server.clone();
        Ok(())
    }

    fn list_remote_refs(&self) -> Result<Vec<String>> {
        Ok(self.lock().fetched.keys().cloned().collect())
    }

    fn resolve(&self, rev: &str) -> Result<Option<String>> {
        Ok(self.lock().resolve(&self.remote, rev))
    }

    fn log_range(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let state = self.lock();
        let base = state.resolve_or_err(&self.remote, base)?;
        let tip = state.resolve_or_err(&self.remote, tip)?;
        Ok(state.topo_from(&tip, &state.ancestors(&base)))
    }

    fn authors_of(&self, hashes: &[String]) -> Result<Vec<Author>> {
        let state = self.lock();
        hashes
            .iter()
            .map(|h| Ok(state.commit(h)?.author.clone()))
            .collect()
    }

    fn messages_of(&self, hashes: &[String]) -> Result<Vec<String>> {
        let state = self.lock();
        hashes
            .iter()
            .map(|h| Ok(state.commit(h)?.message.clone()))
            .collect()
    }

    fn raw_diff(&self, base: &str, tip: &str, _context_lines: u32) -> Result<String> {
        let state = self.lock();
        let base = state.resolve_or_err(&self.remote, base)?;
        let tip = state.resolve_or_err(&self.remote, tip)?;
        let merge_base = state.merge_base(&base, &tip);

        Ok(render_diff(
            &state.tree_at(merge_base.as_deref()),
            &state.tree_at(Some(&tip)),
        ))
    }

    fn checkout_force_from_ref(&self, local: &str, upstream: &str) -> Result<()> {
        let mut state = self.lock();
        let hash = state.resolve_or_err(&self.remote, upstream)?;
        state.local.insert(local.to_string(), hash);
        state.head = Some(local.to_string());
        state.dirty = false;
        Ok(())
    }

    fn push_asymmetrical(&self, src: &str, dst: &str) -> Result<()> {
        let mut state = self.lock();
        let hash = state.resolve_or_err(&self.remote, src)?;
        state.push(Some(&hash), dst, false)
    }

    fn push_asymmetrical_force(&self, src: &str, dst: &str) -> Result<()> {
        let mut state = self.lock();
        let hash = state.resolve_or_err(&self.remote, src)?;
        state.push(Some(&hash), dst, true)
    }

    fn move_asymmetrical(&self, src: &str, old_dst: &str, new_dst: &str) -> Result<()> {
        let mut state = self.lock();
        let hash = state.resolve_or_err(&self.remote, src)?;
        if !state.server.contains_key(old_dst) {
            bail!("error: unable to delete '{old_dst}': remote ref does not exist");
        }
        state.push(Some(&hash), new_dst, false)?;
        state.push(None, old_dst, true)
    }

    fn delete_remote(&self, name: &str) -> Result<()> {
        self.lock().push(None, name, true)
    }

    fn squash_merge(&self, from: &str, message: &str, author: &Author) -> Result<SquashOutcome> {
        let mut state = self.lock();
        let head = state
            .head
            .clone()
            .ok_or_else(|| anyhow!("fatal: no branch checked out"))?;
        let ours = state.resolve_or_err(&self.remote, &head)?;
        let theirs = state.resolve_or_err(&self.remote, from)?;

        let merge_base = state.merge_base(&ours, &theirs);
        let base_tree = state.tree_at(merge_base.as_deref());
        let our_tree = state.tree_at(Some(&ours));
        let their_tree = state.tree_at(Some(&theirs));

        let mut merged = our_tree.clone();
        let mut conflicts = Vec::new();
        let paths: BTreeSet<&String> = base_tree.keys().chain(their_tree.keys()).collect();

        for path in paths {
            let base = base_tree.get(path);
            let theirs = their_tree.get(path);
            if base == theirs {
                continue;
            }
            let ours = our_tree.get(path);
            if ours != base && ours != theirs {
                conflicts.push(path.clone());
                continue;
            }
            match theirs {
                Some(content) => merged.insert(path.clone(), content.clone()),
                None => merged.remove(path),
            };
        }

        if !conflicts.is_empty() {
            state.dirty = true;
            let mut output = String::new();
            for path in &conflicts {
                output.push_str(&format!(
                    "Auto-merging {path}\nCONFLICT (content): Merge conflict in {path}\n"
                ));
            }
            output.push_str("Squash commit -- not updating HEAD\n");
            output.push_str("Automatic merge failed; fix conflicts and then commit the result.\n");
            return Ok(SquashOutcome::Failed { output });
        }

        if merged == our_tree {
            return Ok(SquashOutcome::Failed {
                output: "Already up to date.\nnothing to commit, working tree clean\n".to_string(),
            });
        }

        let hash = state.add_commit(FakeCommit {
            parents: vec![ours],
            author: author.clone(),
            message: message.to_string(),
            tree: merged,
        });
        state.local.insert(head, hash);

        Ok(SquashOutcome::Merged {
            output: "Squash commit -- not updating HEAD\n".to_string(),
        })
    }

    fn reset_hard(&self) -> Result<()> {
        self.lock().dirty = false;
        Ok(())
    }
}
