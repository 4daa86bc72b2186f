// Repo backed by a real clone: the git CLI for anything that talks to the
// remote or touches the work tree, git2 for reading objects and refs.

use anyhow::{anyhow, Context, Result};
use git2::{ErrorCode, Oid, Repository, Sort};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

use super::{Author, Repo, SquashOutcome};

pub struct GitRepo {
    path: PathBuf,
    remote: String,
    committer: Option<Author>,
}

impl GitRepo {
    pub fn open(path: &Path, remote: &str) -> Result<Self> {
        Repository::open(path)
            .with_context(|| format!("Failed to open git repository at {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            remote: remote.to_string(),
            committer: None,
        })
    }

    /// Identity used for commits arcyd makes when landing.
    pub fn with_committer(mut self, committer: Author) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn repository(&self) -> Result<Repository> {
        Repository::open(&self.path)
            .with_context(|| format!("Failed to open git repository at {}", self.path.display()))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.path).env("GIT_TERMINAL_PROMPT", "0");

        if let Some(committer) = &self.committer {
            cmd.arg("-c")
                .arg(format!("user.name={}", committer.name))
                .arg("-c")
                .arg(format!("user.email={}", committer.email));
        }

        cmd.args(args);
        cmd
    }

    /// Run git and hand back the raw output, successful or not.
    fn git_output(&self, args: &[&str]) -> Result<Output> {
        debug!(repo = %self.path.display(), ?args, "git");
        self.command(args)
            .output()
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    /// Run git, failing with its stderr if it exits non-zero.
    fn git(&self, args: &[&str]) -> Result<String> {
        let output = self.git_output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }

        String::from_utf8(output.stdout)
            .with_context(|| format!("Invalid UTF-8 in output of git {}", args.join(" ")))
    }

    fn commit_id(repo: &Repository, rev: &str) -> Result<Oid> {
        let object = repo
            .revparse_single(rev)
            .with_context(|| format!("Failed to resolve '{rev}'"))?;
        let commit = object
            .peel_to_commit()
            .with_context(|| format!("'{rev}' is not a commit"))?;
        Ok(commit.id())
    }

    fn find_commits<T>(
        &self,
        hashes: &[String],
        mut f: impl FnMut(&git2::Commit) -> T,
    ) -> Result<Vec<T>> {
        let repo = self.repository()?;
        hashes
            .iter()
            .map(|hash| {
                let oid = Oid::from_str(hash).with_context(|| format!("Invalid hash '{hash}'"))?;
                let commit = repo
                    .find_commit(oid)
                    .with_context(|| format!("Commit {hash} not found"))?;
                Ok(f(&commit))
            })
            .collect()
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

impl Repo for GitRepo {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn fetch_prune(&self) -> Result<()> {
        self.git(&["fetch", "--prune", &self.remote])?;
        Ok(())
    }

    fn list_remote_refs(&self) -> Result<Vec<String>> {
        let repo = self.repository()?;
        let prefix = format!("refs/remotes/{}/", self.remote);

        let mut names = Vec::new();
        for reference in repo.references()? {
            let reference = reference?;
            let Some(name) = reference.name().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            if name != "HEAD" {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    fn resolve(&self, rev: &str) -> Result<Option<String>> {
        let repo = self.repository()?;
        let object = match repo.revparse_single(rev) {
            Ok(object) => object,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to resolve '{rev}'")),
        };

        let commit = object
            .peel_to_commit()
            .with_context(|| format!("'{rev}' is not a commit"))?;
        Ok(Some(commit.id().to_string()))
    }

    fn log_range(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let repo = self.repository()?;
        let mut walk = repo.revwalk()?;
        walk.push(Self::commit_id(&repo, tip)?)?;
        walk.hide(Self::commit_id(&repo, base)?)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        walk.map(|oid| Ok(oid?.to_string())).collect()
    }

    fn authors_of(&self, hashes: &[String]) -> Result<Vec<Author>> {
        self.find_commits(hashes, |commit| {
            let author = commit.author();
            Author {
                name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
                email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            }
        })
    }

    fn messages_of(&self, hashes: &[String]) -> Result<Vec<String>> {
        self.find_commits(hashes, |commit| {
            String::from_utf8_lossy(commit.message_bytes()).into_owned()
        })
    }

    fn raw_diff(&self, base: &str, tip: &str, context_lines: u32) -> Result<String> {
        let unified = format!("--unified={context_lines}");
        let range = format!("{base}...{tip}");
        let args: [&str; 5] = ["diff", "--no-color", "--no-ext-diff", &unified, &range];
        let output = self.git_output(&args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }

        // branches may carry files in any encoding
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn checkout_force_from_ref(&self, local: &str, upstream: &str) -> Result<()> {
        self.git(&["checkout", "--force", "-B", local, upstream])?;
        Ok(())
    }

    fn push_asymmetrical(&self, src: &str, dst: &str) -> Result<()> {
        let refspec = format!("{src}:refs/heads/{dst}");
        self.git(&["push", &self.remote, &refspec])?;
        Ok(())
    }

    fn push_asymmetrical_force(&self, src: &str, dst: &str) -> Result<()> {
        let refspec = format!("{src}:refs/heads/{dst}");
        self.git(&["push", "--force", &self.remote, &refspec])?;
        Ok(())
    }

    fn move_asymmetrical(&self, src: &str, old_dst: &str, new_dst: &str) -> Result<()> {
        let create = format!("{src}:refs/heads/{new_dst}");
        let delete = format!(":refs/heads/{old_dst}");
        self.git(&["push", "--atomic", &self.remote, &create, &delete])?;
        Ok(())
    }

    fn delete_remote(&self, name: &str) -> Result<()> {
        let refspec = format!(":refs/heads/{name}");
        self.git(&["push", &self.remote, &refspec])?;
        Ok(())
    }

    fn squash_merge(&self, from: &str, message: &str, author: &Author) -> Result<SquashOutcome> {
        let merge = self.git_output(&["merge", "--squash", from])?;
        let mut output = combined_output(&merge);

        if !merge.status.success() {
            return Ok(SquashOutcome::Failed { output });
        }

        let ident = author.ident();
        let commit = self.git_output(&["commit", "--author", &ident, "-m", message])?;
        if !commit.status.success() {
            output.push_str(&combined_output(&commit));
            return Ok(SquashOutcome::Failed { output });
        }

        Ok(SquashOutcome::Merged { output })
    }

    fn reset_hard(&self) -> Result<()> {
        self.git(&["reset", "--hard"])?;
        self.git(&["clean", "-f", "-d"])?;
        Ok(())
    }
}
