//! Code and model asset acquisition at process start.
//!
//! The checkout in `code_dir` is brought to the tip of the configured branch: cloned on
//! first start, fetched and hard-reset afterwards. Running it again without a remote
//! change leaves the tree untouched. An unreachable remote is an error, never a silent
//! fallback to whatever is already on disk.

use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Oid, Repository, ResetType};
use tracing::info;

use crate::config::BootstrapConfig;
use crate::error::{WorkerError, WorkerResult};

/// Result of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Commit the checkout now points at
    pub commit: String,
    /// Whether the checkout moved
    pub changed: bool,
}

impl SyncOutcome {
    pub fn short_commit(&self) -> &str {
        &self.commit[..7.min(self.commit.len())]
    }
}

fn git_err(context: &str) -> impl Fn(git2::Error) -> WorkerError + '_ {
    move |e| WorkerError::bootstrap(format!("{}: {}", context, e.message()))
}

/// Sync `config.code_dir` to `config.branch` of `config.repo_url`. Blocking.
pub fn sync_code(config: &BootstrapConfig) -> WorkerResult<SyncOutcome> {
    let dir = &config.code_dir;

    let outcome = if dir.join(".git").exists() {
        update(config)?
    } else {
        clone(config)?
    };

    info!(
        repo = %config.repo_url,
        branch = %config.branch,
        dir = %dir.display(),
        commit = outcome.short_commit(),
        changed = outcome.changed,
        "Code synced"
    );
    Ok(outcome)
}

fn clone(config: &BootstrapConfig) -> WorkerResult<SyncOutcome> {
    let dir = &config.code_dir;
    if dir.exists() && !is_empty_dir(dir)? {
        return Err(WorkerError::bootstrap(format!(
            "{} exists, is not empty and is not a git checkout",
            dir.display()
        )));
    }

    let repo = RepoBuilder::new()
        .branch(&config.branch)
        .clone(&config.repo_url, dir)
        .map_err(git_err("clone failed"))?;

    let head = head_commit(&repo)?;
    Ok(SyncOutcome {
        commit: head.to_string(),
        changed: true,
    })
}

fn update(config: &BootstrapConfig) -> WorkerResult<SyncOutcome> {
    let repo = Repository::open(&config.code_dir).map_err(git_err("open checkout"))?;
    repo.remote_set_url("origin", &config.repo_url)
        .map_err(git_err("set origin"))?;

    let before = head_commit(&repo).ok();

    let refspec = format!(
        "+refs/heads/{branch}:refs/remotes/origin/{branch}",
        branch = config.branch
    );
    let mut remote = repo.find_remote("origin").map_err(git_err("find origin"))?;
    remote
        .fetch(&[refspec.as_str()], None, None)
        .map_err(git_err("fetch failed"))?;

    let tracking = format!("refs/remotes/origin/{}", config.branch);
    let target = repo
        .find_reference(&tracking)
        .and_then(|r| r.peel_to_commit())
        .map_err(git_err("branch not found on remote"))?;

    // Point the local branch at the fetched commit and make the worktree match exactly.
    let local = format!("refs/heads/{}", config.branch);
    repo.reference(&local, target.id(), true, "vgen bootstrap sync")
        .map_err(git_err("update branch"))?;
    repo.set_head(&local).map_err(git_err("set HEAD"))?;
    repo.reset(target.as_object(), ResetType::Hard, Some(CheckoutBuilder::new().force()))
        .map_err(git_err("reset failed"))?;

    Ok(SyncOutcome {
        commit: target.id().to_string(),
        changed: before != Some(target.id()),
    })
}

fn head_commit(repo: &Repository) -> WorkerResult<Oid> {
    repo.head()
        .and_then(|h| h.peel_to_commit())
        .map(|c| c.id())
        .map_err(git_err("resolve HEAD"))
}

fn is_empty_dir(dir: &Path) -> WorkerResult<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};
    use std::fs;
    use tempfile::TempDir;

    fn init_remote() -> (TempDir, Repository) {
        let tmp = TempDir::new().unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(tmp.path(), &opts).unwrap();
        (tmp, repo)
    }

    fn commit_file(repo: &Repository, name: &str, contents: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), contents).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

        let sig = Signature::now("test", "test@test.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, "update", &tree, &parent_refs)
            .unwrap()
    }

    fn config_for(remote: &TempDir, checkout: &Path) -> BootstrapConfig {
        BootstrapConfig {
            repo_url: remote.path().to_string_lossy().to_string(),
            branch: "main".to_string(),
            code_dir: checkout.to_path_buf(),
        }
    }

    #[test]
    fn test_first_sync_clones() {
        let (remote_dir, remote) = init_remote();
        let oid = commit_file(&remote, "handler.txt", "v1");

        let work = TempDir::new().unwrap();
        let checkout = work.path().join("code");
        let outcome = sync_code(&config_for(&remote_dir, &checkout)).unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.commit, oid.to_string());
        assert_eq!(fs::read_to_string(checkout.join("handler.txt")).unwrap(), "v1");
    }

    #[test]
    fn test_repeated_sync_is_idempotent() {
        let (remote_dir, remote) = init_remote();
        commit_file(&remote, "handler.txt", "v1");

        let work = TempDir::new().unwrap();
        let checkout = work.path().join("code");
        let config = config_for(&remote_dir, &checkout);

        let first = sync_code(&config).unwrap();
        let second = sync_code(&config).unwrap();
        let third = sync_code(&config).unwrap();

        assert_eq!(first.commit, second.commit);
        assert!(!second.changed);
        assert!(!third.changed);
        assert_eq!(fs::read_to_string(checkout.join("handler.txt")).unwrap(), "v1");
    }

    #[test]
    fn test_sync_picks_up_remote_change_and_discards_local_edits() {
        let (remote_dir, remote) = init_remote();
        commit_file(&remote, "handler.txt", "v1");

        let work = TempDir::new().unwrap();
        let checkout = work.path().join("code");
        let config = config_for(&remote_dir, &checkout);
        sync_code(&config).unwrap();

        fs::write(checkout.join("handler.txt"), "local edit").unwrap();
        let new_oid = commit_file(&remote, "handler.txt", "v2");

        let outcome = sync_code(&config).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.commit, new_oid.to_string());
        assert_eq!(fs::read_to_string(checkout.join("handler.txt")).unwrap(), "v2");
    }

    #[test]
    fn test_unreachable_remote_fails_loudly() {
        let work = TempDir::new().unwrap();
        let config = BootstrapConfig {
            repo_url: work.path().join("missing-remote").to_string_lossy().to_string(),
            branch: "main".to_string(),
            code_dir: work.path().join("code"),
        };
        let err = sync_code(&config).unwrap_err();
        assert!(matches!(err, WorkerError::Bootstrap(_)));
    }

    #[test]
    fn test_refuses_to_clone_over_foreign_directory() {
        let (remote_dir, remote) = init_remote();
        commit_file(&remote, "handler.txt", "v1");

        let work = TempDir::new().unwrap();
        let checkout = work.path().join("code");
        fs::create_dir_all(&checkout).unwrap();
        fs::write(checkout.join("stale.txt"), "old").unwrap();

        let err = sync_code(&config_for(&remote_dir, &checkout)).unwrap_err();
        assert!(err.to_string().contains("not a git checkout"));
    }
}
