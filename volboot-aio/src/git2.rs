/*
File: volboot-aio/src/git2.rs
Purpose: Git operations using git2 (fast-forward updates, recursive clones).
*/
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{FetchOptions, Oid, Repository};
use tracing::{debug, error, warn};
use volboot_common::error::{BootError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    FastForwarded { from: Oid, to: Oid },
    /// Local history diverged from upstream; left untouched.
    Diverged,
}

/// Fetches `origin` and fast-forwards the checked-out branch to its remote
/// counterpart. Never merges. Local changes that would be overwritten make
/// the checkout fail before any ref moves. Blocking.
pub fn update_repo(repo_path: &Path) -> Result<UpdateOutcome> {
    debug!("Updating git repository at: {}", repo_path.display());

    let repo = Repository::open(repo_path).map_err(|e| {
        error!("Failed open repo {}: {}", repo_path.display(), e);
        BootError::from(e)
    })?;

    let head = repo.head()?;
    if !head.is_branch() {
        return Err(BootError::Generic(format!(
            "{} has a detached HEAD; refusing to update",
            repo_path.display()
        )));
    }
    let branch = head
        .shorthand()
        .ok_or_else(|| BootError::Generic("HEAD branch name is not UTF-8".to_string()))?
        .to_string();
    let local_branch_name = format!("refs/heads/{branch}");
    let remote_branch_name = format!("refs/remotes/origin/{branch}");
    let head_oid = head
        .target()
        .ok_or_else(|| BootError::Generic("HEAD has no target".to_string()))?;
    drop(head);

    let mut remote = repo.find_remote("origin")?;
    let mut fetch_options = FetchOptions::new();
    debug!("Fetching origin/{} for {}", branch, repo_path.display());
    remote.fetch(
        &[format!("{local_branch_name}:{remote_branch_name}")],
        Some(&mut fetch_options),
        None,
    )?;

    let remote_ref = repo.find_reference(&remote_branch_name)?;
    let fetch_commit = repo.reference_to_annotated_commit(&remote_ref)?;
    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

    if analysis.is_up_to_date() {
        debug!("Repository {} already up-to-date.", repo_path.display());
        return Ok(UpdateOutcome::UpToDate);
    }

    if analysis.is_fast_forward() {
        let target = repo.find_object(fetch_commit.id(), None)?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        let mut local_ref = repo.find_reference(&local_branch_name)?;
        local_ref.set_target(
            fetch_commit.id(),
            &format!("Fast-forward {local_branch_name} to origin"),
        )?;
        repo.set_head(&local_branch_name)?;
        debug!(
            "Fast-forwarded '{}' in {} ({} -> {})",
            branch,
            repo_path.display(),
            head_oid,
            fetch_commit.id()
        );
        return Ok(UpdateOutcome::FastForwarded {
            from: head_oid,
            to: fetch_commit.id(),
        });
    }

    if analysis.is_normal() {
        warn!(
            "Repository {} has diverged from origin/{}; leaving it as is.",
            repo_path.display(),
            branch
        );
        return Ok(UpdateOutcome::Diverged);
    }

    Err(BootError::Generic(format!(
        "Unexpected repository state in {}: {:?}",
        repo_path.display(),
        analysis
    )))
}

/// Clones `url` at `branch` into `dest` and initialises submodules
/// recursively. Blocking.
pub fn clone_recursive(url: &str, branch: &str, dest: &Path) -> Result<()> {
    debug!("Cloning {} ({}) into {}", url, branch, dest.display());
    let repo = RepoBuilder::new().branch(branch).clone(url, dest)?;
    update_submodules(&repo)?;
    Ok(())
}

fn update_submodules(repo: &Repository) -> Result<()> {
    for mut submodule in repo.submodules()? {
        debug!(
            "Updating submodule {}",
            submodule.name().unwrap_or("<non-utf8>")
        );
        submodule.update(true, None)?;
        let sub_repo = submodule.open()?;
        update_submodules(&sub_repo)?;
    }
    Ok(())
}

pub async fn update_repo_async(repo_path: PathBuf) -> Result<UpdateOutcome> {
    tokio::task::spawn_blocking(move || update_repo(&repo_path))
        .await
        .map_err(|e| BootError::Generic(format!("JoinError in git update: {e}")))?
}

pub async fn clone_recursive_async(url: String, branch: String, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || clone_recursive(&url, &branch, &dest))
        .await
        .map_err(|e| BootError::Generic(format!("JoinError in git clone: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::fs;

    use git2::{RepositoryInitOptions, Signature};

    use super::*;

    fn init_origin(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(path, &opts).unwrap()
    }

    fn commit_file(repo: &Repository, name: &str, body: &str) -> Oid {
        let workdir = repo.workdir().unwrap();
        fs::write(workdir.join(name), body).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("volboot", "volboot@example.invalid").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, name, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn fast_forwards_to_new_upstream_commit() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        commit_file(&origin, "main.py", "v1");

        let clone_path = dir.path().join("clone");
        clone_recursive(origin_path.to_str().unwrap(), "main", &clone_path).unwrap();
        assert_eq!(update_repo(&clone_path).unwrap(), UpdateOutcome::UpToDate);

        let new_head = commit_file(&origin, "main.py", "v2");
        match update_repo(&clone_path).unwrap() {
            UpdateOutcome::FastForwarded { to, .. } => assert_eq!(to, new_head),
            other => panic!("expected fast-forward, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(clone_path.join("main.py")).unwrap(), "v2");
    }

    #[test]
    fn diverged_history_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        commit_file(&origin, "a.txt", "base");

        let clone_path = dir.path().join("clone");
        clone_recursive(origin_path.to_str().unwrap(), "main", &clone_path).unwrap();
        let clone = Repository::open(&clone_path).unwrap();
        let local_head = commit_file(&clone, "local.txt", "mine");
        commit_file(&origin, "a.txt", "theirs");

        assert_eq!(update_repo(&clone_path).unwrap(), UpdateOutcome::Diverged);
        assert_eq!(clone.head().unwrap().target(), Some(local_head));
    }

    #[test]
    fn non_repository_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(update_repo(dir.path()).is_err());
    }
}
