// volboot-net/src/registry.rs
//! URL shapes of the artifact registries the pipeline pulls from.

/// Source snapshot of `owner/repo` at `branch` from a git host.
pub fn git_archive_url(git_base: &str, owner: &str, repo: &str, branch: &str) -> String {
    format!(
        "{}/{}/{}/archive/refs/heads/{}.zip",
        git_base.trim_end_matches('/'),
        owner,
        repo,
        branch
    )
}

/// Clone URL for `owner/repo`. Used when submodules are needed, which
/// source archives omit.
pub fn git_clone_url(git_base: &str, owner: &str, repo: &str) -> String {
    format!("{}/{}/{}.git", git_base.trim_end_matches('/'), owner, repo)
}

/// A single file from a model-hosting registry, optionally inside a subfolder.
pub fn model_file_url(
    model_base: &str,
    registry_id: &str,
    subfolder: Option<&str>,
    filename: &str,
) -> String {
    let base = model_base.trim_end_matches('/');
    let id = registry_id.trim_matches('/');
    match subfolder.map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()) {
        Some(sub) => format!("{base}/{id}/resolve/main/{sub}/{filename}"),
        None => format!("{base}/{id}/resolve/main/{filename}"),
    }
}
