//! Diff acquisition via git2.
//!
//! Computes the patch a pull request introduces: everything on `HEAD` since
//! it diverged from the base branch, the same range `git diff base...HEAD`
//! reports.

use std::path::Path;

use git2::{DiffFindOptions, DiffFormat, DiffOptions, Object, Repository};
use prwarden_core::{DiffDocument, WardenError};
use tracing::{debug, info};

use crate::parser::parse_unified_diff;

/// Produce the raw unified diff of `HEAD` against `base_branch`.
///
/// The base is resolved as given first (`main`, a SHA, `refs/...`), then as
/// `origin/<base_branch>`, which is what CI checkouts usually have.
///
/// # Errors
///
/// Returns [`WardenError::DiffUnavailable`] if `workdir` is not inside a
/// repository, the base cannot be resolved, or the two histories share no
/// merge base.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use prwarden_difflens::acquire::acquire_diff_text;
///
/// let text = acquire_diff_text(Path::new("."), "main").unwrap();
/// println!("{text}");
/// ```
pub fn acquire_diff_text(workdir: &Path, base_branch: &str) -> Result<String, WardenError> {
    let repo = Repository::discover(workdir).map_err(|e| {
        WardenError::DiffUnavailable(format!(
            "{} is not a git checkout: {}",
            workdir.display(),
            e.message()
        ))
    })?;

    let base = resolve_base(&repo, base_branch)?;
    let base_commit = base
        .peel_to_commit()
        .map_err(|e| unavailable(base_branch, e))?;
    let head_commit = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| WardenError::DiffUnavailable(format!("cannot resolve HEAD: {}", e.message())))?;

    let merge_base = repo
        .merge_base(base_commit.id(), head_commit.id())
        .map_err(|e| unavailable(base_branch, e))?;
    debug!(
        base = %base_commit.id(),
        head = %head_commit.id(),
        merge_base = %merge_base,
        "resolved diff range"
    );

    let base_tree = repo
        .find_commit(merge_base)
        .and_then(|c| c.tree())
        .map_err(|e| unavailable(base_branch, e))?;
    let head_tree = head_commit
        .tree()
        .map_err(|e| unavailable(base_branch, e))?;

    let mut opts = DiffOptions::new();
    opts.context_lines(3);
    let mut diff = repo
        .diff_tree_to_tree(Some(&base_tree), Some(&head_tree), Some(&mut opts))
        .map_err(|e| unavailable(base_branch, e))?;

    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))
        .map_err(|e| unavailable(base_branch, e))?;

    let mut patch: Vec<u8> = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let origin = line.origin();
        if matches!(origin, '+' | '-' | ' ') {
            patch.push(origin as u8);
        }
        patch.extend_from_slice(line.content());
        true
    })
    .map_err(|e| unavailable(base_branch, e))?;

    let text = String::from_utf8_lossy(&patch).into_owned();
    info!(bytes = text.len(), base = base_branch, "acquired diff");
    Ok(text)
}

/// Acquire and parse the diff in one step.
///
/// # Errors
///
/// Returns [`WardenError::DiffUnavailable`] for git or parse failures.
pub fn acquire_diff(workdir: &Path, base_branch: &str) -> Result<DiffDocument, WardenError> {
    let text = acquire_diff_text(workdir, base_branch)?;
    parse_unified_diff(&text)
}

fn resolve_base<'r>(repo: &'r Repository, base_branch: &str) -> Result<Object<'r>, WardenError> {
    let candidates = [
        base_branch.to_string(),
        format!("origin/{base_branch}"),
        format!("refs/remotes/origin/{base_branch}"),
    ];
    for rev in &candidates {
        if let Ok(obj) = repo.revparse_single(rev) {
            debug!(rev = %rev, "resolved base reference");
            return Ok(obj);
        }
    }
    Err(WardenError::DiffUnavailable(format!(
        "base branch '{base_branch}' is not reachable (tried {})",
        candidates.join(", ")
    )))
}

fn unavailable(base_branch: &str, e: git2::Error) -> WardenError {
    WardenError::DiffUnavailable(format!(
        "cannot diff against '{base_branch}': {}",
        e.message()
    ))
}
