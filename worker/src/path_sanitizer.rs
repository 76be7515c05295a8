// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer
//!
//! Resolves tool-supplied paths against the workspace root. Only relative
//! paths made of normal components are accepted, and the deepest part of the
//! result that exists on disk must canonicalize to a location under the root,
//! so symlinks inside the workspace cannot point a tool outside it.

use std::path::{Component, Path, PathBuf};

use crate::error::WorkerError;

const MAX_PATH_LEN: usize = 4096;

/// Join `relative` onto `root` after validation.
///
/// `""` and `"."` resolve to the root itself.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, WorkerError> {
    if relative.len() > MAX_PATH_LEN {
        return Err(WorkerError::InvalidPath(format!("path longer than {MAX_PATH_LEN} bytes")));
    }
    if relative.contains('\0') {
        return Err(WorkerError::InvalidPath("path contains a null byte".to_string()));
    }

    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                tracing::warn!(path = %relative, "Rejected path with '..' component");
                return Err(WorkerError::PathTraversal(relative.to_string()));
            }
            Component::RootDir | Component::Prefix(_) => {
                tracing::warn!(path = %relative, "Rejected absolute path");
                return Err(WorkerError::PathTraversal(relative.to_string()));
            }
        }
    }
    ensure_within_root(root, &resolved, relative)?;
    Ok(resolved)
}

/// Follow symlinks in the longest existing prefix of `resolved` and require
/// the real location to stay under the real root.
///
/// A root that does not exist yet holds nothing to follow.
fn ensure_within_root(root: &Path, resolved: &Path, relative: &str) -> Result<(), WorkerError> {
    let Ok(real_root) = root.canonicalize() else {
        return Ok(());
    };

    for ancestor in resolved.ancestors() {
        if !ancestor.starts_with(root) {
            break;
        }
        if ancestor.symlink_metadata().is_err() {
            continue;
        }
        // Dangling links fail to canonicalize; writing through one would
        // create its target wherever it points.
        let escapes = match ancestor.canonicalize() {
            Ok(real) => !real.starts_with(&real_root),
            Err(_) => true,
        };
        if escapes {
            tracing::warn!(path = %relative, "Rejected path resolving outside the workspace");
            return Err(WorkerError::PathTraversal(relative.to_string()));
        }
        return Ok(());
    }
    Ok(())
}
