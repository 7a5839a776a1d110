use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("materialized path is empty")]
    Empty,
    #[error("materialized path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Makes a remote name safe to use as exactly one local path segment.
pub fn sanitize_segment(name: &str) -> Cow<'_, str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Cow::Borrowed("_");
    }
    if trimmed == "." || trimmed == ".." {
        return Cow::Owned(trimmed.replace('.', "_"));
    }
    if trimmed.contains(['/', '\\', '\0']) || trimmed.len() != name.len() {
        return Cow::Owned(trimmed.replace(['/', '\\', '\0'], "_"));
    }
    Cow::Borrowed(name)
}

/// Maps a materialized (slash-joined) node name to a local path.
///
/// `root` is the materialized name of the tree root. It comes from the
/// configured base directory and is taken as is; everything below it must be
/// plain segments, so a node can never resolve outside the root.
pub fn local_path_for(root: &str, materialized: &str) -> Result<PathBuf, PathError> {
    if materialized.is_empty() {
        return Err(PathError::Empty);
    }

    let path = Path::new(materialized);
    if let Some(Component::Prefix(prefix)) = path.components().next() {
        return Err(PathError::UnsupportedComponent(
            prefix.as_os_str().to_string_lossy().into_owned(),
        ));
    }
    let below = path.strip_prefix(root).unwrap_or(path);
    for component in below.components() {
        match component {
            Component::Normal(_) | Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(
                    component.as_os_str().to_string_lossy().into_owned(),
                ));
            }
        }
    }
    Ok(path.to_path_buf())
}

pub fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
