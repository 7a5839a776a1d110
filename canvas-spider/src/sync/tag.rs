use std::collections::HashSet;
use std::path::Path;

use super::paths::local_path_for;
use super::tree::{FolderId, FolderTree, Materialized, Node};
use crate::config::{ByteLimit, UpdateMethod};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagPolicy {
    pub update: UpdateMethod,
    pub max_file_size: ByteLimit,
    pub max_total_size: ByteLimit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSummary {
    pub files_tagged: usize,
    pub folders_tagged: usize,
    pub skipped_existing: usize,
    pub skipped_oversize: usize,
    pub skipped_quota: usize,
    pub bytes_tagged: u64,
}

/// Marks the files that need downloading and the folders that need creating,
/// comparing the materialized names against the local filesystem.
pub async fn tag_tree(tree: &mut FolderTree<Materialized>, policy: &TagPolicy) -> TagSummary {
    let mut summary = TagSummary::default();
    let order = tree.walk();
    let root = tree.folder(tree.root()).name().to_string();
    let mut needed: HashSet<FolderId> = HashSet::new();

    for node in &order {
        let Node::File(id) = *node else { continue };
        let leaf = tree.file(id);
        let size = leaf.size().unwrap_or(0);

        if policy.update == UpdateMethod::NewFileOnly && exists(&root, leaf.name()).await {
            summary.skipped_existing += 1;
            continue;
        }
        if policy.max_file_size.bytes().is_some_and(|max| size > max) {
            tracing::info!(name = leaf.name(), size, "skipping file above maxFileSize");
            summary.skipped_oversize += 1;
            continue;
        }
        if policy
            .max_total_size
            .bytes()
            .is_some_and(|max| summary.bytes_tagged.saturating_add(size) > max)
        {
            tracing::info!(name = leaf.name(), size, "skipping file, maxTotalSize reached");
            summary.skipped_quota += 1;
            continue;
        }

        needed.insert(leaf.parent());
        summary.bytes_tagged += size;
        summary.files_tagged += 1;
        tree.set_file_tag(id, true);
    }

    // Children come after their parents in walk order, so a reverse pass sees
    // every subfolder before the folder containing it.
    for node in order.iter().rev() {
        let Node::Folder(id) = *node else { continue };
        if !needed.contains(&id) {
            continue;
        }
        if let Some(parent) = tree.folder(id).parent() {
            needed.insert(parent);
        }
        if !exists(&root, tree.folder(id).name()).await {
            tree.set_folder_tag(id, true);
            summary.folders_tagged += 1;
        }
    }

    tracing::debug!(
        files = summary.files_tagged,
        folders = summary.folders_tagged,
        existing = summary.skipped_existing,
        "tagged tree"
    );
    summary
}

async fn exists(root: &str, name: &str) -> bool {
    match local_path_for(root, name) {
        Ok(path) => tokio::fs::try_exists(Path::new(&path))
            .await
            .unwrap_or(false),
        Err(_) => false,
    }
}
