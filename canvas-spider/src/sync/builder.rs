//! Reconstructs a [`FolderTree`] from flat folder and file listings.

use std::collections::{HashMap, HashSet};

use canvas_core::{File, Folder};

use super::paths::sanitize_segment;
use super::tree::{Bare, FolderId, FolderTree};

#[derive(Debug)]
pub struct BuiltTree {
    pub tree: FolderTree<Bare>,
    /// Folders that could not be attached: repeated ids and parent cycles.
    pub dropped_folders: usize,
    /// Files that lived in a dropped folder.
    pub dropped_files: usize,
    /// Nodes whose sanitized name clashed with a sibling and got an id suffix.
    pub renamed: usize,
}

/// Builder-only view of a folder record; ids never leave this module.
struct FolderShell<'a> {
    id: u64,
    parent_id: Option<u64>,
    name: &'a str,
    files: Vec<&'a File>,
}

pub fn build_tree(root_name: impl Into<String>, folders: &[Folder], files: &[File]) -> BuiltTree {
    let mut tree = FolderTree::new(root_name);
    let mut names = SiblingNames::default();
    let mut dropped_folders = 0;

    let mut shells: Vec<FolderShell<'_>> = Vec::with_capacity(folders.len());
    let mut shell_index: HashMap<u64, usize> = HashMap::with_capacity(folders.len());
    for folder in folders {
        if shell_index.contains_key(&folder.id) {
            tracing::warn!(folder_id = folder.id, "duplicate folder id, keeping the first record");
            dropped_folders += 1;
            continue;
        }
        shell_index.insert(folder.id, shells.len());
        shells.push(FolderShell {
            id: folder.id,
            parent_id: folder.parent_folder_id,
            name: &folder.name,
            files: Vec::new(),
        });
    }

    let mut root_files = Vec::new();
    for file in files {
        match shell_index.get(&file.folder_id) {
            Some(&index) => shells[index].files.push(file),
            None => root_files.push(file),
        }
    }
    let root = tree.root();
    for file in root_files {
        attach_file(&mut tree, &mut names, root, file);
    }

    let (mut frontier, mut remaining): (Vec<_>, Vec<_>) = shells
        .into_iter()
        .partition(|shell| is_top_level(shell, &shell_index));

    let mut placed: HashMap<u64, FolderId> = HashMap::with_capacity(shell_index.len());
    for shell in &frontier {
        place(&mut tree, &mut names, &mut placed, root, shell);
    }

    let mut depth = 1;
    while !remaining.is_empty() {
        let frontier_ids: HashSet<u64> = frontier.iter().map(|shell| shell.id).collect();
        let (next, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|shell| {
            shell
                .parent_id
                .is_some_and(|parent| frontier_ids.contains(&parent))
        });
        remaining = rest;

        if next.is_empty() {
            break;
        }
        tracing::debug!(depth, attached = next.len(), pending = remaining.len(), "tree level");

        for shell in &next {
            let Some(parent) = shell.parent_id.and_then(|id| placed.get(&id).copied()) else {
                continue;
            };
            place(&mut tree, &mut names, &mut placed, parent, shell);
        }
        frontier = next;
        depth += 1;
    }

    let dropped_files = remaining.iter().map(|shell| shell.files.len()).sum();
    if !remaining.is_empty() {
        let ids: Vec<u64> = remaining.iter().map(|shell| shell.id).collect();
        tracing::warn!(
            dropped = remaining.len(),
            dropped_files,
            folder_ids = ?ids,
            "folders with cyclic parent references were not attached"
        );
    }
    dropped_folders += remaining.len();

    BuiltTree {
        tree,
        dropped_folders,
        dropped_files,
        renamed: names.renamed,
    }
}

/// Top-level folders have no parent, point at themselves, or point at an id
/// that is not in the listing.
fn is_top_level(shell: &FolderShell<'_>, known: &HashMap<u64, usize>) -> bool {
    match shell.parent_id {
        None => true,
        Some(parent) => parent == shell.id || !known.contains_key(&parent),
    }
}

fn place(
    tree: &mut FolderTree<Bare>,
    names: &mut SiblingNames,
    placed: &mut HashMap<u64, FolderId>,
    parent: FolderId,
    shell: &FolderShell<'_>,
) {
    let name = names.claim(parent, shell.name, shell.id, false);
    let id = tree.add_folder(parent, name);
    placed.insert(shell.id, id);
    for file in &shell.files {
        attach_file(tree, names, id, file);
    }
}

fn attach_file(
    tree: &mut FolderTree<Bare>,
    names: &mut SiblingNames,
    folder: FolderId,
    file: &File,
) {
    let name = names.claim(folder, &file.filename, file.id, true);
    tree.add_file(folder, file.id, name, file.url.as_str(), file.size);
}

/// Sanitized names already used inside each folder. Folders and files share
/// one namespace per parent since both end up as directory entries.
#[derive(Default)]
struct SiblingNames {
    taken: HashMap<FolderId, HashSet<String>>,
    renamed: usize,
}

impl SiblingNames {
    fn claim(
        &mut self,
        parent: FolderId,
        raw: &str,
        remote_id: u64,
        keep_extension: bool,
    ) -> String {
        let taken = self.taken.entry(parent).or_default();
        let name = sanitize_segment(raw).into_owned();
        if taken.insert(name.clone()) {
            return name;
        }

        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, ext)) if keep_extension && !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (name.as_str(), String::new()),
        };
        let mut attempt = 1;
        let unique = loop {
            let candidate = if attempt == 1 {
                format!("{stem} ({remote_id}){extension}")
            } else {
                format!("{stem} ({remote_id}-{attempt}){extension}")
            };
            if taken.insert(candidate.clone()) {
                break candidate;
            }
            attempt += 1;
        };
        tracing::warn!(name = raw, renamed = %unique, "sibling name clash after sanitizing");
        self.renamed += 1;
        unique
    }
}
