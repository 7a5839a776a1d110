//! Arena-backed folder tree mirroring a course file area.
//!
//! Folders and files live in two vectors owned by [`FolderTree`] and refer to
//! each other by index. Parent links are plain ids, so upward lookups never
//! hold a borrow on the node they start from.

use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(usize);

/// Names are bare (one path segment each).
#[derive(Debug)]
pub enum Bare {}

/// Names are full slash-joined paths starting at the root.
#[derive(Debug)]
pub enum Materialized {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Folder(FolderId),
    File(LeafId),
}

#[derive(Debug, Clone)]
pub struct FolderNode {
    name: String,
    children: Vec<FolderId>,
    files: Vec<LeafId>,
    parent: Option<FolderId>,
    tag: bool,
}

impl FolderNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[FolderId] {
        &self.children
    }

    pub fn files(&self) -> &[LeafId] {
        &self.files
    }

    pub fn parent(&self) -> Option<FolderId> {
        self.parent
    }

    pub fn is_tagged(&self) -> bool {
        self.tag
    }
}

#[derive(Debug, Clone)]
pub struct FileLeaf {
    id: u64,
    name: String,
    source_url: String,
    size: Option<u64>,
    parent: FolderId,
    tag: bool,
}

impl FileLeaf {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn parent(&self) -> FolderId {
        self.parent
    }

    pub fn is_tagged(&self) -> bool {
        self.tag
    }
}

#[derive(Debug)]
pub struct FolderTree<P = Bare> {
    folders: Vec<FolderNode>,
    files: Vec<FileLeaf>,
    _phase: PhantomData<P>,
}

impl<P> FolderTree<P> {
    pub fn root(&self) -> FolderId {
        FolderId(0)
    }

    pub fn folder(&self, id: FolderId) -> &FolderNode {
        &self.folders[id.0]
    }

    pub fn file(&self, id: LeafId) -> &FileLeaf {
        &self.files[id.0]
    }

    /// Number of folders, root included.
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Depth-first, parent before children. A folder is followed by its own
    /// files and then by its subfolders.
    pub fn walk(&self) -> Vec<Node> {
        let mut order = Vec::with_capacity(self.folders.len() + self.files.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let folder = self.folder(id);
            order.push(Node::Folder(id));
            order.extend(folder.files.iter().copied().map(Node::File));
            stack.extend(folder.children.iter().rev().copied());
        }
        order
    }

    #[cfg(test)]
    pub fn find_folder(&self, name: &str) -> Option<FolderId> {
        self.folders
            .iter()
            .position(|folder| folder.name == name)
            .map(FolderId)
    }

    #[cfg(test)]
    pub fn find_file(&self, name: &str) -> Option<LeafId> {
        self.files
            .iter()
            .position(|leaf| leaf.name == name)
            .map(LeafId)
    }
}

impl FolderTree<Bare> {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            folders: vec![FolderNode {
                name: root_name.into(),
                children: Vec::new(),
                files: Vec::new(),
                parent: None,
                tag: false,
            }],
            files: Vec::new(),
            _phase: PhantomData,
        }
    }

    pub fn add_folder(&mut self, parent: FolderId, name: impl Into<String>) -> FolderId {
        let id = FolderId(self.folders.len());
        self.folders.push(FolderNode {
            name: name.into(),
            children: Vec::new(),
            files: Vec::new(),
            parent: Some(parent),
            tag: false,
        });
        self.folders[parent.0].children.push(id);
        id
    }

    pub fn add_file(
        &mut self,
        parent: FolderId,
        id: u64,
        name: impl Into<String>,
        source_url: impl Into<String>,
        size: Option<u64>,
    ) -> LeafId {
        let leaf = LeafId(self.files.len());
        self.files.push(FileLeaf {
            id,
            name: name.into(),
            source_url: source_url.into(),
            size,
            parent,
            tag: false,
        });
        self.folders[parent.0].files.push(leaf);
        leaf
    }

    /// Rewrites every name into its full path, top-down.
    ///
    /// Consumes the bare tree, so the rewrite happens exactly once per tree.
    pub fn materialize(mut self) -> FolderTree<Materialized> {
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if let Some(parent) = self.folders[id.0].parent {
                let full = join_path(&self.folders[parent.0].name, &self.folders[id.0].name);
                self.folders[id.0].name = full;
            }

            let folder = &self.folders[id.0];
            for leaf in &folder.files {
                let file = &mut self.files[leaf.0];
                file.name = join_path(&folder.name, &file.name);
            }
            stack.extend(folder.children.iter().rev().copied());
        }

        FolderTree {
            folders: self.folders,
            files: self.files,
            _phase: PhantomData,
        }
    }
}

impl FolderTree<Materialized> {
    pub fn set_folder_tag(&mut self, id: FolderId, tag: bool) {
        self.folders[id.0].tag = tag;
    }

    pub fn set_file_tag(&mut self, id: LeafId, tag: bool) {
        self.files[id.0].tag = tag;
    }

    /// Tags every folder and file.
    pub fn tag_all(&mut self) {
        self.folders.iter_mut().for_each(|folder| folder.tag = true);
        self.files.iter_mut().for_each(|leaf| leaf.tag = true);
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FolderTree {
        let mut tree = FolderTree::new("course");
        let unit = tree.add_folder(tree.root(), "Unit1");
        let lecture = tree.add_folder(unit, "Lecture");
        tree.add_folder(tree.root(), "Unit2");
        tree.add_file(lecture, 10, "slides.pdf", "https://files.example/10", Some(3));
        tree.add_file(unit, 11, "syllabus.pdf", "https://files.example/11", None);
        tree
    }

    #[test]
    fn materialize_joins_ancestor_names() {
        let tree = sample().materialize();

        let names: Vec<&str> = tree
            .walk()
            .into_iter()
            .map(|node| match node {
                Node::Folder(id) => tree.folder(id).name(),
                Node::File(id) => tree.file(id).name(),
            })
            .collect();

        assert_eq!(
            names,
            vec![
                "course",
                "course/Unit1",
                "course/Unit1/syllabus.pdf",
                "course/Unit1/Lecture",
                "course/Unit1/Lecture/slides.pdf",
                "course/Unit2",
            ]
        );
    }

    #[test]
    fn walk_visits_parents_before_children() {
        let tree = sample();
        let order = tree.walk();
        assert_eq!(order.len(), tree.folder_count() + tree.file_count());

        let position = |node: Node| order.iter().position(|n| *n == node).unwrap();
        for (index, node) in order.iter().enumerate() {
            let parent = match node {
                Node::Folder(id) => tree.folder(*id).parent(),
                Node::File(id) => Some(tree.file(*id).parent()),
            };
            if let Some(parent) = parent {
                assert!(position(Node::Folder(parent)) < index);
            }
        }
    }

    #[test]
    fn root_with_trailing_slash_is_not_doubled() {
        let mut tree = FolderTree::new("/");
        tree.add_folder(tree.root(), "docs");
        let tree = tree.materialize();
        assert!(tree.find_folder("/docs").is_some());
    }

    #[test]
    fn tags_start_cleared() {
        let mut tree = sample().materialize();
        assert!(!tree.folder(tree.root()).is_tagged());

        let leaf = tree.find_file("course/Unit1/Lecture/slides.pdf").unwrap();
        tree.set_file_tag(leaf, true);
        assert!(tree.file(leaf).is_tagged());

        tree.tag_all();
        assert!(tree.folder(tree.root()).is_tagged());
    }
}
