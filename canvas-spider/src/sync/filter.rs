use std::collections::{HashMap, HashSet};

use canvas_core::{Course, File, Folder};

use crate::config::{CourseFilter, FileFilter};

/// Applies the filename and extension policy to a flat file listing.
///
/// Whitelisted filenames are kept unconditionally and appended at the end;
/// blacklisted filenames are dropped; everything else is kept unless its
/// extension (or mime class) is blacklisted without also being whitelisted.
pub fn filter_files(policy: &FileFilter, files: Vec<File>) -> Vec<File> {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, file) in files.iter().enumerate() {
        by_name.entry(file.filename.as_str()).or_default().push(index);
    }

    let mut preserved = Vec::new();
    for name in &policy.file_white_list {
        if let Some(indices) = by_name.remove(name.as_str()) {
            preserved.extend(indices);
        }
    }
    for name in &policy.file_black_list {
        by_name.remove(name.as_str());
    }

    let white = normalize_kinds(&policy.file_extension_white_list);
    let black = normalize_kinds(&policy.file_extension_black_list);
    let mut survivors: Vec<usize> = by_name
        .into_values()
        .flatten()
        .filter(|index| {
            let kinds = file_kinds(&files[*index]);
            let whitelisted = kinds.iter().any(|kind| white.contains(kind));
            let blacklisted = kinds.iter().any(|kind| black.contains(kind));
            whitelisted || !blacklisted
        })
        .collect();
    survivors.sort_unstable();

    let dropped = files.len() - survivors.len() - preserved.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = survivors.len() + preserved.len(), "filtered files");
    }

    let mut slots: Vec<Option<File>> = files.into_iter().map(Some).collect();
    survivors
        .into_iter()
        .chain(preserved)
        .filter_map(|index| slots[index].take())
        .collect()
}

/// Lowercased extension of a filename, if it has a non-empty one.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn file_kinds(file: &File) -> Vec<String> {
    let mut kinds = Vec::with_capacity(2);
    if let Some(extension) = extension_of(&file.filename) {
        kinds.push(extension);
    }
    if let Some(mime_class) = file.mime_class.as_deref().filter(|m| !m.is_empty()) {
        kinds.push(mime_class.to_ascii_lowercase());
    }
    kinds
}

fn normalize_kinds(entries: &[String]) -> HashSet<String> {
    entries
        .iter()
        .map(|entry| entry.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

pub fn select_courses(policy: &CourseFilter, courses: Vec<Course>) -> Vec<Course> {
    courses
        .into_iter()
        .filter(|course| {
            policy.course_white_list.is_empty() || policy.course_white_list.contains(&course.id)
        })
        .filter(|course| !policy.course_black_list.contains(&course.id))
        .collect()
}

/// Keeps folders holding at least one ready file, plus all of their ancestors.
pub fn ready_folders(folders: Vec<Folder>, files: &[File]) -> Vec<Folder> {
    let parents: HashMap<u64, Option<u64>> = folders
        .iter()
        .map(|folder| (folder.id, folder.parent_folder_id))
        .collect();

    let mut keep: HashSet<u64> = HashSet::new();
    for file in files {
        let mut current = Some(file.folder_id);
        while let Some(id) = current {
            if !parents.contains_key(&id) || !keep.insert(id) {
                break;
            }
            current = parents.get(&id).copied().flatten();
        }
    }

    folders
        .into_iter()
        .filter(|folder| keep.contains(&folder.id))
        .collect()
}
