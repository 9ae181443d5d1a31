//! Namespace path handling
//!
//! The catalog names documents with their full path so that two writers
//! racing to create the same file land on the same document. Document
//! stores reserve the forward slash, so document names replace it with the
//! ASCII file-separator character (0x1C); that replacement exists only in
//! document names, never in the paths the rest of the code handles.
//!
//! A named root directory anchors key lookups. It never appears in the
//! paths stored inside entries; it is prepended when (and only when)
//! building a lookup path.
//!
//! Vocabulary used throughout the crate:
//! - full path (`/a/b/c.txt`): directory path plus entry name
//! - directory path (`/a/b`): the containing directory
//! - lookup path (`/_depot_/a/b/c.txt`): full path under the root anchor

/// Name of the synthetic root directory used for lookups.
pub const ROOT_DIR_NAME: &str = "/_depot_";

/// Separator substituted for `/` in document names.
const DOCNAME_SEPARATOR: char = '\u{1c}';

/// Split a full path into (directory path, entry name).
///
/// `/a/b.txt` → `("/a", "b.txt")`; `/b.txt` → `("/", "b.txt")`;
/// `/` → `("", "")` (the root has neither path nor name).
pub fn split_path(full_path: &str) -> (String, String) {
    let trimmed = full_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return (String::new(), String::new());
    }
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// Directory path of a full path (empty string above the root).
pub fn directory_path(full_path: &str) -> String {
    split_path(full_path).0
}

/// Entry name of a full path.
pub fn entry_name(full_path: &str) -> String {
    split_path(full_path).1
}

/// Join a directory path and an entry name back into a full path.
pub fn full_path(dir_path: &str, name: &str) -> String {
    if name.is_empty() {
        return normalize(dir_path);
    }
    if dir_path.is_empty() || dir_path == "/" {
        format!("/{name}")
    } else {
        format!("{}/{}", dir_path.trim_end_matches('/'), name)
    }
}

/// All ancestor directory paths of a target, outermost first.
///
/// `/a/b/c.txt` → `["/", "/a", "/a/b"]`.
pub fn extract_directory_paths(target_path: &str) -> Vec<String> {
    let mut dirs = vec!["/".to_string()];
    let (dir_path, _) = split_path(target_path);
    let mut current = String::new();
    for component in dir_path.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        dirs.push(current.clone());
    }
    dirs
}

/// Tidy a full path: leading slash, no trailing slash.
pub fn normalize(full_path: &str) -> String {
    let mut path = full_path.trim_end_matches('/').to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    path
}

/// Build the lookup path for a full path by anchoring it under the root
/// directory name.
pub fn lookup_path(full_path: &str) -> String {
    let trimmed = full_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ROOT_DIR_NAME.to_string();
    }
    format!("{}{}", ROOT_DIR_NAME, normalize(trimmed))
}

/// Invert [`lookup_path`].
pub fn path_from_lookup(lookup: &str) -> String {
    lookup
        .strip_prefix(ROOT_DIR_NAME)
        .unwrap_or(lookup)
        .to_string()
}

/// Encode a lookup path as a document name.
pub fn encode_doc_name(lookup: &str) -> String {
    lookup.replace('/', &DOCNAME_SEPARATOR.to_string())
}
