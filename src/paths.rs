//! Windows path-string helpers for change-set bookkeeping.
//!
//! Journal records carry names as plain UTF-16 strings, and the change-set
//! comparisons NTFS requires are ordinal and case-insensitive. Everything here
//! works on `\`-separated strings directly (not `std::path`), so behavior is
//! identical no matter which host the pure pipeline runs on. Directories are
//! distinguished from files by a trailing separator throughout the crate.

use std::collections::BTreeSet;

pub const SEPARATOR: char = '\\';

fn fold_case(s: &str) -> String {
    s.chars().flat_map(char::to_uppercase).collect()
}

/// Ordinal, case-insensitive path equality.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    fold_case(a) == fold_case(b)
}

/// Appends a trailing separator if the path doesn't already have one.
pub fn append_dir_separator(path: &str) -> String {
    if path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}{SEPARATOR}")
    }
}

/// Returns true if `path` lies strictly below `folder` (never for the folder
/// itself).
pub fn is_path_below_folder(path: &str, folder: &str) -> bool {
    let prefix = fold_case(&append_dir_separator(folder));
    let path = fold_case(path);
    path.len() > prefix.len() && path.starts_with(&prefix)
}

/// Extracts the volume root of a rooted path: `C:\` for `C:\Users\x`, and
/// `\\server\share\` for `\\server\share\x`. Drive letters are normalized to
/// uppercase so roots from differently-cased inputs collide.
pub fn volume_root_of(path: &str) -> Option<String> {
    let bytes = path.as_bytes();

    // drive-letter root
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if bytes.len() == 2 || bytes[2] == SEPARATOR as u8 {
            return Some(format!("{}:{SEPARATOR}", (bytes[0] as char).to_ascii_uppercase()));
        }
        return None;
    }

    // UNC root: \\server\share\
    if let Some(rest) = path.strip_prefix(r"\\") {
        let mut parts = rest.splitn(3, SEPARATOR);
        let server = parts.next().filter(|s| !s.is_empty())?;
        let share = parts.next().filter(|s| !s.is_empty())?;
        return Some(format!(r"\\{server}{SEPARATOR}{share}{SEPARATOR}"));
    }

    None
}

/// Reduces a folder set to its parent-most entries, e.g.
/// `{ C:\A\B\, C:\A\B\C\, C:\A\B\D\E\ }` becomes `{ C:\A\B\ }`.
///
/// A reported folder implies all of its descendants will be rescanned, so
/// nested entries carry no information.
pub fn simplify_folder_list<I>(folders: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut sorted: Vec<String> = folders.into_iter().map(|f| append_dir_separator(&f)).collect();
    // case-folded sort puts every folder directly ahead of its descendants
    sorted.sort_by_key(|f| fold_case(f));

    let mut result: Vec<String> = Vec::new();
    for folder in sorted {
        match result.last() {
            Some(kept) if eq_ignore_case(kept, &folder) || is_path_below_folder(&folder, kept) => {}
            _ => result.push(folder),
        }
    }
    result
}

/// Drops every file that lies under one of `folders`. Those folders are going
/// to be fully scanned, so listing their files separately is redundant.
pub fn files_not_in_folders<I>(files: I, folders: &[String]) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    files
        .into_iter()
        .filter(|file| !folders.iter().any(|folder| is_path_below_folder(file, folder)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_handling() {
        assert_eq!(append_dir_separator(r"C:\A"), r"C:\A\");
        assert_eq!(append_dir_separator(r"C:\A\"), r"C:\A\");
    }

    #[test]
    fn case_insensitive_comparisons() {
        assert!(eq_ignore_case(r"C:\Users\Data", r"c:\users\DATA"));
        assert!(!eq_ignore_case(r"C:\Users\Data", r"C:\Users\Data2"));
        assert!(is_path_below_folder(r"C:\a\b\F.TXT", r"C:\A\B\"));
    }

    #[test]
    fn below_folder_is_strict() {
        assert!(is_path_below_folder(r"C:\A\B\", r"C:\A\"));
        assert!(!is_path_below_folder(r"C:\A\", r"C:\A\"));
        assert!(!is_path_below_folder(r"C:\AB\f.txt", r"C:\A\"));
    }

    #[test]
    fn volume_roots() {
        assert_eq!(volume_root_of(r"C:\Users\x"), Some(r"C:\".to_string()));
        assert_eq!(volume_root_of(r"c:\"), Some(r"C:\".to_string()));
        assert_eq!(volume_root_of(r"d:"), Some(r"D:\".to_string()));
        assert_eq!(
            volume_root_of(r"\\nas\backup\sub\f.txt"),
            Some(r"\\nas\backup\".to_string())
        );
        assert_eq!(volume_root_of(r"relative\path"), None);
        assert_eq!(volume_root_of(r"\\nas"), None);
    }

    #[test]
    fn simplify_keeps_parent_most_entries() {
        let folders = vec![
            r"C:\A\B\C\".to_string(),
            r"C:\A\B\".to_string(),
            r"C:\A\B\D\E\".to_string(),
            r"C:\X\".to_string(),
        ];
        assert_eq!(
            simplify_folder_list(folders),
            vec![r"C:\A\B\".to_string(), r"C:\X\".to_string()]
        );
    }

    #[test]
    fn simplify_is_not_fooled_by_sibling_prefixes() {
        // C:\AB\ shares a string prefix with C:\A\ but is no descendant
        let folders = vec![r"C:\A\".to_string(), r"C:\AB\".to_string()];
        let simplified = simplify_folder_list(folders);
        assert_eq!(simplified.len(), 2);
        assert!(simplified.contains(&r"C:\A\".to_string()));
        assert!(simplified.contains(&r"C:\AB\".to_string()));
    }

    #[test]
    fn simplify_merges_case_duplicates() {
        let folders = vec![r"C:\Data\".to_string(), r"c:\data".to_string()];
        assert_eq!(simplify_folder_list(folders).len(), 1);
    }

    #[test]
    fn files_under_folders_are_pruned() {
        let folders = vec![r"C:\A\".to_string()];
        let files = vec![
            r"C:\A\f.txt".to_string(),
            r"C:\A\sub\g.txt".to_string(),
            r"C:\B\h.txt".to_string(),
        ];
        let kept = files_not_in_folders(files, &folders);
        assert_eq!(kept.len(), 1);
        assert!(kept.contains(r"C:\B\h.txt"));
    }
}
