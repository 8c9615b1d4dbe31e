//! Input discovery: list files and directories of volumes.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Read newline-separated volume paths from each list file, in order.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn expand_list_files<P: AsRef<Path>>(lists: &[P]) -> Result<Vec<PathBuf>> {
    let mut volumes = Vec::new();
    for list in lists {
        let list = list.as_ref();
        let content = fs::read_to_string(list).map_err(|e| Error::Io(e).for_source(list))?;
        volumes.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(PathBuf::from),
        );
    }
    Ok(volumes)
}

struct Candidate {
    path: PathBuf,
    name: String,
    number: Option<u64>,
}

/// Collect the `.epub` files of each directory.
///
/// Within a directory, files whose stem contains a number come first, ordered
/// by the first number; the rest follow by case-insensitive name.
pub fn expand_directories<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<PathBuf>> {
    let mut volumes = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        let mut candidates = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| Error::Io(e).for_source(dir))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let path = entry.path();
            let is_epub = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
            if !is_epub {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            candidates.push(Candidate {
                number: volume_number(&stem),
                path,
                name,
            });
        }

        candidates.sort_by(compare_candidates);
        volumes.extend(candidates.into_iter().map(|c| c.path));
    }
    Ok(volumes)
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let by_name = || {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    };
    match (a.number, b.number) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(by_name),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => by_name(),
    }
}

/// First run of ASCII digits in `stem`.
fn volume_number(stem: &str) -> Option<u64> {
    let start = stem.find(|c: char| c.is_ascii_digit())?;
    let digits = &stem[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_list_files() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("volumes.txt");
        fs::write(
            &list,
            "\n# comment\n/path/Vol 01.epub\n\n   /path/Vol 02.epub\n",
        )
        .unwrap();

        let out = expand_list_files(&[&list]).unwrap();
        assert_eq!(
            out,
            vec![PathBuf::from("/path/Vol 01.epub"), PathBuf::from("/path/Vol 02.epub")]
        );
    }

    #[test]
    fn test_expand_list_files_missing() {
        let err = expand_list_files(&["/no/such/file"]).unwrap_err();
        assert!(err.to_string().starts_with("/no/such/file"));
    }

    #[test]
    fn test_expand_directories_ordering() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "Vol 10.epub",
            "[2] Second.epub",
            "My Saga 001.epub",
            "special.epub",
            "Another.EPUB",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("Vol 0.epub")).unwrap();

        let names: Vec<String> = expand_directories(&[dir.path()])
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "My Saga 001.epub",
                "[2] Second.epub",
                "Vol 10.epub",
                "Another.EPUB",
                "special.epub",
            ]
        );
    }

    #[test]
    fn test_expand_directories_keeps_directory_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("Vol 02.epub"), b"").unwrap();
        fs::write(second.path().join("Vol 01.epub"), b"").unwrap();

        let paths = expand_directories(&[first.path(), second.path()]).unwrap();
        assert_eq!(
            paths,
            vec![first.path().join("Vol 02.epub"), second.path().join("Vol 01.epub")]
        );
    }

    #[test]
    fn test_volume_number() {
        assert_eq!(volume_number("Vol 007 part 2"), Some(7));
        assert_eq!(volume_number("special"), None);
    }
}
