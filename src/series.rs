//! On-disk layout: one directory per series, one zero-padded file per
//! instance.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{RebuildError, RebuildResult};
use crate::model::{Instance, Tag};
use crate::tags;

pub const UNNAMED_SERIES: &str = "Unnamed";

lazy_static! {
    static ref NUMBERED_SUFFIX: Regex = Regex::new(r"^(.+?) \((\d+)\)$").expect("suffix pattern");
}

/// Make `text` safe as a single path component: characters Windows refuses
/// become full-width lookalikes, C0 control characters their Control Pictures
/// glyph and other controls U+FFFD. Surrounding whitespace and trailing dots
/// are dropped, so a name made only of dots comes back empty.
pub fn pathify(text: &str) -> String {
    let mapped = text
        .trim()
        .chars()
        .map(|c| match c {
            '<' => '＜',
            '>' => '＞',
            ':' => '：',
            '"' => '＂',
            '/' => '／',
            '\\' => '＼',
            '?' => '？',
            '*' => '＊',
            '|' => '｜',
            '\u{7F}' => '\u{2421}',
            c if c < ' ' => char::from_u32(0x2400 + c as u32).unwrap_or('\u{FFFD}'),
            c if c.is_control() => '\u{FFFD}',
            other => other,
        })
        .collect::<String>();

    mapped.trim_end_matches(['.', ' ']).to_string()
}

/// `root/{patient}-{description}-{datetime}`, with date and time separators
/// removed from `datetime`.
pub fn suggest_save_dir(root: &Path, patient: &str, description: &str, datetime: &str) -> PathBuf {
    let datetime = datetime
        .chars()
        .filter(|c| !matches!(c, '-' | ':' | ' '))
        .collect::<String>();

    root.join(format!("{}-{}-{}", pathify(patient), pathify(description), datetime))
}

/// Series Description, else Series Number, else a short hash of Series
/// Instance UID.
pub fn suggest_series_name(instance: &Instance) -> Option<String> {
    let non_empty = |tag: Tag| {
        instance
            .get(tag)
            .map(|e| e.value.to_display_string())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    if let Some(description) = non_empty(tags::SERIES_DESCRIPTION) {
        return Some(description);
    }

    if let Some(number) = non_empty(tags::SERIES_NUMBER) {
        return Some(number);
    }

    non_empty(tags::SERIES_INSTANCE_UID).map(|uid| {
        let digest = Sha256::digest(uid.as_bytes());
        STANDARD.encode(digest).chars().take(20).collect()
    })
}

pub fn series_dir_name(number: Option<i64>, description: &str) -> String {
    let description = pathify(description);

    match (number, description.is_empty()) {
        (Some(n), false) => format!("[{}] {}", n, description),
        (None, false) => description,
        (Some(n), true) => n.to_string(),
        (None, true) => UNNAMED_SERIES.to_string(),
    }
}

/// Digits in an instance file name: one more than the instance count needs.
pub fn index_width(instance_count: usize) -> usize {
    instance_count.max(1).ilog10() as usize + 2
}

pub fn instance_file_name(index: usize, width: usize, extension: &str) -> String {
    format!("{:0width$}.{}", index + 1, extension, width = width)
}

fn next_candidate(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let next = match NUMBERED_SUFFIX.captures(&name) {
        Some(captures) => {
            let n = captures[2].parse::<u64>().unwrap_or(0);
            format!("{} ({})", &captures[1], n.saturating_add(1))
        }
        None => format!("{} (1)", name),
    };

    path.with_file_name(next)
}

/// Create `path`, or `path (1)`, `path (2)`, ... when the name is taken by
/// another directory. Returns the directory actually created.
pub fn make_unique_dir(path: &Path) -> RebuildResult<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| RebuildError::DirectoryCreate {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut candidate = path.to_path_buf();

    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(path = %candidate.display(), "created directory");
                return Ok(candidate);
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists && candidate.is_dir() => {
                let next = next_candidate(&candidate);
                debug!(
                    taken = %candidate.display(),
                    next = %next.display(),
                    "directory exists, trying the next name"
                );
                candidate = next;
            }
            Err(source) => {
                return Err(RebuildError::DirectoryCreate {
                    path: candidate,
                    source,
                })
            }
        }
    }
}

/// Where the instances of one series go.
///
/// The directory is created on the first [`SeriesTarget::get`], so a series
/// that yields no instances leaves nothing behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesTarget {
    suggested_path: PathBuf,
    resolved_path: Option<PathBuf>,
    index_width: usize,
    unique: bool,
}

impl SeriesTarget {
    pub fn new(study_dir: &Path, number: Option<i64>, description: &str, instance_count: usize, unique: bool) -> Self {
        Self {
            suggested_path: study_dir.join(series_dir_name(number, description)),
            resolved_path: None,
            index_width: index_width(instance_count),
            unique,
        }
    }

    pub fn suggested_path(&self) -> &Path {
        &self.suggested_path
    }

    pub fn resolved_path(&self) -> Option<&Path> {
        self.resolved_path.as_deref()
    }

    pub fn index_width(&self) -> usize {
        self.index_width
    }

    /// Create the series directory if that has not happened yet.
    pub fn resolve(&mut self) -> RebuildResult<&Path> {
        let path = match self.resolved_path.take() {
            Some(path) => path,
            None if self.unique => make_unique_dir(&self.suggested_path)?,
            None => {
                fs::create_dir_all(&self.suggested_path).map_err(|source| RebuildError::DirectoryCreate {
                    path: self.suggested_path.clone(),
                    source,
                })?;
                debug!(path = %self.suggested_path.display(), "using series directory");
                self.suggested_path.clone()
            }
        };

        Ok(self.resolved_path.insert(path).as_path())
    }

    /// Path for the instance at zero-based `index`.
    pub fn get(&mut self, index: usize, extension: &str) -> RebuildResult<PathBuf> {
        let width = self.index_width;
        let dir = self.resolve()?;

        Ok(dir.join(instance_file_name(index, width, extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{assemble, TagRecord};
    use crate::config::AssembleOptions;

    #[test]
    fn pathify_replaces_reserved_characters() {
        assert_eq!(pathify("  a<b>c:d\"e/f\\g?h*i|j  "), "a＜b＞c：d＂e／f＼g？h＊i｜j");
        assert_eq!(pathify("T1 FLAIR"), "T1 FLAIR");
    }

    #[test]
    fn pathify_handles_dots_and_control_characters() {
        assert_eq!(pathify(".."), "");
        assert_eq!(pathify("."), "");
        assert_eq!(pathify("T1\0AX"), "T1\u{2400}AX");
        assert_eq!(pathify("a\tb\u{7F}"), "a\u{2409}b\u{2421}");
        assert_eq!(pathify("Head. . "), "Head");
        assert_eq!(pathify(".hidden"), ".hidden");
        assert_eq!(pathify("x\u{85}y"), "x\u{FFFD}y");
    }

    #[test]
    fn dot_descriptions_stay_inside_the_study() {
        let dir = tempfile::tempdir().unwrap();
        let study = dir.path().join("study");

        for description in ["..", "."] {
            let path = SeriesTarget::new(&study, None, description, 1, true).get(0, "dcm").unwrap();
            assert_eq!(path.parent().unwrap().parent(), Some(study.as_path()));
        }

        let shared = SeriesTarget::new(&study, Some(2), "..", 1, false).get(0, "dcm").unwrap();
        assert_eq!(shared, study.join("2").join("01.dcm"));
    }

    #[test]
    fn nul_in_description_is_not_a_directory_error() {
        let dir = tempfile::tempdir().unwrap();

        let path = SeriesTarget::new(dir.path(), None, "T1\0AX", 1, true).get(0, "dcm").unwrap();
        assert_eq!(path, dir.path().join("T1\u{2400}AX").join("01.dcm"));
    }

    #[test]
    fn series_names() {
        assert_eq!(series_dir_name(Some(3), "T2 AX"), "[3] T2 AX");
        assert_eq!(series_dir_name(None, "T2 AX"), "T2 AX");
        assert_eq!(series_dir_name(Some(3), "  "), "3");
        assert_eq!(series_dir_name(None, ""), "Unnamed");
    }

    #[test]
    fn index_width_has_headroom() {
        assert_eq!(index_width(0), 2);
        assert_eq!(index_width(5), 2);
        assert_eq!(index_width(9), 2);
        assert_eq!(index_width(10), 3);
        assert_eq!(index_width(999), 4);
        assert_eq!(index_width(1000), 5);
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(instance_file_name(0, 2, "dcm"), "01.dcm");
        assert_eq!(instance_file_name(9, 3, "dcm"), "010.dcm");
        assert_eq!(instance_file_name(99, 2, "dcm"), "100.dcm");
    }

    #[test]
    fn unnamed_series_with_five_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = SeriesTarget::new(dir.path(), None, "", 5, true);

        assert_eq!(target.suggested_path(), dir.path().join("Unnamed"));
        assert_eq!(target.resolved_path(), None);
        assert!(!dir.path().join("Unnamed").exists());

        let path = target.get(0, "dcm").unwrap();
        assert_eq!(path, dir.path().join("Unnamed").join("01.dcm"));
        assert!(dir.path().join("Unnamed").is_dir());
    }

    #[test]
    fn duplicate_names_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();

        let mut first = SeriesTarget::new(dir.path(), None, "X", 1, true);
        let mut second = SeriesTarget::new(dir.path(), None, "X", 1, true);
        let mut third = SeriesTarget::new(dir.path(), None, "X", 1, true);

        assert_eq!(first.resolve().unwrap(), dir.path().join("X"));
        assert_eq!(second.resolve().unwrap(), dir.path().join("X (1)"));
        assert_eq!(third.resolve().unwrap(), dir.path().join("X (2)"));
    }

    #[test]
    fn existing_suffix_is_incremented() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Y (4)")).unwrap();

        assert_eq!(make_unique_dir(&dir.path().join("Y (4)")).unwrap(), dir.path().join("Y (5)"));
    }

    #[test]
    fn deep_collisions_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("Z");
        fs::create_dir(&base).unwrap();
        for n in 1..200 {
            fs::create_dir(dir.path().join(format!("Z ({})", n))).unwrap();
        }

        assert_eq!(make_unique_dir(&base).unwrap(), dir.path().join("Z (200)"));
    }

    #[test]
    fn non_unique_targets_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = SeriesTarget::new(dir.path(), Some(2), "S", 3, false);
        let mut b = SeriesTarget::new(dir.path(), Some(2), "S", 3, false);

        assert_eq!(a.get(0, "dcm").unwrap().parent(), b.get(1, "dcm").unwrap().parent());
    }

    #[test]
    fn resolve_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = SeriesTarget::new(dir.path(), None, "S", 3, true);

        let first = target.resolve().unwrap().to_path_buf();
        let second = target.resolve().unwrap().to_path_buf();
        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn file_in_the_way_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("S"), b"").unwrap();

        assert!(matches!(
            make_unique_dir(&dir.path().join("S")),
            Err(RebuildError::DirectoryCreate { .. })
        ));
    }

    #[test]
    fn save_dir_strips_time_separators() {
        let path = suggest_save_dir(Path::new("download"), "张*三", "CT/胸部", "2024-01-02 10:20:30");

        assert_eq!(path, Path::new("download").join("张＊三-CT／胸部-20240102102030"));
    }

    #[test]
    fn series_name_fallbacks() {
        let options = AssembleOptions::default();
        let build = |pairs: &[(&str, &str)]| {
            let records = pairs.iter().map(|(t, v)| TagRecord::new(*t, *v)).collect::<Vec<_>>();
            assemble(&records, vec![], &options).unwrap()
        };

        let described = build(&[("0008,103E", "AX T1"), ("0020,0011", "4")]);
        assert_eq!(suggest_series_name(&described).as_deref(), Some("AX T1"));

        let numbered = build(&[("0020,0011", "4")]);
        assert_eq!(suggest_series_name(&numbered).as_deref(), Some("4"));

        let hashed = build(&[("0020,000E", "1.2.3")]);
        let name = suggest_series_name(&hashed).unwrap();
        assert_eq!(name.len(), 20);
        assert_eq!(name, STANDARD.encode(Sha256::digest(b"1.2.3"))[..20]);

        assert_eq!(suggest_series_name(&build(&[])), None);
    }
}
