//! Reading rebuilt files back: element dumps, directory validation and
//! comparison of two rebuilt studies.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{RebuildError, RebuildResult};
use crate::model::{DataElement, DicomValue, Instance};
use crate::reader;
use crate::tags;
use crate::util;

const SAMPLE_LIMIT: usize = 5;
const DUMP_VALUE_LIMIT: usize = 64;

fn dump_element(out: &mut String, element: &DataElement, depth: usize) {
    let indent = "  ".repeat(depth);
    let vr = element.vr.map_or("--", |vr| vr.code());
    let keyword = util::get_tag_keyword(element.tag);

    match &element.value {
        DicomValue::Sequence(items) => {
            let _ = writeln!(out, "{indent}{} {vr} {keyword}: {} item(s)", element.tag, items.len());
            for (index, item) in items.iter().enumerate() {
                let _ = writeln!(out, "{indent}  > item {}", index + 1);
                for child in item {
                    dump_element(out, child, depth + 2);
                }
            }
        }
        value => {
            let mut text = value.to_display_string();
            if text.chars().count() > DUMP_VALUE_LIMIT {
                text = text.chars().take(DUMP_VALUE_LIMIT).collect::<String>() + "...";
            }
            let _ = writeln!(out, "{indent}{} {vr} {keyword}: {text}", element.tag);
        }
    }
}

/// One line per element: tag, VR, dictionary keyword and value.
pub fn dump(instance: &Instance) -> String {
    let mut out = String::new();

    for element in instance.meta.values().chain(instance.dataset.values()) {
        dump_element(&mut out, element, 0);
    }

    let _ = writeln!(
        out,
        "{} OB PixelData: {:?}, {} byte(s)",
        tags::PIXEL_DATA,
        instance.pixel_encoding,
        instance.pixel_data.first_frame_bytes().len()
    );

    out
}

/// The attributes two rebuilds of the same instance should agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSummary {
    pub transfer_syntax: Option<String>,
    pub sop_class_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub rows: Option<i64>,
    pub columns: Option<i64>,
    pub bits_allocated: Option<i64>,
    /// Hex SHA-256 of the first frame (or fragment).
    pub pixel_hash: String,
}

impl InstanceSummary {
    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            transfer_syntax: instance.transfer_syntax().map(str::to_string),
            sop_class_uid: instance.sop_class_uid().map(str::to_string),
            sop_instance_uid: instance.sop_instance_uid().map(str::to_string),
            rows: instance.int_attr(tags::ROWS),
            columns: instance.int_attr(tags::COLUMNS),
            bits_allocated: instance.int_attr(tags::BITS_ALLOCATED),
            pixel_hash: hex::encode(Sha256::digest(instance.pixel_data.first_frame_bytes())),
        }
    }

    /// Field-by-field differences, described for a report.
    pub fn differences(&self, other: &Self) -> Vec<String> {
        fn show<T: fmt::Debug>(value: &Option<T>) -> String {
            match value {
                Some(v) => format!("{:?}", v),
                None => "absent".to_string(),
            }
        }

        let mut out = Vec::new();
        let mut check = |name: &str, left: String, right: String| {
            if left != right {
                out.push(format!("{name}: {left} != {right}"));
            }
        };

        check("transfer syntax", show(&self.transfer_syntax), show(&other.transfer_syntax));
        check("SOP class", show(&self.sop_class_uid), show(&other.sop_class_uid));
        check("SOP instance", show(&self.sop_instance_uid), show(&other.sop_instance_uid));
        check("rows", show(&self.rows), show(&other.rows));
        check("columns", show(&self.columns), show(&other.columns));
        check("bits allocated", show(&self.bits_allocated), show(&other.bits_allocated));
        check("pixel data", self.pixel_hash.clone(), other.pixel_hash.clone());

        out
    }
}

impl fmt::Display for InstanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {}-bit, {}",
            self.columns.unwrap_or(0),
            self.rows.unwrap_or(0),
            self.bits_allocated.unwrap_or(0),
            self.transfer_syntax.as_deref().unwrap_or("no transfer syntax")
        )
    }
}

fn is_instance_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    // AppleDouble files share the extension but are not DICOM
    !name.starts_with("._")
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
}

/// All `*.dcm` files under `root`, relative to it, sorted.
pub fn collect_instance_files(root: &Path) -> RebuildResult<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;

        if entry.file_type().is_file() && is_instance_file(entry.path()) {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            files.insert(relative.to_path_buf());
        }
    }

    Ok(files)
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub total: usize,
    pub failures: Vec<(PathBuf, String)>,
    pub samples: Vec<(PathBuf, InstanceSummary)>,
}

impl ValidationReport {
    pub fn passed(&self) -> usize {
        self.total - self.failures.len()
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} of {} file(s) readable", self.passed(), self.total)?;

        if !self.samples.is_empty() {
            writeln!(f)?;
            writeln!(f, "Samples:")?;
            for (path, summary) in &self.samples {
                writeln!(f, "  - {}: {}", path.display(), summary)?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "Failures ({}):", self.failures.len())?;
            for (path, error) in &self.failures {
                writeln!(f, "  - {}: {}", path.display(), error)?;
            }
        }

        Ok(())
    }
}

/// Try to read every instance file under `root`.
pub fn validate_dir(root: &Path) -> RebuildResult<ValidationReport> {
    let files = collect_instance_files(root)?;

    if files.is_empty() {
        return Err(RebuildError::NothingToValidate(root.to_path_buf()));
    }

    let mut report = ValidationReport {
        total: files.len(),
        ..ValidationReport::default()
    };

    for relative in files {
        match reader::read_instance(&root.join(&relative)) {
            Ok(instance) => {
                if report.samples.len() < SAMPLE_LIMIT {
                    report.samples.push((relative, InstanceSummary::from_instance(&instance)));
                }
            }
            Err(error) => {
                warn!(path = %relative.display(), %error, "unreadable instance");
                report.failures.push((relative, error.to_string()));
            }
        }
    }

    debug!(total = report.total, failed = report.failures.len(), "validation finished");

    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonReport {
    pub compared: usize,
    pub only_in_left: Vec<PathBuf>,
    pub only_in_right: Vec<PathBuf>,
    pub differences: Vec<(PathBuf, Vec<String>)>,
}

impl ComparisonReport {
    pub fn is_identical(&self) -> bool {
        self.only_in_left.is_empty() && self.only_in_right.is_empty() && self.differences.is_empty()
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} file(s) compared, {} differ, {} only left, {} only right",
            self.compared,
            self.differences.len(),
            self.only_in_left.len(),
            self.only_in_right.len()
        )?;

        for path in &self.only_in_left {
            writeln!(f, "  < {}", path.display())?;
        }
        for path in &self.only_in_right {
            writeln!(f, "  > {}", path.display())?;
        }
        for (path, differences) in &self.differences {
            writeln!(f, "  ~ {}", path.display())?;
            for difference in differences {
                writeln!(f, "      {}", difference)?;
            }
        }

        Ok(())
    }
}

fn summarize(path: &Path) -> Result<InstanceSummary, String> {
    reader::read_instance(path)
        .map(|instance| InstanceSummary::from_instance(&instance))
        .map_err(|e| e.to_string())
}

/// Compare the instance files of two directory trees by relative path.
pub fn compare_dirs(left: &Path, right: &Path) -> RebuildResult<ComparisonReport> {
    let left_files = collect_instance_files(left)?;
    let right_files = collect_instance_files(right)?;

    let mut report = ComparisonReport {
        only_in_left: left_files.difference(&right_files).cloned().collect(),
        only_in_right: right_files.difference(&left_files).cloned().collect(),
        ..ComparisonReport::default()
    };

    for relative in left_files.intersection(&right_files) {
        report.compared += 1;

        let differences = match (summarize(&left.join(relative)), summarize(&right.join(relative))) {
            (Ok(a), Ok(b)) => a.differences(&b),
            (Err(e), _) => vec![format!("left unreadable: {e}")],
            (_, Err(e)) => vec![format!("right unreadable: {e}")],
        };

        if !differences.is_empty() {
            report.differences.push((relative.clone(), differences));
        }
    }

    Ok(report)
}
