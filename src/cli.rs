//! The `dicom-rebuild` command line.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::assembler::{assemble, read_tag_list};
use crate::config::AssembleOptions;
use crate::error::{RebuildError, RebuildResult};
use crate::inspect;
use crate::logging;
use crate::model::{Instance, Tag};
use crate::preview;
use crate::reader;
use crate::series::{self, SeriesTarget};
use crate::tags;
use crate::writer::save_instance;

lazy_static! {
    static ref TAG_LIST_FILE: Regex = Regex::new(r"^(\d+)\.tags\.json$").expect("tag list pattern");
}

#[derive(Parser)]
#[command(name = "dicom-rebuild")]
#[command(version, about = "Rebuild DICOM files from tag lists and pixel blobs captured from web viewers")]
#[command(propagate_version = true)]
pub struct Cli {
    /// More logging (-v debug, -vv trace). DICOM_REBUILD_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also append logs to this file.
    #[arg(long, global = true, env = "DICOM_REBUILD_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble a single instance from a tag list and a pixel file.
    Assemble(AssembleArgs),
    /// Rebuild a captured study, one subdirectory per series.
    Rebuild(RebuildArgs),
    /// Print the elements of a DICOM file.
    Inspect(InspectArgs),
    /// Check that every .dcm file under a directory can be read.
    Validate(ValidateArgs),
    /// Compare two rebuilt directory trees.
    Compare(CompareArgs),
}

/// Assembly options shared by `assemble` and `rebuild`.
#[derive(clap::Args)]
struct OptionArgs {
    /// JSON file with assembly options.
    #[arg(long, env = "DICOM_REBUILD_OPTIONS")]
    options: Option<PathBuf>,

    /// Unwrap JP2 containers to the bare codestream.
    #[arg(long)]
    extract_codestream: bool,

    /// Log and drop tags that cannot be parsed.
    #[arg(long)]
    skip_invalid_tags: bool,

    /// Derive a missing SOP Class UID from Modality.
    #[arg(long)]
    infer_sop_class: bool,
}

impl OptionArgs {
    fn load(&self) -> RebuildResult<AssembleOptions> {
        let mut options = match &self.options {
            Some(path) => AssembleOptions::from_json_file(path)?,
            None => AssembleOptions::default(),
        };

        options.extract_codestream |= self.extract_codestream;
        options.skip_invalid_tags |= self.skip_invalid_tags;
        options.infer_sop_class |= self.infer_sop_class;

        Ok(options)
    }
}

#[derive(clap::Args)]
struct AssembleArgs {
    /// JSON array of {"tag", "value"} records.
    #[arg(long)]
    tags: PathBuf,

    /// Raw pixel payload.
    #[arg(long)]
    pixels: PathBuf,

    /// Output .dcm file.
    #[arg(short, long)]
    output: PathBuf,

    #[command(flatten)]
    options: OptionArgs,
}

#[derive(clap::Args)]
struct RebuildArgs {
    /// Captured study: each subdirectory holds `<i>.tags.json` and `<i>.slice`.
    source: PathBuf,

    /// Study directory to write into. Derived from patient, study and date
    /// under --root when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "download")]
    root: PathBuf,

    /// Reuse existing series directories instead of adding " (n)" suffixes.
    #[arg(long)]
    shared_dirs: bool,

    #[arg(long, default_value = "dcm")]
    extension: String,

    #[command(flatten)]
    options: OptionArgs,
}

#[derive(clap::Args)]
struct InspectArgs {
    file: PathBuf,

    /// Render the first frame to this image file (PNG, JPEG, ...).
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ValidateArgs {
    dir: PathBuf,
}

#[derive(clap::Args)]
struct CompareArgs {
    left: PathBuf,
    right: PathBuf,
}

/// Parse the command line, set up logging and run the command.
pub fn run() -> RebuildResult<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Assemble(args) => run_assemble(args),
        Commands::Rebuild(args) => run_rebuild(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Compare(args) => run_compare(args),
    }
}

fn run_assemble(args: AssembleArgs) -> RebuildResult<()> {
    let options = args.options.load()?;
    let records = read_tag_list(&args.tags)?;
    let pixels = fs::read(&args.pixels)?;

    let instance = assemble(&records, pixels, &options)?;
    save_instance(&instance, &args.output)?;

    println!("{} ({:?})", args.output.display(), instance.pixel_encoding);

    Ok(())
}

#[derive(Debug, Default)]
struct RebuildStats {
    written: usize,
    skipped: usize,
}

/// `<i>` of every `<i>.tags.json` in `dir`, ascending.
fn instance_indices(dir: &Path) -> RebuildResult<Vec<usize>> {
    let mut indices = Vec::new();

    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();

        if let Some(index) = TAG_LIST_FILE.captures(&name).and_then(|c| c[1].parse().ok()) {
            indices.push(index);
        }
    }

    indices.sort_unstable();

    Ok(indices)
}

fn study_dir_for(root: &Path, instance: &Instance) -> PathBuf {
    let attr = |tag: Tag| instance.str_attr(tag).map(str::trim).filter(|s| !s.is_empty());

    let patient = attr(tags::PATIENT_NAME).unwrap_or("Anonymous");
    let description = attr(tags::STUDY_DESCRIPTION)
        .or_else(|| attr(tags::MODALITY))
        .unwrap_or("Study");
    let datetime = format!(
        "{}{}",
        attr(tags::STUDY_DATE).unwrap_or(""),
        attr(tags::STUDY_TIME).unwrap_or("")
    );

    series::suggest_save_dir(root, patient, description, &datetime)
}

fn load_instance(series_dir: &Path, index: usize, options: &AssembleOptions) -> RebuildResult<Option<Instance>> {
    let records = read_tag_list(&series_dir.join(format!("{index}.tags.json")))?;

    if records.is_empty() {
        debug!(index, "empty tag list, nothing to rebuild");
        return Ok(None);
    }

    let pixels = fs::read(series_dir.join(format!("{index}.slice")))?;

    assemble(&records, pixels, options).map(Some)
}

/// Rebuild one series. Instance failures are logged and skipped; an error
/// return means the series directory itself could not be set up.
fn rebuild_series(
    series_dir: &Path,
    study_dir: &mut Option<PathBuf>,
    args: &RebuildArgs,
    options: &AssembleOptions,
) -> RebuildResult<RebuildStats> {
    let name = series_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let indices = instance_indices(series_dir)?;
    let count = indices.last().map_or(0, |last| (last + 1).max(indices.len()));

    let mut stats = RebuildStats::default();
    let mut target: Option<SeriesTarget> = None;

    for index in indices {
        let instance = match load_instance(series_dir, index, options) {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                stats.skipped += 1;
                continue;
            }
            Err(error) => {
                warn!(series = name.as_str(), index, %error, "skipping instance");
                stats.skipped += 1;
                continue;
            }
        };

        let study = study_dir.get_or_insert_with(|| study_dir_for(&args.root, &instance));
        let series = target.get_or_insert_with(|| SeriesTarget::new(study, None, &name, count, !args.shared_dirs));
        let path = series.get(index, &args.extension)?;

        match save_instance(&instance, &path) {
            Ok(()) => stats.written += 1,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to write instance");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

fn run_rebuild(args: RebuildArgs) -> RebuildResult<()> {
    let options = args.options.load()?;

    let mut series_dirs = fs::read_dir(&args.source)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect::<Vec<_>>();
    series_dirs.sort();

    let mut study_dir = args.output.clone();
    let mut totals = RebuildStats::default();
    let mut abandoned = 0;

    for series_dir in &series_dirs {
        match rebuild_series(series_dir, &mut study_dir, &args, &options) {
            Ok(stats) => {
                info!(
                    series = %series_dir.display(),
                    written = stats.written,
                    skipped = stats.skipped,
                    "series done"
                );
                totals.written += stats.written;
                totals.skipped += stats.skipped;
            }
            Err(error) => {
                warn!(series = %series_dir.display(), %error, "abandoning series");
                abandoned += 1;
            }
        }
    }

    match &study_dir {
        Some(dir) => println!(
            "{} instance(s) written to {}, {} skipped, {} series abandoned",
            totals.written,
            dir.display(),
            totals.skipped,
            abandoned
        ),
        None => println!("nothing rebuilt from {}", args.source.display()),
    }

    Ok(())
}

fn run_inspect(args: InspectArgs) -> RebuildResult<()> {
    let instance = reader::read_instance(&args.file)?;

    print!("{}", inspect::dump(&instance));

    if let Some(path) = &args.preview {
        preview::save_preview(&instance, path)?;
        println!("preview written to {}", path.display());
    }

    Ok(())
}

fn run_validate(args: ValidateArgs) -> RebuildResult<()> {
    let report = inspect::validate_dir(&args.dir)?;

    print!("{}", report);

    if report.is_ok() {
        Ok(())
    } else {
        Err(RebuildError::ValidationFailed {
            failed: report.failures.len(),
            total: report.total,
        })
    }
}

fn run_compare(args: CompareArgs) -> RebuildResult<()> {
    let report = inspect::compare_dirs(&args.left, &args.right)?;

    print!("{}", report);

    Ok(())
}
