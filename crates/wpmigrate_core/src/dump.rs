use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::entity::{EntityKind, Record};
use crate::runtime::{ResolvedPaths, normalize_for_display};

pub fn dump_file_name(site: &str, id: i64) -> String {
    format!("{site}-{id}.json")
}

/// Write one exported record as `{site}-{id}.json`, tagged with `site` and
/// `type`.
pub fn write_record(
    paths: &ResolvedPaths,
    kind: EntityKind,
    site: &str,
    record: &Record,
) -> Result<PathBuf> {
    let id = record
        .id()
        .ok_or_else(|| anyhow::anyhow!("{kind} record {} has no numeric id", record.label()))?;
    let path = paths.entity_dir(kind).join(dump_file_name(site, id));

    let mut tagged = record.clone();
    tagged.insert("site", Value::String(site.to_string()));
    tagged.insert("type", Value::String(kind.as_str().to_string()));
    let body = serde_json::to_string(&tagged)
        .with_context(|| format!("failed to serialize {kind} {id}"))?;
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;

    info!(
        "Outputting {kind} {id} in {}",
        normalize_for_display(path.strip_prefix(&paths.base_dir).unwrap_or(path.as_path()))
    );
    Ok(path)
}

#[derive(Debug, Clone)]
pub struct DumpReadFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DumpReadReport {
    pub records: Vec<Record>,
    pub failures: Vec<DumpReadFailure>,
}

/// Parse every `.json` file in the kind's entry directory, in file-name
/// order. Unreadable files are reported, not fatal.
pub fn read_records(paths: &ResolvedPaths, kind: EntityKind) -> Result<DumpReadReport> {
    let dir = paths.entity_dir(kind);
    let mut report = DumpReadReport::default();
    for path in json_files(&dir)? {
        match read_record_file(&path) {
            Ok(record) => report.records.push(record),
            Err(err) => {
                warn!("Skipping unreadable dump file {}: {err:#}", path.display());
                report.failures.push(DumpReadFailure {
                    path,
                    reason: format!("{err:#}"),
                });
            }
        }
    }
    debug!(%kind, read = report.records.len(), failed = report.failures.len(), "read dump");
    Ok(report)
}

fn read_record_file(path: &Path) -> Result<Record> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Record::from_value(value)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub removed_files: Vec<PathBuf>,
    pub cleaned_kinds: Vec<EntityKind>,
    pub removed_media_files: usize,
}

/// Remove dumped `.json` files for `kinds`, and optionally every downloaded
/// file in `export/media`.
pub fn clean_dumps(
    paths: &ResolvedPaths,
    kinds: &[EntityKind],
    include_media: bool,
) -> Result<CleanReport> {
    let mut report = CleanReport::default();
    for kind in kinds {
        info!("Cleaning the {kind} directory...");
        for path in json_files(&paths.entity_dir(*kind))? {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            report.removed_files.push(path);
        }
        report.cleaned_kinds.push(*kind);
    }

    if include_media && paths.export_media_dir.exists() {
        info!("Cleaning downloaded media...");
        for entry in WalkDir::new(&paths.export_media_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
        {
            let entry = entry
                .with_context(|| format!("failed to walk {}", paths.export_media_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            report.removed_media_files += 1;
        }
    }
    Ok(report)
}

/// Trailing path segment of an asset URL, ignoring any query or fragment.
pub fn media_filename_from_url(url: &str) -> Option<String> {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_suffix.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name.to_string())
}

pub fn local_media_path(paths: &ResolvedPaths, filename: &str) -> PathBuf {
    paths.export_media_dir.join(filename)
}
