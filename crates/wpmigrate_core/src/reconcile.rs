use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::entity::{EntityKind, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Reused,
    /// Dry run: the record would have been created.
    Planned,
}

impl ReconcileAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Reused => "reused",
            Self::Planned => "planned",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconciledEntry {
    pub source_id: Option<i64>,
    pub slug: String,
    /// Destination id; absent only for planned entries.
    pub target_id: Option<i64>,
    pub action: ReconcileAction,
}

#[derive(Debug, Clone)]
pub struct UnreconciledRecord {
    pub source_id: Option<i64>,
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub kind: EntityKind,
    pub existing: usize,
    pub entries: Vec<ReconciledEntry>,
    pub skipped: Vec<UnreconciledRecord>,
    pub failed: Vec<UnreconciledRecord>,
}

impl ReconcileReport {
    pub fn count(&self, action: ReconcileAction) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.action == action)
            .count()
    }
}

/// What a create projector did with one record.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Record),
    /// Deliberately not created; the reason is logged and reported.
    Skipped(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub dry_run: bool,
}

/// Create-or-reuse by key for one entity kind.
///
/// `list_existing` loads the destination collection once. Every local record
/// whose key matches an existing record reuses it untouched; the rest go
/// through `project`, which issues the create. Created records join the index
/// so later duplicates in `local` are reused. A failing create is logged and
/// recorded, and the batch continues. Only `list_existing` can fail the call.
pub fn reconcile<A, L, K, P>(
    api: &mut A,
    kind: EntityKind,
    local: &[Record],
    options: ReconcileOptions,
    list_existing: L,
    key: K,
    mut project: P,
) -> Result<ReconcileReport>
where
    A: ?Sized,
    L: FnOnce(&mut A) -> Result<Vec<Record>>,
    K: Fn(&Record) -> Option<String>,
    P: FnMut(&mut A, &Record) -> Result<CreateOutcome>,
{
    let existing = list_existing(api)?;
    let existing_count = existing.len();
    let mut index: BTreeMap<String, Option<i64>> = BTreeMap::new();
    for record in &existing {
        if let Some(record_key) = key(record) {
            index.entry(record_key).or_insert(record.id());
        }
    }

    let mut report = ReconcileReport {
        kind,
        existing: existing_count,
        entries: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };

    for record in local {
        let source_id = record.id();
        let label = record.label();
        let Some(record_key) = key(record) else {
            warn!("Skipping {kind} {label}: no slug to match on.");
            report.skipped.push(UnreconciledRecord {
                source_id,
                label,
                reason: "missing slug".to_string(),
            });
            continue;
        };

        if let Some(existing_id) = index.get(&record_key) {
            warn!("{kind} already exists: {record_key}");
            report.entries.push(ReconciledEntry {
                source_id,
                slug: record_key,
                target_id: *existing_id,
                action: ReconcileAction::Reused,
            });
            continue;
        }

        if options.dry_run {
            info!("Would create {kind} with slug: {record_key}");
            index.insert(record_key.clone(), None);
            report.entries.push(ReconciledEntry {
                source_id,
                slug: record_key,
                target_id: None,
                action: ReconcileAction::Planned,
            });
            continue;
        }

        info!("Creating {kind} with slug: {record_key}");
        match project(api, record) {
            Ok(CreateOutcome::Created(created)) => {
                let Some(target_id) = created.id() else {
                    error!("Created {kind} {record_key} came back without an id.");
                    report.failed.push(UnreconciledRecord {
                        source_id,
                        label,
                        reason: "create response had no id".to_string(),
                    });
                    continue;
                };
                let target_slug = created
                    .slug()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| record_key.clone());
                info!("{kind} with slug: {target_slug} was created.");
                index.insert(record_key, Some(target_id));
                if let Some(created_key) = key(&created) {
                    index.entry(created_key).or_insert(Some(target_id));
                }
                report.entries.push(ReconciledEntry {
                    source_id,
                    slug: target_slug,
                    target_id: Some(target_id),
                    action: ReconcileAction::Created,
                });
            }
            Ok(CreateOutcome::Skipped(reason)) => {
                warn!("Skipping {kind} {label}: {reason}");
                report.skipped.push(UnreconciledRecord {
                    source_id,
                    label,
                    reason,
                });
            }
            Err(err) => {
                error!("Error happened on creating the {kind} {label}: {err:#}");
                report.failed.push(UnreconciledRecord {
                    source_id,
                    label,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    Ok(report)
}

pub fn slug_key(record: &Record) -> Option<String> {
    record.slug().map(ToString::to_string)
}
