use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::client::{AssetFetcher, WordPressApi};
use crate::config::Settings;
use crate::dump::{DumpReadFailure, local_media_path, media_filename_from_url, read_records};
use crate::entity::{EntityKind, Record};
use crate::mapping::{MappedEntity, MappingTable, post_create_fields};
use crate::pagination::{PageOptions, fetch_all};
use crate::reconcile::{
    CreateOutcome, ReconcileOptions, ReconcileReport, reconcile, slug_key,
};
use crate::runtime::{ResolvedPaths, ensure_workspace_ready};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub test_mode: bool,
    pub page_delay: Duration,
    /// Password given to every account created on the destination.
    pub new_user_password: Option<String>,
}

impl ImportOptions {
    pub fn from_settings(settings: &Settings, dry_run: bool) -> Self {
        Self {
            dry_run,
            test_mode: settings.test_mode,
            page_delay: settings.http.page_delay,
            new_user_password: settings.new_user_password.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KindImport {
    pub kind: EntityKind,
    pub read: usize,
    pub filtered_out: usize,
    pub read_failures: Vec<DumpReadFailure>,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub kinds: Vec<KindImport>,
    pub mapping: MappingTable,
    pub request_count: usize,
    pub dry_run: bool,
}

impl ImportReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindImport> {
        self.kinds.iter().find(|entry| entry.kind == kind)
    }

    pub fn failed_total(&self) -> usize {
        self.kinds.iter().map(|entry| entry.reconcile.failed.len()).sum()
    }
}

/// Replay the dump into the destination site, kind by kind, building the
/// source-to-destination id mapping as it goes. Posts are created last with
/// their references rewritten through that mapping.
pub fn import_workspace<A>(
    paths: &ResolvedPaths,
    api: &mut A,
    options: &ImportOptions,
) -> Result<ImportReport>
where
    A: WordPressApi + AssetFetcher + ?Sized,
{
    ensure_workspace_ready(paths)?;

    let mut mapping = MappingTable::default();
    let mut kinds = Vec::new();
    for kind in EntityKind::ALL {
        info!("Getting {} from files...", kind.endpoint());
        let dump = read_records(paths, kind)?;
        let read = dump.records.len();
        info!("Retrieved {read} {}", kind.endpoint());

        let records = if kind.is_taxonomy() {
            dump.records
                .into_iter()
                .filter(|record| record.count() > 0)
                .collect::<Vec<_>>()
        } else {
            dump.records
        };
        let filtered_out = read - records.len();

        info!("Migrating {} {}...", records.len(), kind.endpoint());
        let report = reconcile_kind(paths, api, kind, &records, &mapping, options)?;
        if kind != EntityKind::Post {
            for entry in &report.entries {
                if let (Some(source_id), Some(target_id)) = (entry.source_id, entry.target_id) {
                    mapping.insert(
                        kind,
                        source_id,
                        MappedEntity {
                            id: target_id,
                            slug: entry.slug.clone(),
                        },
                    );
                }
            }
        }

        kinds.push(KindImport {
            kind,
            read,
            filtered_out,
            read_failures: dump.failures,
            reconcile: report,
        });
    }

    Ok(ImportReport {
        kinds,
        mapping,
        request_count: api.request_count(),
        dry_run: options.dry_run,
    })
}

fn reconcile_kind<A>(
    paths: &ResolvedPaths,
    api: &mut A,
    kind: EntityKind,
    records: &[Record],
    mapping: &MappingTable,
    options: &ImportOptions,
) -> Result<ReconcileReport>
where
    A: WordPressApi + AssetFetcher + ?Sized,
{
    // Test mode caps the post listing only; lookup kinds need every slug.
    let page_options = PageOptions::for_kind(
        kind,
        options.test_mode && kind == EntityKind::Post,
        options.page_delay,
    );
    let reconcile_options = ReconcileOptions {
        dry_run: options.dry_run,
    };
    let list_existing =
        |api: &mut A| fetch_all(api, kind, &page_options).map(|fetched| fetched.records);

    match kind {
        EntityKind::Category | EntityKind::Tag => reconcile(
            api,
            kind,
            records,
            reconcile_options,
            list_existing,
            slug_key,
            |api, record| {
                api.create(kind, &taxonomy_create_fields(record))
                    .map(CreateOutcome::Created)
            },
        ),
        EntityKind::User => reconcile(
            api,
            kind,
            records,
            reconcile_options,
            list_existing,
            slug_key,
            |api, record| match options.new_user_password.as_deref() {
                Some(password) => api
                    .create(kind, &user_create_fields(record, password))
                    .map(CreateOutcome::Created),
                None => Ok(CreateOutcome::Skipped(
                    "no password for new accounts (set WP_NEW_USER_PASSWORD)".to_string(),
                )),
            },
        ),
        EntityKind::Media => reconcile(
            api,
            kind,
            records,
            reconcile_options,
            list_existing,
            slug_key,
            |api, record| transfer_media(paths, api, record),
        ),
        EntityKind::Post => reconcile(
            api,
            kind,
            records,
            reconcile_options,
            list_existing,
            slug_key,
            |api, record| {
                let fields = post_create_fields(record, mapping);
                let label = record.label();
                let categories = fields
                    .get("categories")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("");
                let tags = fields
                    .get("tags")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("");
                info!("Creating post {label} / categories: {categories} / tags: {tags}");
                api.create(kind, &fields).map(CreateOutcome::Created)
            },
        ),
    }
}

pub fn taxonomy_create_fields(record: &Record) -> Map<String, Value> {
    let mut fields = Map::new();
    for key in ["name", "slug", "taxonomy"] {
        if let Some(value) = record.get(key).filter(|value| !value.is_null()) {
            fields.insert(key.to_string(), value.clone());
        }
    }
    fields
}

pub fn user_create_fields(record: &Record, password: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    let name = record.str_field("name").unwrap_or_default().to_string();
    fields.insert("name".to_string(), Value::String(name.clone()));
    fields.insert("first_name".to_string(), Value::String(name));
    if let Some(email) = record
        .str_field("user_email")
        .or_else(|| record.str_field("email"))
        .filter(|email| !email.trim().is_empty())
    {
        fields.insert("email".to_string(), Value::String(email.to_string()));
    }
    if let Some(slug) = record.slug() {
        fields.insert("slug".to_string(), Value::String(slug.to_string()));
        fields.insert("username".to_string(), Value::String(slug.to_string()));
    }
    fields.insert("password".to_string(), Value::String(password.to_string()));
    if let Some(description) = record.get("description").filter(|value| !value.is_null()) {
        fields.insert("description".to_string(), description.clone());
    }
    fields
}

pub fn media_create_fields(record: &Record) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(slug) = record.slug() {
        fields.insert("slug".to_string(), Value::String(slug.to_string()));
    }
    for key in ["title", "caption", "description"] {
        if let Some(text) = record.rendered(key) {
            fields.insert(key.to_string(), Value::String(text.to_string()));
        }
    }
    if let Some(alt_text) = record.str_field("alt_text") {
        fields.insert("alt_text".to_string(), Value::String(alt_text.to_string()));
    }
    fields
}

/// Make sure the asset behind a media record is in `export/media`, then
/// upload it. A download that leaves no file skips the record.
fn transfer_media<A>(paths: &ResolvedPaths, api: &mut A, record: &Record) -> Result<CreateOutcome>
where
    A: WordPressApi + AssetFetcher + ?Sized,
{
    let Some(url) = record.rendered("guid").filter(|url| !url.trim().is_empty()) else {
        return Ok(CreateOutcome::Skipped("no source url".to_string()));
    };
    let Some(filename) = media_filename_from_url(url) else {
        return Ok(CreateOutcome::Skipped(format!("no file name in {url}")));
    };
    let local = local_media_path(paths, &filename);
    info!("Media url: {url}, filename: {filename}");

    if local.exists() {
        info!("Media exists @ {filename}");
    } else {
        info!("Downloading media from url: {url} into {filename}");
        match api.download(url, &local) {
            Ok(bytes) => info!("Media download successful @ {filename} ({bytes} bytes)"),
            Err(err) => error!("Media download failed for {url}: {err:#}"),
        }
    }
    if !local.exists() {
        return Ok(CreateOutcome::Skipped(format!(
            "download of {filename} failed"
        )));
    }

    api.upload_media(&local, &media_create_fields(record))
        .map(CreateOutcome::Created)
}
