use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};

use crate::client::{AssetFetcher, WordPressApi};
use crate::entity::{EntityKind, Record};

/// In-memory WordPress site for tests.
#[derive(Default)]
pub(crate) struct MockApi {
    pub collections: BTreeMap<EntityKind, Vec<Record>>,
    pub next_id: i64,
    pub list_calls: Vec<(EntityKind, usize, usize)>,
    pub get_calls: Vec<(EntityKind, i64)>,
    pub created: Vec<(EntityKind, Map<String, Value>)>,
    pub uploads: Vec<(PathBuf, Map<String, Value>)>,
    pub fail_list: bool,
    pub fail_get: bool,
    pub fail_create_slugs: BTreeSet<String>,
    pub pages: BTreeMap<String, String>,
    pub downloads: BTreeMap<String, Vec<u8>>,
    pub fetch_calls: Vec<String>,
    pub download_calls: Vec<String>,
    pub request_count: usize,
}

impl MockApi {
    pub fn seed(&mut self, kind: EntityKind, record: Record) {
        self.collections.entry(kind).or_default().push(record);
    }

    pub fn records(&self, kind: EntityKind) -> &[Record] {
        self.collections
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn created_of(&self, kind: EntityKind) -> Vec<&Map<String, Value>> {
        self.created
            .iter()
            .filter(|(created_kind, _)| *created_kind == kind)
            .map(|(_, fields)| fields)
            .collect()
    }

    fn allocate_id(&mut self) -> i64 {
        if self.next_id == 0 {
            self.next_id = 1000;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_create(&self, fields: &Map<String, Value>) -> Result<()> {
        if let Some(slug) = fields.get("slug").and_then(Value::as_str)
            && self.fail_create_slugs.contains(slug)
        {
            bail!("wordpress API error [rest_invalid_param] (HTTP 400): rejected {slug}");
        }
        Ok(())
    }
}

impl WordPressApi for MockApi {
    fn list(&mut self, kind: EntityKind, per_page: usize, offset: usize) -> Result<Vec<Record>> {
        self.request_count += 1;
        self.list_calls.push((kind, per_page, offset));
        if self.fail_list {
            bail!("request failed with HTTP 401 Unauthorized");
        }
        Ok(self
            .records(kind)
            .iter()
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect())
    }

    fn get(&mut self, kind: EntityKind, id: i64) -> Result<Record> {
        self.request_count += 1;
        self.get_calls.push((kind, id));
        if self.fail_get {
            bail!("request failed with HTTP 500 Internal Server Error");
        }
        self.records(kind)
            .iter()
            .find(|record| record.id() == Some(id))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("wordpress API error [rest_invalid_id] (HTTP 404)"))
    }

    fn create(&mut self, kind: EntityKind, fields: &Map<String, Value>) -> Result<Record> {
        self.request_count += 1;
        self.check_create(fields)?;
        let id = self.allocate_id();
        let mut stored = fields.clone();
        stored.insert("id".to_string(), json!(id));
        if kind.is_taxonomy() {
            stored.insert("count".to_string(), json!(0));
        }
        let record = Record::new(stored);
        self.created.push((kind, fields.clone()));
        self.seed(kind, record.clone());
        Ok(record)
    }

    fn upload_media(&mut self, file: &Path, fields: &Map<String, Value>) -> Result<Record> {
        self.request_count += 1;
        if !file.exists() {
            bail!("upload source missing: {}", file.display());
        }
        self.check_create(fields)?;
        let id = self.allocate_id();
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut stored = fields.clone();
        stored.insert("id".to_string(), json!(id));
        stored.insert(
            "guid".to_string(),
            json!({ "rendered": format!("https://dest.example/uploads/{filename}") }),
        );
        let record = Record::new(stored);
        self.uploads.push((file.to_path_buf(), fields.clone()));
        self.created.push((EntityKind::Media, fields.clone()));
        self.seed(EntityKind::Media, record.clone());
        Ok(record)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl AssetFetcher for MockApi {
    fn fetch_html(&mut self, url: &str) -> Result<String> {
        self.fetch_calls.push(url.to_string());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("request failed with HTTP 404 Not Found"))
    }

    fn download(&mut self, url: &str, destination: &Path) -> Result<u64> {
        self.download_calls.push(url.to_string());
        let bytes = self
            .downloads
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("request failed with HTTP 404 Not Found"))?;
        fs::write(destination, bytes)?;
        Ok(bytes.len() as u64)
    }
}

pub(crate) fn record(value: Value) -> Record {
    Record::from_value(value).expect("object record")
}

pub(crate) fn term(id: i64, slug: &str, count: i64) -> Record {
    record(json!({
        "id": id,
        "slug": slug,
        "name": slug.to_uppercase(),
        "taxonomy": "category",
        "count": count,
    }))
}

pub(crate) fn user(id: i64, slug: &str) -> Record {
    record(json!({
        "id": id,
        "slug": slug,
        "name": format!("User {slug}"),
        "user_email": format!("{slug}@source.example"),
        "description": "writer",
    }))
}

pub(crate) fn media(id: i64, slug: &str, url: &str) -> Record {
    record(json!({
        "id": id,
        "slug": slug,
        "guid": { "rendered": url },
        "title": { "rendered": format!("Title {slug}") },
        "alt_text": "alt",
        "caption": { "rendered": "<p>caption</p>" },
        "description": { "rendered": "<p>description</p>" },
    }))
}

pub(crate) fn post(
    id: i64,
    slug: &str,
    author: i64,
    categories: &[i64],
    tags: &[i64],
    featured_media: i64,
) -> Record {
    record(json!({
        "id": id,
        "slug": slug,
        "date": "2019-03-01T10:00:00",
        "date_gmt": "2019-03-01T08:00:00",
        "title": { "rendered": format!("Post {slug}") },
        "content": { "rendered": format!("<p>Body of {slug}</p>"), "protected": false },
        "status": "publish",
        "link": format!("https://source.example/{slug}/"),
        "author": author,
        "categories": categories,
        "tags": tags,
        "featured_media": featured_media,
    }))
}
