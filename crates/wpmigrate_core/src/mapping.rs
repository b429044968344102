use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::entity::{EntityKind, Record};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedEntity {
    pub id: i64,
    pub slug: String,
}

/// Source id to destination entity, one bucket per non-post kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingTable {
    pub categories: BTreeMap<i64, MappedEntity>,
    pub tags: BTreeMap<i64, MappedEntity>,
    pub users: BTreeMap<i64, MappedEntity>,
    pub media: BTreeMap<i64, MappedEntity>,
}

impl MappingTable {
    pub fn bucket(&self, kind: EntityKind) -> Option<&BTreeMap<i64, MappedEntity>> {
        match kind {
            EntityKind::Category => Some(&self.categories),
            EntityKind::Tag => Some(&self.tags),
            EntityKind::User => Some(&self.users),
            EntityKind::Media => Some(&self.media),
            EntityKind::Post => None,
        }
    }

    fn bucket_mut(&mut self, kind: EntityKind) -> Option<&mut BTreeMap<i64, MappedEntity>> {
        match kind {
            EntityKind::Category => Some(&mut self.categories),
            EntityKind::Tag => Some(&mut self.tags),
            EntityKind::User => Some(&mut self.users),
            EntityKind::Media => Some(&mut self.media),
            EntityKind::Post => None,
        }
    }

    /// Returns false for posts, which nothing references.
    pub fn insert(&mut self, kind: EntityKind, source_id: i64, target: MappedEntity) -> bool {
        match self.bucket_mut(kind) {
            Some(bucket) => {
                bucket.insert(source_id, target);
                true
            }
            None => false,
        }
    }

    pub fn resolve(&self, kind: EntityKind, source_id: i64) -> Option<&MappedEntity> {
        self.bucket(kind)?.get(&source_id)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.bucket(kind).map(BTreeMap::len).unwrap_or(0)
    }
}

/// Comma-join the destination ids for `source_ids`. An unmapped id leaves an
/// empty slot, so `[1, 2]` with only `1 -> 99` mapped gives `"99,"`.
pub fn join_mapped_ids(mapping: &MappingTable, kind: EntityKind, source_ids: &[i64]) -> String {
    source_ids
        .iter()
        .map(|source_id| {
            mapping
                .resolve(kind, *source_id)
                .map(|target| target.id.to_string())
                .unwrap_or_default()
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the create payload for a dumped post, with every reference
/// rewritten to destination ids. Unmapped authors and featured media are
/// left out of the payload.
pub fn post_create_fields(post: &Record, mapping: &MappingTable) -> Map<String, Value> {
    let label = post.label();
    let mut fields = Map::new();
    copy_field(post, &mut fields, "slug");
    copy_field(post, &mut fields, "date");
    copy_field(post, &mut fields, "date_gmt");
    if let Some(title) = post.rendered("title") {
        fields.insert("title".to_string(), Value::String(title.to_string()));
    }
    copy_field(post, &mut fields, "status");
    if let Some(content) = post.rendered("content") {
        fields.insert("content".to_string(), Value::String(content.to_string()));
    }

    match post.id_field("author") {
        Some(author) => match mapping.resolve(EntityKind::User, author) {
            Some(target) => {
                fields.insert("author".to_string(), Value::from(target.id));
            }
            None => warn!("Post {label}: author {author} was not migrated; leaving author unset."),
        },
        None => warn!("Post {label} has no author."),
    }

    let featured = post.id_field("featured_media").unwrap_or(0);
    if featured > 0 {
        match mapping.resolve(EntityKind::Media, featured) {
            Some(target) => {
                fields.insert("featured_media".to_string(), Value::from(target.id));
            }
            None => warn!(
                "Post {label}: featured media {featured} was not migrated; leaving it unset."
            ),
        }
    }

    fields.insert(
        "categories".to_string(),
        Value::String(join_mapped_ids(
            mapping,
            EntityKind::Category,
            &post.id_list("categories"),
        )),
    );
    fields.insert(
        "tags".to_string(),
        Value::String(join_mapped_ids(
            mapping,
            EntityKind::Tag,
            &post.id_list("tags"),
        )),
    );
    fields
}

fn copy_field(record: &Record, fields: &mut Map<String, Value>, key: &str) {
    if let Some(value) = record.get(key)
        && !value.is_null()
    {
        fields.insert(key.to_string(), value.clone());
    }
}
