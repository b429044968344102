use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::client::{AssetFetcher, WordPressApi};
use crate::config::Settings;
use crate::dump::write_record;
use crate::enrich::{EnrichmentStats, enrich_post};
use crate::entity::EntityKind;
use crate::pagination::{PageOptions, fetch_all};
use crate::runtime::{ResolvedPaths, ensure_workspace_ready};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub site: String,
    pub test_mode: bool,
    pub page_delay: Duration,
}

impl ExportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            site: settings.site.clone(),
            test_mode: settings.test_mode,
            page_delay: settings.http.page_delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KindExport {
    pub kind: EntityKind,
    pub fetched: usize,
    pub page_requests: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub kinds: Vec<KindExport>,
    pub enrichment: EnrichmentStats,
    pub request_count: usize,
}

impl ExportReport {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindExport> {
        self.kinds.iter().find(|entry| entry.kind == kind)
    }

    pub fn written_total(&self) -> usize {
        self.kinds.iter().map(|entry| entry.files.len()).sum()
    }
}

/// Pull every kind from the source site and write it to the dump. Listing
/// errors abort; post enrichment never does.
pub fn export_site<A>(
    paths: &ResolvedPaths,
    api: &mut A,
    options: &ExportOptions,
) -> Result<ExportReport>
where
    A: WordPressApi + AssetFetcher + ?Sized,
{
    ensure_workspace_ready(paths)?;

    let mut enrichment = EnrichmentStats::default();
    let mut kinds = Vec::new();
    for kind in EntityKind::ALL {
        info!("Fetching {}...", kind.endpoint());
        let page_options = PageOptions::for_kind(kind, options.test_mode, options.page_delay);
        let fetched = fetch_all(api, kind, &page_options)
            .with_context(|| format!("failed to export {}", kind.endpoint()))?;
        info!("Retrieved {} {}", fetched.records.len(), kind.endpoint());

        let page_requests = fetched.page_requests;
        let mut records = fetched.records;
        if kind == EntityKind::Post {
            let mut enriched = Vec::with_capacity(records.len());
            for post in records {
                enriched.push(enrich_post(api, post, &mut enrichment));
            }
            records = enriched;
        }

        info!("Exporting {}...", kind.endpoint());
        let mut files = Vec::with_capacity(records.len());
        for record in &records {
            files.push(write_record(paths, kind, &options.site, record)?);
        }

        kinds.push(KindExport {
            kind,
            fetched: records.len(),
            page_requests,
            files,
        });
    }

    Ok(ExportReport {
        kinds,
        enrichment,
        request_count: api.request_count(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::{ExportOptions, export_site};
    use crate::dump::{clean_dumps, read_records};
    use crate::entity::EntityKind;
    use crate::importer::{ImportOptions, import_workspace};
    use crate::runtime::{InitOptions, init_layout, test_paths};
    use crate::testing::{MockApi, media, post, term, user};

    fn options() -> ExportOptions {
        ExportOptions {
            site: "acme".to_string(),
            test_mode: false,
            page_delay: Duration::ZERO,
        }
    }

    fn source_site() -> MockApi {
        let mut source = MockApi::default();
        source.seed(EntityKind::Category, term(1, "empty", 0));
        source.seed(EntityKind::Category, term(2, "news", 5));
        source.seed(EntityKind::Tag, term(3, "hot", 3));
        source.seed(EntityKind::User, user(4, "alice"));
        source.seed(EntityKind::Post, post(10, "first", 4, &[2], &[3], 0));
        source.seed(EntityKind::Post, post(11, "second", 4, &[2], &[], 0));
        source.seed(EntityKind::Post, post(12, "third", 4, &[1, 2], &[3], 0));
        source
    }

    #[test]
    fn export_writes_one_file_per_record() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("init");

        let mut source = source_site();
        source.seed(
            EntityKind::Media,
            media(7, "cover", "https://source.example/uploads/cover.jpg"),
        );
        let report = export_site(&paths, &mut source, &options()).expect("export");

        assert_eq!(report.written_total(), 8);
        assert_eq!(report.kind(EntityKind::Category).expect("categories").fetched, 2);
        assert!(paths.entity_dir(EntityKind::Post).join("acme-12.json").is_file());
        assert!(paths.entity_dir(EntityKind::Media).join("acme-7.json").is_file());
        assert_eq!(report.enrichment.featured_missing, 3);

        let posts = read_records(&paths, EntityKind::Post).expect("read");
        assert_eq!(posts.records.len(), 3);
        assert!(
            posts
                .records
                .iter()
                .all(|record| record.str_field("type") == Some("post"))
        );
    }

    #[test]
    fn listing_failure_aborts_export() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("init");

        let mut source = MockApi {
            fail_list: true,
            ..MockApi::default()
        };
        let error = export_site(&paths, &mut source, &options()).expect_err("must fail");
        assert!(format!("{error:#}").contains("failed to export categories"));
    }

    #[test]
    fn export_requires_initialized_workspace() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let mut source = source_site();
        assert!(export_site(&paths, &mut source, &options()).is_err());
        assert!(source.list_calls.is_empty());
    }

    #[test]
    fn init_export_clean_import_workflow() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("init");

        let mut source = source_site();
        export_site(&paths, &mut source, &options()).expect("export");

        clean_dumps(&paths, &[EntityKind::User], false).expect("clean users");

        let mut destination = MockApi::default();
        let report = import_workspace(
            &paths,
            &mut destination,
            &ImportOptions {
                new_user_password: Some("pw".to_string()),
                ..ImportOptions::default()
            },
        )
        .expect("import");

        let users = report.kind(EntityKind::User).expect("users");
        assert_eq!(users.read, 0);
        assert!(users.reconcile.entries.is_empty());
        assert!(report.mapping.users.is_empty());

        let categories = destination.created_of(EntityKind::Category);
        assert_eq!(categories.len(), 1);
        assert_eq!(
            categories[0].get("slug").and_then(|slug| slug.as_str()),
            Some("news")
        );
        assert_eq!(report.mapping.categories.len(), 1);
        assert!(report.mapping.categories.contains_key(&2));
        assert_eq!(report.mapping.tags.len(), 1);
        assert!(report.mapping.tags.contains_key(&3));

        let posts = destination.created_of(EntityKind::Post);
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|fields| fields.get("author").is_none()));
        let news_id = report.mapping.categories[&2].id;
        let third = posts
            .iter()
            .find(|fields| fields.get("slug").and_then(|slug| slug.as_str()) == Some("third"))
            .expect("third post");
        assert_eq!(
            third.get("categories").and_then(|value| value.as_str()),
            Some(format!(",{news_id}").as_str())
        );
    }
}
