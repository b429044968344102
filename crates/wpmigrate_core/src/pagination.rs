use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::client::WordPressApi;
use crate::entity::{EntityKind, Record};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_POST_PAGE_SIZE: usize = 50;
pub const TEST_MODE_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    pub per_page: usize,
    /// Stop after the first page.
    pub single_page: bool,
    /// Pause between successive page requests.
    pub delay: Duration,
}

impl PageOptions {
    pub fn for_kind(kind: EntityKind, test_mode: bool, delay: Duration) -> Self {
        if test_mode {
            return Self {
                per_page: TEST_MODE_PAGE_SIZE,
                single_page: true,
                delay,
            };
        }
        Self {
            per_page: match kind {
                EntityKind::Post => DEFAULT_POST_PAGE_SIZE,
                _ => DEFAULT_PAGE_SIZE,
            },
            single_page: false,
            delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedCollection {
    pub records: Vec<Record>,
    pub page_requests: usize,
}

/// Walk offset windows until a short page comes back. A collection whose size
/// is an exact multiple of `per_page` costs one extra, empty request.
pub fn fetch_all<A: WordPressApi + ?Sized>(
    api: &mut A,
    kind: EntityKind,
    options: &PageOptions,
) -> Result<FetchedCollection> {
    let per_page = options.per_page.max(1);
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut page_requests = 0usize;

    loop {
        if page_requests > 0 && !options.delay.is_zero() {
            info!(
                "Waiting {} ms before the next {} page...",
                options.delay.as_millis(),
                kind
            );
            sleep(options.delay);
        }

        let page = api
            .list(kind, per_page, offset)
            .with_context(|| format!("failed to fetch {kind} page at offset {offset}"))?;
        page_requests += 1;
        let received = page.len();
        debug!(%kind, offset, received, "fetched page");
        records.extend(page);

        if options.single_page || received < per_page {
            break;
        }
        offset += per_page;
    }

    Ok(FetchedCollection {
        records,
        page_requests,
    })
}
