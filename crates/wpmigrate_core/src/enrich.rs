use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::{AssetFetcher, WordPressApi};
use crate::entity::{EntityKind, Record};

/// Bodies shorter than this are assumed to come from an embedded widget
/// (Viralpress) whose real markup only exists on the public permalink.
pub const MIN_CONTENT_CHARS: usize = 10;
pub const FALLBACK_CONTAINER_TAG: &str = "div";
pub const FALLBACK_CONTAINER_CLASS: &str = "vp-entry";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub featured_resolved: usize,
    pub featured_missing: usize,
    pub featured_failed: usize,
    pub content_recovered: usize,
    pub content_emptied: usize,
}

/// Run both enrichments on one post. Neither can fail the post.
pub fn enrich_post<A>(api: &mut A, post: Record, stats: &mut EnrichmentStats) -> Record
where
    A: WordPressApi + AssetFetcher + ?Sized,
{
    let post = attach_featured_media_url(api, post, stats);
    recover_short_content(api, post, stats)
}

pub fn attach_featured_media_url<A>(
    api: &mut A,
    mut post: Record,
    stats: &mut EnrichmentStats,
) -> Record
where
    A: WordPressApi + ?Sized,
{
    let post_label = post.label();
    let featured_id = post.id_field("featured_media").unwrap_or(0);
    if featured_id <= 0 {
        let category = post
            .id_list("categories")
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<none>".to_string());
        warn!("Post {post_label} with category {category} is missing the featured image.");
        stats.featured_missing += 1;
        return post;
    }

    let resolved = api.get(EntityKind::Media, featured_id).and_then(|media| {
        media
            .rendered("guid")
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("media {featured_id} has no guid.rendered url"))
    });
    match resolved {
        Ok(url) => {
            post.insert("featured_media_url", Value::String(url));
            stats.featured_resolved += 1;
        }
        Err(err) => {
            error!("Couldn't fetch featured image for post {post_label}: {err:#}");
            stats.featured_failed += 1;
        }
    }
    post
}

pub fn recover_short_content<A>(
    api: &mut A,
    mut post: Record,
    stats: &mut EnrichmentStats,
) -> Record
where
    A: AssetFetcher + ?Sized,
{
    let content_len = post
        .rendered("content")
        .map(|content| content.chars().count())
        .unwrap_or(0);
    if content_len >= MIN_CONTENT_CHARS {
        return post;
    }

    let post_label = post.label();
    info!("Post {post_label} has a near-empty body; fetching the Viralpress content.");
    let recovered = match post.str_field("link") {
        Some(link) => {
            info!("Url {link}");
            api.fetch_html(link).and_then(|html| {
                extract_container_inner_html(
                    &html,
                    FALLBACK_CONTAINER_TAG,
                    FALLBACK_CONTAINER_CLASS,
                )
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "no <{FALLBACK_CONTAINER_TAG} class=\"{FALLBACK_CONTAINER_CLASS}\"> in {link}"
                    )
                })
            })
        }
        None => Err(anyhow::anyhow!("post has no permalink")),
    };

    let content = match recovered {
        Ok(markup) => {
            info!("Fetched the Viralpress content for post {post_label}.");
            stats.content_recovered += 1;
            markup
        }
        Err(err) => {
            error!("Couldn't recover content for post {post_label}: {err:#}");
            stats.content_emptied += 1;
            String::new()
        }
    };
    post.set_rendered("content", &content);
    post
}

/// Inner markup of the first `<tag>` element whose class list contains
/// `class_name`. Nested elements of the same tag are balanced; the match is
/// ASCII case-insensitive on tag names.
pub fn extract_container_inner_html(html: &str, tag: &str, class_name: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let tag = tag.to_ascii_lowercase();
    let open_prefix = format!("<{tag}");
    let close_token = format!("</{tag}");

    let mut search_from = 0usize;
    while let Some(relative) = lower[search_from..].find(&open_prefix) {
        let start = search_from + relative;
        let after_name = start + open_prefix.len();
        search_from = after_name;
        if !is_tag_boundary(lower.as_bytes().get(after_name).copied()) {
            continue;
        }
        let tag_end = find_tag_end(&lower, after_name)?;
        if !has_class(&html[start..tag_end], class_name) {
            continue;
        }
        let inner_start = tag_end + 1;
        let inner_end = find_matching_close(&lower, inner_start, &open_prefix, &close_token)?;
        return Some(html[inner_start..inner_end].to_string());
    }
    None
}

/// Position of the `>` closing an open tag, skipping quoted attribute values.
fn find_tag_end(lower: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, byte) in lower.as_bytes()[from..].iter().copied().enumerate() {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(from + offset),
            (None, _) => {}
        }
    }
    None
}

fn find_matching_close(
    lower: &str,
    from: usize,
    open_prefix: &str,
    close_token: &str,
) -> Option<usize> {
    let mut depth = 1usize;
    let mut cursor = from;
    loop {
        let next_close = cursor + lower[cursor..].find(close_token)?;
        let next_open = next_open_tag(lower, cursor, open_prefix).filter(|open| *open < next_close);
        match next_open {
            Some(open) => {
                depth += 1;
                cursor = open + open_prefix.len();
            }
            None => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close);
                }
                cursor = next_close + close_token.len();
            }
        }
    }
}

fn next_open_tag(lower: &str, from: usize, open_prefix: &str) -> Option<usize> {
    let mut cursor = from;
    while let Some(offset) = lower[cursor..].find(open_prefix) {
        let start = cursor + offset;
        if is_tag_boundary(lower.as_bytes().get(start + open_prefix.len()).copied()) {
            return Some(start);
        }
        cursor = start + open_prefix.len();
    }
    None
}

fn is_tag_boundary(byte: Option<u8>) -> bool {
    matches!(
        byte,
        Some(b' ' | b'>' | b'/' | b'\t' | b'\n' | b'\r')
    )
}

fn has_class(open_tag: &str, class_name: &str) -> bool {
    let lower = open_tag.to_ascii_lowercase();
    let mut search_from = 0usize;
    while let Some(offset) = lower[search_from..].find("class") {
        let position = search_from + offset;
        search_from = position + "class".len();
        let preceded_by_space = lower[..position]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        if !preceded_by_space {
            continue;
        }
        let Some(rest) = open_tag[search_from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => rest[1..].split(quote).next().unwrap_or(""),
            Some(_) => rest
                .split(|ch: char| ch.is_whitespace() || ch == '>')
                .next()
                .unwrap_or(""),
            None => "",
        };
        return value.split_whitespace().any(|class| class == class_name);
    }
    false
}
