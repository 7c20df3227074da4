use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;

use crate::database::repo::{CatalogRepo, Emoji, HashRow, QuerySpec};
use crate::error::Result;
use crate::utils::tags::split_tags_str;

pub const DEFAULT_PAGE_SIZE: u64 = 30;

/// How many neighbours a similarity query returns.
pub const DEFAULT_SIMILAR_N: usize = 20;

/// One inbound catalog query. Three mutually exclusive modes, selected by
/// which optional field is set: similarity first, then tag filter, then
/// the unfiltered listing.
#[derive(Debug, Clone)]
pub struct EmojiQuery {
    /// Comma-separated tag names; an emoji must carry every one of them.
    pub tags_str: Option<String>,
    /// Reference emoji id for similarity ranking.
    pub similar_to: Option<i64>,
    /// 1-indexed; values below 1 are clamped.
    pub page: u64,
    pub page_size: u64,
    /// Similarity-mode result cap. Similarity ignores page/page_size and
    /// returns the `output_n` nearest neighbours, reference excluded.
    pub output_n: usize,
}

impl Default for EmojiQuery {
    fn default() -> Self {
        Self {
            tags_str: None,
            similar_to: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            output_n: DEFAULT_SIMILAR_N,
        }
    }
}

/// The boundary payload: one page of results plus the size of the whole
/// filtered pool, so callers can compute page-button counts.
#[derive(Debug, Serialize)]
pub struct EmojiPage {
    pub emoji_list: Vec<Emoji>,
    pub emoji_n: u64,
}

impl EmojiPage {
    pub fn empty() -> Self {
        Self {
            emoji_list: Vec::new(),
            emoji_n: 0,
        }
    }
}

pub fn list_emoji(repo: &CatalogRepo, query: &EmojiQuery) -> Result<EmojiPage> {
    if let Some(reference_id) = query.similar_to {
        return similar_page(repo, reference_id, query.output_n);
    }
    if let Some(tags_str) = query.tags_str.as_deref() {
        let names = split_tags_str(tags_str);
        if !names.is_empty() {
            return filtered_page(repo, &names, query);
        }
    }
    full_page(repo, query)
}

/// Tag-intersection mode: the emoji must carry every listed tag. An
/// unknown tag name fails the whole filter closed, never matches by
/// omission.
fn filtered_page(repo: &CatalogRepo, names: &[String], query: &EmojiQuery) -> Result<EmojiPage> {
    let resolved = repo.find_tags_by_names(names)?;
    let tags = match resolved.into_iter().collect::<Option<Vec<_>>>() {
        Some(tags) => tags,
        None => return Ok(EmojiPage::empty()),
    };

    let mut pool: Option<BTreeSet<i64>> = None;
    for tag in &tags {
        let ids = repo.emoji_ids_for_tag(tag.id)?;
        pool = Some(match pool {
            None => ids,
            Some(acc) => acc.intersection(&ids).copied().collect(),
        });
    }
    let pool = pool.unwrap_or_default();
    let emoji_n = pool.len() as u64;

    let (offset, limit) = window(query);
    let emoji_list = repo.list(&QuerySpec {
        id_pool: Some(pool.into_iter().collect()),
        offset,
        limit: Some(limit),
    })?;
    Ok(EmojiPage { emoji_list, emoji_n })
}

/// Similarity mode: rank the whole catalog by Hamming distance from the
/// reference fingerprint. An unknown reference id is a legitimate
/// zero-result query, not a fault.
fn similar_page(repo: &CatalogRepo, reference_id: i64, output_n: usize) -> Result<EmojiPage> {
    let reference = match repo.get_emoji(reference_id)? {
        Some(emoji) => emoji,
        None => return Ok(EmojiPage::empty()),
    };
    let reference_hash = reference.average_hash;

    let mut ranked: Vec<(u32, HashRow)> = repo
        .all_hashes()?
        .into_par_iter()
        .filter(|row| row.id != reference_id)
        .map(|row| (reference_hash.distance(row.hash), row))
        .collect();

    // Ties fall back to the shared listing order so repeated calls agree.
    ranked.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
            .then_with(|| b.1.id.cmp(&a.1.id))
    });
    ranked.truncate(output_n);

    let mut emoji_list = Vec::with_capacity(ranked.len());
    for (_, row) in &ranked {
        if let Some(emoji) = repo.get_emoji(row.id)? {
            emoji_list.push(emoji);
        }
    }
    let emoji_n = emoji_list.len() as u64;
    Ok(EmojiPage { emoji_list, emoji_n })
}

fn full_page(repo: &CatalogRepo, query: &EmojiQuery) -> Result<EmojiPage> {
    let emoji_n = repo.count_emoji()?;
    let (offset, limit) = window(query);
    let emoji_list = repo.list(&QuerySpec {
        id_pool: None,
        offset,
        limit: Some(limit),
    })?;
    Ok(EmojiPage { emoji_list, emoji_n })
}

fn window(query: &EmojiQuery) -> (u64, u64) {
    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    ((page - 1) * page_size, page_size)
}
