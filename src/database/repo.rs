use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::database::schema::SCHEMA;
use crate::error::{CatalogError, Result};
use crate::media::phash::AverageHash;

#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Emoji {
    pub id: i64,
    pub url: String,
    pub average_hash: AverageHash,
    pub created_at: DateTime<Utc>,
    /// Sorted by tag name for deterministic display.
    pub tags: Vec<Tag>,
}

/// One row of the hash column, enough to rank the whole catalog by
/// Hamming distance without loading tags.
#[derive(Debug, Clone, Copy)]
pub struct HashRow {
    pub id: i64,
    pub hash: AverageHash,
    pub created_at: DateTime<Utc>,
}

/// How multiple tag-search fragments combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every fragment must match (AND).
    All,
    /// Any fragment may match (OR).
    Any,
}

/// Typed query specification consumed by [`CatalogRepo::list`].
///
/// Ordering is fixed for every listing: created_at DESC with id DESC as
/// the secondary key, so pagination stays deterministic even when
/// timestamps collide.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// Restrict to these ids (a pre-computed filter pool). `None` lists
    /// the whole catalog; an empty pool yields no rows.
    pub id_pool: Option<Vec<i64>>,
    pub offset: u64,
    /// `None` means no limit.
    pub limit: Option<u64>,
}

pub struct CatalogRepo {
    conn: Connection,
}

impl CatalogRepo {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // -- tag store --

    /// Returns the tag with this exact name, creating it first if needed.
    ///
    /// `INSERT OR IGNORE` backed by the UNIQUE constraint keeps concurrent
    /// identical calls from producing two rows.
    pub fn get_or_create_tag(&self, name: &str) -> Result<Tag> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now()],
        )?;
        let tag = self.conn.query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![name],
            Self::tag_from_row,
        )?;
        Ok(tag)
    }

    /// Positional lookup: preserves input order, `None` where no tag has
    /// that exact name. Callers use a `None` to fail a filter closed.
    pub fn find_tags_by_names(&self, names: &[String]) -> Result<Vec<Option<Tag>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM tags WHERE name = ?1")?;
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            let tag = stmt
                .query_row(params![name], Self::tag_from_row)
                .optional()?;
            found.push(tag);
        }
        Ok(found)
    }

    /// Case-insensitive substring search over tag names, fragments joined
    /// by AND or OR. Results come back name-ordered.
    pub fn search_tags(&self, fragments: &[String], mode: MatchMode) -> Result<Vec<Tag>> {
        if fragments.is_empty() {
            return Ok(Vec::new());
        }
        let joiner = match mode {
            MatchMode::All => " AND ",
            MatchMode::Any => " OR ",
        };
        let clause = vec!["LOWER(name) LIKE ?"; fragments.len()].join(joiner);
        let sql =
            format!("SELECT id, name, created_at FROM tags WHERE {clause} ORDER BY name");
        let patterns: Vec<String> = fragments
            .iter()
            .map(|f| format!("%{}%", f.to_lowercase()))
            .collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let tags = stmt
            .query_map(rusqlite::params_from_iter(patterns.iter()), Self::tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Removes the tag and every association pointing at it. The emoji
    /// rows themselves stay. No-op when the id does not exist.
    pub fn delete_tag(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM emoji_tags WHERE tag_id = ?1", params![id])?;
        tx.execute("DELETE FROM tags WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    // -- emoji store --

    /// Get-or-creates an emoji by url and attaches the given tags.
    ///
    /// A duplicate url returns the existing row; its stored hash is kept,
    /// never rewritten. Runs in one transaction.
    pub fn create_emoji(
        &mut self,
        url: &str,
        hash: AverageHash,
        tag_names: &[String],
    ) -> Result<Emoji> {
        let tx = self.conn.transaction()?;
        // The no-op DO UPDATE makes RETURNING yield the surviving row's id
        // on conflict as well.
        let emoji_id: i64 = tx.query_row(
            "INSERT INTO emoji (url, average_hash, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET url = excluded.url
             RETURNING id",
            params![url, hash, Utc::now()],
            |row| row.get(0),
        )?;
        Self::attach_tags(&tx, emoji_id, tag_names)?;
        tx.commit()?;

        self.get_emoji(emoji_id)?
            .ok_or(CatalogError::EmojiNotFound(emoji_id))
    }

    /// Removes the emoji and its association rows; tag rows stay behind
    /// even when orphaned. No-op when absent.
    pub fn delete_emoji(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM emoji_tags WHERE emoji_id = ?1", params![id])?;
        tx.execute("DELETE FROM emoji WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Attaches tags to an existing emoji, idempotent per tag, and returns
    /// the refreshed entity.
    pub fn add_tags(&mut self, id: i64, tag_names: &[String]) -> Result<Emoji> {
        let tx = self.conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row("SELECT id FROM emoji WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(CatalogError::EmojiNotFound(id));
        }
        Self::attach_tags(&tx, id, tag_names)?;
        tx.commit()?;

        self.get_emoji(id)?.ok_or(CatalogError::EmojiNotFound(id))
    }

    /// Detaches one association. No-op when the pair does not exist.
    pub fn remove_tag(&self, emoji_id: i64, tag_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM emoji_tags WHERE emoji_id = ?1 AND tag_id = ?2",
            params![emoji_id, tag_id],
        )?;
        Ok(())
    }

    pub fn get_emoji(&self, id: i64) -> Result<Option<Emoji>> {
        let emoji = self
            .conn
            .query_row(
                "SELECT id, url, average_hash, created_at FROM emoji WHERE id = ?1",
                params![id],
                Self::emoji_from_row,
            )
            .optional()?;
        match emoji {
            Some(mut emoji) => {
                emoji.tags = self.tags_for_emoji(emoji.id)?;
                Ok(Some(emoji))
            }
            None => Ok(None),
        }
    }

    /// The single query executor: optional id pool, shared ordering,
    /// offset/limit. Loaded emoji carry their name-sorted tags.
    pub fn list(&self, spec: &QuerySpec) -> Result<Vec<Emoji>> {
        let mut sql = String::from("SELECT id, url, average_hash, created_at FROM emoji");
        if let Some(pool) = &spec.id_pool {
            if pool.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; pool.len()].join(",");
            sql.push_str(&format!(" WHERE id IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        let limit = spec.limit.map(|l| l as i64).unwrap_or(-1);
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, spec.offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match &spec.id_pool {
            Some(pool) => stmt.query_map(
                rusqlite::params_from_iter(pool.iter()),
                Self::emoji_from_row,
            )?,
            None => stmt.query_map([], Self::emoji_from_row)?,
        };
        let mut emoji_list = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for emoji in &mut emoji_list {
            emoji.tags = self.tags_for_emoji(emoji.id)?;
        }
        Ok(emoji_list)
    }

    pub fn count_emoji(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM emoji", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// The id set carrying a given tag, ordered for cheap intersection.
    pub fn emoji_ids_for_tag(&self, tag_id: i64) -> Result<BTreeSet<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT emoji_id FROM emoji_tags WHERE tag_id = ?1")?;
        let ids = stmt
            .query_map(params![tag_id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
        Ok(ids)
    }

    /// Every stored fingerprint, for the similarity full scan.
    pub fn all_hashes(&self) -> Result<Vec<HashRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, average_hash, created_at FROM emoji")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(HashRow {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // -- row plumbing --

    fn attach_tags(conn: &Connection, emoji_id: i64, tag_names: &[String]) -> Result<()> {
        let mut insert_tag =
            conn.prepare("INSERT OR IGNORE INTO tags (name, created_at) VALUES (?1, ?2)")?;
        let mut tag_id_for = conn.prepare("SELECT id FROM tags WHERE name = ?1")?;
        let mut link = conn
            .prepare("INSERT OR IGNORE INTO emoji_tags (emoji_id, tag_id) VALUES (?1, ?2)")?;

        for name in tag_names {
            insert_tag.execute(params![name, Utc::now()])?;
            let tag_id: i64 = tag_id_for.query_row(params![name], |row| row.get(0))?;
            link.execute(params![emoji_id, tag_id])?;
        }
        Ok(())
    }

    fn tags_for_emoji(&self, emoji_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.created_at FROM tags t
             JOIN emoji_tags et ON et.tag_id = t.id
             WHERE et.emoji_id = ?1
             ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![emoji_id], Self::tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    fn tag_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    fn emoji_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Emoji> {
        Ok(Emoji {
            id: row.get(0)?,
            url: row.get(1)?,
            average_hash: row.get(2)?,
            created_at: row.get(3)?,
            tags: Vec::new(),
        })
    }
}
