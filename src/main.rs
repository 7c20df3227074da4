use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use tracing::{error, info};

use emoji_catalog::database::repo::{CatalogRepo, MatchMode};
use emoji_catalog::media::phash::AverageHash;
use emoji_catalog::query::engine::{list_emoji, EmojiQuery, DEFAULT_PAGE_SIZE, DEFAULT_SIMILAR_N};
use emoji_catalog::submit::{self, HttpMedia, NoProbe, RemoteMedia, ResolvedSubmission, Submission};
use emoji_catalog::utils::tags::split_tags_str;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tag-based emoji catalog with perceptual-hash similarity search", long_about = None)]
struct Args {
    /// SQLite database file.
    #[arg(short, long, default_value = "catalog.sqlite3")]
    db_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit one emoji url with comma-separated tags.
    Submit {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        tags: String,
        /// Pre-computed 16-hex-char average hash; skips the image fetch.
        #[arg(long)]
        hash: Option<String>,
        /// Trust the url: skip the liveness probe.
        #[arg(long)]
        skip_probe: bool,
    },
    /// List the catalog: everything, a tag intersection, or the nearest
    /// neighbours of a reference emoji.
    List {
        /// Comma-separated tags; results must carry all of them.
        #[arg(long)]
        tags: Option<String>,
        /// Rank by Hamming distance from this emoji instead of paging.
        #[arg(long)]
        similar_to: Option<i64>,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u64,
        /// Similarity-mode result cap.
        #[arg(long, default_value_t = DEFAULT_SIMILAR_N)]
        output_n: usize,
    },
    /// Append tags to an existing emoji.
    Tag {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        tags: String,
    },
    /// Detach one tag from an emoji.
    Untag {
        #[arg(long)]
        emoji_id: i64,
        #[arg(long)]
        tag_id: i64,
    },
    /// Delete an emoji and its tag associations.
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Delete a tag and detach it everywhere.
    DeleteTag {
        #[arg(long)]
        id: i64,
    },
    /// Substring-search tag names with comma-separated fragments.
    SearchTags {
        #[arg(long)]
        query: String,
        /// Match any fragment instead of all of them.
        #[arg(long)]
        any: bool,
    },
    /// Bulk-import a JSON array of submissions.
    Import {
        #[arg(long)]
        file: PathBuf,
        /// Resolver threads (probe/fetch/hash).
        #[arg(long, default_value_t = 4)]
        jobs: usize,
        /// Trust the records: skip the liveness probe.
        #[arg(long)]
        skip_probe: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut repo = CatalogRepo::open(&args.db_path)
        .with_context(|| format!("Failed to open catalog at {}", args.db_path))?;

    match args.command {
        Command::Submit {
            url,
            tags,
            hash,
            skip_probe,
        } => {
            let submission = Submission {
                url,
                tags_str: tags,
                average_hash: hash.as_deref().map(str::parse::<AverageHash>).transpose()?,
            };
            let media = HttpMedia::new()?;
            let emoji = if skip_probe {
                submit::submit(&mut repo, &NoProbe(media), &submission)?
            } else {
                submit::submit(&mut repo, &media, &submission)?
            };
            info!("Stored emoji {} ({})", emoji.id, emoji.url);
            println!("{}", serde_json::to_string_pretty(&emoji)?);
        }

        Command::List {
            tags,
            similar_to,
            page,
            page_size,
            output_n,
        } => {
            let query = EmojiQuery {
                tags_str: tags,
                similar_to,
                page,
                page_size,
                output_n,
            };
            let result = list_emoji(&repo, &query)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::Tag { id, tags } => {
            let emoji = submit::add_tags(&mut repo, id, &tags)?;
            println!("{}", serde_json::to_string_pretty(&emoji)?);
        }

        Command::Untag { emoji_id, tag_id } => {
            repo.remove_tag(emoji_id, tag_id)?;
            info!("Detached tag {} from emoji {}", tag_id, emoji_id);
        }

        Command::Delete { id } => {
            repo.delete_emoji(id)?;
            info!("Deleted emoji {}", id);
        }

        Command::DeleteTag { id } => {
            repo.delete_tag(id)?;
            info!("Deleted tag {}", id);
        }

        Command::SearchTags { query, any } => {
            let fragments = split_tags_str(&query);
            let mode = if any { MatchMode::Any } else { MatchMode::All };
            let tags = repo.search_tags(&fragments, mode)?;
            println!("{}", serde_json::to_string_pretty(&tags)?);
        }

        Command::Import {
            file,
            jobs,
            skip_probe,
        } => run_import(repo, &file, jobs, skip_probe)?,
    }

    Ok(())
}

/// Concurrent bulk import: resolver threads do the network work
/// (normalize, probe, fetch, hash) while a single writer thread owns the
/// database connection. Bad records are logged and skipped; the import
/// keeps going.
fn run_import(repo: CatalogRepo, path: &Path, jobs: usize, skip_probe: bool) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file {:?}", path))?;
    let records: Vec<Submission> =
        serde_json::from_str(&raw).context("Import file must be a JSON array of submissions")?;
    let total = records.len() as u64;
    info!("Importing {} records from {:?}", total, path);

    let media: Arc<dyn RemoteMedia + Send + Sync> = if skip_probe {
        Arc::new(NoProbe(HttpMedia::new()?))
    } else {
        Arc::new(HttpMedia::new()?)
    };

    let (work_tx, work_rx) = bounded::<Submission>(1024);
    let (db_tx, db_rx) = bounded::<ResolvedSubmission>(1024);
    let bar = ProgressBar::new(total);

    // 1. Resolver threads
    let mut resolver_handles = Vec::new();
    for i in 0..jobs.max(1) {
        let rx = work_rx.clone();
        let tx = db_tx.clone();
        let media = media.clone();
        let bar = bar.clone();
        resolver_handles.push(thread::spawn(move || {
            info!("Resolver {} started", i);
            for record in rx {
                match submit::resolve(media.as_ref(), &record) {
                    Ok(resolved) => {
                        if tx.send(resolved).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Skipping {}: {}", record.url, e);
                        bar.inc(1);
                    }
                }
            }
            info!("Resolver {} finished", i);
        }));
    }
    // Drop the original tx so the writer closes when all resolvers are done
    drop(db_tx);

    // 2. Writer thread owns the connection
    let writer_bar = bar.clone();
    let writer_handle = thread::spawn(move || {
        let mut repo = repo;
        let mut stored = 0u64;
        for resolved in db_rx {
            match repo.create_emoji(&resolved.url, resolved.average_hash, &resolved.tag_names) {
                Ok(_) => stored += 1,
                Err(e) => error!("Failed to store {}: {}", resolved.url, e),
            }
            writer_bar.inc(1);
        }
        stored
    });

    for record in records {
        if work_tx.send(record).is_err() {
            break;
        }
    }
    drop(work_tx);

    for handle in resolver_handles {
        handle.join().unwrap();
    }
    let stored = writer_handle.join().unwrap();
    bar.finish();

    info!("Imported {}/{} records", stored, total);
    Ok(())
}
