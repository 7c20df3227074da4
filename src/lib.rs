pub mod database;
pub mod error;
pub mod media;
pub mod query;
pub mod submit;
pub mod utils;

pub use database::repo::{CatalogRepo, Emoji, MatchMode, QuerySpec, Tag};
pub use error::CatalogError;
pub use media::phash::AverageHash;
pub use query::engine::{list_emoji, EmojiPage, EmojiQuery};
pub use submit::{add_tags, submit, HttpMedia, NoProbe, RemoteMedia, Submission};
