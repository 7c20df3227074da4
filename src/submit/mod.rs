//! Validated catalog mutations: URL normalization, liveness probe,
//! fingerprinting, tag attachment.

pub mod http;

pub use http::{HttpMedia, NoProbe, RemoteMedia};

use serde::Deserialize;

use crate::database::repo::{CatalogRepo, Emoji};
use crate::error::{CatalogError, Result};
use crate::media::phash::AverageHash;
use crate::utils::tags::split_tags_str;

/// Host substrings a submission must contain. `emos.plurk.com` has to be
/// probed before `s.plurk.com`, which is its suffix.
const ALLOWED_HOSTS: [&str; 2] = ["emos.plurk.com", "s.plurk.com"];

/// One inbound submission, as posted by clients or read from an import
/// file. `average_hash_str` is accepted as a field alias for records
/// exported by the old catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub url: String,
    #[serde(default)]
    pub tags_str: String,
    /// Pre-computed fingerprint. When absent the image is fetched and
    /// hashed during submission.
    #[serde(default, alias = "average_hash_str")]
    pub average_hash: Option<AverageHash>,
}

/// Strips all whitespace (internal included) and rebuilds the url as
/// `https://` + the allowed-host tail. Anything without an allowed host
/// substring is rejected.
pub fn normalize_url(url: &str) -> Result<String> {
    let stripped: String = url.chars().filter(|c| !c.is_whitespace()).collect();
    for host in ALLOWED_HOSTS {
        if let Some(at) = stripped.find(host) {
            return Ok(format!("https://{}", &stripped[at..]));
        }
    }
    Err(CatalogError::InvalidUrlDomain(stripped))
}

/// A submission that has passed validation and carries its fingerprint,
/// ready to store. Resolution is split from storage so bulk import can
/// fan the network work out across threads while one writer owns the
/// connection.
#[derive(Debug, Clone)]
pub struct ResolvedSubmission {
    pub url: String,
    pub average_hash: AverageHash,
    pub tag_names: Vec<String>,
}

/// Validates one submission against the remote host.
///
/// The liveness probe must answer 200. A missing fingerprint triggers an
/// image fetch and hash; both probe and fetch failures surface as
/// validation errors, never as a crash, and are not retried here.
pub fn resolve(media: &dyn RemoteMedia, submission: &Submission) -> Result<ResolvedSubmission> {
    let url = normalize_url(&submission.url)?;

    let status = media
        .head_status(&url)
        .map_err(|e| CatalogError::UnreachableUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    if status != 200 {
        return Err(CatalogError::UnreachableUrl {
            url,
            reason: format!("status {status}"),
        });
    }

    let hash = match submission.average_hash {
        Some(hash) => hash,
        None => {
            let bytes = media
                .fetch_bytes(&url)
                .map_err(|e| CatalogError::ImageFetch {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            AverageHash::from_image_bytes(&bytes).map_err(|e| CatalogError::ImageFetch {
                url: url.clone(),
                reason: e.to_string(),
            })?
        }
    };

    Ok(ResolvedSubmission {
        url,
        average_hash: hash,
        tag_names: split_tags_str(&submission.tags_str),
    })
}

/// Validates and stores one submission.
pub fn submit(
    repo: &mut CatalogRepo,
    media: &dyn RemoteMedia,
    submission: &Submission,
) -> Result<Emoji> {
    let resolved = resolve(media, submission)?;
    repo.create_emoji(&resolved.url, resolved.average_hash, &resolved.tag_names)
}

/// Attaches tags to an existing emoji and returns the refreshed entity,
/// tags sorted by name. `EmojiNotFound` when the id is absent.
pub fn add_tags(repo: &mut CatalogRepo, id: i64, tags_str: &str) -> Result<Emoji> {
    repo.add_tags(id, &split_tags_str(tags_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::{DynamicImage, RgbImage};
    use std::cell::Cell;
    use std::io::Cursor;

    struct StubMedia {
        status: u16,
        body: std::result::Result<Vec<u8>, String>,
        fetches: Cell<usize>,
    }

    impl StubMedia {
        fn alive_with(body: Vec<u8>) -> Self {
            Self {
                status: 200,
                body: Ok(body),
                fetches: Cell::new(0),
            }
        }
    }

    impl RemoteMedia for StubMedia {
        fn head_status(&self, _url: &str) -> anyhow::Result<u16> {
            Ok(self.status)
        }

        fn fetch_bytes(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
            self.fetches.set(self.fetches.get() + 1);
            match &self.body {
                Ok(bytes) => Ok(bytes.clone()),
                Err(reason) => Err(anyhow!(reason.clone())),
            }
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 {
                image::Rgb([0, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn submission(url: &str, tags_str: &str, hash: Option<&str>) -> Submission {
        Submission {
            url: url.to_string(),
            tags_str: tags_str.to_string(),
            average_hash: hash.map(|h| h.parse().unwrap()),
        }
    }

    #[test]
    fn normalizes_whitespace_and_scheme() {
        assert_eq!(
            normalize_url(" https://emos.plurk.com/abc.png ").unwrap(),
            "https://emos.plurk.com/abc.png"
        );
        assert_eq!(
            normalize_url("http://emos.plurk.com/abc.png").unwrap(),
            "https://emos.plurk.com/abc.png"
        );
        assert_eq!(
            normalize_url("https://emos.plurk.com/a b.png").unwrap(),
            "https://emos.plurk.com/ab.png"
        );
        assert_eq!(
            normalize_url("s.plurk.com/x.gif").unwrap(),
            "https://s.plurk.com/x.gif"
        );
    }

    #[test]
    fn rejects_foreign_hosts() {
        let err = normalize_url("https://example.com/x.png").unwrap_err();
        assert!(matches!(err, CatalogError::InvalidUrlDomain(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn supplied_hash_skips_the_image_fetch() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let media = StubMedia::alive_with(Vec::new());
        let emoji = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/a.png", "cat", Some("ef87831b81019bfb")),
        )
        .unwrap();

        assert_eq!(emoji.average_hash.to_string(), "ef87831b81019bfb");
        assert_eq!(media.fetches.get(), 0);
        let tag_names: Vec<&str> = emoji.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, vec!["cat"]);
    }

    #[test]
    fn missing_hash_fetches_and_fingerprints() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let body = png_bytes();
        let expected = AverageHash::from_image_bytes(&body).unwrap();
        let media = StubMedia::alive_with(body);

        let emoji = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/b.png", "", None),
        )
        .unwrap();

        assert_eq!(emoji.average_hash, expected);
        assert_eq!(media.fetches.get(), 1);
    }

    #[test]
    fn dead_url_is_a_validation_failure() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let media = StubMedia {
            status: 404,
            body: Ok(Vec::new()),
            fetches: Cell::new(0),
        };
        let err = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/c.png", "", Some("ef87831b81019bfb")),
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnreachableUrl { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn failed_fetch_surfaces_as_image_fetch_error() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let media = StubMedia {
            status: 200,
            body: Err("connection reset".to_string()),
            fetches: Cell::new(0),
        };
        let err = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/d.png", "", None),
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::ImageFetch { .. }));
    }

    #[test]
    fn undecodable_body_surfaces_as_image_fetch_error() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let media = StubMedia::alive_with(b"definitely not an image".to_vec());
        let err = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/e.png", "", None),
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::ImageFetch { .. }));
    }

    #[test]
    fn no_probe_wrapper_answers_200() {
        let media = NoProbe(StubMedia {
            status: 500,
            body: Ok(Vec::new()),
            fetches: Cell::new(0),
        });
        assert_eq!(media.head_status("https://emos.plurk.com/x.png").unwrap(), 200);
    }

    #[test]
    fn add_tags_parses_the_shared_format() {
        let mut repo = CatalogRepo::open_in_memory().unwrap();
        let media = StubMedia::alive_with(Vec::new());
        let emoji = submit(
            &mut repo,
            &media,
            &submission("https://emos.plurk.com/f.png", "", Some("ef87831b81019bfb")),
        )
        .unwrap();

        let updated = add_tags(&mut repo, emoji.id, "dog,　cat　,dog").unwrap();
        let tag_names: Vec<&str> = updated.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, vec!["cat", "dog"]);

        let err = add_tags(&mut repo, 9999, "cat").unwrap_err();
        assert!(matches!(err, CatalogError::EmojiNotFound(9999)));
    }

    #[test]
    fn submission_deserializes_legacy_field_name() {
        let record: Submission = serde_json::from_str(
            r#"{"url": "https://emos.plurk.com/g.png",
                "tags_str": "cat",
                "average_hash_str": "ef87831b81019bfb"}"#,
        )
        .unwrap();
        assert_eq!(record.average_hash.unwrap().to_string(), "ef87831b81019bfb");
    }
}
