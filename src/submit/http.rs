use std::time::Duration;

use anyhow::{Context, Result};

/// The one external collaborator: HEAD for liveness, GET for image bytes.
///
/// Submission validation goes through this trait rather than a concrete
/// client so offline runs and tests can swap in stubs, and so the only
/// blocking network I/O in the crate stays behind one seam.
pub trait RemoteMedia {
    /// Issues a HEAD request and returns the response status code.
    fn head_status(&self, url: &str) -> Result<u16>;

    /// Issues a GET request and returns the response body.
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// Production client. The timeout bounds both the liveness probe and the
/// image fetch so a slow remote host cannot stall catalog work.
pub struct HttpMedia {
    client: reqwest::blocking::Client,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpMedia {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl RemoteMedia for HttpMedia {
    fn head_status(&self, url: &str) -> Result<u16> {
        let res = self
            .client
            .head(url)
            .send()
            .with_context(|| format!("HEAD {url} failed"))?;
        Ok(res.status().as_u16())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let res = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;
        let bytes = res.bytes().context("Failed to read response body")?;
        Ok(bytes.to_vec())
    }
}

/// Wrapper that answers every liveness probe with 200 while still
/// delegating fetches. Used by bulk import when the submitted records are
/// trusted or the probe target is known to be flaky.
pub struct NoProbe<M>(pub M);

impl<M: RemoteMedia> RemoteMedia for NoProbe<M> {
    fn head_status(&self, _url: &str) -> Result<u16> {
        Ok(200)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.0.fetch_bytes(url)
    }
}
