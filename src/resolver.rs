// ============================================
// resolver.rs - Find the current deployment tool download
// ============================================
//
// The vendor does not publish a stable URL for the deployment tool; the
// download-center page links to a versioned file that changes with each
// release. Resolution is:
//
//   1. GET  https://www.microsoft.com/en-us/download/details.aspx?id=<id>
//           (body capped at network.max_page_bytes)
//   2. parse the HTML, collect <a href="...exe"> links, first allowed host wins
//   3. HEAD the link          -> Content-Length, Content-Disposition
//      (redirects are only followed while they stay on the allow-list)
//   4. sanitise the file name -> ArtifactDescriptor
//   5. remember it in the LRU cache keyed by (family, architecture)
//
// Anything that points outside the allow-list is rejected before a
// descriptor exists, so every descriptor handed out is trusted.
// ============================================

use std::io::Read;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::cache::LruCache;
use crate::catalog::{Architecture, ProductFamily};
use crate::config::Settings;
use crate::error::ResolutionError;
use crate::retry::{is_transient_error, is_transient_status, RetryPolicy};

/// Maximum redirects followed for the vendor page and the metadata request.
const MAX_REDIRECTS: usize = 10;

static DISPOSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bfilename\*?\s*=\s*(?:[\w-]+'[\w-]*')?"?([^";]+)"?"#)
        .expect("content-disposition regex is valid")
});

// ============================================
// DESCRIPTOR
// ============================================

/// Everything needed to download and verify the deployment tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub url: String,
    pub expected_filename: String,
    pub expected_size_bytes: u64,
    /// Host the URL points at; always on the allow-list
    pub source_domain: String,
}

/// Resolver cache, keyed by what was asked for.
pub type ResolverCache = LruCache<(ProductFamily, Architecture), ArtifactDescriptor>;

// ============================================
// ALLOW-LIST
// ============================================

/// Hosts trusted to serve the artifact.
///
/// A domain entry also covers its subdomains. IP addresses are only
/// accepted when listed exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().trim_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Check a host name or IP literal.
    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return false;
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.parse::<IpAddr>().is_ok() {
            return self.entries.iter().any(|e| e.trim_start_matches('[').trim_end_matches(']') == bare);
        }

        self.entries.iter().any(|allowed| {
            host == *allowed
                || (host.len() > allowed.len()
                    && host.ends_with(allowed.as_str())
                    && host.as_bytes()[host.len() - allowed.len() - 1] == b'.')
        })
    }

    /// Check the host of a parsed URL (already IDNA-normalised by `url`).
    pub fn allows_url(&self, url: &Url) -> bool {
        match url.host() {
            Some(Host::Domain(domain)) => self.allows_host(domain),
            Some(Host::Ipv4(ip)) => self.allows_host(&ip.to_string()),
            Some(Host::Ipv6(ip)) => self.allows_host(&ip.to_string()),
            None => false,
        }
    }
}

/// Validate a vendor-supplied file name.
///
/// Only the basename is kept; it must have no control or reserved
/// characters and must be an `.exe`.
pub fn sanitize_filename(name: &str) -> Result<String, ResolutionError> {
    let unsafe_name = || ResolutionError::UnsafeFilename {
        name: name.to_string(),
    };

    let base = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base.starts_with('.') {
        return Err(unsafe_name());
    }
    if base
        .chars()
        .any(|c| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
    {
        return Err(unsafe_name());
    }

    let lower = base.to_ascii_lowercase();
    if !lower.ends_with(".exe") || lower.len() <= ".exe".len() {
        return Err(unsafe_name());
    }

    Ok(base.to_string())
}

/// File name from a Content-Disposition header value.
pub(crate) fn disposition_filename(value: &str) -> Option<String> {
    DISPOSITION_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// All `.exe` links on a page, absolute, de-duplicated, in page order.
///
/// The page goes through a real HTML parser, so anchors inside comments or
/// script text are not links and `href` values come back entity-decoded.
pub fn extract_download_links(html: &str, base: &Url) -> Vec<Url> {
    let selector = Selector::parse("a[href]").expect("anchor selector is valid");
    let document = Html::parse_document(html);
    let mut links: Vec<Url> = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }
        let Ok(url) = base.join(href) else {
            debug!(href = %href, "ignoring unparseable link");
            continue;
        };
        if !url.path().to_ascii_lowercase().ends_with(".exe") {
            continue;
        }
        if !links.contains(&url) {
            links.push(url);
        }
    }

    links
}

// ============================================
// RESOLVER
// ============================================

/// Outcome of one attempt; only `Transient` is retried.
enum Attempt {
    Transient(ResolutionError),
    Fatal(ResolutionError),
}

pub struct ArtifactResolver {
    page_client: Client,
    metadata_client: Client,
    page_url: String,
    allow_list: AllowList,
    require_https: bool,
    max_page_bytes: u64,
    page_timeout: Duration,
    metadata_timeout: Duration,
    retry: RetryPolicy,
    cache: Mutex<ResolverCache>,
}

impl ArtifactResolver {
    /// Create a resolver with its own (injected) cache.
    pub fn new(settings: &Settings, cache: ResolverCache) -> Result<Self, ResolutionError> {
        let network = &settings.network;
        let allow_list = AllowList::new(&network.allowed_domains);

        let page_client = Client::builder()
            .user_agent(network.user_agent.as_str())
            .connect_timeout(network.connect_timeout())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ResolutionError::Client { reason: e.to_string() })?;

        let require_https = network.require_https;
        let metadata_client = Client::builder()
            .user_agent(network.user_agent.as_str())
            .connect_timeout(network.connect_timeout())
            .redirect(allow_list_redirects(allow_list.clone(), require_https))
            .build()
            .map_err(|e| ResolutionError::Client { reason: e.to_string() })?;

        Ok(Self {
            page_client,
            metadata_client,
            page_url: network.page_url.clone(),
            allow_list,
            require_https,
            max_page_bytes: network.max_page_bytes,
            page_timeout: network.page_timeout(),
            metadata_timeout: network.metadata_timeout(),
            retry: settings.retry.policy(),
            cache: Mutex::new(cache),
        })
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Resolve from cache, or from the vendor site on a miss.
    pub fn resolve(
        &self,
        family: ProductFamily,
        arch: Architecture,
    ) -> Result<ArtifactDescriptor, ResolutionError> {
        if let Some(hit) = self.cache.lock().get(&(family, arch)) {
            debug!(%family, %arch, "artifact descriptor served from cache");
            return Ok(hit);
        }

        let descriptor = self.fetch_descriptor(family)?;
        self.cache.lock().insert((family, arch), descriptor.clone());
        Ok(descriptor)
    }

    /// Resolve from the vendor site, replacing the cached entry if it changed.
    pub fn refresh(
        &self,
        family: ProductFamily,
        arch: Architecture,
    ) -> Result<ArtifactDescriptor, ResolutionError> {
        let descriptor = self.fetch_descriptor(family)?;

        let mut cache = self.cache.lock();
        match cache.get(&(family, arch)) {
            Some(previous) if previous != descriptor => info!(
                %family,
                old_size = previous.expected_size_bytes,
                new_size = descriptor.expected_size_bytes,
                "vendor artifact changed; replacing cached descriptor"
            ),
            _ => {}
        }
        cache.insert((family, arch), descriptor.clone());
        Ok(descriptor)
    }

    /// Drop a cached descriptor. Returns whether one was cached.
    pub fn invalidate(&self, family: ProductFamily, arch: Architecture) -> bool {
        self.cache.lock().remove(&(family, arch)).is_some()
    }

    /// Cached descriptor, without touching recency.
    pub fn cached(&self, family: ProductFamily, arch: Architecture) -> Option<ArtifactDescriptor> {
        self.cache.lock().peek(&(family, arch)).cloned()
    }

    /// Check scheme and host of an artifact URL. Returns the host.
    pub fn check_url(&self, url: &Url) -> Result<String, ResolutionError> {
        if !scheme_ok(url, self.require_https) {
            return Err(ResolutionError::InsecureScheme { url: url.to_string() });
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.allow_list.allows_url(url) {
            return Err(ResolutionError::DomainRejected { host });
        }
        Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
    }

    // ----------------------------------------
    // Pipeline
    // ----------------------------------------

    fn fetch_descriptor(&self, family: ProductFamily) -> Result<ArtifactDescriptor, ResolutionError> {
        let page_url = self.page_url.replace("{id}", family.download_id());
        let page_url = Url::parse(&page_url).map_err(|e| ResolutionError::InvalidUrl {
            url: page_url.clone(),
            reason: e.to_string(),
        })?;
        info!(%family, "resolving deployment tool download");

        let (final_page_url, html) = self.with_retry("vendor page", || self.fetch_page(&page_url))?;
        let links = extract_download_links(&html, &final_page_url);
        debug!(count = links.len(), "executable links found on vendor page");

        let link = self.select_link(&links, &final_page_url)?;
        let descriptor = self.with_retry("download metadata", || self.fetch_metadata(&link))?;

        info!(
            %family,
            file = %descriptor.expected_filename,
            size = descriptor.expected_size_bytes,
            host = %descriptor.source_domain,
            "deployment tool resolved"
        );
        Ok(descriptor)
    }

    /// First allowed link; a page whose links all fail the checks is rejected.
    fn select_link(&self, links: &[Url], page: &Url) -> Result<Url, ResolutionError> {
        let mut first_rejection = None;
        for link in links {
            match self.check_url(link) {
                Ok(_) => return Ok(link.clone()),
                Err(e) => {
                    warn!(link = %link, error = %e, "ignoring download link");
                    first_rejection.get_or_insert(e);
                }
            }
        }

        Err(first_rejection.unwrap_or_else(|| ResolutionError::LinkNotFound {
            url: page.to_string(),
        }))
    }

    fn fetch_page(&self, url: &Url) -> Result<(Url, String), Attempt> {
        let response = self
            .page_client
            .get(url.clone())
            .timeout(self.page_timeout)
            .send()
            .map_err(|e| transport_failure(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let err = ResolutionError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            };
            return Err(if is_transient_status(status) {
                Attempt::Transient(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let too_large = || Attempt::Fatal(ResolutionError::PageTooLarge {
            limit: self.max_page_bytes,
        });
        if header_u64(&response, CONTENT_LENGTH).is_some_and(|len| len > self.max_page_bytes) {
            return Err(too_large());
        }

        let final_url = response.url().clone();
        let mut body = Vec::new();
        response
            .take(self.max_page_bytes + 1)
            .read_to_end(&mut body)
            .map_err(|e| {
                Attempt::Transient(ResolutionError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            })?;
        if body.len() as u64 > self.max_page_bytes {
            return Err(too_large());
        }

        Ok((final_url, String::from_utf8_lossy(&body).into_owned()))
    }

    /// HEAD the link for size and name; fall back to a one-byte ranged
    /// GET when the server does not report a size on HEAD.
    fn fetch_metadata(&self, link: &Url) -> Result<ArtifactDescriptor, Attempt> {
        let response = self
            .metadata_client
            .head(link.clone())
            .timeout(self.metadata_timeout)
            .send()
            .map_err(|e| transport_failure(link, e))?;
        let response = self.accept_metadata_response(link, response)?;

        let mut size = header_u64(&response, CONTENT_LENGTH).filter(|&n| n > 0);
        let mut disposition = header_str(&response, CONTENT_DISPOSITION);
        let mut final_url = response.url().clone();

        if size.is_none() {
            debug!(link = %link, "no size on HEAD; probing with a ranged GET");
            let response = self
                .metadata_client
                .get(link.clone())
                .header(RANGE, "bytes=0-0")
                .timeout(self.metadata_timeout)
                .send()
                .map_err(|e| transport_failure(link, e))?;
            let response = self.accept_metadata_response(link, response)?;

            let reported = if response.status() == reqwest::StatusCode::PARTIAL_CONTENT {
                // Content-Range: bytes 0-0/<total>
                header_str(&response, CONTENT_RANGE)
                    .and_then(|range| range.rsplit('/').next().and_then(|total| total.trim().parse().ok()))
            } else {
                header_u64(&response, CONTENT_LENGTH)
            };
            size = reported.filter(|&n| n > 0);
            disposition = disposition.or_else(|| header_str(&response, CONTENT_DISPOSITION));
            final_url = response.url().clone();
        }

        let source_domain = self.check_url(&final_url).map_err(Attempt::Fatal)?;
        let expected_size_bytes = size.ok_or_else(|| {
            Attempt::Fatal(ResolutionError::Metadata {
                url: final_url.to_string(),
                reason: "server reported no file size".to_string(),
            })
        })?;

        let advertised = disposition
            .as_deref()
            .and_then(disposition_filename)
            .or_else(|| {
                final_url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .unwrap_or_default();
        let expected_filename = sanitize_filename(&advertised).map_err(Attempt::Fatal)?;

        Ok(ArtifactDescriptor {
            url: final_url.to_string(),
            expected_filename,
            expected_size_bytes,
            source_domain,
        })
    }

    /// Reject redirects the policy refused to follow and error statuses.
    fn accept_metadata_response(&self, link: &Url, response: Response) -> Result<Response, Attempt> {
        let status = response.status();

        if status.is_redirection() {
            let target = header_str(&response, LOCATION)
                .and_then(|loc| response.url().join(&loc).ok());
            let err = match target {
                Some(target) => self
                    .check_url(&target)
                    .err()
                    .unwrap_or_else(|| ResolutionError::Metadata {
                        url: link.to_string(),
                        reason: "redirect not followed".to_string(),
                    }),
                None => ResolutionError::Metadata {
                    url: link.to_string(),
                    reason: format!("HTTP {} without a usable Location", status.as_u16()),
                },
            };
            return Err(Attempt::Fatal(err));
        }

        if !status.is_success() {
            let err = ResolutionError::HttpStatus {
                url: link.to_string(),
                status: status.as_u16(),
            };
            return Err(if is_transient_status(status) {
                Attempt::Transient(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        Ok(response)
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, Attempt>,
    ) -> Result<T, ResolutionError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(Attempt::Transient(e)) if self.retry.allows_another(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient failure; retrying");
                    thread::sleep(delay);
                }
                Err(Attempt::Transient(e)) | Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }
}

/// Redirect policy that only follows hops staying on the allow-list.
///
/// A refused hop comes back to the caller as the 3xx response itself.
pub(crate) fn allow_list_redirects(allow_list: AllowList, require_https: bool) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if scheme_ok(attempt.url(), require_https) && allow_list.allows_url(attempt.url()) {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

pub(crate) fn scheme_ok(url: &Url, require_https: bool) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => !require_https,
        _ => false,
    }
}

fn transport_failure(url: &Url, err: reqwest::Error) -> Attempt {
    let transient = is_transient_error(&err);
    let err = ResolutionError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    };
    if transient {
        Attempt::Transient(err)
    } else {
        Attempt::Fatal(err)
    }
}

/// Header value as text. HEAD responses report no body length through
/// `Response::content_length`, so sizes are always read from headers.
pub(crate) fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

pub(crate) fn header_u64(response: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    header_str(response, name).and_then(|s| s.parse().ok())
}
