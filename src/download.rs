// ============================================
// download.rs - Resumable, verified artifact download
// ============================================
//
// One download is an explicit state machine:
//
//   Request --ok--> Stream --eof--> Verify --ok--> Finished
//      |              |               |
//      |transient     |transient      +--mismatch--> Failed
//      v              v
//   Backoff <---------+                 (cap reached) --> Failed
//      |
//      +--> Request                     (cancel anywhere) --> Cancelled
//
// Files in <destination>:
//
//   officedeploymenttool_X.exe.<size>.part   while downloading
//   officedeploymenttool_X.exe               after verify + rename
//
// The size in the temp name keeps a partial from an older vendor build
// from ever being resumed into a newer one.
//
// Only network trouble is retried. Size or name mismatches mean the
// bytes are not what the descriptor promised; the temp file is removed
// and the download fails without another attempt.
// ============================================

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{DownloadError, DownloadErrorKind};
use crate::logging::redact_path;
use crate::resolver::{
    allow_list_redirects, disposition_filename, header_str, header_u64, sanitize_filename, scheme_ok,
    AllowList, ArtifactDescriptor,
};
use crate::retry::{is_transient_error, is_transient_status, RetryPolicy};

/// Bytes read from the network per chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Backoff sleeps are cut into slices so a cancel is noticed quickly.
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

// ============================================
// CANCELLATION / OUTCOME
// ============================================

/// Shared flag checked between chunks and before every backoff wait.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a download ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Verified artifact at this path
    Completed(PathBuf),
    /// Stopped by the caller; nothing left on disk
    Cancelled,
}

/// Temp file used while downloading `descriptor` into `destination`.
pub fn temp_path_for(descriptor: &ArtifactDescriptor, destination: &Path) -> PathBuf {
    destination.join(format!(
        "{}.{}.part",
        descriptor.expected_filename, descriptor.expected_size_bytes
    ))
}

// ============================================
// STATE MACHINE
// ============================================

enum Phase {
    Request,
    Stream { response: Response, append: bool },
    Verify,
    Backoff(DownloadError),
    Finished,
    Cancelled,
    Failed(DownloadError),
}

/// Progress of the one active download.
struct DownloadState {
    bytes_written: u64,
    expected_size: u64,
    temp_path: PathBuf,
    final_path: PathBuf,
    attempt: u32,
}

pub struct DownloadManager {
    client: Client,
    allow_list: AllowList,
    require_https: bool,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DownloadManager {
    pub fn new(settings: &Settings) -> Result<Self, DownloadError> {
        let network = &settings.network;
        let allow_list = AllowList::new(&network.allowed_domains);

        let client = Client::builder()
            .user_agent(network.user_agent.as_str())
            .connect_timeout(network.connect_timeout())
            .redirect(allow_list_redirects(allow_list.clone(), network.require_https))
            .build()
            .map_err(|e| DownloadError::network(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            allow_list,
            require_https: network.require_https,
            retry: settings.retry.policy(),
            timeout: network.download_timeout(),
        })
    }

    /// Replace the retry policy (tests use `RetryPolicy::immediate`).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download and verify `descriptor` into `destination`.
    ///
    /// `progress(bytes_done, bytes_total)` is called after every chunk.
    pub fn download(
        &self,
        descriptor: &ArtifactDescriptor,
        destination: &Path,
        cancel: &CancellationToken,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<DownloadOutcome, DownloadError> {
        // Trust checks happen before any byte is requested
        let url = Url::parse(&descriptor.url).map_err(|e| {
            DownloadError::new(DownloadErrorKind::DomainRejected, format!("unusable URL: {}", e))
        })?;
        if !scheme_ok(&url, self.require_https) || !self.allow_list.allows_url(&url) {
            return Err(DownloadError::new(
                DownloadErrorKind::DomainRejected,
                format!("{} is not an allowed download source", url.host_str().unwrap_or("<none>")),
            ));
        }
        let file_name = sanitize_filename(&descriptor.expected_filename)
            .map_err(|e| DownloadError::new(DownloadErrorKind::NameMismatch, e.to_string()))?;
        if descriptor.expected_size_bytes == 0 {
            return Err(DownloadError::new(
                DownloadErrorKind::SizeMismatch,
                "descriptor carries no expected size",
            ));
        }

        fs::create_dir_all(destination).map_err(|e| {
            DownloadError::storage(format!("cannot create {}: {}", redact_path(destination), e))
        })?;

        let mut state = DownloadState {
            bytes_written: 0,
            expected_size: descriptor.expected_size_bytes,
            temp_path: temp_path_for(descriptor, destination),
            final_path: destination.join(&file_name),
            attempt: 0,
        };

        if file_len(&state.final_path) == Some(state.expected_size) {
            info!(path = %redact_path(&state.final_path), "artifact already present");
            progress(state.expected_size, state.expected_size);
            return Ok(DownloadOutcome::Completed(state.final_path));
        }

        state.bytes_written = match file_len(&state.temp_path) {
            Some(len) if len > state.expected_size => {
                warn!(len, expected = state.expected_size, "partial download larger than artifact; discarding");
                discard(&state.temp_path);
                0
            }
            Some(len) => len,
            None => 0,
        };
        if state.bytes_written > 0 {
            info!(offset = state.bytes_written, "resuming partial download");
        }

        let started = Instant::now();
        let mut phase = Phase::Request;
        loop {
            phase = match phase {
                Phase::Request => {
                    if cancel.is_cancelled() {
                        Phase::Cancelled
                    } else {
                        state.attempt += 1;
                        self.request(&url, &file_name, &mut state)
                    }
                }
                Phase::Stream { response, append } => {
                    self.stream(response, append, &mut state, cancel, &mut progress)
                }
                Phase::Verify => verify(&state),
                Phase::Backoff(err) => self.backoff(err, &mut state, cancel),
                Phase::Finished => {
                    info!(
                        path = %redact_path(&state.final_path),
                        bytes = state.expected_size,
                        attempts = state.attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "download complete"
                    );
                    return Ok(DownloadOutcome::Completed(state.final_path));
                }
                Phase::Cancelled => {
                    info!(bytes = state.bytes_written, "download cancelled");
                    discard(&state.temp_path);
                    return Ok(DownloadOutcome::Cancelled);
                }
                Phase::Failed(err) => {
                    warn!(kind = %err.kind, detail = %err.detail, attempts = state.attempt, "download failed");
                    discard(&state.temp_path);
                    return Err(err);
                }
            };
        }
    }

    /// Send one (possibly ranged) GET and decide what to do with the answer.
    fn request(&self, url: &Url, file_name: &str, state: &mut DownloadState) -> Phase {
        let offset = state.bytes_written;
        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        debug!(attempt = state.attempt, offset, "requesting artifact");

        let response = match request.send() {
            Ok(response) => response,
            Err(e) if is_transient_error(&e) => return Phase::Backoff(DownloadError::network(e.to_string())),
            Err(e) => return Phase::Failed(DownloadError::network(e.to_string())),
        };

        let status = response.status();
        if status.is_redirection() || !self.allow_list.allows_url(response.url()) {
            return Phase::Failed(DownloadError::new(
                DownloadErrorKind::DomainRejected,
                format!("redirect away from the allow-list refused (HTTP {})", status.as_u16()),
            ));
        }

        if offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
            warn!(offset, "server rejected resume offset; discarding partial");
            discard(&state.temp_path);
            state.bytes_written = 0;
            return Phase::Request;
        }

        if !status.is_success() {
            let err = DownloadError::network(format!("HTTP {} from {}", status.as_u16(), url));
            return if is_transient_status(status) {
                Phase::Backoff(err)
            } else {
                Phase::Failed(err)
            };
        }

        if let Some(advertised) = header_str(&response, CONTENT_DISPOSITION).and_then(|v| disposition_filename(&v)) {
            let matches = sanitize_filename(&advertised)
                .map(|name| name.eq_ignore_ascii_case(file_name))
                .unwrap_or(false);
            if !matches {
                return Phase::Failed(DownloadError::new(
                    DownloadErrorKind::NameMismatch,
                    format!("server sent {:?}, expected {:?}", advertised, file_name),
                ));
            }
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if append {
            let range_start = header_str(&response, CONTENT_RANGE).and_then(|r| content_range_start(&r));
            if range_start.is_some_and(|start| start != offset) {
                warn!(offset, "server resumed at a different offset; restarting");
                discard(&state.temp_path);
                state.bytes_written = 0;
                return Phase::Request;
            }
        } else if offset > 0 {
            info!(offset, "server ignored the range request; restarting from zero");
            state.bytes_written = 0;
        }

        // A declared length that cannot add up to the artifact is a mismatch now
        if status != StatusCode::PARTIAL_CONTENT || append {
            if let Some(len) = header_u64(&response, CONTENT_LENGTH) {
                if state.bytes_written + len != state.expected_size {
                    return Phase::Failed(DownloadError::new(
                        DownloadErrorKind::SizeMismatch,
                        format!(
                            "server will send {} bytes from offset {}, artifact is {} bytes",
                            len, state.bytes_written, state.expected_size
                        ),
                    ));
                }
            }
        }

        Phase::Stream { response, append }
    }

    /// Copy the body into the temp file chunk by chunk.
    fn stream(
        &self,
        mut response: Response,
        append: bool,
        state: &mut DownloadState,
        cancel: &CancellationToken,
        progress: &mut impl FnMut(u64, u64),
    ) -> Phase {
        let opened = if append {
            OpenOptions::new().append(true).open(&state.temp_path)
        } else {
            File::create(&state.temp_path)
        };
        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                return Phase::Failed(DownloadError::storage(format!(
                    "cannot open {}: {}",
                    redact_path(&state.temp_path),
                    e
                )))
            }
        };

        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Phase::Cancelled;
            }

            let bytes_read = match response.read(&mut buffer) {
                Ok(n) => n,
                Err(e) => {
                    // Keep what we have; the next attempt resumes from it
                    let _ = file.flush();
                    return Phase::Backoff(DownloadError::network(format!("connection lost: {}", e)));
                }
            };
            if bytes_read == 0 {
                break;
            }

            if state.bytes_written + bytes_read as u64 > state.expected_size {
                return Phase::Failed(DownloadError::new(
                    DownloadErrorKind::SizeMismatch,
                    format!("server sent more than the expected {} bytes", state.expected_size),
                ));
            }
            if let Err(e) = file.write_all(&buffer[..bytes_read]) {
                return Phase::Failed(DownloadError::storage(format!(
                    "write to {} failed: {}",
                    redact_path(&state.temp_path),
                    e
                )));
            }

            state.bytes_written += bytes_read as u64;
            progress(state.bytes_written, state.expected_size);
        }

        if let Err(e) = file.flush().and_then(|_| file.sync_all()) {
            return Phase::Failed(DownloadError::storage(format!(
                "sync of {} failed: {}",
                redact_path(&state.temp_path),
                e
            )));
        }
        Phase::Verify
    }

    fn backoff(&self, err: DownloadError, state: &mut DownloadState, cancel: &CancellationToken) -> Phase {
        if !self.retry.allows_another(state.attempt) {
            return Phase::Failed(DownloadError::network(format!(
                "gave up after {} attempts: {}",
                state.attempt, err.detail
            )));
        }
        if cancel.is_cancelled() {
            return Phase::Cancelled;
        }

        let delay = self.retry.delay_for(state.attempt);
        warn!(
            attempt = state.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err.detail,
            "transient download failure; backing off"
        );

        let deadline = Instant::now() + delay;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            if left.is_zero() {
                break;
            }
            if cancel.is_cancelled() {
                return Phase::Cancelled;
            }
            thread::sleep(left.min(BACKOFF_SLICE));
        }

        // The file on disk is the source of truth for the resume offset
        state.bytes_written = file_len(&state.temp_path)
            .filter(|&len| len <= state.expected_size)
            .unwrap_or(0);
        Phase::Request
    }
}

/// Final size check, then the atomic rename into place.
fn verify(state: &DownloadState) -> Phase {
    let on_disk = file_len(&state.temp_path).unwrap_or(0);
    if state.bytes_written != state.expected_size || on_disk != state.expected_size {
        return Phase::Failed(DownloadError::new(
            DownloadErrorKind::SizeMismatch,
            format!("got {} bytes, expected {}", on_disk, state.expected_size),
        ));
    }

    // rename does not replace an existing file on every platform
    if state.final_path.exists() {
        if let Err(e) = fs::remove_file(&state.final_path) {
            return Phase::Failed(DownloadError::storage(format!(
                "cannot replace stale {}: {}",
                redact_path(&state.final_path),
                e
            )));
        }
    }
    match fs::rename(&state.temp_path, &state.final_path) {
        Ok(()) => Phase::Finished,
        Err(e) => Phase::Failed(DownloadError::storage(format!(
            "rename to {} failed: {}",
            redact_path(&state.final_path),
            e
        ))),
    }
}

fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

/// Remove a temp file; failures are logged, never fatal.
fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %redact_path(path), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %redact_path(path), error = %e, "could not remove partial download"),
    }
}

/// Start offset of "bytes START-END/TOTAL".
fn content_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes")?
        .trim()
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use tempfile::TempDir;

    const TOOL: &str = "officedeploymenttool_18129-20030.exe";

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn manager() -> DownloadManager {
        let mut settings = Settings::default();
        settings.network.allowed_domains = vec!["127.0.0.1".to_string()];
        settings.network.require_https = false;
        DownloadManager::new(&settings)
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    fn descriptor(server: &MockServer, size: usize) -> ArtifactDescriptor {
        descriptor_at(&server.base_url(), size)
    }

    fn descriptor_at(base_url: &str, size: usize) -> ArtifactDescriptor {
        ArtifactDescriptor {
            url: format!("{}/dl/{}", base_url, TOOL),
            expected_filename: TOOL.to_string(),
            expected_size_bytes: size as u64,
            source_domain: "127.0.0.1".to_string(),
        }
    }

    /// Raw HTTP/1.1 reply; the connection closes after `body`.
    fn reply(head: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes = format!("{}\r\nConnection: close\r\n\r\n", head).into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    /// Serves one canned reply per connection, in order, then stops.
    /// The join handle yields the `Range` header each request carried.
    fn scripted_server(replies: Vec<Vec<u8>>) -> (String, thread::JoinHandle<Vec<Option<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut ranges = Vec::new();
            for reply in replies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut range = None;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 {
                        break;
                    }
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("range") {
                            range = Some(value.trim().to_string());
                        }
                    }
                }
                ranges.push(range);
                stream.write_all(&reply).unwrap();
                stream.flush().unwrap();
            }
            ranges
        });

        (base_url, handle)
    }

    fn run(descriptor: &ArtifactDescriptor, dir: &TempDir) -> Result<DownloadOutcome, DownloadError> {
        manager().download(descriptor, dir.path(), &CancellationToken::new(), |_, _| {})
    }

    #[test]
    fn test_full_download() {
        let server = MockServer::start();
        let content = body(200_000);
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(content.clone());
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, content.len());
        let mut last = (0, 0);
        let outcome = manager()
            .download(&descriptor, dir.path(), &CancellationToken::new(), |done, total| last = (done, total))
            .unwrap();

        let final_path = dir.path().join(TOOL);
        assert_eq!(outcome, DownloadOutcome::Completed(final_path.clone()));
        assert_eq!(fs::read(&final_path).unwrap(), content);
        assert_eq!(last, (200_000, 200_000));
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
    }

    #[test]
    fn test_resume_requests_exact_offset() {
        let server = MockServer::start();
        let content = body(100_000);
        let offset = 30_000;
        let ranged = server.mock(|when, then| {
            when.method(GET)
                .path(format!("/dl/{}", TOOL))
                .header("range", format!("bytes={}-", offset));
            then.status(206)
                .header("content-range", format!("bytes {}-{}/{}", offset, content.len() - 1, content.len()))
                .body(content[offset..].to_vec());
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, content.len());
        fs::write(temp_path_for(&descriptor, dir.path()), &content[..offset]).unwrap();

        let outcome = run(&descriptor, &dir).unwrap();

        ranged.assert_hits(1);
        let final_path = dir.path().join(TOOL);
        assert_eq!(outcome, DownloadOutcome::Completed(final_path.clone()));
        let written = fs::read(&final_path).unwrap();
        assert_eq!(written.len(), content.len());
        assert_eq!(written, content);
    }

    #[test]
    fn test_range_ignored_restarts_from_zero() {
        let server = MockServer::start();
        let content = body(50_000);
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(content.clone());
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, content.len());
        fs::write(temp_path_for(&descriptor, dir.path()), vec![0xFFu8; 10_000]).unwrap();

        run(&descriptor, &dir).unwrap();
        assert_eq!(fs::read(dir.path().join(TOOL)).unwrap(), content);
    }

    #[test]
    fn test_dropped_connection_resumes_from_disk_offset() {
        let content = body(1_000);
        let (base_url, server) = scripted_server(vec![
            reply("HTTP/1.1 200 OK\r\nContent-Length: 1000", &content[..400]),
            reply(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 400-999/1000\r\nContent-Length: 600",
                &content[400..],
            ),
        ]);

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor_at(&base_url, content.len());
        let outcome = run(&descriptor, &dir).unwrap();

        let ranges = server.join().unwrap();
        assert_eq!(ranges, vec![None, Some("bytes=400-".to_string())]);
        assert_eq!(outcome, DownloadOutcome::Completed(dir.path().join(TOOL)));
        assert_eq!(fs::read(dir.path().join(TOOL)).unwrap(), content);
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
    }

    #[test]
    fn test_unsatisfiable_range_discards_partial() {
        let content = body(20_000);
        let (base_url, server) = scripted_server(vec![
            reply("HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0", &[]),
            reply("HTTP/1.1 200 OK\r\nContent-Length: 20000", &content),
        ]);

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor_at(&base_url, content.len());
        fs::write(temp_path_for(&descriptor, dir.path()), vec![0u8; 5_000]).unwrap();

        run(&descriptor, &dir).unwrap();

        let ranges = server.join().unwrap();
        assert_eq!(ranges, vec![Some("bytes=5000-".to_string()), None]);
        assert_eq!(fs::read(dir.path().join(TOOL)).unwrap(), content);
    }

    #[test]
    fn test_oversized_partial_discarded() {
        let server = MockServer::start();
        let content = body(10_000);
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(content.clone());
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, content.len());
        fs::write(temp_path_for(&descriptor, dir.path()), vec![0u8; 20_000]).unwrap();

        run(&descriptor, &dir).unwrap();
        mock.assert_hits(1);
        assert_eq!(fs::read(dir.path().join(TOOL)).unwrap(), content);
    }

    #[test]
    fn test_redirect_off_allow_list_refused() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(302).header("location", format!("https://evil.example.com/{}", TOOL));
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 1_000);
        let err = run(&descriptor, &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::DomainRejected);
        mock.assert_hits(1);
        assert!(!dir.path().join(TOOL).exists());
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
    }

    #[test]
    fn test_redirect_on_allow_list_followed() {
        let server = MockServer::start();
        let content = body(1_000);
        let target = server.url(format!("/mirror/{}", TOOL));
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(302).header("location", target.as_str());
        });
        let mirror = server.mock(|when, then| {
            when.method(GET).path(format!("/mirror/{}", TOOL));
            then.status(200).body(content.clone());
        });

        let dir = TempDir::new().unwrap();
        let outcome = run(&descriptor(&server, content.len()), &dir).unwrap();

        mirror.assert_hits(1);
        assert_eq!(outcome, DownloadOutcome::Completed(dir.path().join(TOOL)));
        assert_eq!(fs::read(dir.path().join(TOOL)).unwrap(), content);
    }

    #[test]
    fn test_short_body_is_size_mismatch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(body(9_000));
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 10_000);
        let err = run(&descriptor, &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::SizeMismatch);
        mock.assert_hits(1);
        assert!(!dir.path().join(TOOL).exists());
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
    }

    #[test]
    fn test_long_body_is_size_mismatch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(body(12_000));
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 10_000);
        let err = run(&descriptor, &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::SizeMismatch);
        assert!(!dir.path().join(TOOL).exists());
    }

    #[test]
    fn test_name_mismatch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200)
                .header("content-disposition", r#"attachment; filename="setup_other.exe""#)
                .body(body(1_000));
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 1_000);
        let err = run(&descriptor, &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::NameMismatch);
        assert!(err.is_validation_failure());
        assert!(!dir.path().join(TOOL).exists());
    }

    #[test]
    fn test_name_compared_case_insensitively() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200)
                .header("content-disposition", format!("attachment; filename={}", TOOL.to_uppercase()))
                .body(body(1_000));
        });

        let dir = TempDir::new().unwrap();
        let outcome = run(&descriptor(&server, 1_000), &dir).unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed(dir.path().join(TOOL)));
    }

    #[test]
    fn test_domain_rejected_without_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200).body(body(100));
        });

        let dir = TempDir::new().unwrap();
        let mut descriptor = descriptor(&server, 100);
        descriptor.url = descriptor.url.replace("127.0.0.1", "localhost");

        let err = run(&descriptor, &dir).unwrap_err();
        assert_eq!(err.kind, DownloadErrorKind::DomainRejected);
        mock.assert_hits(0);
    }

    #[test]
    fn test_cancel_mid_stream() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(200).body(body(2 * 1024 * 1024));
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 2 * 1024 * 1024);
        let cancel = CancellationToken::new();
        let outcome = manager()
            .download(&descriptor, dir.path(), &cancel, |done, total| {
                if done > 0 && done < total {
                    cancel.cancel();
                }
            })
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(!dir.path().join(TOOL).exists());
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
    }

    #[test]
    fn test_cancel_before_start() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200).body(body(100));
        });

        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = manager()
            .download(&descriptor(&server, 100), dir.path(), &cancel, |_, _| {})
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        mock.assert_hits(0);
    }

    #[test]
    fn test_cancel_during_backoff() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(503);
        });

        let dir = TempDir::new().unwrap();
        let descriptor = descriptor(&server, 1_000);
        fs::write(temp_path_for(&descriptor, dir.path()), body(100)).unwrap();

        let slow = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter: 0.0,
        };
        let manager = manager().with_retry_policy(slow);

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                cancel.cancel();
            })
        };

        let started = Instant::now();
        let outcome = manager.download(&descriptor, dir.path(), &cancel, |_, _| {}).unwrap();
        canceller.join().unwrap();

        assert_eq!(outcome, DownloadOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        mock.assert_hits(1);
        assert!(!temp_path_for(&descriptor, dir.path()).exists());
        assert!(!dir.path().join(TOOL).exists());
    }

    #[test]
    fn test_transient_errors_capped() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(500);
        });

        let dir = TempDir::new().unwrap();
        let err = run(&descriptor(&server, 1_000), &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::Network);
        assert!(err.detail.contains("3 attempts"));
        mock.assert_hits(3);
    }

    #[test]
    fn test_client_error_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path(format!("/dl/{}", TOOL));
            then.status(404);
        });

        let dir = TempDir::new().unwrap();
        let err = run(&descriptor(&server, 1_000), &dir).unwrap_err();

        assert_eq!(err.kind, DownloadErrorKind::Network);
        mock.assert_hits(1);
    }

    #[test]
    fn test_existing_artifact_reused() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(500);
        });

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(TOOL), body(1_000)).unwrap();

        let outcome = run(&descriptor(&server, 1_000), &dir).unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed(dir.path().join(TOOL)));
        mock.assert_hits(0);
    }

    #[test]
    fn test_content_range_start() {
        assert_eq!(content_range_start("bytes 500-999/1000"), Some(500));
        assert_eq!(content_range_start("bytes */1000"), None);
        assert_eq!(content_range_start("items 1-2/3"), None);
    }
}
