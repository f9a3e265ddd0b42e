use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::config::Config;
use crate::errors::DatasetError;

pub const DATASET_URL: &str = "https://kth.box.com/shared/static/t3dgd186n3ckfj5qvhpxga4haiz8lmh8.gz";
pub const DATASET_FILE_NAME: &str = "Pandey.25M.tab";
pub const ARCHIVE_FILE_NAME: &str = "Pandey.25M.tar.gz";
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(20);
pub const DOWNLOAD_BODY_TIMEOUT: Duration = Duration::from_secs(600);

const CHUNK_SIZE: usize = 8192;

/// Make sure the analyzer has input data, downloading the reference dataset
/// when no path was supplied and it is not already present.
///
/// A caller-supplied `data_path` is returned untouched without any network or
/// filesystem access. On success `config.data_path` is always set.
pub fn ensure_dataset(config: &mut Config) -> Result<PathBuf, DatasetError> {
    if let Some(path) = &config.data_path {
        return Ok(path.clone());
    }

    let data_path = config.data_dir.join(DATASET_FILE_NAME);
    if data_path.is_file() {
        log::info!("using cached dataset {}", data_path.display());
    } else {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| DatasetError::Io {
            path: config.data_dir.clone(),
            source,
        })?;

        let archive_path = config.data_dir.join(ARCHIVE_FILE_NAME);
        download(
            &config.dataset_url,
            &archive_path,
            config.download_timeout,
            config.download_body_timeout,
        )?;

        println!("Extracting...");
        extract_archive(&archive_path, &config.data_dir)?;
        println!("Done extracting.");

        if !data_path.is_file() {
            return Err(DatasetError::MissingAfterExtract { path: data_path });
        }
    }

    config.data_path = Some(data_path.clone());
    Ok(data_path)
}

/// Stream `url` into `dest`, printing progress as it goes. A partially
/// written file is removed on failure.
///
/// `timeout` bounds connecting and receiving the response headers;
/// `body_timeout` bounds the whole transfer of the body after that.
pub fn download(
    url: &str,
    dest: &Path,
    timeout: Duration,
    body_timeout: Duration,
) -> Result<u64, DatasetError> {
    let agent = ureq::config::Config::builder()
        .timeout_connect(Some(timeout))
        .timeout_recv_response(Some(timeout))
        .timeout_recv_body(Some(body_timeout))
        .build()
        .new_agent();

    let response = agent.get(url).call().map_err(|err| classify(url, err))?;
    let content_length = response
        .headers()
        .get("content-length")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let file_name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match content_length {
        Some(size) => println!("Downloading: {} Bytes: {}", file_name, size),
        None => println!("Downloading: {} Bytes: unknown", file_name),
    }

    let mut reader = response.into_body().into_reader();
    let result = copy_with_progress(&mut reader, dest, content_length, url);
    if result.is_err() {
        std::fs::remove_file(dest).ok();
    }
    let written = result?;

    println!("\nDownload complete.\n");
    log::debug!("downloaded {} bytes from {}", written, url);
    Ok(written)
}

fn copy_with_progress(
    reader: &mut impl Read,
    dest: &Path,
    content_length: Option<u64>,
    url: &str,
) -> Result<u64, DatasetError> {
    let write_err = |source| DatasetError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut file = File::create(dest).map_err(write_err)?;
    let mut progress = DownloadProgress::new(content_length);
    let mut buffer = [0u8; CHUNK_SIZE];
    let stdout = std::io::stdout();

    loop {
        let n = reader.read(&mut buffer).map_err(|err| transfer_error(url, err))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n]).map_err(write_err)?;

        if let Some(percent) = progress.advance(n as u64) {
            let mut out = stdout.lock();
            write!(out, "\r{:>10}  [{:.0}%]", progress.downloaded(), percent).ok();
            out.flush().ok();
        }
    }
    file.flush().map_err(write_err)?;

    Ok(progress.downloaded())
}

fn classify(url: &str, err: ureq::Error) -> DatasetError {
    let url = url.to_string();
    match err {
        ureq::Error::StatusCode(code) => DatasetError::HttpStatus { url, code },
        ureq::Error::Timeout(_) => DatasetError::Timeout { url },
        ureq::Error::Io(io) => transfer_error(&url, io),
        other => DatasetError::Network {
            url,
            reason: other.to_string(),
        },
    }
}

// The body reader hands ureq errors back wrapped in an `io::Error`.
fn transfer_error(url: &str, err: std::io::Error) -> DatasetError {
    let wrapped_timeout = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ureq::Error>())
        .is_some_and(|inner| matches!(inner, ureq::Error::Timeout(_)));
    if wrapped_timeout || err.kind() == std::io::ErrorKind::TimedOut {
        DatasetError::Timeout {
            url: url.to_string(),
        }
    } else {
        DatasetError::Network {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Unpack a tar+gzip archive into `dest_dir`.
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<(), DatasetError> {
    let extract_err = |source| DatasetError::Extract {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(extract_err)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.unpack(dest_dir).map_err(extract_err)
}

/// Tracks download progress and decides when a new percentage is worth
/// printing: once it has moved more than one point since the last report, or
/// the download is essentially complete.
#[derive(Debug)]
pub struct DownloadProgress {
    total: Option<u64>,
    downloaded: u64,
    last_reported: f64,
}

impl DownloadProgress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            downloaded: 0,
            last_reported: 0.0,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Record `bytes` more and return the percentage if it should be shown.
    pub fn advance(&mut self, bytes: u64) -> Option<f64> {
        self.downloaded += bytes;
        let total = self.total?;
        let percent = self.downloaded as f64 * 100.0 / total as f64;
        if percent - self.last_reported > 1.0 || percent > 99.9 {
            self.last_reported = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn build_tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Serve a single HTTP response on a local port and return its URL.
    fn serve_once(status: &'static str, body: Vec<u8>) -> String {
        let length = Some(body.len());
        serve_with(status, length, body, Duration::ZERO)
    }

    /// Serve one response advertising `content_length` (omitted when `None`,
    /// so the body ends when the connection closes), then keep the
    /// connection open for `stall` before closing it.
    fn serve_with(
        status: &'static str,
        content_length: Option<usize>,
        body: Vec<u8>,
        stall: Duration,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
            }
            let mut stream = stream;
            write!(stream, "HTTP/1.1 {}\r\n", status).unwrap();
            if let Some(length) = content_length {
                write!(stream, "Content-Length: {}\r\n", length).unwrap();
            }
            write!(stream, "Connection: close\r\n\r\n").unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
            std::thread::sleep(stall);
        });
        format!("http://{}/dataset.tar.gz", addr)
    }

    fn unreachable_config(data_dir: &Path) -> Config {
        let mut config = Config::new("percolator", data_dir);
        // Nothing listens on port 1; any attempted download fails fast.
        config.dataset_url = "http://127.0.0.1:1/dataset.tar.gz".to_string();
        config.download_timeout = Duration::from_secs(2);
        config
    }

    #[test]
    fn supplied_data_path_skips_download() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let data_dir = tmp.path().join("never-created");
        let mut config = unreachable_config(&data_dir);
        config.data_path = Some(PathBuf::from("/tmp/x.tab"));

        let path = ensure_dataset(&mut config).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x.tab"));
        assert_eq!(config.data_path, Some(PathBuf::from("/tmp/x.tab")));
        assert!(!data_dir.exists());
    }

    #[test]
    fn cached_dataset_skips_download() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let cached = tmp.path().join(DATASET_FILE_NAME);
        fs::write(&cached, "psm\tlabel\n").unwrap();
        let mut config = unreachable_config(tmp.path());

        let path = ensure_dataset(&mut config).unwrap();
        assert_eq!(path, cached);
        assert_eq!(config.data_path, Some(cached));
    }

    #[test]
    fn unreachable_host_is_reported_not_raised() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let mut config = unreachable_config(tmp.path());

        let err = ensure_dataset(&mut config).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::Network { .. } | DatasetError::Timeout { .. }
        ));
        assert_eq!(config.data_path, None);
        assert!(!tmp.path().join(ARCHIVE_FILE_NAME).exists());
    }

    #[test]
    fn http_error_status_is_tagged() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let mut config = Config::new("percolator", tmp.path());
        config.dataset_url = serve_once("404 Not Found", b"missing".to_vec());

        let err = ensure_dataset(&mut config).unwrap_err();
        match err {
            DatasetError::HttpStatus { code, .. } => assert_eq!(code, 404),
            other => panic!("expected HttpStatus, got {:?}", other),
        }
    }

    #[test]
    fn downloads_and_extracts_dataset() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let tarball = build_tarball(&[(DATASET_FILE_NAME, b"SpecId\tLabel\n1\t1\n")]);
        let mut config = Config::new("percolator", tmp.path().join("data"));
        config.dataset_url = serve_once("200 OK", tarball.clone());

        let path = ensure_dataset(&mut config).unwrap();
        assert_eq!(path, tmp.path().join("data").join(DATASET_FILE_NAME));
        assert_eq!(fs::read_to_string(&path).unwrap(), "SpecId\tLabel\n1\t1\n");
        let archive = fs::read(tmp.path().join("data").join(ARCHIVE_FILE_NAME)).unwrap();
        assert_eq!(archive, tarball);
    }

    #[test]
    fn download_without_content_length_still_completes() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let tarball = build_tarball(&[(DATASET_FILE_NAME, b"SpecId\tLabel\n")]);
        let mut config = Config::new("percolator", tmp.path());
        config.dataset_url = serve_with("200 OK", None, tarball.clone(), Duration::ZERO);

        let path = ensure_dataset(&mut config).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "SpecId\tLabel\n");
        let archive = fs::read(tmp.path().join(ARCHIVE_FILE_NAME)).unwrap();
        assert_eq!(archive, tarball);
    }

    #[test]
    fn stalled_body_times_out() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let dest = tmp.path().join(ARCHIVE_FILE_NAME);
        let url = serve_with(
            "200 OK",
            Some(100_000),
            b"0123456789".to_vec(),
            Duration::from_secs(30),
        );

        let (tx, rx) = std::sync::mpsc::channel();
        let target = dest.clone();
        std::thread::spawn(move || {
            let result = download(&url, &target, Duration::from_secs(1), Duration::from_secs(1));
            tx.send(result).ok();
        });

        let result = rx
            .recv_timeout(Duration::from_secs(15))
            .expect("download should give up on a stalled body");
        match result {
            Err(DatasetError::Timeout { .. }) => {}
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn archive_without_dataset_file_fails() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let tarball = build_tarball(&[("README", b"wrong archive")]);
        let mut config = Config::new("percolator", tmp.path());
        config.dataset_url = serve_once("200 OK", tarball);

        let err = ensure_dataset(&mut config).unwrap_err();
        assert!(matches!(err, DatasetError::MissingAfterExtract { .. }));
        assert_eq!(config.data_path, None);
    }

    #[test]
    fn corrupt_archive_fails_extraction() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let archive = tmp.path().join(ARCHIVE_FILE_NAME);
        fs::write(&archive, b"not gzip at all").unwrap();

        let err = extract_archive(&archive, tmp.path()).unwrap_err();
        assert!(matches!(err, DatasetError::Extract { .. }));
    }

    #[test]
    fn progress_reports_after_each_full_point() {
        let mut progress = DownloadProgress::new(Some(1000));
        assert_eq!(progress.advance(5), None);
        assert_eq!(progress.advance(5), None);
        // 1.1% is more than one point past the last report (0%).
        assert_eq!(progress.advance(1), Some(1.1));
        assert_eq!(progress.advance(5), None);
        assert_eq!(progress.advance(10), Some(2.6));
        assert_eq!(progress.downloaded(), 26);
    }

    #[test]
    fn progress_reports_near_completion() {
        let mut progress = DownloadProgress::new(Some(10_000));
        assert!(progress.advance(9_995).is_some());
        assert_eq!(progress.advance(5), Some(100.0));
        // Still reported: anything above 99.9% is always shown.
        assert_eq!(progress.advance(0), Some(100.0));
    }

    #[test]
    fn progress_without_length_never_reports() {
        let mut progress = DownloadProgress::new(None);
        assert_eq!(progress.advance(1 << 20), None);
        assert_eq!(progress.downloaded(), 1 << 20);
        let mut zero = DownloadProgress::new(Some(0));
        assert_eq!(zero.advance(10), None);
    }
}
