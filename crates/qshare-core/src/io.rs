//! Upload sources and download sinks on the local filesystem

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Name used when an upload source has no usable file name
pub const FALLBACK_UPLOAD_NAME: &str = "upload.bin";

/// Name used when a download name sanitises to nothing
pub const FALLBACK_DOWNLOAD_NAME: &str = "download.bin";

/// Pick the upload name: an explicit name if non-blank, else `upload.bin`
#[must_use]
pub fn upload_name(suggested: Option<&str>) -> String {
    suggested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| FALLBACK_UPLOAD_NAME.to_string(), str::to_string)
}

/// Upload name for a local path (its final component)
#[must_use]
pub fn upload_name_for_path(path: &Path) -> String {
    upload_name(path.file_name().and_then(|n| n.to_str()))
}

/// Read an upload source fully into memory
///
/// Returns the suggested name and the file's bytes.
///
/// # Errors
///
/// Returns [`Error::SourceUnavailable`] if the file cannot be read.
pub async fn read_upload_source(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::SourceUnavailable(format!("{}: {e}", path.display())))?;
    Ok((upload_name_for_path(path), bytes))
}

/// Reduce a remote file name to a safe local file name
///
/// Keeps only the final path component and rejects `.`/`..`.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('\0');

    if last.is_empty() || last == "." || last == ".." {
        FALLBACK_DOWNLOAD_NAME.to_string()
    } else {
        last.to_string()
    }
}

/// Suffix of the file a download is streamed into before it is committed
pub const PARTIAL_SUFFIX: &str = ".part";

/// Local destination of a download
///
/// Bytes go to a `{name}.part` sibling; the real file is only replaced by
/// [`DownloadSink::commit`]. A failed download never touches an existing
/// file of the same name.
#[derive(Debug)]
pub struct DownloadSink {
    path: PathBuf,
    part_path: PathBuf,
    file: tokio::fs::File,
}

impl DownloadSink {
    /// Final path the download is committed to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the partial file being written
    #[must_use]
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// The partial file, to be passed to a download as its sink
    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    /// Flush the partial file and move it into place
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkWriteFailed`] if flushing or renaming fails; the
    /// partial file is removed in that case.
    pub async fn commit(mut self) -> Result<PathBuf> {
        let synced = match self.file.flush().await {
            Ok(()) => self.file.sync_all().await,
            Err(e) => Err(e),
        };
        drop(self.file);

        let renamed = match synced {
            Ok(()) => tokio::fs::rename(&self.part_path, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = renamed {
            remove_partial(&self.part_path).await;
            return Err(Error::SinkWriteFailed(format!("{}: {e}", self.path.display())));
        }

        Ok(self.path)
    }

    /// Drop the partial file, leaving any existing file untouched
    pub async fn discard(self) {
        drop(self.file);
        remove_partial(&self.part_path).await;
    }
}

async fn remove_partial(part_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(part_path).await {
        tracing::debug!("Could not remove {}: {}", part_path.display(), e);
    }
}

/// Open the partial file a download into `dir` is written to
///
/// The directory is created if needed. The final name is the sanitised
/// final component of `name`.
///
/// # Errors
///
/// Returns [`Error::SinkWriteFailed`] if the directory or file cannot be
/// created.
pub async fn create_download_sink(dir: &Path, name: &str) -> Result<DownloadSink> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::SinkWriteFailed(format!("{}: {e}", dir.display())))?;

    let file_name = sanitize_file_name(name);
    let path = dir.join(&file_name);
    let part_path = dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));
    let file = tokio::fs::File::create(&part_path)
        .await
        .map_err(|e| Error::SinkWriteFailed(format!("{}: {e}", part_path.display())))?;

    Ok(DownloadSink {
        path,
        part_path,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_name_fallback() {
        assert_eq!(upload_name(Some("photo.jpg")), "photo.jpg");
        assert_eq!(upload_name(Some("   ")), "upload.bin");
        assert_eq!(upload_name(None), "upload.bin");
        assert_eq!(upload_name_for_path(Path::new("/tmp/notes.txt")), "notes.txt");
        assert_eq!(upload_name_for_path(Path::new("/")), "upload.bin");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_file_name(".."), "download.bin");
        assert_eq!(sanitize_file_name("a/"), "download.bin");
        assert_eq!(sanitize_file_name(""), "download.bin");
    }

    #[tokio::test]
    async fn test_read_upload_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let (name, bytes) = read_upload_source(&path).await.unwrap();
        assert_eq!(name, "hello.txt");
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_missing_source_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_upload_source(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_download_sink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");

        let sink = create_download_sink(&target, "../x/report.pdf").await.unwrap();
        assert_eq!(sink.path(), target.join("report.pdf"));
        assert_eq!(sink.part_path(), target.join("report.pdf.part"));
        assert!(sink.part_path().exists());
        assert!(!sink.path().exists());
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();

        let mut sink = create_download_sink(dir.path(), "a.txt").await.unwrap();
        sink.file_mut().write_all(b"new contents").await.unwrap();
        let path = sink.commit().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
        assert!(!dir.path().join("a.txt.part").exists());
    }

    #[tokio::test]
    async fn test_discard_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"precious").unwrap();

        let mut sink = create_download_sink(dir.path(), "a.txt").await.unwrap();
        sink.file_mut().write_all(b"half").await.unwrap();
        sink.discard().await;

        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"precious");
        assert!(!dir.path().join("a.txt.part").exists());
    }

    #[tokio::test]
    async fn test_sink_in_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        // A regular file where the directory should be
        let err = create_download_sink(&blocker, "a.txt").await.unwrap_err();
        assert!(matches!(err, Error::SinkWriteFailed(_)));
    }
}
