//! Upload, list and fetch of model artifacts on the volume
//!
//! These run independently of the web server and of each other. Writes go
//! to a unique temporary file in the destination directory and are renamed
//! into place, so a concurrent reader never sees a torn file. There is no
//! locking: two writers to the same name race and the last rename wins.

use crate::error::{
    ArtifactError, InvalidNameSnafu, IoSnafu, RequestSnafu, SourceMissingSnafu, StatusSnafu,
};
use crate::volume::{ArtifactCategory, VolumeLayout};
use futures::StreamExt;
use serde::Serialize;
use snafu::{ResultExt, ensure};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResult {
    Success { path: PathBuf },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FetchResult {
    Success { path: PathBuf, size: u64 },
    Error { message: String },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Copy `source` into the category directory under its own file name
///
/// An existing artifact with the same name is replaced.
pub fn upload_artifact(
    layout: &VolumeLayout,
    source: &Path,
    category: ArtifactCategory,
) -> UploadResult {
    match try_upload(layout, source, category) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "artifact uploaded");
            UploadResult::Success { path }
        }
        Err(e) => {
            tracing::warn!(source = %source.display(), error = %e, "artifact upload failed");
            UploadResult::Error {
                message: e.to_string(),
            }
        }
    }
}

fn try_upload(
    layout: &VolumeLayout,
    source: &Path,
    category: ArtifactCategory,
) -> Result<PathBuf, ArtifactError> {
    ensure!(source.is_file(), SourceMissingSnafu { path: source });

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dest = destination(layout, &name, category)?;
    let dir = layout.category_dir(category);
    fs::create_dir_all(&dir).context(IoSnafu { path: dir })?;

    let tmp = part_path(&dest);
    if let Err(source_err) = fs::copy(source, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(source_err).context(IoSnafu { path: tmp });
    }
    if let Err(rename_err) = fs::rename(&tmp, &dest) {
        let _ = fs::remove_file(&tmp);
        return Err(rename_err).context(IoSnafu { path: dest });
    }

    Ok(dest)
}

/// Artifacts in a category whose extension is accepted, sorted by name
///
/// A missing or unreadable directory yields an empty list.
pub fn list_artifacts(
    layout: &VolumeLayout,
    category: ArtifactCategory,
    accepted_extensions: &[String],
) -> Vec<ArtifactEntry> {
    let dir = layout.category_dir(category);
    let Ok(entries) = fs::read_dir(&dir) else {
        tracing::debug!(dir = %dir.display(), "artifact directory missing");
        return Vec::new();
    };

    let mut artifacts: Vec<ArtifactEntry> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let extension = path.extension()?.to_str()?;
            if !accepted_extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(extension))
            {
                return None;
            }
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(ArtifactEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
            })
        })
        .collect();

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    artifacts
}

/// Stream `url` into the category directory as `name`
///
/// Never fails past its own boundary: errors come back as
/// `FetchResult::Error` and no partial file is left at the destination.
pub async fn fetch_remote_artifact(
    layout: &VolumeLayout,
    url: &str,
    name: &str,
    category: ArtifactCategory,
    bearer_token: Option<&str>,
) -> FetchResult {
    match try_fetch(layout, url, name, category, bearer_token).await {
        Ok((path, size)) => {
            tracing::info!(url, path = %path.display(), size, "artifact fetched");
            FetchResult::Success { path, size }
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "artifact fetch failed");
            FetchResult::Error {
                message: e.to_string(),
            }
        }
    }
}

async fn try_fetch(
    layout: &VolumeLayout,
    url: &str,
    name: &str,
    category: ArtifactCategory,
    bearer_token: Option<&str>,
) -> Result<(PathBuf, u64), ArtifactError> {
    let dest = destination(layout, name, category)?;
    let dir = layout.category_dir(category);
    tokio::fs::create_dir_all(&dir)
        .await
        .context(IoSnafu { path: dir })?;

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context(RequestSnafu { url })?;
    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context(RequestSnafu { url })?;
    let status = response.status();
    ensure!(
        status.is_success(),
        StatusSnafu {
            url,
            status: status.as_u16()
        }
    );

    let tmp = part_path(&dest);
    let result = stream_to(response, &tmp, url).await;
    let size = match result {
        Ok(size) => size,
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).context(IoSnafu { path: dest });
    }

    Ok((dest, size))
}

async fn stream_to(
    response: reqwest::Response,
    path: &Path,
    url: &str,
) -> Result<u64, ArtifactError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .context(IoSnafu { path })?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context(RequestSnafu { url })?;
        file.write_all(&chunk).await.context(IoSnafu { path })?;
        written += chunk.len() as u64;
    }

    file.flush().await.context(IoSnafu { path })?;
    file.sync_all().await.context(IoSnafu { path })?;
    Ok(written)
}

/// Destination for `name`, refusing anything that is not a plain file name
fn destination(
    layout: &VolumeLayout,
    name: &str,
    category: ArtifactCategory,
) -> Result<PathBuf, ArtifactError> {
    let plain = Path::new(name)
        .file_name()
        .is_some_and(|f| f.to_string_lossy() == name);
    ensure!(
        plain && !name.starts_with('.'),
        InvalidNameSnafu { name }
    );
    Ok(layout.category_dir(category).join(name))
}

fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted() -> Vec<String> {
        vec!["safetensors".to_string()]
    }

    #[test]
    fn test_upload_then_list() {
        let volume = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let source = staging.path().join("foo.safetensors");
        fs::write(&source, vec![7u8; 1234]).unwrap();

        let result = upload_artifact(&layout, &source, ArtifactCategory::Lora);
        assert_eq!(
            result,
            UploadResult::Success {
                path: volume.path().join("models/Lora/foo.safetensors")
            }
        );

        let listed = list_artifacts(&layout, ArtifactCategory::Lora, &accepted());
        assert_eq!(
            listed,
            vec![ArtifactEntry {
                name: "foo.safetensors".to_string(),
                size: 1234
            }]
        );
    }

    #[test]
    fn test_upload_twice_overwrites() {
        let volume = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let source = staging.path().join("style.safetensors");

        fs::write(&source, b"v1").unwrap();
        let first = upload_artifact(&layout, &source, ArtifactCategory::Lora);
        fs::write(&source, b"version two").unwrap();
        let second = upload_artifact(&layout, &source, ArtifactCategory::Lora);

        assert_eq!(first, second);
        let listed = list_artifacts(&layout, ArtifactCategory::Lora, &accepted());
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 11);
    }

    #[test]
    fn test_upload_missing_source_reports_error() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());

        let result = upload_artifact(
            &layout,
            Path::new("/nonexistent/x.safetensors"),
            ArtifactCategory::Lora,
        );
        assert!(matches!(result, UploadResult::Error { .. }));
    }

    #[test]
    fn test_list_absent_directory_is_empty() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        assert!(list_artifacts(&layout, ArtifactCategory::Vae, &accepted()).is_empty());
    }

    #[test]
    fn test_list_filters_extensions() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let dir = layout.category_dir(ArtifactCategory::Lora);
        fs::create_dir_all(dir.join("nested.safetensors")).unwrap();
        fs::write(dir.join("b.safetensors"), b"bb").unwrap();
        fs::write(dir.join("a.SAFETENSORS"), b"a").unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let names: Vec<_> = list_artifacts(&layout, ArtifactCategory::Lora, &accepted())
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["a.SAFETENSORS", "b.safetensors"]);
    }

    #[test]
    fn test_destination_rejects_paths() {
        let layout = VolumeLayout::new("/webui");
        for bad in ["../escape.safetensors", "a/b.safetensors", "", ".hidden", ".."] {
            assert!(
                destination(&layout, bad, ArtifactCategory::Lora).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_unreachable_leaves_no_file() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());

        let result = fetch_remote_artifact(
            &layout,
            "http://127.0.0.1:9/model.safetensors",
            "model.safetensors",
            ArtifactCategory::StableDiffusion,
            Some("token"),
        )
        .await;

        assert!(!result.is_success());
        let dir = layout.category_dir(ArtifactCategory::StableDiffusion);
        let leftovers: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    /// Answer exactly one HTTP request with `response`, returning the request head
    async fn serve_once(response: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&head).into_owned()
        });
        (format!("http://{addr}/model.safetensors"), handle)
    }

    fn category_files(layout: &VolumeLayout) -> Vec<String> {
        let dir = layout.category_dir(ArtifactCategory::StableDiffusion);
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_streams_body_with_bearer_token() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let (url, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;

        let result = fetch_remote_artifact(
            &layout,
            &url,
            "model.safetensors",
            ArtifactCategory::StableDiffusion,
            Some("tok"),
        )
        .await;

        let dest = volume.path().join("models/Stable-diffusion/model.safetensors");
        assert_eq!(
            result,
            FetchResult::Success {
                path: dest.clone(),
                size: 5
            }
        );
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert_eq!(category_files(&layout), vec!["model.safetensors"]);

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.contains("authorization: bearer tok"), "{head}");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_leaves_no_file() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let (url, server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let result = fetch_remote_artifact(
            &layout,
            &url,
            "model.safetensors",
            ArtifactCategory::StableDiffusion,
            None,
        )
        .await;

        match result {
            FetchResult::Error { message } => assert!(message.contains("404"), "{message}"),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(category_files(&layout).is_empty());

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(!head.contains("authorization:"));
    }

    #[tokio::test]
    async fn test_fetch_truncated_body_removes_part_file() {
        let volume = tempfile::tempdir().unwrap();
        let layout = VolumeLayout::new(volume.path());
        let (url, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort",
        )
        .await;

        let result = fetch_remote_artifact(
            &layout,
            &url,
            "model.safetensors",
            ArtifactCategory::StableDiffusion,
            None,
        )
        .await;

        assert!(!result.is_success());
        assert!(category_files(&layout).is_empty());
    }
}
