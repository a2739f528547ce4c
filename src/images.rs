use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::http::{JsonRequest, Transport};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_PREVIEW_URL: &str = "https://lh6.googleusercontent.com/d";
const DEFAULT_MIME: &str = "image/png";

/// An image listed from a folder. Bytes are fetched separately.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    pub preview_url: String,
    pub mime_type: String,
    location: String,
}

impl ImageRef {
    /// Sheet formula that renders the image inline.
    pub fn preview_formula(&self) -> String {
        format!("=IMAGE(\"{}\")", self.preview_url.replace('"', "\"\""))
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub trait ImageSource {
    async fn list(&self) -> Result<Vec<ImageRef>>;

    async fn bytes(&self, image: &ImageRef) -> Result<Vec<u8>>;
}

// ── Google Drive ──

pub struct DriveFolder<'a, T, A> {
    transport: &'a T,
    auth: &'a A,
    folder_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileList {
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    web_view_link: Option<String>,
}

impl<'a, T: Transport, A: TokenProvider> DriveFolder<'a, T, A> {
    pub fn new(transport: &'a T, auth: &'a A, folder_id: &str) -> Self {
        Self {
            transport,
            auth,
            folder_id: folder_id.trim().to_string(),
        }
    }

    fn list_url(&self, page_token: Option<&str>) -> Result<String> {
        let query = format!(
            "'{}' in parents and trashed=false and mimeType contains 'image/'",
            self.folder_id
        );
        let mut params = vec![
            ("q", query),
            ("fields", "nextPageToken,files(id,name,mimeType,webViewLink)".to_string()),
            ("orderBy", "name".to_string()),
            ("pageSize", "100".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        Ok(reqwest::Url::parse_with_params(DRIVE_FILES_URL, &params)?.to_string())
    }
}

impl<T: Transport, A: TokenProvider> ImageSource for DriveFolder<'_, T, A> {
    async fn list(&self) -> Result<Vec<ImageRef>> {
        let bearer = self.auth.bearer_token()?;
        let mut images = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = JsonRequest::get(self.list_url(page_token.as_deref())?, &bearer);
            let Some(body) = self.transport.send_json(&request).await? else {
                bail!("Drive file list for folder {} was not valid JSON", self.folder_id);
            };
            let page: FileList =
                serde_json::from_value(body).context("Unexpected Drive file list")?;
            images.extend(page.files.into_iter().map(|f| ImageRef {
                url: f
                    .web_view_link
                    .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", f.id)),
                preview_url: format!("{}/{}", DRIVE_PREVIEW_URL, f.id),
                mime_type: f.mime_type.unwrap_or_else(|| DEFAULT_MIME.to_string()),
                location: format!("{}/{}?alt=media", DRIVE_FILES_URL, f.id),
                id: f.id,
            }));
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }
        info!(folder = %self.folder_id, count = images.len(), "Listed Drive images");
        Ok(images)
    }

    async fn bytes(&self, image: &ImageRef) -> Result<Vec<u8>> {
        let bearer = self.auth.bearer_token()?;
        self.transport
            .fetch_bytes(&image.location, &bearer)
            .await
            .with_context(|| format!("Failed to download Drive file {}", image.id))
    }
}

// ── Local directory ──

pub struct LocalFolder {
    dir: PathBuf,
}

impl LocalFolder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

impl ImageSource for LocalFolder {
    async fn list(&self) -> Result<Vec<ImageRef>> {
        let dir = self
            .dir
            .canonicalize()
            .with_context(|| format!("Image directory {} not found", self.dir.display()))?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let images: Vec<ImageRef> = paths
            .into_iter()
            .filter_map(|path| {
                let mime = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(mime_for_extension)?;
                let id = path.file_name()?.to_string_lossy().into_owned();
                let url = format!("file://{}", path.display());
                Some(ImageRef {
                    id,
                    preview_url: url.clone(),
                    url,
                    mime_type: mime.to_string(),
                    location: path.to_string_lossy().into_owned(),
                })
            })
            .collect();
        debug!(dir = %dir.display(), count = images.len(), "Listed local images");
        Ok(images)
    }

    async fn bytes(&self, image: &ImageRef) -> Result<Vec<u8>> {
        std::fs::read(&image.location).with_context(|| format!("Failed to read {}", image.location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::http::fake::ScriptedTransport;
    use serde_json::json;

    #[tokio::test]
    async fn local_folder_lists_images_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.JPG"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("a.png"), b"png").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let folder = LocalFolder::new(dir.path());
        let images = folder.list().await.unwrap();
        let ids: Vec<_> = images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a.png", "b.JPG"]);
        assert_eq!(images[1].mime_type, "image/jpeg");
        assert!(images[0].url.starts_with("file://"));
        assert_eq!(folder.bytes(&images[0]).await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn local_folder_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let folder = LocalFolder::new(dir.path().join("missing"));
        assert!(folder.list().await.is_err());
    }

    #[tokio::test]
    async fn preview_formula_doubles_quotes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("say \"hi\".png"), b"png").unwrap();

        let images = LocalFolder::new(dir.path()).list().await.unwrap();
        let formula = images[0].preview_formula();
        assert!(formula.starts_with("=IMAGE(\"file://"));
        assert!(formula.ends_with("say \"\"hi\"\".png\")"));
    }

    #[tokio::test]
    async fn drive_folder_non_json_page_fails() {
        let transport = ScriptedTransport::new(vec![
            json!({ "files": [{ "id": "f1" }], "nextPageToken": "n2" }),
        ]);
        transport.push_raw(None);
        let auth = StaticToken("tok".into());
        let folder = DriveFolder::new(&transport, &auth, "folder-1");

        let err = folder.list().await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn drive_folder_follows_pages_and_downloads() {
        let transport = ScriptedTransport::new(vec![
            json!({
                "files": [{
                    "id": "f1",
                    "mimeType": "image/jpeg",
                    "webViewLink": "https://drive/f1"
                }],
                "nextPageToken": "n2"
            }),
            json!({ "files": [{ "id": "f2" }] }),
        ])
        .with_blob("https://www.googleapis.com/drive/v3/files/f2?alt=media", b"\x89PNG");
        let auth = StaticToken("tok".into());
        let folder = DriveFolder::new(&transport, &auth, " folder-1 ");

        let images = folder.list().await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, "https://drive/f1");
        assert_eq!(images[1].url, "https://drive.google.com/file/d/f2/view");
        assert_eq!(images[1].mime_type, "image/png");
        assert_eq!(
            images[1].preview_formula(),
            "=IMAGE(\"https://lh6.googleusercontent.com/d/f2\")"
        );
        assert_eq!(folder.bytes(&images[1]).await.unwrap(), b"\x89PNG");

        let requests = transport.requests.borrow();
        assert!(requests[0].url.contains("folder-1"));
        assert!(!requests[0].url.contains("pageToken"));
        assert!(requests[1].url.contains("pageToken=n2"));
        assert!(requests[0].body.is_none());
    }

    #[test]
    fn base64_matches_standard_alphabet() {
        assert_eq!(encode_base64(b"hello?>"), "aGVsbG8/Pg==");
    }
}
