use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use url::Url;

use crate::sync::{RemoteFile, RemoteFolder, RemoteStore};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id, name, md5Checksum, size";
const LIST_FIELDS: &str = "files(id, name, md5Checksum, size)";

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload session response is missing a Location header")]
    MissingUploadSession,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Thin client for the Google Drive v3 REST API
///
/// Covers only what the sync walker needs: list-by-query, folder creation and
/// resumable file uploads. Pagination is intentionally absent; lookups cap at
/// a handful of candidates because entries are always narrowed by name.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Look up a non-trashed folder by name under the given parent
    pub async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<DriveFile>, DriveError> {
        let mut query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query_value(name),
            FOLDER_MIME_TYPE
        );
        if let Some(parent) = parent {
            query.push_str(&format!(" and '{}' in parents", escape_query_value(parent)));
        }

        let mut files = self.list(&query, 1).await?;
        if files.is_empty() {
            Ok(None)
        } else {
            Ok(Some(files.remove(0)))
        }
    }

    /// Create a folder, optionally under a parent folder
    pub async fn create_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);

        let mut metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parent) = parent {
            metadata["parents"] = json!([parent]);
        }

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&metadata)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// List non-trashed entries with the given name, optionally within a folder
    pub async fn files_named(
        &self,
        name: &str,
        folder: Option<&str>,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let mut query = format!("name='{}' and trashed=false", escape_query_value(name));
        if let Some(folder) = folder {
            query.push_str(&format!(" and '{}' in parents", escape_query_value(folder)));
        }

        self.list(&query, 10).await
    }

    /// Upload a new file via a resumable session
    pub async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        folder: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);

        let mut metadata = json!({ "name": name });
        if let Some(folder) = folder {
            metadata["parents"] = json!([folder]);
        }

        let session = self
            .open_upload_session(self.http.post(url).bearer_auth(&self.token).json(&metadata))
            .await?;
        self.put_contents(session, path).await
    }

    /// Replace the content of an existing file via a resumable session
    pub async fn update_file(&self, path: &Path, file_id: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(&format!("/upload/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", FILE_FIELDS);

        let session = self
            .open_upload_session(self.http.patch(url).bearer_auth(&self.token).json(&json!({})))
            .await?;
        self.put_contents(session, path).await
    }

    async fn list(&self, query: &str, page_size: u32) -> Result<Vec<DriveFile>, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("spaces", "drive")
            .append_pair("fields", LIST_FIELDS)
            .append_pair("pageSize", &page_size.to_string());

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let list: FileList = Self::handle_response(response).await?;
        Ok(list.files)
    }

    /// Initiate a resumable upload and return the session URI from `Location`
    async fn open_upload_session(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Url, DriveError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadSession)?;
        Ok(Url::parse(location)?)
    }

    /// Stream the file body into an upload session without buffering it
    async fn put_contents(&self, session: Url, path: &Path) -> Result<DriveFile, DriveError> {
        let io_error = |source| DriveError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let length = file.metadata().await.map_err(io_error)?.len();

        let response = self
            .http
            .put(session)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, length)
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> DriveError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        DriveError::Api { status, body }
    }
}

/// Escape a value for interpolation into a Drive search query
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    // Drive serializes int64 fields as strings
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

impl From<DriveFile> for RemoteFile {
    fn from(file: DriveFile) -> Self {
        RemoteFile {
            size: file.size.as_deref().and_then(|s| s.parse().ok()),
            id: file.id,
            name: file.name,
            md5: file.md5_checksum,
        }
    }
}

impl From<DriveFile> for RemoteFolder {
    fn from(file: DriveFile) -> Self {
        RemoteFolder {
            id: file.id,
            name: file.name,
        }
    }
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn find_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> anyhow::Result<Option<RemoteFolder>> {
        let folder = DriveClient::find_folder(self, name, parent).await?;
        Ok(folder.map(RemoteFolder::from))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> anyhow::Result<RemoteFolder> {
        let folder = DriveClient::create_folder(self, name, parent).await?;
        Ok(folder.into())
    }

    async fn files_named(
        &self,
        name: &str,
        folder: Option<&str>,
    ) -> anyhow::Result<Vec<RemoteFile>> {
        let files = DriveClient::files_named(self, name, folder).await?;
        Ok(files.into_iter().map(RemoteFile::from).collect())
    }

    async fn create_file(
        &self,
        path: &Path,
        name: &str,
        folder: Option<&str>,
    ) -> anyhow::Result<RemoteFile> {
        let file = DriveClient::upload_file(self, path, name, folder).await?;
        Ok(file.into())
    }

    async fn update_file(&self, path: &Path, file_id: &str) -> anyhow::Result<RemoteFile> {
        let file = DriveClient::update_file(self, path, file_id).await?;
        Ok(file.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_escape_quotes_and_backslashes() {
        assert_eq!(escape_query_value("plain"), "plain");
        assert_eq!(escape_query_value("it's"), "it\\'s");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn remote_file_parses_size_string() {
        let file = DriveFile {
            id: "f1".into(),
            name: "a.txt".into(),
            md5_checksum: Some("abc".into()),
            size: Some("1024".into()),
        };
        let remote = RemoteFile::from(file);
        assert_eq!(remote.size, Some(1024));
        assert_eq!(remote.md5.as_deref(), Some("abc"));
    }

    #[test]
    fn remote_file_tolerates_missing_size() {
        let file = DriveFile {
            id: "f1".into(),
            name: "a.txt".into(),
            md5_checksum: None,
            size: None,
        };
        assert_eq!(RemoteFile::from(file).size, None);
    }
}
