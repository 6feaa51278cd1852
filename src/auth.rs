use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use url::Url;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
// Out-of-band redirect: the provider displays the code for manual entry, so
// no local listener is needed on headless hosts
const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
// Treat tokens expiring within this window as already stale
const EXPIRY_LEEWAY_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("token endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credential file contains no installed or web client section")]
    MissingClientSecret,
}

/// OAuth client secret, as found in a downloaded `credentials.json`
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: Url,
    pub token_uri: Url,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

/// Credential persisted to disk between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp after which the access token is no longer valid
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => now + EXPIRY_LEEWAY_SECS < expires_at,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    /// Refresh responses omit the refresh token; keep the previous one
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            expires_at: self.expires_in.map(|secs| unix_now() + secs),
            refresh_token: self.refresh_token.or(previous_refresh),
            access_token: self.access_token,
            token_type: self.token_type,
        }
    }
}

/// Produces a valid access token, refreshing or re-authorizing as needed
///
/// The token file is rewritten whenever a new credential is obtained. The
/// only interactive path is the manual code-entry flow, which works over SSH.
pub struct Authenticator {
    http: Client,
    secret: ClientSecret,
    token_path: PathBuf,
}

impl Authenticator {
    pub fn from_files(credentials: &Path, token: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read(credentials)?;
        let file: ClientSecretFile = serde_json::from_slice(&raw)?;
        let secret = file
            .installed
            .or(file.web)
            .ok_or(AuthError::MissingClientSecret)?;

        Ok(Self {
            http: Client::new(),
            secret,
            token_path: token.to_path_buf(),
        })
    }

    pub async fn access_token(&self) -> Result<String, AuthError> {
        let now = unix_now();

        if let Some(token) = self.load_token() {
            if token.is_fresh(now) {
                return Ok(token.access_token);
            }

            if let Some(refresh_token) = token.refresh_token.clone() {
                match self.refresh(&refresh_token).await {
                    Ok(refreshed) => {
                        info!("Refreshed access token");
                        self.persist(&refreshed)?;
                        return Ok(refreshed.access_token);
                    }
                    Err(e) => {
                        warn!("Token refresh failed, re-authorizing: {}", e);
                    }
                }
            }
        }

        let token = self.authorize().await?;
        self.persist(&token)?;
        Ok(token.access_token)
    }

    /// Manual consent flow: print the authorization URL and exchange the
    /// code the user pastes back
    async fn authorize(&self) -> Result<StoredToken, AuthError> {
        let url = self.authorize_url()?;

        println!("Visit this URL in a browser (on any device):");
        println!();
        println!("{url}");
        println!();
        print!("Enter the authorization code here: ");
        std::io::stdout().flush()?;

        let mut code = String::new();
        std::io::stdin().read_line(&mut code)?;

        let token = self.exchange_code(code.trim()).await?;
        info!("Authentication successful");
        Ok(token)
    }

    fn authorize_url(&self) -> Result<Url, AuthError> {
        let mut url = self.secret.auth_uri.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", OOB_REDIRECT_URI)
            .append_pair("scope", DRIVE_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<StoredToken, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
            ("redirect_uri", OOB_REDIRECT_URI),
        ];

        let response = self
            .http
            .post(self.secret.token_uri.clone())
            .form(&form)
            .send()
            .await?;
        let token: TokenResponse = Self::handle_response(response).await?;
        Ok(token.into_stored(None))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
        ];

        let response = self
            .http
            .post(self.secret.token_uri.clone())
            .form(&form)
            .send()
            .await?;
        let token: TokenResponse = Self::handle_response(response).await?;
        Ok(token.into_stored(Some(refresh_token.to_string())))
    }

    fn load_token(&self) -> Option<StoredToken> {
        let raw = std::fs::read(&self.token_path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(
                    "Ignoring unreadable token file {}: {}",
                    self.token_path.display(),
                    e
                );
                None
            }
        }
    }

    fn persist(&self, token: &StoredToken) -> Result<(), AuthError> {
        let raw = serde_json::to_vec_pretty(token)?;
        std::fs::write(&self.token_path, raw)?;
        Ok(())
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AuthError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Api { status, body })
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_credentials(dir: &Path) -> PathBuf {
        let path = dir.join("credentials.json");
        std::fs::write(
            &path,
            r#"{
                "installed": {
                    "client_id": "client-1",
                    "client_secret": "secret-1",
                    "auth_uri": "https://accounts.example/o/oauth2/auth",
                    "token_uri": "https://oauth2.example/token"
                }
            }"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn parses_installed_client_secret() {
        let dir = tempdir().unwrap();
        let credentials = write_credentials(dir.path());
        let auth =
            Authenticator::from_files(&credentials, &dir.path().join("token.json")).unwrap();

        assert_eq!(auth.secret.client_id, "client-1");
        assert_eq!(auth.secret.token_uri.as_str(), "https://oauth2.example/token");
    }

    #[test]
    fn rejects_credentials_without_client_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{}").unwrap();

        let result = Authenticator::from_files(&path, &dir.path().join("token.json"));
        assert!(matches!(result, Err(AuthError::MissingClientSecret)));
    }

    #[test]
    fn authorize_url_carries_scope_and_oob_redirect() {
        let dir = tempdir().unwrap();
        let credentials = write_credentials(dir.path());
        let auth =
            Authenticator::from_files(&credentials, &dir.path().join("token.json")).unwrap();

        let url = auth.authorize_url().unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(pairs.contains(&("client_id".into(), "client-1".into())));
        assert!(pairs.contains(&("redirect_uri".into(), OOB_REDIRECT_URI.into())));
        assert!(pairs.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
    }

    #[test]
    fn token_freshness_respects_leeway() {
        let token = StoredToken {
            access_token: "t".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: Some(1_000),
        };

        assert!(token.is_fresh(900));
        assert!(!token.is_fresh(950));
        assert!(!token.is_fresh(1_100));

        let no_expiry = StoredToken {
            expires_at: None,
            ..token
        };
        assert!(no_expiry.is_fresh(u64::MAX));
    }

    #[test]
    fn persisted_token_round_trips() {
        let dir = tempdir().unwrap();
        let credentials = write_credentials(dir.path());
        let token_path = dir.path().join("token.json");
        let auth = Authenticator::from_files(&credentials, &token_path).unwrap();

        let token = StoredToken {
            access_token: "access".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Some(42),
        };
        auth.persist(&token).unwrap();

        let loaded = auth.load_token().expect("token should load");
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.expires_at, Some(42));
    }

    #[test]
    fn corrupt_token_file_is_ignored() {
        let dir = tempdir().unwrap();
        let credentials = write_credentials(dir.path());
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, "not json").unwrap();

        let auth = Authenticator::from_files(&credentials, &token_path).unwrap();
        assert!(auth.load_token().is_none());
    }
}
