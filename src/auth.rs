//! OAuth2 session setup for the Gmail API

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use yup_oauth2::ApplicationSecret;

use crate::error::{GmailError, Result};

/// Read/write access to messages; enough to move mail to trash
///
/// `https://mail.google.com/` (permanent deletion) is deliberately not requested.
pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

pub const REQUIRED_SCOPES: &[&str] = &[MODIFY_SCOPE];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Where the OAuth client secret comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    File(PathBuf),
    Environment,
}

/// Pick the credentials file when present, the `GMAIL_*` variables otherwise
pub fn secret_source(credentials_path: &Path) -> SecretSource {
    if credentials_path.exists() {
        SecretSource::File(credentials_path.to_path_buf())
    } else {
        SecretSource::Environment
    }
}

async fn load_secret(source: &SecretSource) -> Result<ApplicationSecret> {
    match source {
        SecretSource::File(path) => yup_oauth2::read_application_secret(path)
            .await
            .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e))),
        SecretSource::Environment => load_credentials_from_env().map_err(|e| {
            GmailError::AuthError(format!(
                "No credentials file found and environment is incomplete ({})",
                e
            ))
        }),
    }
}

/// Initialize Gmail API hub with OAuth2 authentication
///
/// Runs the installed-app flow (browser redirect) when no usable token is
/// cached. Tokens are persisted to `token_cache_path` and refreshed
/// automatically afterwards.
///
/// # Arguments
/// * `credentials_path` - OAuth2 client secret JSON; falls back to env vars if missing
/// * `token_cache_path` - Where access and refresh tokens are cached
pub async fn initialize_gmail_hub(credentials_path: &Path, token_cache_path: &Path) -> Result<GmailHub> {
    let source = secret_source(credentials_path);
    debug!("Loading OAuth client secret from {:?}", source);
    let secret = load_secret(&source).await?;

    if let Some(parent) = token_cache_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Obtain the token up front so an expired refresh token surfaces here
    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if token_cache_path.exists() {
        secure_token_file(token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    info!("Gmail session ready");
    Ok(Gmail::new(client, auth))
}

/// Forget the cached token so the next session runs the consent flow again
pub async fn clear_token_cache(token_cache_path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(token_cache_path).await {
        Ok(()) => {
            info!("Removed cached token at {:?}", token_cache_path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Load OAuth2 credentials from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
/// - `GMAIL_REDIRECT_URI`: Redirect URI (optional, defaults to http://localhost:8080)
pub fn load_credentials_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_SECRET not set".to_string()))?;
    let redirect_uri = env::var("GMAIL_REDIRECT_URI").unwrap_or_else(|_| "http://localhost:8080".to_string());

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
        token_uri: "https://oauth2.googleapis.com/token".to_string(),
        redirect_uris: vec![redirect_uri],
        ..Default::default()
    })
}

/// Restrict the token file to its owner (0600)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows relies on the profile directory's ACLs
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "token").await.unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_clear_token_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");

        assert!(!clear_token_cache(&path).await.unwrap());

        tokio::fs::write(&path, "{}").await.unwrap();
        assert!(clear_token_cache(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_secret_source_prefers_existing_file() {
        let temp_file = NamedTempFile::new().unwrap();
        assert_eq!(
            secret_source(temp_file.path()),
            SecretSource::File(temp_file.path().to_path_buf())
        );

        let dir = TempDir::new().unwrap();
        assert_eq!(
            secret_source(&dir.path().join("credentials.json")),
            SecretSource::Environment
        );
    }

    #[tokio::test]
    async fn test_load_secret_from_file() {
        let credentials_json = r#"{
            "installed": {
                "client_id": "test-client-id",
                "project_id": "test-project",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost:8080"]
            }
        }"#;
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), credentials_json).await.unwrap();

        let secret = load_secret(&secret_source(temp_file.path())).await.unwrap();
        assert_eq!(secret.client_id, "test-client-id");
        assert_eq!(secret.client_secret, "test-secret");
    }

    #[tokio::test]
    async fn test_load_secret_rejects_garbage_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "not json").await.unwrap();

        let result = load_secret(&secret_source(temp_file.path())).await;
        assert!(matches!(result, Err(GmailError::AuthError(_))));
    }

    #[test]
    #[serial]
    fn test_load_credentials_from_env() {
        env::set_var("GMAIL_CLIENT_ID", "test-id");
        env::set_var("GMAIL_CLIENT_SECRET", "test-secret");
        env::set_var("GMAIL_REDIRECT_URI", "http://localhost:9999");

        let secret = load_credentials_from_env().unwrap();
        assert_eq!(secret.client_id, "test-id");
        assert_eq!(secret.client_secret, "test-secret");
        assert_eq!(secret.redirect_uris[0], "http://localhost:9999");

        env::remove_var("GMAIL_CLIENT_ID");
        env::remove_var("GMAIL_CLIENT_SECRET");
        env::remove_var("GMAIL_REDIRECT_URI");
    }

    #[test]
    #[serial]
    fn test_load_credentials_from_env_default_redirect() {
        env::set_var("GMAIL_CLIENT_ID", "test-id");
        env::set_var("GMAIL_CLIENT_SECRET", "test-secret");
        env::remove_var("GMAIL_REDIRECT_URI");

        let secret = load_credentials_from_env().unwrap();
        assert_eq!(secret.redirect_uris[0], "http://localhost:8080");

        env::remove_var("GMAIL_CLIENT_ID");
        env::remove_var("GMAIL_CLIENT_SECRET");
    }

    #[test]
    #[serial]
    fn test_missing_env_is_config_error() {
        env::remove_var("GMAIL_CLIENT_ID");
        env::remove_var("GMAIL_CLIENT_SECRET");

        assert!(matches!(
            load_credentials_from_env(),
            Err(GmailError::ConfigError(_))
        ));
    }

    #[test]
    fn test_only_modify_scope_requested() {
        assert_eq!(REQUIRED_SCOPES, &["https://www.googleapis.com/auth/gmail.modify"]);
    }
}
