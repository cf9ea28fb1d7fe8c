use crate::config::{Config, TokenStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

const APP_NAME: &str = "gchallenge";
const TOKEN_KEY: &str = "gmail_token";

pub type GmailAuthenticator =
    oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Keeps the OAuth token in the OS keyring instead of a file.
pub struct RingStorage;

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let entry = Entry::new(APP_NAME, TOKEN_KEY)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;

        entry
            .set_password(&serialized)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        tracing::info!("Saved new credentials to the keyring");
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.get_all().await {
            Ok(data) => data.tokens.into_iter().next(),
            Err(e) => {
                tracing::warn!("Could not read token from keyring: {:#}", e);
                None
            }
        }
    }
}

impl RingStorage {
    async fn get_all(&self) -> Result<TokenData> {
        let entry = Entry::new(APP_NAME, TOKEN_KEY)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))?;

        match entry.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Logs the consent URL and tries to open it in a browser.
struct BrowserDelegate;

impl InstalledFlowDelegate for BrowserDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!("Authorization required, visit: {}", url);
            eprintln!("Open this URL to authorize access to Gmail:\n\n  {}\n", url);
            if let Err(e) = open::that(url) {
                tracing::warn!("Could not open browser: {}", e);
            }

            if !need_code {
                return Ok(String::new());
            }

            eprintln!("Paste the authorization code:");
            tokio::task::spawn_blocking(|| {
                let mut code = String::new();
                std::io::stdin()
                    .read_line(&mut code)
                    .map(|_| code.trim().to_string())
            })
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
        })
    }
}

pub struct Authenticator;

impl Authenticator {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path.as_ref())
            .await
            .with_context(|| format!("Failed to read application secret {}", path.as_ref().display()))
    }

    /// Builds the authenticator; an expired token is refreshed transparently.
    pub async fn authenticate(secret: ApplicationSecret, config: &Config) -> Result<GmailAuthenticator> {
        let builder = InstalledFlowAuthenticator::builder(
            secret,
            InstalledFlowReturnMethod::HTTPPortRedirect(config.redirect_port),
        )
        .flow_delegate(Box::new(BrowserDelegate));

        let builder = match config.token_store {
            TokenStore::File => {
                tracing::info!("Using token file {}", config.token_path.display());
                builder.persist_tokens_to_disk(&config.token_path)
            }
            TokenStore::Keyring => builder.with_storage(Box::new(RingStorage)),
        };

        let auth = builder
            .build()
            .await
            .context("Failed to build authenticator")?;

        // Fail now, with a clear message, rather than on the first API call.
        auth.token(SCOPES)
            .await
            .context("Failed to obtain an access token")?;

        Ok(auth)
    }
}
