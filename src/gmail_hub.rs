use crate::config::{AccountConfig, OAuthCredentials, TokenFile};
use crate::error::IngestError;
use crate::mail::gmail::{GmailClient, GmailHub};
use crate::refresh::manual_refresh;
use crate::token_store::FileTokenStore;
use google_gmail1::Gmail;
use time::OffsetDateTime;
use tracing::info;
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

/// Build an authenticated Gmail hub for one account from its credential
/// and token files. With `force_refresh` the access token is exchanged
/// before the hub is built and written back to the token file.
pub async fn create_hub(account: &AccountConfig, force_refresh: bool) -> Result<GmailHub, IngestError> {
    let creds = OAuthCredentials::load(&account.credentials_path)?;
    let tokens = TokenFile::load(&account.token_path)?.tokens;

    let (tok, expires_at) = if force_refresh {
        info!(account = %account.id, "Refreshing....");
        let token = manual_refresh(&account.id, &creds.gmail, &tokens.refresh_token).await?;
        let expires_at = OffsetDateTime::now_utc().unix_timestamp() + token.expires_in;
        TokenFile::update_access_token(&account.token_path, &token.access_token, Some(expires_at))?;
        (token.access_token, Some(expires_at))
    } else {
        (tokens.access_token, tokens.expires_at)
    };

    let secret = ApplicationSecret {
        client_id: creds.gmail.client_id,
        client_secret: creds.gmail.client_secret,
        token_uri: creds.gmail.urls.token_url,
        auth_uri: creds.gmail.urls.auth_url,
        redirect_uris: vec!["http://localhost".to_string()],
        project_id: None,
        client_email: None,
        auth_provider_x509_cert_url: None,
        client_x509_cert_url: None,
    };

    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .with_storage(Box::new(FileTokenStore::new(
            account.token_path.clone(),
            tok,
            tokens.refresh_token,
            expires_at,
        )))
        .build()
        .await
        .map_err(|e| IngestError::Auth {
            account: account.id.clone(),
            reason: e.to_string(),
        })?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Mail client for one account, talking to the token owner's mailbox.
pub async fn connect(account: &AccountConfig, force_refresh: bool) -> Result<GmailClient, IngestError> {
    let hub = create_hub(account, force_refresh).await?;
    info!(account = %account.id, name = %account.display_name(), "Mailbox client ready");
    Ok(GmailClient::new(hub, "me"))
}
