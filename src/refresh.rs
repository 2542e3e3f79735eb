use crate::config::GmailConfig;
use crate::error::IngestError;
use serde::Deserialize;
use tracing::{info, warn};
use urlencoding::encode;

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// Exchange a refresh token for a fresh access token outside the
/// authenticator, used when an operator forces a refresh at startup.
pub async fn manual_refresh(
    account: &str,
    creds: &GmailConfig,
    refresh_token: &str,
) -> Result<TokenResponse, IngestError> {
    let auth_err = |reason: String| IngestError::Auth {
        account: account.to_string(),
        reason,
    };

    let client = reqwest::Client::new();

    let body = format!(
        "client_id={}&client_secret={}&refresh_token={}&grant_type=refresh_token",
        encode(&creds.client_id),
        encode(&creds.client_secret),
        encode(refresh_token),
    );

    let resp = client
        .post(&creds.urls.token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|e| auth_err(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let error_text = resp.text().await.unwrap_or_default();
        warn!(account = %account, status = %status, "Token refresh rejected");
        return Err(auth_err(format!("token endpoint returned {status}: {error_text}")));
    }

    let token_resp: TokenResponse = resp.json().await.map_err(|e| auth_err(e.to_string()))?;
    info!(account = %account, expires_in = token_resp.expires_in, "Access token refreshed");
    Ok(token_resp)
}
