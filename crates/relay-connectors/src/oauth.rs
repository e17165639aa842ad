//! Shared OAuth refresh-token exchange (6. External interfaces): every
//! OAuth-backed connector (Qwen, Gemini personal/Code-Assist) refreshes
//! against a plain `grant_type=refresh_token` token endpoint, differing only
//! in URL and client id/secret.

use async_trait::async_trait;

use relay_core::auth::{OAuthCredentials, OAuthRefresher};
use relay_core::ProxyError;

pub struct HttpOAuthRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl HttpOAuthRefresher {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
    ) -> Self {
        HttpOAuthRefresher {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }
}

#[async_trait]
impl OAuthRefresher for HttpOAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthCredentials, ProxyError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }

        let response = self.client.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::AuthenticationFailed(format!(
                "oauth refresh failed ({status}): {text}"
            )));
        }

        let body: serde_json::Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProxyError::AuthenticationFailed("oauth refresh response missing access_token".to_string()))?
            .to_string();
        let new_refresh_token = body
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| refresh_token.to_string());
        let token_type = body.get("token_type").and_then(|v| v.as_str()).unwrap_or("Bearer").to_string();
        let expires_in = body.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
        let expiry_date = relay_core::session::now_epoch_secs() as i64 * 1000 + expires_in * 1000;

        Ok(OAuthCredentials {
            access_token,
            refresh_token: new_refresh_token,
            token_type,
            expiry_date,
            resource_url: None,
        })
    }
}
