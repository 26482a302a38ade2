use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{COOKIE, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use whisk_contracts::credentials::{parse_cookie_input, Credentials};

use crate::error::{EngineError, Result};
use crate::service::{ApiEndpoints, BROWSER_USER_AGENT};

pub const TOKEN_INFO_URL: &str = "https://www.googleapis.com/oauth2/v3/tokeninfo";
const SESSION_TIMEOUT_S: u64 = 20;
const TOKEN_INFO_TIMEOUT_S: u64 = 10;

/// Exchanges the operator's browser cookie for an access token.
pub trait Authenticator {
    fn authenticate(&self, raw_cookie: &str) -> Result<Credentials>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionResponse {
    access_token: Option<String>,
    #[serde(rename = "accessToken")]
    access_token_camel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TokenInfoResponse {
    exp: Option<Value>,
}

fn parse_session_token(body: &str) -> Option<String> {
    let parsed: SessionResponse = serde_json::from_str(body).ok()?;
    [parsed.access_token, parsed.access_token_camel]
        .into_iter()
        .flatten()
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

fn parse_token_expiry(body: &str) -> Option<i64> {
    let parsed: TokenInfoResponse = serde_json::from_str(body).ok()?;
    let exp = match parsed.exp? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (exp > 0).then_some(exp)
}

/// Reads the labs.google auth session, then asks the token-info endpoint for
/// the expiry. Expiry lookup is best effort.
pub struct SessionAuthenticator {
    endpoints: ApiEndpoints,
    token_info_url: String,
    http: HttpClient,
}

impl SessionAuthenticator {
    pub fn new(endpoints: ApiEndpoints) -> Self {
        Self {
            endpoints,
            token_info_url: TOKEN_INFO_URL.to_string(),
            http: HttpClient::new(),
        }
    }

    fn token_expiry(&self, token: &str) -> Option<i64> {
        let response = self
            .http
            .get(&self.token_info_url)
            .query(&[("access_token", token)])
            .timeout(Duration::from_secs(TOKEN_INFO_TIMEOUT_S))
            .send();
        match response {
            Ok(response) if response.status().is_success() => {
                parse_token_expiry(&response.text().ok()?)
            }
            Ok(response) => {
                tracing::debug!(code = response.status().as_u16(), "token info unavailable");
                None
            }
            Err(err) => {
                tracing::debug!(error = %err, "token info request failed");
                None
            }
        }
    }
}

impl Authenticator for SessionAuthenticator {
    fn authenticate(&self, raw_cookie: &str) -> Result<Credentials> {
        let cookie_header = parse_cookie_input(raw_cookie);
        if cookie_header.is_empty() {
            return Err(EngineError::Auth("cookie is empty".to_string()));
        }

        let endpoint = self.endpoints.session();
        let response = self
            .http
            .get(&endpoint)
            .header(COOKIE, &cookie_header)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(SESSION_TIMEOUT_S))
            .send()
            .map_err(|err| EngineError::transport(&endpoint, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Auth(format!("session HTTP {}", status.as_u16())));
        }
        let body = response
            .text()
            .map_err(|err| EngineError::transport(&endpoint, err))?;
        let access_token = parse_session_token(&body)
            .ok_or_else(|| EngineError::Auth("session has no access token".to_string()))?;

        let expires_at = self.token_expiry(&access_token);
        tracing::info!(expires_at = ?expires_at, "session validated");
        Ok(Credentials {
            cookie_header,
            access_token,
            expires_at,
        })
    }
}

/// Accepts any non-empty cookie without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunAuthenticator;

impl Authenticator for DryrunAuthenticator {
    fn authenticate(&self, raw_cookie: &str) -> Result<Credentials> {
        let cookie_header = parse_cookie_input(raw_cookie);
        if cookie_header.is_empty() {
            return Err(EngineError::Auth("cookie is empty".to_string()));
        }
        Ok(Credentials {
            cookie_header,
            access_token: "dryrun-token".to_string(),
            expires_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_session_token, parse_token_expiry, Authenticator, DryrunAuthenticator};
    use crate::error::EngineError;

    #[test]
    fn session_token_accepts_both_spellings() {
        assert_eq!(
            parse_session_token(r#"{"access_token":"ya29.a","user":{}}"#),
            Some("ya29.a".to_string())
        );
        assert_eq!(
            parse_session_token(r#"{"accessToken":"ya29.b"}"#),
            Some("ya29.b".to_string())
        );
        assert_eq!(parse_session_token(r#"{"access_token":"  "}"#), None);
        assert_eq!(parse_session_token("{}"), None);
        assert_eq!(parse_session_token("<html>"), None);
    }

    #[test]
    fn token_expiry_reads_string_or_number() {
        assert_eq!(parse_token_expiry(r#"{"exp":"1760000000"}"#), Some(1_760_000_000));
        assert_eq!(parse_token_expiry(r#"{"exp":1760000000}"#), Some(1_760_000_000));
        assert_eq!(parse_token_expiry(r#"{"exp":"0"}"#), None);
        assert_eq!(parse_token_expiry(r#"{"error":"invalid_token"}"#), None);
    }

    #[test]
    fn dryrun_authenticator_rejects_empty_cookie() -> anyhow::Result<()> {
        assert!(matches!(
            DryrunAuthenticator.authenticate("  "),
            Err(EngineError::Auth(_))
        ));
        let credentials = DryrunAuthenticator.authenticate("a=1; b=2")?;
        assert_eq!(credentials.cookie_header, "a=1; b=2");
        Ok(())
    }
}
