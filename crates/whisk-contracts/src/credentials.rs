use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const APP_DIR_NAME: &str = "AutoWhisk";
pub const AUTH_FILE_NAME: &str = "auth_session.json";
pub const SESSION_COOKIE_NAME: &str = "__Secure-next-auth.session-token";

/// Turns the cookie text an operator pastes into a `Cookie` header value.
///
/// Accepted shapes:
/// - a JSON array (or single object) of `{name, value}` pairs, as exported by
///   browser cookie extensions, joined as `a=b; c=d`
/// - a bare session token (starts with `ey`), sent as the session cookie
/// - anything else, passed through trimmed
pub fn parse_cookie_input(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    if raw.starts_with('[') || raw.starts_with('{') {
        if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
            let rows = match parsed {
                Value::Array(rows) => rows,
                Value::Object(_) => vec![parsed],
                _ => Vec::new(),
            };
            let pairs = rows
                .iter()
                .filter_map(|row| {
                    let name = cookie_field(row, "name")?;
                    let value = cookie_field(row, "value")?;
                    Some(format!("{name}={value}"))
                })
                .collect::<Vec<String>>();
            if !pairs.is_empty() {
                return pairs.join("; ");
            }
        }
    }

    if raw.starts_with("ey") {
        return format!("{SESSION_COOKIE_NAME}={raw}");
    }

    raw.to_string()
}

fn cookie_field(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Credentials the image service needs for every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub cookie_header: String,
    pub access_token: String,
    pub expires_at: Option<i64>,
}

impl Credentials {
    pub fn from_stored(stored: &StoredCredentials) -> Option<Self> {
        let token = stored.token.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            cookie_header: parse_cookie_input(&stored.cookie),
            access_token: token.to_string(),
            expires_at: None,
        })
    }
}

/// What is persisted between sessions: the cookie as pasted and the last
/// access token it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoredCredentials {
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/AutoWhisk/auth_session.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join(AUTH_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files load as nothing.
    pub fn load(&self) -> Option<StoredCredentials> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<StoredCredentials>(&raw) {
            Ok(stored) => Some(stored),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring unreadable credential file");
                None
            }
        }
    }

    pub fn save(&self, stored: &StoredCredentials) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(stored)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_cookie_input, CredentialStore, Credentials, StoredCredentials, SESSION_COOKIE_NAME,
    };

    #[test]
    fn json_cookie_array_joins_name_value_pairs() {
        let raw = r#"[
            {"name": "a", "value": "1", "domain": "labs.google"},
            {"name": "b", "value": "two"},
            {"domain": "ignored"}
        ]"#;
        assert_eq!(parse_cookie_input(raw), "a=1; b=two");
    }

    #[test]
    fn single_json_cookie_object_is_accepted() {
        assert_eq!(parse_cookie_input(r#"{"name":"sid","value":"xyz"}"#), "sid=xyz");
    }

    #[test]
    fn bare_token_becomes_session_cookie() {
        assert_eq!(
            parse_cookie_input("  eyJhbGciOi.abc  "),
            format!("{SESSION_COOKIE_NAME}=eyJhbGciOi.abc")
        );
    }

    #[test]
    fn raw_header_passes_through() {
        assert_eq!(parse_cookie_input("a=1; b=2\n"), "a=1; b=2");
        assert_eq!(parse_cookie_input("   "), "");
        assert_eq!(parse_cookie_input("[not json"), "[not json");
        assert_eq!(parse_cookie_input("[]"), "[]");
    }

    #[test]
    fn store_round_trips_and_tolerates_missing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = CredentialStore::new(temp.path().join("AutoWhisk").join("auth_session.json"));
        assert!(store.load().is_none());

        let stored = StoredCredentials {
            cookie: "eyToken".to_string(),
            token: "ya29.abc".to_string(),
        };
        store.save(&stored)?;
        assert_eq!(store.load(), Some(stored.clone()));

        let credentials = Credentials::from_stored(&stored);
        assert_eq!(
            credentials.map(|value| value.cookie_header),
            Some(format!("{SESSION_COOKIE_NAME}=eyToken"))
        );
        Ok(())
    }

    #[test]
    fn empty_token_is_not_usable() {
        let stored = StoredCredentials {
            cookie: "a=1".to_string(),
            token: " ".to_string(),
        };
        assert!(Credentials::from_stored(&stored).is_none());
    }

    #[test]
    fn corrupt_file_loads_as_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("auth_session.json");
        std::fs::write(&path, "{not json")?;
        assert!(CredentialStore::new(path).load().is_none());
        Ok(())
    }
}
