//! Conduit client used by arcyd.
//!
//! Conduit is Phabricator's JSON-RPC-over-HTTP API. Every call is a form POST
//! to `<instance>/api/<method>` carrying the JSON parameters in `params`; the
//! reply is an envelope of `{result, error_code, error_info}`.
//!
//! Sessions are opened with `conduit.connect` using the bot user's
//! certificate. A client can be re-scoped to act as another user, which is how
//! arcyd creates and closes revisions on behalf of their authors.

pub mod differential;
pub mod user;

use serde::Deserialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const CLIENT_NAME: &str = "arcyd";
const CLIENT_VERSION: u32 = 6;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How many times an idempotent read is attempted before giving up.
const READ_ATTEMPTS: usize = 3;

#[derive(thiserror::Error, Debug)]
pub enum ConduitError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Conduit error {code}: {info}")]
    Api { code: String, info: String },

    #[error("Unexpected response from {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },
}

pub type Result<T> = std::result::Result<T, ConduitError>;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_info: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Session {
    #[serde(rename = "sessionKey")]
    session_key: String,
    #[serde(rename = "connectionID")]
    connection_id: Value,
}

/// Everything needed to talk to one Phabricator instance.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub instance_uri: String,
    pub user: String,
    pub cert: String,
    pub https_proxy: Option<String>,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(instance_uri: &str, user: &str, cert: &str) -> Self {
        Self {
            instance_uri: instance_uri.to_string(),
            user: user.to_string(),
            cert: cert.to_string(),
            https_proxy: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A Conduit connection. Cloning is cheap and clones share the session.
#[derive(Clone)]
pub struct Client {
    api_base: String,
    user: String,
    cert: String,
    http: reqwest::blocking::Client,
    session: Arc<Mutex<Option<Session>>>,
    act_as: Option<String>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().timeout(options.timeout);

        if let Some(proxy) = options.https_proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }

        Ok(Self {
            api_base: api_base(&options.instance_uri),
            user: options.user,
            cert: options.cert,
            http: builder.build()?,
            session: Arc::new(Mutex::new(None)),
            act_as: None,
        })
    }

    pub fn acting_as(&self) -> Option<&str> {
        self.act_as.as_deref()
    }

    /// A clone of this client whose calls are made on behalf of `user`.
    pub fn as_user(&self, user: &str) -> Client {
        let mut scoped = self.clone();
        scoped.act_as = Some(user.to_string());
        scoped
    }

    /// Open a session with the certificate. Called lazily by `call`.
    pub fn connect(&self) -> Result<()> {
        let token = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let params = json!({
            "client": CLIENT_NAME,
            "clientVersion": CLIENT_VERSION,
            "clientDescription": "arcyd review daemon",
            "user": self.user,
            "host": self.api_base,
            "authToken": token,
            "authSignature": auth_signature(token, &self.cert),
        });

        let result = self.post("conduit.connect", params, None)?;
        let session: Session = serde_json::from_value(result)?;
        debug!(user = %self.user, "conduit session opened");

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        Ok(())
    }

    /// Make a call, connecting first if there is no session yet.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let session = self.ensure_session()?;
        self.post(method, params, Some(&session))
    }

    /// Make a call that is safe to repeat, retrying transport failures.
    pub fn call_idempotent(&self, method: &str, params: Value) -> Result<Value> {
        let mut attempt = 1;
        loop {
            match self.call(method, params.clone()) {
                Err(ConduitError::Http(e)) if attempt < READ_ATTEMPTS => {
                    warn!(method, attempt, error = %e, "retrying conduit read");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn ensure_session(&self) -> Result<Session> {
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(session);
        }

        self.connect()?;

        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ConduitError::UnexpectedResponse {
                method: "conduit.connect".to_string(),
                detail: "no session after connect".to_string(),
            })
    }

    fn post(&self, method: &str, mut params: Value, session: Option<&Session>) -> Result<Value> {
        if let (Some(session), Some(map)) = (session, params.as_object_mut()) {
            let mut meta = json!({
                "sessionKey": session.session_key,
                "connectionID": session.connection_id,
            });
            if let Some(user) = &self.act_as {
                meta["actAsUser"] = Value::String(user.clone());
            }
            map.insert("__conduit__".to_string(), meta);
        }

        let url = format!("{}/{}", self.api_base, method);
        debug!(method, act_as = ?self.act_as, "conduit call");

        let body = self
            .http
            .post(&url)
            .form(&[
                ("params", params.to_string()),
                ("output", "json".to_string()),
                ("__conduit__", "1".to_string()),
            ])
            .send()?
            .error_for_status()?
            .text()?;

        decode_envelope(method, &body)
    }
}

/// Unwrap a Conduit reply, turning `error_code` into an error.
/// Calls that return nothing (e.g. `differential.close`) yield `Value::Null`.
pub fn decode_envelope(method: &str, body: &str) -> Result<Value> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| ConduitError::UnexpectedResponse {
            method: method.to_string(),
            detail: format!("{e}: {}", truncate(body, 200)),
        })?;

    if let Some(code) = envelope.error_code {
        return Err(ConduitError::Api {
            code,
            info: envelope.error_info.unwrap_or_default(),
        });
    }

    Ok(envelope.result.unwrap_or(Value::Null))
}

/// Hex SHA-1 of the auth token followed by the certificate.
pub fn auth_signature(token: u64, cert: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(token.to_string().as_bytes());
    hasher.update(cert.as_bytes());
    hex::encode(hasher.finalize())
}

fn api_base(instance_uri: &str) -> String {
    let trimmed = instance_uri.trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api")
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Conduit is PHP underneath: ids arrive as strings or numbers depending on
/// the method, and empty maps arrive as `[]`.
pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_signature_is_sha1_of_token_and_cert() {
        assert_eq!(
            auth_signature(1400000000, "xyzcert"),
            "4355b6e00cda60d797d24382fc3ece5af5eeed08"
        );
    }

    #[test]
    fn test_api_base_normalisation() {
        assert_eq!(api_base("https://phab.test"), "https://phab.test/api");
        assert_eq!(api_base("https://phab.test/"), "https://phab.test/api");
        assert_eq!(api_base("https://phab.test/api/"), "https://phab.test/api");
    }

    #[test]
    fn test_decode_envelope_result() {
        let value = decode_envelope(
            "differential.createrawdiff",
            r#"{"result": {"id": 7}, "error_code": null, "error_info": null}"#,
        )
        .unwrap();
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_decode_envelope_error_code() {
        let err = decode_envelope(
            "differential.query",
            r#"{"result": null, "error_code": "ERR-CONDUIT-CORE", "error_info": "nope"}"#,
        )
        .unwrap_err();

        match err {
            ConduitError::Api { code, info } => {
                assert_eq!(code, "ERR-CONDUIT-CORE");
                assert_eq!(info, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_envelope_null_result() {
        let value = decode_envelope("differential.close", r#"{"result": null}"#).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_decode_envelope_garbage() {
        let err = decode_envelope("user.query", "<html>502</html>").unwrap_err();
        assert!(matches!(err, ConduitError::UnexpectedResponse { .. }));
    }

    #[test]
    fn test_as_user_shares_session() {
        let client = Client::new(ClientOptions::new("https://phab.test", "arcyd", "cert")).unwrap();
        let scoped = client.as_user("alice");

        assert_eq!(scoped.acting_as(), Some("alice"));
        assert_eq!(client.acting_as(), None);
        assert!(Arc::ptr_eq(&client.session, &scoped.session));
    }

    #[test]
    fn test_value_as_u64() {
        assert_eq!(value_as_u64(&json!("12")), Some(12));
        assert_eq!(value_as_u64(&json!(12)), Some(12));
        assert_eq!(value_as_u64(&json!("D12")), None);
    }
}
