use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Namespace used when a trigger name is given without one.
pub const DEFAULT_NAMESPACE: &str = "_";

/// Identifier of a trigger: `apikey/namespace/name`, optionally suffixed with a feed tag.
///
/// The raw form doubles as the stored document id. `Display` masks the secret half of
/// the apikey so identifiers can be logged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn new(apikey: &str, namespace: &str, name: &str) -> Self {
        Self(format!("{apikey}/{namespace}/{name}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn with_feed_tag(self, feed_tag: Option<&str>) -> Self {
        match feed_tag {
            Some(tag) if !tag.is_empty() => Self(format!("{}-{tag}", self.0)),
            _ => self,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The same trigger addressed through the default namespace.
    pub fn default_namespace_variant(&self) -> Option<TriggerId> {
        let mut parts = self.0.splitn(3, '/');
        let apikey = parts.next()?;
        let namespace = parts.next()?;
        let name = parts.next()?;
        if namespace == DEFAULT_NAMESPACE {
            return None;
        }
        Some(TriggerId::new(apikey, DEFAULT_NAMESPACE, name))
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once('/') {
            Some((apikey, rest)) => write!(f, "{}/{rest}", apikey_user(apikey)),
            None => f.write_str(&self.0),
        }
    }
}

impl fmt::Debug for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TriggerId({self})")
    }
}

/// Trigger name qualified by its namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    /// Parses `/namespace/name` or a bare `name`.
    pub fn parse(qualified: &str) -> Self {
        if let Some(stripped) = qualified.strip_prefix('/') {
            if let Some((namespace, name)) = stripped.split_once('/') {
                return Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                };
            }
        }
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            name: qualified.to_string(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.namespace, self.name)
    }
}

/// The user half of a `user:secret` apikey.
pub fn apikey_user(apikey: &str) -> &str {
    apikey.split_once(':').map(|(user, _)| user).unwrap_or(apikey)
}

/// Splits `user:secret` on the first colon.
pub fn apikey_credentials(apikey: &str) -> (&str, &str) {
    apikey.split_once(':').unwrap_or((apikey, ""))
}

/// AMQP connection parameters as supplied on trigger creation.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_reconnect_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_no_delay: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl_mechanisms: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_sasl_external: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_sasl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_sasl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_fatal_errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<String>,
    #[serde(rename = "rejectUnauthorized", skip_serializing_if = "Option::is_none")]
    pub reject_unauthorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servername: Option<String>,
}

impl ConnectionOptions {
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport.as_deref(), Some("tls") | Some("ssl"))
    }

    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.is_tls() { 5671 } else { 5672 })
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.reconnect.unwrap_or(true)
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("transport", &self.transport)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

/// Remaining fires for a trigger with a bounded fire count.
#[derive(Debug, Default)]
pub struct FireBudget {
    remaining: Option<AtomicU64>,
}

impl FireBudget {
    pub fn unbounded() -> Self {
        Self { remaining: None }
    }

    pub fn limited(fires: u64) -> Self {
        Self {
            remaining: Some(AtomicU64::new(fires)),
        }
    }

    /// `maxTriggers` as stored: negative or zero means unbounded.
    pub fn from_max_triggers(max_triggers: i64) -> Self {
        match u64::try_from(max_triggers) {
            Ok(fires) if fires > 0 => Self::limited(fires),
            _ => Self::unbounded(),
        }
    }

    /// Takes one fire from the budget. Returns false when nothing is left.
    pub fn try_acquire(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok(),
        }
    }

    /// Returns a fire taken by a failed delivery.
    pub fn release(&self) {
        if let Some(remaining) = &self.remaining {
            remaining.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining
            .as_ref()
            .map(|remaining| remaining.load(Ordering::SeqCst))
    }
}

/// In-memory view of a registered trigger, shared with its receiver and delivery path.
#[derive(Debug)]
pub struct TriggerConfig {
    pub apikey: String,
    pub namespace: String,
    pub name: String,
    pub feed_tag: Option<String>,
    pub address: String,
    pub credit: u32,
    pub connection: ConnectionOptions,
    pub budget: FireBudget,
}

impl TriggerConfig {
    pub fn new(
        apikey: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        connection: ConnectionOptions,
    ) -> Self {
        Self {
            apikey: apikey.into(),
            namespace: namespace.into(),
            name: name.into(),
            feed_tag: None,
            address: address.into(),
            credit: 10,
            connection,
            budget: FireBudget::unbounded(),
        }
    }

    pub fn with_feed_tag(mut self, feed_tag: impl Into<String>) -> Self {
        self.feed_tag = Some(feed_tag.into());
        self
    }

    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    pub fn with_budget(mut self, budget: FireBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn id(&self) -> TriggerId {
        TriggerId::new(&self.apikey, &self.namespace, &self.name)
            .with_feed_tag(self.feed_tag.as_deref())
    }

    pub fn user(&self) -> &str {
        apikey_user(&self.apikey)
    }

    pub fn credentials(&self) -> (&str, &str) {
        apikey_credentials(&self.apikey)
    }
}
