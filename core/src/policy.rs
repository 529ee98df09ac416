use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;
use crate::Result;
use crate::session::Actor;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServingRules {
    /// Cache lifetime used when a strategy does not pick one.
    #[serde(default = "default_lifetime_secs")]
    pub default_lifetime_secs: u64,
    #[serde(default = "default_max_send_bytes")]
    pub max_send_bytes: u64,
}

const fn default_lifetime_secs() -> u64 {
    86_400
}

const fn default_max_send_bytes() -> u64 {
    64 * 1024 * 1024
}

impl Default for ServingRules {
    fn default() -> Self {
        Self {
            default_lifetime_secs: default_lifetime_secs(),
            max_send_bytes: default_max_send_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Wall-clock budget per request, in milliseconds.
    #[serde(default = "default_max_io_ms")]
    pub max_io_ms: u64,
    /// Max in-flight requests touching the store.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Max DB connections in the service pool.
    #[serde(default = "default_max_db_connections")]
    pub max_db_connections: u32,
}

const fn default_max_io_ms() -> u64 {
    30_000
}

const fn default_max_concurrency() -> usize {
    16
}

const fn default_max_db_connections() -> u32 {
    16
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_io_ms: default_max_io_ms(),
            max_concurrency: default_max_concurrency(),
            max_db_connections: default_max_db_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AuditPolicy {
    /// Append one JSON line per file-serving decision when set.
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AuthPolicy {
    #[serde(default)]
    pub tokens: Vec<AuthToken>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthToken {
    /// `sha256:<64 hex chars>` of the bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding the raw token (or its `sha256:` form).
    #[serde(default)]
    pub token_env_var: Option<String>,
    #[serde(default)]
    pub actor: Actor,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_env_var", &self.token_env_var)
            .field("actor", &self.actor)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GatePolicy {
    #[serde(default)]
    pub serving: ServingRules,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub audit: AuditPolicy,
    #[serde(default)]
    pub auth: AuthPolicy,
}

impl GatePolicy {
    pub fn validate(&self) -> Result<()> {
        const MAX_SEND_BYTES: u64 = 4 * 1024 * 1024 * 1024;
        const MAX_LIFETIME_SECS: u64 = 10 * 365 * 86_400;

        if self.serving.max_send_bytes == 0 {
            return Err(Error::InvalidPolicy(
                "serving.max_send_bytes must be > 0".to_string(),
            ));
        }
        if self.serving.max_send_bytes > MAX_SEND_BYTES {
            return Err(Error::InvalidPolicy(format!(
                "serving.max_send_bytes is too large (max {MAX_SEND_BYTES} bytes)"
            )));
        }
        if self.serving.default_lifetime_secs > MAX_LIFETIME_SECS {
            return Err(Error::InvalidPolicy(format!(
                "serving.default_lifetime_secs is too large (max {MAX_LIFETIME_SECS})"
            )));
        }
        if self.limits.max_io_ms == 0 {
            return Err(Error::InvalidPolicy(
                "limits.max_io_ms must be > 0".to_string(),
            ));
        }
        if self.limits.max_concurrency == 0 {
            return Err(Error::InvalidPolicy(
                "limits.max_concurrency must be > 0".to_string(),
            ));
        }
        if self.limits.max_db_connections == 0 {
            return Err(Error::InvalidPolicy(
                "limits.max_db_connections must be > 0".to_string(),
            ));
        }
        if self.limits.max_db_connections > 1024 {
            return Err(Error::InvalidPolicy(
                "limits.max_db_connections is too large (max 1024)".to_string(),
            ));
        }
        if let Some(path) = self.audit.jsonl_path.as_deref()
            && path.trim().is_empty()
        {
            return Err(Error::InvalidPolicy(
                "audit.jsonl_path must be non-empty when set".to_string(),
            ));
        }

        if self.auth.tokens.len() > 256 {
            return Err(Error::InvalidPolicy(
                "auth.tokens has too many entries (max 256)".to_string(),
            ));
        }
        for (idx, rule) in self.auth.tokens.iter().enumerate() {
            match (rule.token.as_deref(), rule.token_env_var.as_deref()) {
                (Some(_), Some(_)) => {
                    return Err(Error::InvalidPolicy(format!(
                        "auth.tokens[{idx}] must set only one of token / token_env_var"
                    )));
                }
                (None, None) => {
                    return Err(Error::InvalidPolicy(format!(
                        "auth.tokens[{idx}] must set token or token_env_var"
                    )));
                }
                (Some(token), None) => {
                    let valid = token
                        .strip_prefix("sha256:")
                        .is_some_and(|hex| {
                            hex.len() == 64 && hex.chars().all(|ch| ch.is_ascii_hexdigit())
                        });
                    if !valid {
                        return Err(Error::InvalidPolicy(format!(
                            "auth.tokens[{idx}].token must be sha256:<64 hex chars>"
                        )));
                    }
                }
                (None, Some(env)) => {
                    if env.trim().is_empty() || env.chars().any(|ch| ch.is_whitespace()) {
                        return Err(Error::InvalidPolicy(format!(
                            "auth.tokens[{idx}].token_env_var must be a non-empty name without whitespace"
                        )));
                    }
                }
            }
            if rule.actor.site_admin && rule.actor.user_id.is_none() {
                return Err(Error::InvalidPolicy(format!(
                    "auth.tokens[{idx}].actor.site_admin requires actor.user_id"
                )));
            }
        }
        Ok(())
    }
}
