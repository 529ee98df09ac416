use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use filegate_core::policy::{AuthToken, GatePolicy};
use filegate_core::session::Actor;

const MAX_BEARER_TOKEN_BYTES: usize = 4096;
const DIGEST_PREFIX: &str = "sha256:";

/// SHA-256 of a bearer token. Raw tokens are never kept in memory.
#[derive(Clone, Copy, PartialEq, Eq)]
struct TokenDigest([u8; 32]);

impl TokenDigest {
    fn of(raw: &str) -> Self {
        Self(Sha256::digest(raw.as_bytes()).into())
    }

    /// Parses the `sha256:<64 hex chars>` form used in policy files.
    fn parse(text: &str) -> anyhow::Result<Self> {
        let Some(hex) = text.strip_prefix(DIGEST_PREFIX) else {
            anyhow::bail!("auth token must be sha256:<64 hex chars>");
        };
        let bytes = hex::decode(hex).map_err(anyhow::Error::msg)?;
        let digest = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| anyhow::anyhow!("sha256 token digest must be 32 bytes"))?;
        Ok(Self(digest))
    }

    /// Compares without short-circuiting on the first differing byte.
    fn matches(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

pub(super) struct Credential {
    digest: TokenDigest,
    actor: Arc<Actor>,
}

/// How requests are mapped to an [`Actor`].
#[derive(Clone)]
pub(super) enum AuthMode {
    /// Every request runs as the guest actor (`--unsafe-no-auth`).
    Open { guest: Arc<Actor> },
    Tokens(Arc<[Credential]>),
}

/// The actor a request runs as.
#[derive(Clone)]
pub(super) struct AuthContext {
    pub(super) actor: Arc<Actor>,
}

impl AuthMode {
    pub(super) fn from_policy(policy: &GatePolicy, unsafe_no_auth: bool) -> anyhow::Result<Self> {
        if unsafe_no_auth {
            return Ok(Self::Open {
                guest: Arc::new(Actor::guest()),
            });
        }
        if policy.auth.tokens.is_empty() {
            anyhow::bail!(
                "no auth tokens configured; set [[auth.tokens]] in the policy file or pass --unsafe-no-auth"
            );
        }

        let credentials = policy
            .auth
            .tokens
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                Ok(Credential {
                    digest: configured_digest(idx, entry)?,
                    actor: Arc::new(entry.actor.clone()),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::Tokens(Arc::from(credentials)))
    }

    /// Picks the actor for a request, or the reason it was refused.
    fn actor_for(&self, headers: &HeaderMap) -> Result<Arc<Actor>, &'static str> {
        let credentials = match self {
            Self::Open { guest } => return Ok(guest.clone()),
            Self::Tokens(credentials) => credentials,
        };
        let token = bearer_token(headers).ok_or("missing or invalid Authorization header")?;
        let presented = TokenDigest::of(token);
        credentials
            .iter()
            .find(|credential| credential.digest.matches(&presented))
            .map(|credential| credential.actor.clone())
            .ok_or("invalid token")
    }
}

/// A policy entry names its token inline (as a digest) or through an env var
/// holding either the raw token or its digest.
fn configured_digest(idx: usize, entry: &AuthToken) -> anyhow::Result<TokenDigest> {
    if let Some(token) = entry.token.as_deref() {
        return TokenDigest::parse(token);
    }
    let Some(env) = entry.token_env_var.as_deref() else {
        anyhow::bail!("auth token entry {idx} is missing token / token_env_var");
    };
    let value = std::env::var(env)
        .map_err(|_| anyhow::anyhow!("auth token env var {env:?} is not set or not valid UTF-8"))?;
    match value.trim() {
        "" => anyhow::bail!("auth token env var {env:?} must be non-empty"),
        digest if digest.starts_with(DIGEST_PREFIX) => TokenDigest::parse(digest),
        raw => Ok(TokenDigest::of(raw)),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(char::is_whitespace)?;
    let token = token.trim_start();
    let well_formed = scheme.eq_ignore_ascii_case("bearer")
        && !token.is_empty()
        && token.len() <= MAX_BEARER_TOKEN_BYTES
        && !token.contains(char::is_whitespace);
    well_formed.then_some(token)
}

pub(super) async fn auth_middleware(
    State(state): State<super::AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    match state.inner.auth.actor_for(req.headers()) {
        Ok(actor) => {
            req.extensions_mut().insert(AuthContext { actor });
            next.run(req).await
        }
        Err(reason) => super::err_response(StatusCode::UNAUTHORIZED, "unauthorized", reason),
    }
}
