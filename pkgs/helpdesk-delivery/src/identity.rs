//! Caller identity
//!
//! Authentication happens upstream. The authenticating proxy forwards the
//! caller as `x-user-id` and `x-user-role`; a missing id or an unknown role
//! means the request is unauthenticated.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use helpdesk_store::Role;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Read the caller from forwarded identity headers
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let id = headers.get(USER_ID_HEADER)?.to_str().ok()?.trim();
        if id.is_empty() {
            return None;
        }
        let role = headers
            .get(USER_ROLE_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .to_ascii_lowercase()
            .parse()
            .ok()?;
        Some(Self::new(id, role))
    }
}

/// Extractor that never rejects; handlers decide how to treat anonymity
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl<S> FromRequestParts<S> for MaybeCaller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeCaller(Caller::from_headers(&parts.headers)))
    }
}
