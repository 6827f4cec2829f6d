//! Authenticated-caller extractor (supplement).
//!
//! Request authentication/authorization itself is out of scope for this
//! core; `AuthContext` is the seam
//! `search.rs`/`admin.rs` depend on so a real auth layer can be dropped in
//! without touching handler signatures. Grounded on the extractor shape of
//! `fraiseql-server::extractors::OptionalSecurityContext` — read from
//! request extensions rather than re-deriving identity from headers.

use std::future::Future;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

/// Caller identity attached to the request by an upstream auth layer. A
/// reverse proxy or middleware populates `parts.extensions` with this value
/// before the request reaches our router; if absent, requests are treated
/// as unauthenticated and rejected by [`require_authenticated_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub role: String,
}

impl AuthContext {
    pub fn is_guest(&self) -> bool {
        self.role.eq_ignore_ascii_case("guest")
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }
}

/// Extracts an already-authenticated [`AuthContext`] from request
/// extensions, rejecting with 401 if none was attached upstream.
pub struct RequireAuthenticatedUser(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    fn from_request_parts(parts: &mut Parts, _state: &S) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let context = parts.extensions.get::<AuthContext>().cloned();
        async move {
            context
                .map(RequireAuthenticatedUser)
                .ok_or((StatusCode::UNAUTHORIZED, "authentication required"))
        }
    }
}

/// Extracts an [`AuthContext`] and rejects with 403 unless its role is
/// `admin`.
pub struct RequireAdminUser(pub AuthContext);

impl<S> FromRequestParts<S> for RequireAdminUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    fn from_request_parts(parts: &mut Parts, _state: &S) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let context = parts.extensions.get::<AuthContext>().cloned();
        async move {
            match context {
                Some(ctx) if ctx.is_admin() => Ok(RequireAdminUser(ctx)),
                Some(_) => Err((StatusCode::FORBIDDEN, "admin role required")),
                None => Err((StatusCode::UNAUTHORIZED, "authentication required")),
            }
        }
    }
}
