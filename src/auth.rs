/*!
 * # Caller identity
 *
 * Identity is issued upstream (gateway or session layer) and handed to this
 * service as trusted headers. [`identity_header_middleware`] turns them into a
 * [`CallerContext`] request extension, which handlers extract; requests
 * without one are rejected with 401.
 */

use crate::{errors::ServiceError, repositories::OrderScope};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ADMIN_HEADER: &str = "x-user-admin";

/// The authenticated caller of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl CallerContext {
    /// Orders this caller may see
    pub fn scope(&self) -> OrderScope {
        if self.is_admin {
            OrderScope::All
        } else {
            OrderScope::OwnedBy(self.user_id)
        }
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)?
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())?;
        let is_admin = headers
            .get(USER_ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(crate::services::orders::parse_flag)
            .unwrap_or(false);
        Some(Self { user_id, is_admin })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerContext>()
            .copied()
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".to_string()))
    }
}

/// Attaches a [`CallerContext`] built from the identity headers, when present and well formed
pub async fn identity_header_middleware(mut request: Request, next: Next) -> Response {
    match CallerContext::from_headers(request.headers()) {
        Some(ctx) => {
            request.extensions_mut().insert(ctx);
        }
        None if request.headers().contains_key(USER_ID_HEADER) => {
            debug!("Ignoring malformed identity header");
        }
        None => {}
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn whoami(ctx: CallerContext) -> String {
        format!("{}:{}", ctx.user_id, ctx.is_admin)
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(axum::middleware::from_fn(identity_header_middleware))
    }

    async fn call(headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn identity_headers_become_caller_context() {
        let id = Uuid::new_v4();
        let (status, body) = call(&[
            (USER_ID_HEADER, &id.to_string()),
            (USER_ADMIN_HEADER, "true"),
        ])
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("{}:true", id));
    }

    #[tokio::test]
    async fn missing_or_malformed_identity_is_unauthorized() {
        let (status, _) = call(&[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&[(USER_ID_HEADER, "not-a-uuid")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn scope_follows_admin_flag() {
        let user_id = Uuid::new_v4();
        let ctx = CallerContext {
            user_id,
            is_admin: false,
        };
        assert_eq!(ctx.scope(), OrderScope::OwnedBy(user_id));
        assert_eq!(
            CallerContext {
                is_admin: true,
                ..ctx
            }
            .scope(),
            OrderScope::All
        );
    }
}
