use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Actor, ActorRole};
use crate::errors::ServiceError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ServiceError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", name)))
}

/// The gateway in front of this service authenticates the caller and
/// forwards its id and role as headers.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = Uuid::parse_str(header_value(parts, ACTOR_ID_HEADER)?)
            .map_err(|_| ServiceError::Unauthorized("malformed actor id".to_string()))?;
        let role = header_value(parts, ACTOR_ROLE_HEADER)?
            .parse::<ActorRole>()
            .map_err(|_| ServiceError::Unauthorized("unknown actor role".to_string()))?;
        Ok(Actor::new(id, role))
    }
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

/// Standard paginated response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64, total_pages: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta {
                page,
                per_page,
                total,
                total_pages,
            },
        }
    }
}

/// Body of the transition endpoints that carry nothing but the version.
#[derive(Debug, Default, Deserialize)]
pub struct VersionGuard {
    #[serde(default)]
    pub expected_version: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<Actor, ServiceError> {
        let (mut parts, _) = req.into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn actor_comes_from_gateway_headers() {
        let id = Uuid::new_v4();
        let req = Request::builder()
            .header(ACTOR_ID_HEADER, id.to_string())
            .header(ACTOR_ROLE_HEADER, "Technician")
            .body(())
            .unwrap();
        let actor = extract(req).await.unwrap();
        assert_eq!(actor, Actor::new(id, ActorRole::Technician));
    }

    #[tokio::test]
    async fn missing_or_bad_headers_are_rejected() {
        let req = Request::builder().body(()).unwrap();
        assert!(matches!(extract(req).await, Err(ServiceError::Unauthorized(_))));

        let req = Request::builder()
            .header(ACTOR_ID_HEADER, Uuid::new_v4().to_string())
            .header(ACTOR_ROLE_HEADER, "owner")
            .body(())
            .unwrap();
        assert!(matches!(extract(req).await, Err(ServiceError::Unauthorized(_))));
    }
}
