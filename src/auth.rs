// =============================================================================
// PRINCIPAL
// =============================================================================
// The authenticated caller, passed explicitly into every business operation.
//
// Authentication happens in front of this service; the gateway forwards the
// result as headers:
//   x-user-id:    the user id (required)
//   x-user-roles: comma-separated roles, "admin" grants admin actions
// =============================================================================

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::{AppError, AppResult};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLES_HEADER: &str = "x-user-roles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::forbidden("Administrator role required"))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Missing authenticated user".to_string()))?;

        let is_admin = parts
            .headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|roles| {
                roles
                    .split(',')
                    .any(|role| role.trim().eq_ignore_ascii_case("admin"))
            });

        Ok(Self {
            user_id: user_id.to_string(),
            is_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<Principal, AppError> {
        let (mut parts, _) = request.into_parts();
        Principal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_principal_from_headers() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "alice")
            .header(USER_ROLES_HEADER, "customer, Admin")
            .body(())
            .unwrap();
        let principal = extract(request).await.unwrap();
        assert_eq!(principal, Principal::admin("alice"));
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        assert!(matches!(extract(request).await, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_customers_cannot_act_as_admin() {
        assert!(matches!(
            Principal::customer("bob").require_admin(),
            Err(AppError::Forbidden(_))
        ));
        assert!(Principal::admin("root").require_admin().is_ok());
    }
}
