use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use crate::model::role::{Permission, Role};
use crate::models::Claims;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl TryFrom<Claims> for AuthUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Invalid token subject".into()))?;

        Ok(AuthUser {
            user_id,
            name: claims.name,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// Pulls the bearer token out of an `Authorization` header value.
pub fn bearer_token(req: &HttpRequest) -> Result<&str, AppError> {
    let header = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header encoding".into()))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization header must start with Bearer".into()))
}

fn extract(req: &HttpRequest) -> Result<AuthUser, AppError> {
    // set by auth_middleware on protected scopes
    if let Some(user) = req.extensions().get::<AuthUser>() {
        return Ok(user.clone());
    }

    let token = bearer_token(req)?;

    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::Internal("Config missing".into()))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    AuthUser::try_from(claims)
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(extract(req))
    }
}

impl AuthUser {
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.can(permission) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = self.user_id,
                role = %self.role,
                %permission,
                "Permission denied"
            );
            Err(AppError::Forbidden("Access denied".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            name: "Test".into(),
            email: "t@parlour.example".into(),
            role,
        }
    }

    #[test]
    fn require_consults_the_permission_table() {
        assert!(user(Role::SuperAdmin).require(Permission::ManageTasks).is_ok());
        assert!(matches!(
            user(Role::Admin).require(Permission::ManageTasks),
            Err(AppError::Forbidden(_))
        ));
        assert!(user(Role::Employee).require(Permission::ViewTasks).is_ok());
    }

    #[test]
    fn non_numeric_subject_is_unauthorized() {
        let claims = Claims {
            sub: "abc".into(),
            name: "x".into(),
            email: "x@y".into(),
            role: Role::Employee,
            iat: 0,
            exp: 0,
            jti: "j".into(),
        };
        assert!(matches!(AuthUser::try_from(claims), Err(AppError::Unauthorized(_))));
    }
}
