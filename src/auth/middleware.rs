use crate::auth::auth::{AuthUser, bearer_token};
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::AppError;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

fn authenticate(req: &ServiceRequest) -> Result<AuthUser, AppError> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::Internal("App config missing".into()))?;

    let token = bearer_token(req.request())?;

    let claims = verify_token(token, &config.jwt_secret).map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;

    AuthUser::try_from(claims)
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    match authenticate(&req) {
        Ok(auth_user) => {
            req.extensions_mut().insert(auth_user);
            next.call(req).await
        }
        Err(e) => {
            let resp = e.error_response();
            Ok(req.into_response(resp))
        }
    }
}
