use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::Role;

#[derive(Deserialize, ToSchema)]
pub struct RegisterReq {
    #[schema(example = "Salon Owner")]
    pub name: Option<String>,
    #[schema(example = "owner@parlour.example")]
    pub email: Option<String>,
    #[schema(example = "s3cret-pass")]
    pub password: Option<String>,
    /// employee | admin | superadmin
    #[schema(example = "superadmin")]
    pub role: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "owner@parlour.example")]
    pub email: Option<String>,
    #[schema(example = "s3cret-pass")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub token: String,
    pub message: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// user id
    pub sub: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
}
