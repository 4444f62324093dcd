use crate::{
    api::required,
    auth::{
        jwt::generate_token,
        password::{hash_password, verify_password},
    },
    config::Config,
    error::{AppError, is_unique_violation},
    model::{role::Role, user::User},
    models::{LoginReqDto, LoginResponse, RegisterReq, RegisterResponse, UserSummary},
    utils::account_index::AccountIndex,
};
use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, error, info, instrument};

/// Inserts a new user and records the email in the account index.
async fn insert_user(
    name: &str,
    email: &str,
    password: &str,
    role: Role,
    pool: &SqlitePool,
    accounts: &AccountIndex,
) -> Result<i64, AppError> {
    let hashed = hash_password(password).map_err(|e| {
        error!(error = %e, "Password hashing failed");
        AppError::Internal(e.to_string())
    })?;

    let result = sqlx::query(
        r#"INSERT INTO users (name, email, password, role, created_at) VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(name)
    .bind(email)
    .bind(&hashed)
    .bind(role.as_ref())
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("User already exists")
        } else {
            AppError::from(e)
        }
    })?;

    // keep the fast path in step with the table
    accounts.mark_taken(email).await;

    Ok(result.last_insert_rowid())
}

fn issue_token(
    user_id: i64,
    name: &str,
    email: &str,
    role: Role,
    config: &Config,
) -> Result<String, AppError> {
    generate_token(user_id, name, email, role, &config.jwt_secret, config.token_ttl).map_err(|e| {
        error!(error = %e, "Token signing failed");
        AppError::Internal(e.to_string())
    })
}

/// Register a user account
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterReq,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Missing field or unknown role", body = Object, example = json!({
            "success": false,
            "message": "Invalid role: owner"
        })),
        (status = 409, description = "Email already registered", body = Object, example = json!({
            "success": false,
            "message": "User already exists"
        }))
    ),
    tag = "Auth"
)]
pub async fn register(
    user: web::Json<RegisterReq>,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
    accounts: web::Data<AccountIndex>,
) -> Result<HttpResponse, AppError> {
    let name = required(&user.name, "name")?;
    let email = required(&user.email, "email")?.to_lowercase();
    let password = user
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("password is required"))?;
    let role_raw = required(&user.role, "role")?;
    let role: Role = role_raw
        .parse()
        .map_err(|_| AppError::validation(format!("Invalid role: {role_raw}")))?;

    let available = accounts
        .is_available(&email, pool.get_ref())
        .await
        .map_err(|e| {
            error!(error = %e, "Account lookup failed");
            AppError::Internal(e.to_string())
        })?;

    if !available {
        return Err(AppError::conflict("User already exists"));
    }

    let user_id = insert_user(&name, &email, password, role, pool.get_ref(), &accounts).await?;
    info!(user_id, %role, "User registered");

    let token = issue_token(user_id, &name, &email, role, &config)?;

    Ok(HttpResponse::Created().json(RegisterResponse {
        token,
        message: "User registered successfully".to_string(),
        user: UserSummary { name, email, role },
    }))
}

/// Log in and receive a bearer token
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Invalid credentials", body = Object, example = json!({
            "success": false,
            "message": "Invalid credentials"
        }))
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(email = user.email.as_deref().unwrap_or_default())
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<SqlitePool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    let email = required(&user.email, "email")?.to_lowercase();
    let password = user
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::validation("password is required"))?;

    debug!("Fetching user from database");

    let db_user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, name, email, password, role, created_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| {
        info!("Invalid credentials: user not found");
        AppError::Unauthorized("Invalid credentials".into())
    })?;

    debug!(user_id = db_user.id, "Verifying password");

    if let Err(e) = verify_password(password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    let role: Role = db_user.role.parse().map_err(|_| {
        error!(user_id = db_user.id, role = %db_user.role, "Stored role is not recognised");
        AppError::Internal(format!("unknown role {}", db_user.role))
    })?;

    let token = issue_token(db_user.id, &db_user.name, &db_user.email, role, &config)?;

    info!(user_id = db_user.id, "Login successful");

    Ok(HttpResponse::Ok().json(LoginResponse {
        token,
        user: UserSummary {
            name: db_user.name,
            email: db_user.email,
            role,
        },
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{peer, test_app, test_config, test_hub, test_pool};
    use actix_web::{http::StatusCode, test};
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn register_then_login_round_trip() {
        let pool = test_pool().await;
        let app = test_app!(pool, test_config(), test_hub());

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .peer_addr(peer())
            .set_json(json!({
                "name": "Salon Owner",
                "email": "Owner.Roundtrip@parlour.example",
                "password": "s3cret-pass",
                "role": "superadmin"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["user"]["role"], "superadmin");
        assert_eq!(body["user"]["email"], "owner.roundtrip@parlour.example");

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr(peer())
            .set_json(json!({
                "email": "owner.roundtrip@parlour.example",
                "password": "s3cret-pass"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr(peer())
            .set_json(json!({"email": "owner.roundtrip@parlour.example", "password": "wrong"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn duplicate_registration_conflicts() {
        let pool = test_pool().await;
        let app = test_app!(pool, test_config(), test_hub());

        let payload = json!({
            "name": "Front Desk",
            "email": "desk.duplicate@parlour.example",
            "password": "pass-1234",
            "role": "admin"
        });

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .peer_addr(peer())
            .set_json(payload.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .peer_addr(peer())
            .set_json(payload)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn separate_apps_keep_separate_account_indexes() {
        let payload = json!({
            "name": "Stylist",
            "email": "same.everywhere@parlour.example",
            "password": "pass-1234",
            "role": "employee"
        });

        for _ in 0..2 {
            let pool = test_pool().await;
            let app = test_app!(pool, test_config(), test_hub());

            let req = test::TestRequest::post()
                .uri("/api/auth/register")
                .peer_addr(peer())
                .set_json(payload.clone())
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        }
    }

    #[actix_web::test]
    async fn register_rejects_unknown_role_and_missing_fields() {
        let pool = test_pool().await;
        let app = test_app!(pool, test_config(), test_hub());

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .peer_addr(peer())
            .set_json(json!({
                "name": "Someone",
                "email": "someone.role@parlour.example",
                "password": "pass-1234",
                "role": "owner"
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr(peer())
            .set_json(json!({"email": "someone.role@parlour.example"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn malformed_json_gets_error_envelope() {
        let pool = test_pool().await;
        let app = test_app!(pool, test_config(), test_hub());

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr(peer())
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }
}
