use crate::{
    api::{optional, required},
    auth::auth::AuthUser,
    error::{AppError, is_unique_violation},
    model::employee::{Employee, avatar_initials, normalize_email},
    model::role::Permission,
    utils::db_utils::UpdateBuilder,
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployee {
    #[schema(example = "Asha Rao")]
    pub name: Option<String>,
    #[schema(example = "asha@parlour.example", format = "email")]
    pub email: Option<String>,
    #[schema(example = "Stylist")]
    pub position: Option<String>,
    #[schema(example = "+15550001111")]
    pub phone: Option<String>,
    /// Defaults to today
    #[schema(example = "2024-05-01", format = "date", value_type = Option<String>)]
    pub join_date: Option<NaiveDate>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployee {
    pub name: Option<String>,
    pub email: Option<String>,
    pub position: Option<String>,
    pub phone: Option<String>,
    #[schema(example = "2024-05-01", format = "date", value_type = Option<String>)]
    pub join_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

pub(crate) async fn fetch_employee(
    pool: &SqlitePool,
    employee_id: i64,
) -> Result<Option<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ?")
        .bind(employee_id)
        .fetch_optional(pool)
        .await
}

async fn email_in_use(
    pool: &SqlitePool,
    email: &str,
    except_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE email = ? AND id != ?)",
    )
    .bind(email)
    .bind(except_id.unwrap_or(-1))
    .fetch_one(pool)
    .await
}

async fn active_employees(pool: &SqlitePool) -> Result<Vec<Employee>, sqlx::Error> {
    sqlx::query_as::<_, Employee>(
        "SELECT * FROM employees WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await
}

fn employee_not_found() -> AppError {
    AppError::not_found("Employee not found")
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created successfully", body = Employee),
        (status = 400, description = "Missing required field", body = Object, example = json!({
            "success": false,
            "message": "phone is required"
        })),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Duplicate email", body = Object, example = json!({
            "success": false,
            "message": "Employee with this email already exists"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    payload: web::Json<CreateEmployee>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageEmployees)?;

    let name = required(&payload.name, "name")?;
    let email = normalize_email(&required(&payload.email, "email")?);
    let position = required(&payload.position, "position")?;
    let phone = required(&payload.phone, "phone")?;
    let join_date = payload.join_date.unwrap_or_else(|| Utc::now().date_naive());

    if email_in_use(pool.get_ref(), &email, None).await? {
        return Err(AppError::conflict("Employee with this email already exists"));
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO employees
            (name, email, position, phone, join_date, avatar, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(&position)
    .bind(&phone)
    .bind(join_date)
    .bind(avatar_initials(&name))
    .bind(now)
    .bind(now)
    .execute(pool.get_ref())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Employee with this email already exists")
        } else {
            AppError::from(e)
        }
    })?;

    let employee_id = result.last_insert_rowid();
    info!(employee_id, created_by = auth.user_id, "Employee created");

    let employee = fetch_employee(pool.get_ref(), employee_id)
        .await?
        .ok_or_else(employee_not_found)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Employee created successfully",
        "data": employee
    })))
}

/// List active employees
#[utoipa::path(
    get,
    path = "/api/employees",
    responses(
        (status = 200, description = "Active employees, newest first", body = [Employee]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ViewEmployees)?;

    let employees = active_employees(pool.get_ref()).await?;
    debug!(count = employees.len(), "Listed employees");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employees retrieved successfully",
        "count": employees.len(),
        "data": employees
    })))
}

/// Active employees for the attendance board; no token required
#[utoipa::path(
    get,
    path = "/api/public/employees",
    responses(
        (status = 200, description = "Active employees, newest first", body = [Employee])
    ),
    tag = "Employee"
)]
pub async fn list_public_employees(pool: web::Data<SqlitePool>) -> Result<HttpResponse, AppError> {
    let employees = active_employees(pool.get_ref()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Active employees retrieved successfully",
        "count": employees.len(),
        "data": employees
    })))
}

/// Get Employee by ID, including soft-deleted ones
#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id" = i64, Path, description = "Employee ID")
    ),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "success": false,
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageEmployees)?;

    let employee_id = path.into_inner();
    let employee = fetch_employee(pool.get_ref(), employee_id)
        .await?
        .ok_or_else(employee_not_found)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employee retrieved successfully",
        "data": employee
    })))
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id" = i64, Path, description = "Employee ID")
    ),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Employee updated successfully", body = Employee),
        (status = 400, description = "Blank field"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Email belongs to another employee")
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
    body: web::Json<UpdateEmployee>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageEmployees)?;

    let employee_id = path.into_inner();
    let existing = fetch_employee(pool.get_ref(), employee_id)
        .await?
        .ok_or_else(employee_not_found)?;

    let name = optional(&body.name, "name")?;
    let email = optional(&body.email, "email")?.map(|e| normalize_email(&e));
    let position = optional(&body.position, "position")?;
    let phone = optional(&body.phone, "phone")?;

    if let Some(email) = email.as_deref() {
        if email != existing.email
            && email_in_use(pool.get_ref(), email, Some(employee_id)).await?
        {
            return Err(AppError::conflict("Employee with this email already exists"));
        }
    }

    let mut update = UpdateBuilder::new("employees");
    if let Some(name) = &name {
        update.set("avatar", avatar_initials(name));
    }
    update
        .set_opt("name", name)
        .set_opt("email", email)
        .set_opt("position", position)
        .set_opt("phone", phone)
        .set_opt("join_date", body.join_date)
        .set_opt("is_active", body.is_active)
        .set("updated_at", Utc::now());

    let affected = update
        .execute(pool.get_ref(), employee_id)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::conflict("Employee with this email already exists")
            } else {
                AppError::from(e)
            }
        })?;

    if affected == 0 {
        return Err(employee_not_found());
    }

    let employee = fetch_employee(pool.get_ref(), employee_id)
        .await?
        .ok_or_else(employee_not_found)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employee updated successfully",
        "data": employee
    })))
}

/// Soft delete Employee
#[utoipa::path(
    delete,
    path = "/api/employees/{employee_id}",
    params(
        ("employee_id" = i64, Path, description = "Employee ID")
    ),
    responses(
        (status = 200, description = "Marked inactive", body = Object, example = json!({
            "success": true,
            "message": "Employee deleted successfully"
        })),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageEmployees)?;

    let employee_id = path.into_inner();

    let mut update = UpdateBuilder::new("employees");
    update.set("is_active", false).set("updated_at", Utc::now());

    if update.execute(pool.get_ref(), employee_id).await? == 0 {
        return Err(employee_not_found());
    }

    info!(employee_id, "Employee soft-deleted");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employee deleted successfully"
    })))
}

/// Permanently delete Employee
#[utoipa::path(
    delete,
    path = "/api/employees/{employee_id}/permanent",
    params(
        ("employee_id" = i64, Path, description = "Employee ID")
    ),
    responses(
        (status = 200, description = "Removed", body = Object, example = json!({
            "success": true,
            "message": "Employee permanently deleted"
        })),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn hard_delete_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageEmployees)?;

    let employee_id = path.into_inner();

    let result = sqlx::query("DELETE FROM employees WHERE id = ?")
        .bind(employee_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(employee_not_found());
    }

    info!(employee_id, "Employee permanently deleted");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employee permanently deleted"
    })))
}
