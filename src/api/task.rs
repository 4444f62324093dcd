use std::str::FromStr;

use crate::{
    api::{employee::fetch_employee, optional, required},
    auth::auth::AuthUser,
    error::AppError,
    model::role::Permission,
    model::task::{Task, TaskPriority, TaskRow, TaskStatus},
    utils::db_utils::{SqlValue, UpdateBuilder, bind_all_as},
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{debug, error, info};
use utoipa::{IntoParams, ToSchema};

const TASK_SELECT: &str = r#"
    SELECT t.*,
           e.name     AS assignee_name,
           e.email    AS assignee_email,
           e.position AS assignee_position,
           u.name     AS creator_name,
           u.email    AS creator_email
    FROM tasks t
    LEFT JOIN employees e ON e.id = t.assigned_to
    LEFT JOIN users u ON u.id = t.created_by
"#;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTask {
    #[schema(example = "Restock shampoo")]
    pub title: Option<String>,
    #[schema(example = "Two cases from the back room")]
    pub description: Option<String>,
    /// Employee id
    #[schema(example = 4)]
    pub assigned_to: Option<i64>,
    #[schema(example = "2024-05-03", format = "date", value_type = Option<String>)]
    pub due_date: Option<NaiveDate>,
    #[schema(example = "high")]
    pub priority: Option<String>,
    #[schema(example = "pending")]
    pub status: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    #[schema(example = "2024-05-03", format = "date", value_type = Option<String>)]
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    #[schema(example = "in-progress")]
    pub status: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct EmployeeTaskFilter {
    /// pending | in-progress | completed
    pub status: Option<String>,
    /// `true` selects active tasks; any other value selects inactive ones
    pub is_active: Option<String>,
}

fn task_not_found() -> AppError {
    AppError::not_found("Task not found")
}

fn parse_choice<T: FromStr>(value: Option<&str>, field: &str) -> Result<Option<T>, AppError> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| AppError::validation(format!("Invalid {field}: {v}")))
        })
        .transpose()
}

fn into_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, AppError> {
    rows.into_iter().map(into_task).collect()
}

fn into_task(row: TaskRow) -> Result<Task, AppError> {
    let task_id = row.id;
    Task::try_from(row).map_err(|e| {
        error!(task_id, error = %e, "Stored task has an unrecognised status or priority");
        AppError::Internal(e.to_string())
    })
}

async fn fetch_task(pool: &SqlitePool, task_id: i64) -> Result<Option<Task>, AppError> {
    let sql = format!("{TASK_SELECT} WHERE t.id = ?");
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(task_id)
        .fetch_optional(pool)
        .await?;

    row.map(into_task).transpose()
}

/// The assignee must exist and be active.
async fn check_assignee(pool: &SqlitePool, employee_id: i64) -> Result<(), AppError> {
    let employee = fetch_employee(pool, employee_id)
        .await?
        .ok_or_else(|| AppError::not_found("Employee not found"))?;

    if !employee.is_active {
        return Err(AppError::validation("Cannot assign task to inactive employee"));
    }
    Ok(())
}

/// Create Task
#[utoipa::path(
    post,
    path = "/api/tasks",
    request_body = CreateTask,
    responses(
        (status = 201, description = "Task created successfully", body = Task),
        (status = 400, description = "Missing field or inactive assignee", body = Object, example = json!({
            "success": false,
            "message": "Cannot assign task to inactive employee"
        })),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Assignee not found")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_task(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    payload: web::Json<CreateTask>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageTasks)?;

    let title = required(&payload.title, "title")?;
    let description = required(&payload.description, "description")?;
    let assigned_to = payload
        .assigned_to
        .ok_or_else(|| AppError::validation("assignedTo is required"))?;
    let due_date = payload
        .due_date
        .ok_or_else(|| AppError::validation("dueDate is required"))?;
    let priority = parse_choice::<TaskPriority>(payload.priority.as_deref(), "priority")?
        .unwrap_or_default();
    let status =
        parse_choice::<TaskStatus>(payload.status.as_deref(), "status")?.unwrap_or_default();

    check_assignee(pool.get_ref(), assigned_to).await?;

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO tasks
            (title, description, assigned_to, status, priority, due_date, created_by, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(assigned_to)
    .bind(status.as_ref())
    .bind(priority.as_ref())
    .bind(due_date)
    .bind(auth.user_id)
    .bind(now)
    .bind(now)
    .execute(pool.get_ref())
    .await?;

    let task_id = result.last_insert_rowid();
    info!(task_id, assigned_to, created_by = auth.user_id, "Task created");

    let task = fetch_task(pool.get_ref(), task_id)
        .await?
        .ok_or_else(task_not_found)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Task created successfully",
        "data": task
    })))
}

/// List active tasks
#[utoipa::path(
    get,
    path = "/api/tasks",
    responses(
        (status = 200, description = "Active tasks, newest first", body = [Task]),
        (status = 401, description = "Unauthorized")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_tasks(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ViewTasks)?;

    let sql = format!("{TASK_SELECT} WHERE t.is_active = 1 ORDER BY t.created_at DESC, t.id DESC");
    let rows = sqlx::query_as::<_, TaskRow>(&sql)
        .fetch_all(pool.get_ref())
        .await?;
    let tasks = into_tasks(rows)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Tasks retrieved successfully",
        "count": tasks.len(),
        "data": tasks
    })))
}

/// Get Task by ID
#[utoipa::path(
    get,
    path = "/api/tasks/{task_id}",
    params(
        ("task_id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task found", body = Task),
        (status = 404, description = "Task not found", body = Object, example = json!({
            "success": false,
            "message": "Task not found"
        }))
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_task(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ViewTasks)?;

    let task = fetch_task(pool.get_ref(), path.into_inner())
        .await?
        .ok_or_else(task_not_found)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task retrieved successfully",
        "data": task
    })))
}

/// Update Task
#[utoipa::path(
    put,
    path = "/api/tasks/{task_id}",
    params(
        ("task_id" = i64, Path, description = "Task ID")
    ),
    request_body = UpdateTask,
    responses(
        (status = 200, description = "Task updated successfully", body = Task),
        (status = 400, description = "Invalid field or inactive assignee"),
        (status = 404, description = "Task or assignee not found")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_task(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
    body: web::Json<UpdateTask>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageTasks)?;

    let task_id = path.into_inner();
    let existing = fetch_task(pool.get_ref(), task_id)
        .await?
        .ok_or_else(task_not_found)?;

    let title = optional(&body.title, "title")?;
    let description = optional(&body.description, "description")?;
    let priority = parse_choice::<TaskPriority>(body.priority.as_deref(), "priority")?;
    let status = parse_choice::<TaskStatus>(body.status.as_deref(), "status")?;

    if let Some(assignee) = body.assigned_to {
        let unchanged = existing.assigned_to.as_ref().is_some_and(|a| a.id == assignee);
        if !unchanged {
            check_assignee(pool.get_ref(), assignee).await?;
        }
    }

    let mut update = UpdateBuilder::new("tasks");
    update
        .set_opt("title", title)
        .set_opt("description", description)
        .set_opt("assigned_to", body.assigned_to)
        .set_opt("due_date", body.due_date)
        .set_opt("priority", priority.map(|p| p.as_ref().to_string()))
        .set_opt("status", status.map(|s| s.as_ref().to_string()))
        .set_opt("is_active", body.is_active)
        .set("updated_at", Utc::now());

    if update.execute(pool.get_ref(), task_id).await? == 0 {
        return Err(task_not_found());
    }

    let task = fetch_task(pool.get_ref(), task_id)
        .await?
        .ok_or_else(task_not_found)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task updated successfully",
        "data": task
    })))
}

/// Soft delete Task
#[utoipa::path(
    delete,
    path = "/api/tasks/{task_id}",
    params(
        ("task_id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Marked inactive"),
        (status = 404, description = "Task not found")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_task(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageTasks)?;

    let task_id = path.into_inner();

    let mut update = UpdateBuilder::new("tasks");
    update.set("is_active", false).set("updated_at", Utc::now());

    if update.execute(pool.get_ref(), task_id).await? == 0 {
        return Err(task_not_found());
    }

    info!(task_id, "Task soft-deleted");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task deleted successfully"
    })))
}

/// Permanently delete Task
#[utoipa::path(
    delete,
    path = "/api/tasks/{task_id}/permanent",
    params(
        ("task_id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Removed"),
        (status = 404, description = "Task not found")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn hard_delete_task(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ManageTasks)?;

    let task_id = path.into_inner();

    let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
        .bind(task_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(task_not_found());
    }

    info!(task_id, "Task permanently deleted");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Task permanently deleted"
    })))
}

/// Tasks assigned to one employee, earliest due first
#[utoipa::path(
    get,
    path = "/api/tasks/employee/{employee_id}",
    params(
        ("employee_id" = i64, Path, description = "Employee ID"),
        EmployeeTaskFilter
    ),
    responses(
        (status = 200, description = "Tasks for the employee", body = [Task]),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Task",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_tasks_by_employee(
    auth: AuthUser,
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
    filter: web::Query<EmployeeTaskFilter>,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::ViewEmployeeTasks)?;

    let employee_id = path.into_inner();
    if fetch_employee(pool.get_ref(), employee_id).await?.is_none() {
        return Err(AppError::not_found("Employee not found"));
    }

    let mut sql = format!("{TASK_SELECT} WHERE t.assigned_to = ?");
    let mut values = vec![SqlValue::I64(employee_id)];

    if let Some(status) = parse_choice::<TaskStatus>(filter.status.as_deref(), "status")? {
        sql.push_str(" AND t.status = ?");
        values.push(status.as_ref().into());
    }
    if let Some(is_active) = filter.is_active.as_deref() {
        sql.push_str(" AND t.is_active = ?");
        values.push((is_active == "true").into());
    }
    sql.push_str(" ORDER BY t.due_date ASC, t.id ASC");

    debug!(employee_id, sql = %sql, "Listing employee tasks");

    let rows = bind_all_as(sqlx::query_as::<_, TaskRow>(&sql), &values)
        .fetch_all(pool.get_ref())
        .await?;
    let tasks = into_tasks(rows)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Employee tasks retrieved successfully",
        "count": tasks.len(),
        "data": tasks
    })))
}
