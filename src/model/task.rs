use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Task row joined with its assignee and creator. The joined columns are
/// null when the referenced row was hard-deleted.
#[derive(Debug, sqlx::FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub assigned_to: i64,
    pub status: String,
    pub priority: String,
    pub due_date: NaiveDate,
    pub created_by: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assignee_name: Option<String>,
    pub assignee_email: Option<String>,
    pub assignee_position: Option<String>,
    pub creator_name: Option<String>,
    pub creator_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssigneeSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub position: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatorSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[schema(example = 7)]
    pub id: i64,
    #[schema(example = "Restock shampoo")]
    pub title: String,
    pub description: String,
    pub assigned_to: Option<AssigneeSummary>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[schema(example = "2024-05-03", value_type = String, format = "date")]
    pub due_date: NaiveDate,
    pub created_by: Option<CreatorSummary>,
    pub is_active: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = strum::ParseError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let assigned_to = match (row.assignee_name, row.assignee_email, row.assignee_position) {
            (Some(name), Some(email), Some(position)) => Some(AssigneeSummary {
                id: row.assigned_to,
                name,
                email,
                position,
            }),
            _ => None,
        };

        let created_by = match (row.creator_name, row.creator_email) {
            (Some(name), Some(email)) => Some(CreatorSummary {
                id: row.created_by,
                name,
                email,
            }),
            _ => None,
        };

        Ok(Task {
            id: row.id,
            title: row.title,
            description: row.description,
            assigned_to,
            status: row.status.parse()?,
            priority: row.priority.parse()?,
            due_date: row.due_date,
            created_by,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
