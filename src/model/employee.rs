use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(
    example = json!({
        "id": 1,
        "name": "Asha Rao",
        "email": "asha@parlour.example",
        "position": "Stylist",
        "phone": "+15550001111",
        "joinDate": "2024-05-01",
        "avatar": "AR",
        "isActive": true,
        "createdAt": "2024-05-01T09:00:00Z",
        "updatedAt": "2024-05-01T09:00:00Z"
    })
)]
pub struct Employee {
    #[schema(example = 1)]
    pub id: i64,

    #[schema(example = "Asha Rao")]
    pub name: String,

    #[schema(example = "asha@parlour.example")]
    pub email: String,

    #[schema(example = "Stylist")]
    pub position: String,

    #[schema(example = "+15550001111")]
    pub phone: String,

    #[schema(example = "2024-05-01", value_type = String, format = "date")]
    pub join_date: NaiveDate,

    #[schema(example = "AR")]
    pub avatar: String,

    pub is_active: bool,

    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,

    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

/// Initials of each whitespace-separated word, uppercased: "asha rao" -> "AR".
pub fn avatar_initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Emails are compared trimmed and lowercased everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
