use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Employee,
    Admin,
    SuperAdmin,
}

/// Operations gated by role.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumIter)]
pub enum Permission {
    ViewEmployees,
    ManageEmployees,
    ViewTasks,
    ManageTasks,
    ViewEmployeeTasks,
    PublishAttendance,
}

impl Permission {
    /// Roles allowed besides `SuperAdmin`, which is granted everything.
    fn allowed_roles(self) -> &'static [Role] {
        match self {
            Permission::ViewEmployees => &[Role::Employee, Role::Admin],
            Permission::ManageEmployees => &[],
            Permission::ViewTasks => &[Role::Employee, Role::Admin],
            Permission::ManageTasks => &[],
            Permission::ViewEmployeeTasks => &[Role::Admin],
            Permission::PublishAttendance => &[Role::Employee, Role::Admin],
        }
    }
}

impl Role {
    pub fn can(self, permission: Permission) -> bool {
        self == Role::SuperAdmin || permission.allowed_roles().contains(&self)
    }
}
