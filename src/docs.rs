use crate::api::attendance::RoomStatus;
use crate::api::employee::{CreateEmployee, UpdateEmployee};
use crate::api::task::{CreateTask, UpdateTask};
use crate::model::attendance::{PunchIn, PunchOut};
use crate::model::employee::Employee;
use crate::model::role::Role;
use crate::model::task::{AssigneeSummary, CreatorSummary, Task, TaskPriority, TaskStatus};
use crate::models::{LoginReqDto, LoginResponse, RegisterReq, RegisterResponse, UserSummary};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parlour API",
        version = "1.0.0",
        description = r#"
## Salon Management API

Back office for a beauty parlour: staff records, task assignment, and a live
attendance board.

### Key Features
- **Employee Management**
  - Create, update, list, soft and hard delete staff profiles
- **Task Management**
  - Assign work to active employees with status, priority, and due date
- **Live Attendance**
  - Punch-in/punch-out broadcast over `GET /ws/attendance` (WebSocket),
    with a REST bridge and a catch-up feed keyed by sequence number

### Security
Most endpoints require a **JWT Bearer** token from `/api/auth/login`.
Roles are `employee`, `admin`, and `superadmin`; only a superadmin may
change employees or tasks.

### Response Format
`{ "success": bool, "message": string, "count"?: number, "data"?: ... }`
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,

        crate::api::employee::create_employee,
        crate::api::employee::list_employees,
        crate::api::employee::list_public_employees,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,
        crate::api::employee::hard_delete_employee,

        crate::api::task::create_task,
        crate::api::task::list_tasks,
        crate::api::task::get_task,
        crate::api::task::update_task,
        crate::api::task::delete_task,
        crate::api::task::hard_delete_task,
        crate::api::task::list_tasks_by_employee,

        crate::api::attendance::punch_in,
        crate::api::attendance::punch_out,
        crate::api::attendance::catch_up,
        crate::api::attendance::room_status
    ),
    components(
        schemas(
            RegisterReq,
            LoginReqDto,
            LoginResponse,
            RegisterResponse,
            UserSummary,
            Role,
            Employee,
            CreateEmployee,
            UpdateEmployee,
            Task,
            TaskStatus,
            TaskPriority,
            AssigneeSummary,
            CreatorSummary,
            CreateTask,
            UpdateTask,
            PunchIn,
            PunchOut,
            RoomStatus
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration and login"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Task", description = "Task assignment APIs"),
        (name = "Attendance", description = "Live attendance APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_resource() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/auth/login",
            "/api/employees/{employee_id}/permanent",
            "/api/tasks/employee/{employee_id}",
            "/api/attendance/events",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
