use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::attendance::{AttendanceEvent, Envelope, PunchIn, PunchOut};
use crate::model::role::Permission;
use crate::realtime::hub::AttendanceHub;
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CatchUpQuery {
    /// Return broadcasts newer than this sequence number
    #[param(example = 0)]
    pub after_seq: Option<u64>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    #[schema(example = 3)]
    pub members: usize,
    #[schema(example = 4)]
    pub connections: usize,
    #[schema(example = 42)]
    pub last_seq: u64,
}

fn publish(
    auth: &AuthUser,
    hub: &AttendanceHub,
    event: AttendanceEvent,
) -> Result<HttpResponse, AppError> {
    auth.require(Permission::PublishAttendance)?;
    event.validate().map_err(AppError::Validation)?;

    let kind = event.kind();
    let seq = hub
        .publish(None, event)
        .map_err(|e| AppError::Unavailable(e.to_string()))?;

    tracing::info!(seq, ?kind, user_id = auth.user_id, "Punch published over REST");

    Ok(HttpResponse::Accepted().json(json!({
        "success": true,
        "message": "Attendance event broadcast",
        "data": { "seq": seq }
    })))
}

/// Punch in an employee
#[utoipa::path(
    post,
    path = "/api/attendance/punch-in",
    request_body = PunchIn,
    responses(
        (status = 202, description = "Broadcast to the attendance room", body = Object, example = json!({
            "success": true,
            "message": "Attendance event broadcast",
            "data": { "seq": 1 }
        })),
        (status = 400, description = "Malformed punch"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Attendance hub closed")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn punch_in(
    auth: AuthUser,
    hub: web::Data<AttendanceHub>,
    payload: web::Json<PunchIn>,
) -> Result<HttpResponse, AppError> {
    publish(&auth, &hub, AttendanceEvent::PunchIn(payload.into_inner()))
}

/// Punch out an employee
#[utoipa::path(
    post,
    path = "/api/attendance/punch-out",
    request_body = PunchOut,
    responses(
        (status = 202, description = "Broadcast to the attendance room", body = Object, example = json!({
            "success": true,
            "message": "Attendance event broadcast",
            "data": { "seq": 2 }
        })),
        (status = 400, description = "Malformed punch"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Attendance hub closed")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn punch_out(
    auth: AuthUser,
    hub: web::Data<AttendanceHub>,
    payload: web::Json<PunchOut>,
) -> Result<HttpResponse, AppError> {
    publish(&auth, &hub, AttendanceEvent::PunchOut(payload.into_inner()))
}

/// Recent broadcasts for catching up after a gap
#[utoipa::path(
    get,
    path = "/api/attendance/events",
    params(CatchUpQuery),
    responses(
        (status = 200, description = "Retained broadcasts, oldest first", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn catch_up(
    _auth: AuthUser,
    hub: web::Data<AttendanceHub>,
    query: web::Query<CatchUpQuery>,
) -> Result<HttpResponse, AppError> {
    let events: Vec<Envelope> = hub.catch_up(query.after_seq.unwrap_or(0));

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Attendance events retrieved",
        "count": events.len(),
        "data": events
    })))
}

#[utoipa::path(
    get,
    path = "/api/attendance/room",
    responses(
        (status = 200, description = "Room membership", body = RoomStatus),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn room_status(
    _auth: AuthUser,
    hub: web::Data<AttendanceHub>,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(RoomStatus {
        members: hub.members(),
        connections: hub.connections(),
        last_seq: hub.last_seq(),
    }))
}
