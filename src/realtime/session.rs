use std::future;
use std::sync::Arc;

use actix_web::web::Bytes;
use actix_web::{HttpRequest, HttpResponse, web};
use actix_ws::{CloseCode, CloseReason, Closed, Message, MessageStream, ProtocolError, Session};
use tokio::sync::broadcast::error::RecvError;

use crate::error::AppError;
use crate::model::attendance::{ConnectionId, Envelope};
use crate::realtime::hub::{AttendanceHub, Subscription};
use crate::realtime::protocol::{ClientMessage, ServerMessage};

/// A connection's slot in the hub; released when dropped, whichever way
/// the session ends.
struct Registration {
    hub: Arc<AttendanceHub>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

/// What the session loop does after reading from the socket.
#[derive(Debug, PartialEq)]
enum Inbound {
    Reply(Vec<ServerMessage>),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

/// `GET /ws/attendance`: upgrade and hand the socket to its own task.
pub async fn attendance_ws(
    req: HttpRequest,
    body: web::Payload,
    hub: web::Data<AttendanceHub>,
) -> actix_web::Result<HttpResponse> {
    let id = hub
        .connect()
        .map_err(|e| AppError::Unavailable(e.to_string()))?;
    let registration = Registration {
        hub: hub.into_inner(),
        id,
    };

    let (response, session, stream) = actix_ws::handle(&req, body)?;

    actix_web::rt::spawn(run_session(registration, session, stream));

    Ok(response)
}

/// Answers one client frame. Punches are fire-and-forget: the sender gets
/// nothing back here and sees its own broadcast through the room.
fn dispatch(
    hub: &AttendanceHub,
    connection: ConnectionId,
    text: &str,
    room: &mut Option<Subscription>,
) -> Vec<ServerMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(%connection, error = %e, "Unparsable socket frame");
            return vec![ServerMessage::error(format!("Invalid message: {e}"))];
        }
    };

    let published = match msg {
        ClientMessage::JoinAttendance => {
            return match hub.join(connection) {
                Ok(rx) => {
                    *room = Some(rx);
                    Vec::new()
                }
                Err(e) => vec![ServerMessage::error(e.to_string())],
            };
        }
        ClientMessage::CatchUp(req) => {
            return hub
                .catch_up(req.after_seq)
                .into_iter()
                .map(ServerMessage::AttendanceUpdated)
                .collect();
        }
        ClientMessage::PunchIn(punch) => hub.punch_in(Some(connection), punch),
        ClientMessage::PunchOut(punch) => hub.punch_out(Some(connection), punch),
    };

    match published {
        Ok(_) => Vec::new(),
        Err(e) => vec![ServerMessage::error(e.to_string())],
    }
}

fn on_frame(
    hub: &AttendanceHub,
    connection: ConnectionId,
    frame: Option<Result<Message, ProtocolError>>,
    room: &mut Option<Subscription>,
) -> Inbound {
    match frame {
        Some(Ok(Message::Text(text))) => Inbound::Reply(dispatch(hub, connection, &text, room)),
        Some(Ok(Message::Ping(bytes))) => Inbound::Pong(bytes),
        Some(Ok(Message::Close(reason))) => Inbound::Close(reason),
        Some(Ok(_)) => Inbound::Reply(Vec::new()),
        Some(Err(e)) => {
            tracing::warn!(%connection, error = %e, "Socket protocol error");
            Inbound::Close(Some(CloseCode::Protocol.into()))
        }
        None => Inbound::Close(None),
    }
}

/// Turns a room event into the frame to forward, or the reason to hang up.
fn on_update(
    connection: ConnectionId,
    update: Result<Arc<Envelope>, RecvError>,
) -> Result<ServerMessage, CloseReason> {
    match update {
        Ok(envelope) => Ok(ServerMessage::AttendanceUpdated(Envelope::clone(&envelope))),
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(%connection, skipped, "Room member lagged behind");
            Ok(ServerMessage::lagged(skipped))
        }
        Err(RecvError::Closed) => Err(CloseReason {
            code: CloseCode::Away,
            description: Some("attendance hub shut down".into()),
        }),
    }
}

async fn send(session: &mut Session, msg: &ServerMessage) -> Result<(), Closed> {
    match serde_json::to_string(msg) {
        Ok(text) => session.text(text).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode socket frame");
            Ok(())
        }
    }
}

/// Resolves only once joined; until then the room branch never fires.
async fn next_update(room: &mut Option<Subscription>) -> Result<Arc<Envelope>, RecvError> {
    match room {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn run_session(registration: Registration, mut session: Session, mut stream: MessageStream) {
    let hub = Arc::clone(&registration.hub);
    let connection = registration.id;
    let mut room: Option<Subscription> = None;

    let close_reason = 'session: {
        if send(&mut session, &ServerMessage::connected(connection))
            .await
            .is_err()
        {
            break 'session None;
        }

        loop {
            tokio::select! {
                frame = stream.recv() => match on_frame(&hub, connection, frame, &mut room) {
                    Inbound::Reply(frames) => {
                        for frame in &frames {
                            if send(&mut session, frame).await.is_err() {
                                break 'session None;
                            }
                        }
                    }
                    Inbound::Pong(bytes) => {
                        if session.pong(&bytes).await.is_err() {
                            break 'session None;
                        }
                    }
                    Inbound::Close(reason) => break 'session reason,
                },
                update = next_update(&mut room) => match on_update(connection, update) {
                    Ok(frame) => {
                        if send(&mut session, &frame).await.is_err() {
                            break 'session None;
                        }
                    }
                    Err(reason) => break 'session Some(reason),
                },
            }
        }
    };

    drop(registration);
    let _ = session.close(close_reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::{AttendanceEvent, PunchIn, PunchOut};
    use crate::test_support::{test_app, test_config, test_hub, test_pool};
    use actix_web::{http::StatusCode, test};
    use serde_json::json;

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    fn asha_in() -> PunchIn {
        PunchIn {
            employee_id: "1".into(),
            employee_name: "Asha".into(),
            time: "09:00".into(),
            date: "2024-05-01".into(),
        }
    }

    fn punch_in_frame() -> String {
        frame(json!({
            "event": "punch-in",
            "data": {
                "employeeId": "1",
                "employeeName": "Asha",
                "time": "09:00",
                "date": "2024-05-01"
            }
        }))
    }

    fn updated(room: &mut Option<Subscription>, connection: ConnectionId) -> ServerMessage {
        let envelope = room.as_mut().unwrap().try_recv().unwrap();
        on_update(connection, Ok(envelope)).unwrap()
    }

    #[::core::prelude::v1::test]
    fn join_subscribes_to_the_room() {
        let hub = AttendanceHub::new(16, 16);
        let me = hub.connect().unwrap();
        let mut room = None;

        let replies = dispatch(&hub, me, &frame(json!({"event": "join-attendance"})), &mut room);

        assert!(replies.is_empty());
        assert!(room.is_some());
        assert_eq!(hub.members(), 1);
    }

    #[::core::prelude::v1::test]
    fn socket_punches_reach_every_member_including_the_sender() {
        let hub = AttendanceHub::new(16, 16);
        let sender = hub.connect().unwrap();
        let observer = hub.connect().unwrap();
        let (mut sender_room, mut observer_room) = (None, None);
        let join = frame(json!({"event": "join-attendance"}));
        dispatch(&hub, sender, &join, &mut sender_room);
        dispatch(&hub, observer, &join, &mut observer_room);

        assert!(dispatch(&hub, sender, &punch_in_frame(), &mut sender_room).is_empty());
        let punch_out = frame(json!({
            "event": "punch-out",
            "data": {
                "employeeId": "1",
                "employeeName": "Asha",
                "time": "17:00",
                "date": "2024-05-01",
                "totalHours": "8h"
            }
        }));
        assert!(dispatch(&hub, sender, &punch_out, &mut sender_room).is_empty());

        for (room, member) in [(&mut sender_room, sender), (&mut observer_room, observer)] {
            let ServerMessage::AttendanceUpdated(first) = updated(room, member) else {
                panic!("expected attendance-updated");
            };
            assert_eq!(first.seq, 1);
            assert_eq!(first.origin, Some(sender));
            assert_eq!(first.data, AttendanceEvent::PunchIn(asha_in()));

            let ServerMessage::AttendanceUpdated(second) = updated(room, member) else {
                panic!("expected attendance-updated");
            };
            assert_eq!(second.seq, 2);
            assert!(matches!(
                second.data,
                AttendanceEvent::PunchOut(PunchOut { ref time, .. }) if time == "17:00"
            ));
        }
    }

    #[::core::prelude::v1::test]
    fn unparsable_frame_gets_an_error_frame() {
        let hub = AttendanceHub::new(16, 16);
        let me = hub.connect().unwrap();
        let mut room = None;

        let replies = dispatch(&hub, me, "{not json", &mut room);

        assert_eq!(replies.len(), 1);
        let reply = serde_json::to_value(&replies[0]).unwrap();
        assert_eq!(reply["event"], "error");
        assert!(reply["data"]["message"].as_str().unwrap().starts_with("Invalid message"));
        assert_eq!(hub.last_seq(), 0);
    }

    #[::core::prelude::v1::test]
    fn catch_up_replays_retained_broadcasts() {
        let hub = AttendanceHub::new(16, 16);
        let me = hub.connect().unwrap();
        let mut room = None;
        for _ in 0..3 {
            hub.punch_in(None, asha_in()).unwrap();
        }

        let replies = dispatch(
            &hub,
            me,
            &frame(json!({"event": "catch-up", "data": {"afterSeq": 1}})),
            &mut room,
        );

        let seqs: Vec<u64> = replies
            .iter()
            .map(|msg| match msg {
                ServerMessage::AttendanceUpdated(envelope) => envelope.seq,
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(seqs, [2, 3]);
        assert!(room.is_none());
    }

    #[::core::prelude::v1::test]
    fn punch_after_shutdown_reports_an_error() {
        let hub = AttendanceHub::new(16, 16);
        let me = hub.connect().unwrap();
        let mut room = None;
        hub.shutdown();

        let replies = dispatch(&hub, me, &punch_in_frame(), &mut room);

        assert_eq!(replies, [ServerMessage::error("attendance hub is closed")]);
    }

    #[::core::prelude::v1::test]
    fn lag_is_forwarded_and_shutdown_hangs_up() {
        let me = ConnectionId::new();

        assert_eq!(on_update(me, Err(RecvError::Lagged(4))), Ok(ServerMessage::lagged(4)));

        let reason = on_update(me, Err(RecvError::Closed)).unwrap_err();
        assert_eq!(reason.code, CloseCode::Away);
    }

    #[::core::prelude::v1::test]
    fn socket_frames_map_to_session_steps() {
        let hub = AttendanceHub::new(16, 16);
        let me = hub.connect().unwrap();
        let mut room = None;

        let close = CloseReason::from(CloseCode::Normal);
        assert_eq!(
            on_frame(&hub, me, Some(Ok(Message::Close(Some(close.clone())))), &mut room),
            Inbound::Close(Some(close))
        );
        assert_eq!(on_frame(&hub, me, None, &mut room), Inbound::Close(None));
        assert_eq!(
            on_frame(&hub, me, Some(Err(ProtocolError::UnmaskedFrame)), &mut room),
            Inbound::Close(Some(CloseCode::Protocol.into()))
        );
        assert_eq!(
            on_frame(&hub, me, Some(Ok(Message::Ping(Bytes::from_static(b"hi")))), &mut room),
            Inbound::Pong(Bytes::from_static(b"hi"))
        );
        let Inbound::Reply(replies) =
            on_frame(&hub, me, Some(Ok(Message::Text("{}".into()))), &mut room)
        else {
            panic!("expected a reply");
        };
        assert!(matches!(&replies[..], [ServerMessage::Error { .. }]));
    }

    #[::core::prelude::v1::test]
    fn dropping_the_registration_disconnects() {
        let hub = Arc::new(AttendanceHub::new(16, 16));
        let id = hub.connect().unwrap();
        hub.join(id).unwrap();

        let registration = Registration {
            hub: Arc::clone(&hub),
            id,
        };
        assert_eq!(hub.members(), 1);

        drop(registration);

        assert_eq!(hub.connections(), 0);
        assert_eq!(hub.members(), 0);
    }

    #[actix_web::test]
    async fn plain_get_is_refused_without_leaking_a_connection() {
        let pool = test_pool().await;
        let hub = test_hub();
        let app = test_app!(pool, test_config(), hub);

        let req = test::TestRequest::get().uri("/ws/attendance").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(hub.connections(), 0);
    }

    #[actix_web::test]
    async fn upgrade_refused_once_the_hub_is_shut_down() {
        let pool = test_pool().await;
        let hub = test_hub();
        hub.shutdown();
        let app = test_app!(pool, test_config(), hub);

        let req = test::TestRequest::get().uri("/ws/attendance").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
