//! Attendance events and the observer-side view they fold into.
//!
//! Attendance is never stored by the server. Every observer keeps an
//! [`AttendanceView`] built only from the events it has seen, keyed by
//! `(employeeId, date)`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifies one live connection to the attendance hub.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PunchIn {
    #[schema(example = "1")]
    pub employee_id: String,
    #[schema(example = "Asha")]
    pub employee_name: String,
    #[schema(example = "09:00")]
    pub time: String,
    #[schema(example = "2024-05-01")]
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PunchOut {
    #[schema(example = "1")]
    pub employee_id: String,
    #[schema(example = "Asha")]
    pub employee_name: String,
    #[schema(example = "17:00")]
    pub time: String,
    #[schema(example = "2024-05-01")]
    pub date: String,
    #[schema(example = "8h")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PunchKind {
    PunchIn,
    PunchOut,
}

/// Payload of an `attendance-updated` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttendanceEvent {
    PunchIn(PunchIn),
    PunchOut(PunchOut),
}

impl AttendanceEvent {
    pub fn kind(&self) -> PunchKind {
        match self {
            AttendanceEvent::PunchIn(_) => PunchKind::PunchIn,
            AttendanceEvent::PunchOut(_) => PunchKind::PunchOut,
        }
    }

    pub fn employee_id(&self) -> &str {
        match self {
            AttendanceEvent::PunchIn(p) => &p.employee_id,
            AttendanceEvent::PunchOut(p) => &p.employee_id,
        }
    }

    pub fn employee_name(&self) -> &str {
        match self {
            AttendanceEvent::PunchIn(p) => &p.employee_name,
            AttendanceEvent::PunchOut(p) => &p.employee_name,
        }
    }

    pub fn date(&self) -> &str {
        match self {
            AttendanceEvent::PunchIn(p) => &p.date,
            AttendanceEvent::PunchOut(p) => &p.date,
        }
    }

    pub fn time(&self) -> &str {
        match self {
            AttendanceEvent::PunchIn(p) => &p.time,
            AttendanceEvent::PunchOut(p) => &p.time,
        }
    }

    /// Field checks applied to punches that arrive over REST. Socket punches
    /// are relayed as sent.
    pub fn validate(&self) -> Result<(), String> {
        if self.employee_id().trim().is_empty() {
            return Err("employeeId is required".into());
        }
        if self.employee_name().trim().is_empty() {
            return Err("employeeName is required".into());
        }
        if NaiveDate::parse_from_str(self.date(), "%Y-%m-%d").is_err() {
            return Err(format!("date must be YYYY-MM-DD, got {:?}", self.date()));
        }
        if parse_clock(self.time()).is_none() {
            return Err(format!("time must be HH:MM, got {:?}", self.time()));
        }
        Ok(())
    }
}

/// A hub broadcast: the event plus its sequence number and sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ConnectionId>,
    pub data: AttendanceEvent,
}

/// Accepts `HH:MM`, `HH:MM:SS` and 12-hour `hh:MM AM`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    const FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M:%S %p"];

    let raw = raw.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Time between two wall-clock readings on the same shift. A punch-out
/// earlier than the punch-in is read as crossing midnight.
pub fn elapsed(punch_in: &str, punch_out: &str) -> Option<Duration> {
    let start = parse_clock(punch_in)?;
    let end = parse_clock(punch_out)?;

    let diff = end.signed_duration_since(start);
    if diff < Duration::zero() {
        Some(diff + Duration::hours(24))
    } else {
        Some(diff)
    }
}

/// "8h" for whole hours, "7h 30m" otherwise.
pub fn format_hours(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    let (hours, rest) = (minutes / 60, minutes % 60);
    if rest == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h {rest}m")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub employee_id: String,
    pub employee_name: String,
    pub date: String,
    pub punch_in: String,
    pub punch_out: Option<String>,
    pub total_hours: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A punch-in opened a record. `superseded` holds whatever it replaced.
    Opened { superseded: Option<AttendanceRecord> },
    Closed,
    /// Punch-out for an employee/date with no record in this view.
    Unmatched,
    /// Already applied, or already held, by sequence number.
    Stale,
    /// Arrived ahead of `expected`; held until the missing events are
    /// applied (usually from a catch-up reply) or the gap is skipped.
    Gap { expected: u64 },
    /// Our own broadcast coming back; it was applied locally when sent.
    OwnEcho,
}

#[derive(Debug, Default)]
pub struct AttendanceView {
    records: HashMap<(String, String), AttendanceRecord>,
    /// Every envelope up to and including this seq has been applied.
    last_seq: u64,
    /// Envelopes past a gap, keyed by seq. Keys are always `> last_seq + 1`.
    held: BTreeMap<u64, Envelope>,
    local_origin: Option<ConnectionId>,
}

impl AttendanceView {
    pub fn new() -> Self {
        Self::default()
    }

    /// A view owned by the client on `origin`; broadcasts from that
    /// connection are treated as echoes.
    pub fn for_connection(origin: ConnectionId) -> Self {
        Self {
            local_origin: Some(origin),
            ..Self::default()
        }
    }

    /// Highest seq such that it and everything before it has been applied.
    /// This is the `afterSeq` to send with a catch-up request.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Seq the view needs next to make progress.
    pub fn expected_seq(&self) -> u64 {
        self.last_seq + 1
    }

    /// Envelopes received past a gap and not yet applied.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn get(&self, employee_id: &str, date: &str) -> Option<&AttendanceRecord> {
        self.records
            .get(&(employee_id.to_string(), date.to_string()))
    }

    /// Records still open, i.e. employees currently working.
    pub fn working(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.values().filter(|r| r.is_active)
    }

    pub fn records(&self) -> impl Iterator<Item = &AttendanceRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fold a hub broadcast into the view, in sequence order. An envelope
    /// past a gap is held and reported as [`ApplyOutcome::Gap`]; once the
    /// gap fills, held envelopes are applied behind it.
    pub fn apply_envelope(&mut self, envelope: &Envelope) -> ApplyOutcome {
        if envelope.seq <= self.last_seq || self.held.contains_key(&envelope.seq) {
            return ApplyOutcome::Stale;
        }

        let expected = self.expected_seq();
        if envelope.seq > expected {
            self.held.insert(envelope.seq, envelope.clone());
            return ApplyOutcome::Gap { expected };
        }

        let outcome = self.accept(envelope);
        self.release_held();
        outcome
    }

    /// Fold a catch-up reply (retained broadcasts, oldest first). Returns
    /// the outcome of every envelope applied, including held ones released
    /// behind it. If the reply starts past the gap, the hub no longer
    /// retains the missing events and the view skips over them.
    pub fn apply_catch_up(&mut self, envelopes: &[Envelope]) -> Vec<(u64, ApplyOutcome)> {
        let mut applied = Vec::new();

        let oldest_new = envelopes
            .iter()
            .map(|e| e.seq)
            .filter(|&seq| seq > self.last_seq)
            .min();
        let resume_at = match (oldest_new, self.held.keys().next()) {
            (Some(reply), Some(&held)) => Some(reply.min(held)),
            (reply, held) => reply.or(held.copied()),
        };
        if let Some(resume_at) = resume_at {
            if resume_at > self.expected_seq() {
                applied.extend(self.skip_to(resume_at - 1));
            }
        }

        for envelope in envelopes {
            if envelope.seq == self.expected_seq() {
                applied.push((envelope.seq, self.accept(envelope)));
                applied.extend(self.release_held());
            } else {
                applied.push((envelope.seq, self.apply_envelope(envelope)));
            }
        }

        // whatever is still missing is gone from the hub as well
        applied.extend(self.skip_gap());
        applied
    }

    /// Give up on the current gap: jump to the oldest held envelope and
    /// apply everything contiguous from there.
    pub fn skip_gap(&mut self) -> Vec<(u64, ApplyOutcome)> {
        match self.held.keys().next() {
            Some(&oldest) => self.skip_to(oldest - 1),
            None => Vec::new(),
        }
    }

    fn skip_to(&mut self, seq: u64) -> Vec<(u64, ApplyOutcome)> {
        tracing::warn!(
            from = self.expected_seq(),
            to = seq,
            "Skipping unrecoverable attendance events"
        );
        self.last_seq = seq;
        self.held = self.held.split_off(&(seq + 1));
        self.release_held()
    }

    /// Apply an envelope known to be the next in sequence.
    fn accept(&mut self, envelope: &Envelope) -> ApplyOutcome {
        self.last_seq = envelope.seq;

        if self.local_origin.is_some() && envelope.origin == self.local_origin {
            return ApplyOutcome::OwnEcho;
        }

        self.apply(&envelope.data)
    }

    fn release_held(&mut self) -> Vec<(u64, ApplyOutcome)> {
        let mut released = Vec::new();
        while let Some(next) = self.held.remove(&self.expected_seq()) {
            released.push((next.seq, self.accept(&next)));
        }
        released
    }

    /// Fold an event with no sequence number, e.g. a local optimistic punch.
    pub fn apply(&mut self, event: &AttendanceEvent) -> ApplyOutcome {
        match event {
            AttendanceEvent::PunchIn(p) => {
                let record = AttendanceRecord {
                    employee_id: p.employee_id.clone(),
                    employee_name: p.employee_name.clone(),
                    date: p.date.clone(),
                    punch_in: p.time.clone(),
                    punch_out: None,
                    total_hours: None,
                    is_active: true,
                };
                let superseded = self
                    .records
                    .insert((p.employee_id.clone(), p.date.clone()), record);
                ApplyOutcome::Opened { superseded }
            }
            AttendanceEvent::PunchOut(p) => {
                let key = (p.employee_id.clone(), p.date.clone());
                let Some(record) = self.records.get_mut(&key) else {
                    return ApplyOutcome::Unmatched;
                };

                let total_hours = elapsed(&record.punch_in, &p.time)
                    .map(format_hours)
                    .or_else(|| p.total_hours.clone());

                record.punch_out = Some(p.time.clone());
                record.total_hours = total_hours;
                record.is_active = false;
                ApplyOutcome::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn punch_in(id: &str, name: &str, time: &str, date: &str) -> AttendanceEvent {
        AttendanceEvent::PunchIn(PunchIn {
            employee_id: id.into(),
            employee_name: name.into(),
            time: time.into(),
            date: date.into(),
        })
    }

    fn punch_out(id: &str, name: &str, time: &str, date: &str) -> AttendanceEvent {
        AttendanceEvent::PunchOut(PunchOut {
            employee_id: id.into(),
            employee_name: name.into(),
            time: time.into(),
            date: date.into(),
            total_hours: None,
        })
    }

    fn envelope(seq: u64, origin: Option<ConnectionId>, data: AttendanceEvent) -> Envelope {
        Envelope { seq, origin, data }
    }

    #[test]
    fn punch_in_then_out_closes_the_record() {
        let mut view = AttendanceView::new();

        view.apply(&punch_in("1", "Asha", "09:00", "2024-05-01"));
        let open = view.get("1", "2024-05-01").unwrap();
        assert!(open.is_active);
        assert_eq!(open.punch_in, "09:00");
        assert_eq!(view.working().count(), 1);

        assert_eq!(
            view.apply(&punch_out("1", "Asha", "17:00", "2024-05-01")),
            ApplyOutcome::Closed
        );
        let closed = view.get("1", "2024-05-01").unwrap();
        assert!(!closed.is_active);
        assert_eq!(closed.punch_out.as_deref(), Some("17:00"));
        assert_eq!(closed.total_hours.as_deref(), Some("8h"));
        assert_eq!(view.working().count(), 0);
    }

    #[test]
    fn second_punch_in_resets_a_closed_record() {
        let mut view = AttendanceView::new();
        view.apply(&punch_in("1", "Asha", "09:00", "2024-05-01"));
        view.apply(&punch_out("1", "Asha", "12:00", "2024-05-01"));

        let outcome = view.apply(&punch_in("1", "Asha", "13:15", "2024-05-01"));
        let ApplyOutcome::Opened { superseded: Some(previous) } = outcome else {
            panic!("expected the closed record to be reported, got {outcome:?}");
        };
        assert_eq!(previous.punch_out.as_deref(), Some("12:00"));

        let record = view.get("1", "2024-05-01").unwrap();
        assert!(record.is_active);
        assert_eq!(record.punch_in, "13:15");
        assert_eq!(record.punch_out, None);
        assert_eq!(record.total_hours, None);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn dates_are_tracked_separately() {
        let mut view = AttendanceView::new();
        view.apply(&punch_in("1", "Asha", "09:00", "2024-05-01"));
        view.apply(&punch_in("1", "Asha", "09:30", "2024-05-02"));

        assert_eq!(view.len(), 2);
        assert_eq!(view.get("1", "2024-05-01").unwrap().punch_in, "09:00");
    }

    #[test]
    fn unmatched_punch_out_is_ignored() {
        let mut view = AttendanceView::new();
        assert_eq!(
            view.apply(&punch_out("9", "Ravi", "17:00", "2024-05-01")),
            ApplyOutcome::Unmatched
        );
        assert!(view.is_empty());
    }

    #[test]
    fn falls_back_to_sender_hours_when_times_do_not_parse() {
        let mut view = AttendanceView::new();
        view.apply(&punch_in("1", "Asha", "morning", "2024-05-01"));
        view.apply(&AttendanceEvent::PunchOut(PunchOut {
            employee_id: "1".into(),
            employee_name: "Asha".into(),
            time: "evening".into(),
            date: "2024-05-01".into(),
            total_hours: Some("8h".into()),
        }));

        assert_eq!(
            view.get("1", "2024-05-01").unwrap().total_hours.as_deref(),
            Some("8h")
        );
    }

    #[test]
    fn stale_and_echoed_envelopes_are_skipped() {
        let me = ConnectionId::new();
        let other = ConnectionId::new();
        let mut view = AttendanceView::for_connection(me);

        view.apply(&punch_in("1", "Asha", "09:00", "2024-05-01"));
        let echo = envelope(1, Some(me), punch_in("1", "Asha", "09:00", "2024-05-01"));
        assert_eq!(view.apply_envelope(&echo), ApplyOutcome::OwnEcho);

        let ravi_in = envelope(2, Some(other), punch_in("2", "Ravi", "09:05", "2024-05-01"));
        assert!(matches!(
            view.apply_envelope(&ravi_in),
            ApplyOutcome::Opened { superseded: None }
        ));

        let replayed = envelope(2, Some(other), punch_out("2", "Ravi", "10:00", "2024-05-01"));
        assert_eq!(view.apply_envelope(&replayed), ApplyOutcome::Stale);
        assert_eq!(view.last_seq(), 2);
        assert!(view.get("2", "2024-05-01").unwrap().is_active);
    }

    #[test]
    fn envelopes_past_a_gap_wait_for_it() {
        let mut view = AttendanceView::new();

        assert_eq!(
            view.apply_envelope(&envelope(2, None, punch_out("1", "Asha", "17:00", "2024-05-01"))),
            ApplyOutcome::Gap { expected: 1 }
        );
        assert_eq!(view.held(), 1);
        assert!(view.is_empty());

        // the missing punch-in lands first, then the held punch-out closes it
        assert!(matches!(
            view.apply_envelope(&envelope(1, None, punch_in("1", "Asha", "09:00", "2024-05-01"))),
            ApplyOutcome::Opened { superseded: None }
        ));
        assert_eq!(view.held(), 0);
        assert_eq!(view.last_seq(), 2);

        let record = view.get("1", "2024-05-01").unwrap();
        assert!(!record.is_active);
        assert_eq!(record.total_hours.as_deref(), Some("8h"));
    }

    #[test]
    fn catch_up_fills_the_gap_in_order() {
        let mut view = AttendanceView::new();
        view.apply_envelope(&envelope(3, None, punch_in("3", "Meera", "09:10", "2024-05-01")));

        let reply = vec![
            envelope(1, None, punch_in("1", "Asha", "09:00", "2024-05-01")),
            envelope(2, None, punch_in("2", "Ravi", "09:05", "2024-05-01")),
            envelope(3, None, punch_in("3", "Meera", "09:10", "2024-05-01")),
        ];
        let outcomes: Vec<u64> = view
            .apply_catch_up(&reply)
            .into_iter()
            .filter(|(_, outcome)| matches!(outcome, ApplyOutcome::Opened { .. }))
            .map(|(seq, _)| seq)
            .collect();

        assert_eq!(outcomes, [1, 2, 3]);
        assert_eq!(view.len(), 3);
        assert_eq!(view.last_seq(), 3);
        assert_eq!(view.held(), 0);
    }

    #[test]
    fn catch_up_skips_events_the_hub_no_longer_retains() {
        let mut view = AttendanceView::new();
        view.apply_envelope(&envelope(4, None, punch_in("4", "Devi", "09:20", "2024-05-01")));

        // ring only kept 3 and 4; 1 and 2 are gone for good
        let reply = vec![
            envelope(3, None, punch_in("3", "Meera", "09:10", "2024-05-01")),
            envelope(4, None, punch_in("4", "Devi", "09:20", "2024-05-01")),
        ];
        view.apply_catch_up(&reply);

        assert_eq!(view.last_seq(), 4);
        assert_eq!(view.held(), 0);
        assert!(view.get("3", "2024-05-01").is_some());
        assert!(view.get("4", "2024-05-01").is_some());
        assert!(view.get("1", "2024-05-01").is_none());
    }

    #[test]
    fn empty_catch_up_releases_held_envelopes() {
        let mut view = AttendanceView::new();
        view.apply_envelope(&envelope(5, None, punch_in("5", "Kiran", "10:00", "2024-05-01")));

        let applied = view.apply_catch_up(&[]);

        assert_eq!(applied.len(), 1);
        assert_eq!(view.last_seq(), 5);
        assert!(view.get("5", "2024-05-01").is_some());
    }

    #[test]
    fn clock_formats() {
        assert_eq!(parse_clock("09:00"), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(parse_clock("17:05:30"), NaiveTime::from_hms_opt(17, 5, 30));
        assert_eq!(parse_clock("05:00 PM"), NaiveTime::from_hms_opt(17, 0, 0));
        assert_eq!(parse_clock("25:00"), None);
    }

    #[test]
    fn elapsed_handles_partial_hours_and_midnight() {
        assert_eq!(format_hours(elapsed("09:00", "16:30").unwrap()), "7h 30m");
        assert_eq!(format_hours(elapsed("22:00", "02:00").unwrap()), "4h");
    }

    #[test]
    fn wire_shape_matches_the_channel() {
        let value = serde_json::to_value(AttendanceEvent::PunchOut(PunchOut {
            employee_id: "1".into(),
            employee_name: "Asha".into(),
            time: "17:00".into(),
            date: "2024-05-01".into(),
            total_hours: Some("8h".into()),
        }))
        .unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "type": "punch-out",
                "employeeId": "1",
                "employeeName": "Asha",
                "time": "17:00",
                "date": "2024-05-01",
                "totalHours": "8h"
            })
        );
    }

    #[test]
    fn validation_rejects_bad_fields() {
        assert!(punch_in("1", "Asha", "09:00", "2024-05-01").validate().is_ok());
        assert!(punch_in("", "Asha", "09:00", "2024-05-01").validate().is_err());
        assert!(punch_in("1", "Asha", "09:00", "05/01/2024").validate().is_err());
        assert!(punch_in("1", "Asha", "nine", "2024-05-01").validate().is_err());
    }
}
