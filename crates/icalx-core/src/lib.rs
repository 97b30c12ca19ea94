//! RFC 5545 calendar parsing in two stages: [`parse`] turns text into a
//! generic [`Component`] tree, [`transform`] validates that tree and projects
//! it onto [`Calendar`].

pub mod date;
pub mod error;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod recurrence;
pub mod transform;
pub mod validate;

use std::collections::BTreeMap;

pub use date::{IcalDuration, OffsetSource, TzDatabase};
pub use error::{
    CoreError, DateError, EventFailure, PartialCalendar, Scope, SyntaxError, TransformError,
    ValidationError,
};
pub use lexer::Lexer;
pub use model::{
    Calendar, CalendarDate, CalendarEvent, CalendarMetadata, CalendarTimezone, Component,
    Parameters, Properties, PropertyValue, Recurrence, TimezoneObservance,
};
pub use recurrence::RecurrenceRule;
pub use transform::{EventPolicy, TransformOptions};

/// Parses a `VCALENDAR` document into its generic component tree.
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
pub fn parse(input: &str) -> Result<Component, SyntaxError> {
    let mut lexer = Lexer::new(input);
    let root = parser::parse_component(&mut lexer, "VCALENDAR")?;

    if !lexer.is_at_end() {
        tracing::warn!(
            ignored_lines = lexer.remaining_lines(),
            "Ignoring content after END:VCALENDAR"
        );
    }
    tracing::debug!(
        properties = root.properties.len(),
        components = root.components.len(),
        "Parsed VCALENDAR"
    );

    Ok(root)
}

/// Validates a parsed tree with the default options: IANA offsets from
/// `chrono-tz`, every event validated independently.
pub fn transform(component: &Component) -> Result<Calendar, TransformError> {
    transform_with(component, &TransformOptions::default())
}

#[tracing::instrument(skip_all, fields(policy = ?options.policy))]
pub fn transform_with(
    component: &Component,
    options: &TransformOptions<'_>,
) -> Result<Calendar, TransformError> {
    transform::match_calendar(component, options)
}

/// [`parse`] followed by [`transform_with`].
pub fn parse_calendar(input: &str, options: &TransformOptions<'_>) -> Result<Calendar, CoreError> {
    let component = parse(input)?;
    Ok(transform_with(&component, options)?)
}

/// Recursively sorts object keys so JSON output is stable.
pub fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let ordered: BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            serde_json::Value::Object(
                ordered
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        serde_json::Value::Array(values) => {
            serde_json::Value::Array(values.iter().map(canonical_json).collect())
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLE_EXPORT: &str = "BEGIN:VCALENDAR\r
PRODID:-//Google Inc//Google Calendar 70.9054//EN\r
VERSION:2.0\r
CALSCALE:GREGORIAN\r
METHOD:PUBLISH\r
X-WR-CALNAME:Team\r
X-WR-TIMEZONE:Europe/Berlin\r
BEGIN:VEVENT\r
DTSTART:20230306T143000Z\r
DTEND:20230306T150000Z\r
DTSTAMP:20240310T170000Z\r
ORGANIZER;CN=Alice:mailto:alice@example.com\r
UID:e0de738a-1b58-49a3-9266-e0716471a0fa\r
RECURRENCE-ID:20230306T143000Z\r
ATTENDEE;CUTYPE=INDIVIDUAL;ROLE=REQ-PARTICIPANT;PARTSTAT=ACCEPTED;CN=bob@exa\r
 mple.com;X-NUM-GUESTS=0:mailto:bob@example.com\r
ATTENDEE;CUTYPE=INDIVIDUAL;ROLE=REQ-PARTICIPANT;PARTSTAT=ACCEPTED;CN=Alice;\r
 X-NUM-GUESTS=0:mailto:alice@example.com\r
X-GOOGLE-CONFERENCE:https://meet.google.com/xxx-xxxx-xxx\r
CREATED:20230107T123000Z\r
DESCRIPTION:Join with Google Meet: https://meet.google.com/xxx-xxxx-xxx\\n\\nP\r
 lease do not edit this section.\r
LAST-MODIFIED:20230425T110000Z\r
SEQUENCE:1\r
STATUS:CONFIRMED\r
SUMMARY:Weekly Sync Meeting\r
TRANSP:OPAQUE\r
BEGIN:VALARM\r
ACTION:DISPLAY\r
TRIGGER:-PT10M\r
END:VALARM\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20240202\r
DTSTAMP:20240203T144500Z\r
UID:f50fa2c1-c324-43d0-b534-a2805fdd5190\r
SUMMARY:Event title\r
LOCATION:Null Island\r
END:VEVENT\r
END:VCALENDAR\r
";

    #[test]
    fn parses_and_transforms_a_google_export() {
        let calendar = parse_calendar(GOOGLE_EXPORT, &TransformOptions::default()).expect("calendar");

        assert_eq!(calendar.metadata.timezone, "Europe/Berlin");
        assert_eq!(calendar.metadata.version.as_deref(), Some("2.0"));
        assert_eq!(calendar.metadata.calscale.as_deref(), Some("GREGORIAN"));
        assert_eq!(
            calendar.metadata.prodid.as_deref(),
            Some("-//Google Inc//Google Calendar 70.9054//EN")
        );
        assert_eq!(
            calendar.metadata.rest.keys().collect::<Vec<_>>(),
            ["METHOD", "X-WR-CALNAME"]
        );

        let meeting = &calendar.events[0];
        assert_eq!(meeting.uid, "e0de738a-1b58-49a3-9266-e0716471a0fa");
        assert_eq!(meeting.title, "Weekly Sync Meeting");
        assert_eq!(meeting.start.date.to_rfc3339(), "2023-03-06T14:30:00+00:00");
        assert_eq!(meeting.end.date.to_rfc3339(), "2023-03-06T15:00:00+00:00");
        assert_eq!(
            meeting.description.as_deref(),
            Some("Join with Google Meet: https://meet.google.com/xxx-xxxx-xxx\n\nPlease do not edit this section.")
        );
        assert_eq!(meeting.recurrence.sequence, Some(1));
        assert!(meeting.recurrence.rrule.is_none());
        assert_eq!(meeting.status.as_deref(), Some("CONFIRMED"));
        assert_eq!(meeting.transparency.as_deref(), Some("OPAQUE"));
        assert_eq!(meeting.alarms.len(), 1);

        assert_eq!(meeting.organizers[0].parameter("CN"), Some("Alice"));
        assert_eq!(meeting.attendees.len(), 2);
        assert_eq!(meeting.attendees[0].value, "mailto:bob@example.com");
        assert_eq!(meeting.attendees[0].parameter("CN"), Some("bob@example.com"));
        assert_eq!(meeting.attendees[1].parameter("X-NUM-GUESTS"), Some("0"));

        assert_eq!(meeting.rest.len(), 1);
        assert_eq!(
            meeting.rest["X-GOOGLE-CONFERENCE"],
            vec![PropertyValue::new("https://meet.google.com/xxx-xxxx-xxx")]
        );

        let all_day = &calendar.events[1];
        assert!(all_day.start.is_all_day);
        assert_eq!(all_day.start.date.to_rfc3339(), "2024-02-01T23:00:00+00:00");
        assert_eq!(all_day.end.date.to_rfc3339(), "2024-02-02T23:00:00+00:00");
        assert_eq!(all_day.location.as_deref(), Some("Null Island"));
    }

    #[test]
    fn tree_counts_match_the_input() {
        let root = parse(GOOGLE_EXPORT).expect("parse");
        assert_eq!(root.properties.values().map(Vec::len).sum::<usize>(), 6);
        assert_eq!(root.components_named("VEVENT").len(), 2);

        let meeting = &root.components_named("VEVENT")[0];
        assert_eq!(meeting.properties.values().map(Vec::len).sum::<usize>(), 16);
        assert_eq!(meeting.components_named("VALARM").len(), 1);
    }

    #[test]
    fn transform_is_idempotent() {
        let root = parse(GOOGLE_EXPORT).expect("parse");
        assert_eq!(transform(&root), transform(&root));
    }

    #[test]
    fn syntax_errors_surface_through_parse_calendar() {
        let err = parse_calendar(
            "BEGIN:VCALENDAR\nBEGIN:VEVENT\nEND:VCALENDAR\n",
            &TransformOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Syntax(SyntaxError::ExpectedLiteral { .. })));
    }

    #[test]
    fn trailing_content_is_ignored() {
        let root = parse("BEGIN:VCALENDAR\nVERSION:2.0\nEND:VCALENDAR\nVERSION:3.0\n").expect("parse");
        assert_eq!(root.properties["VERSION"].len(), 1);
    }

    #[test]
    fn serializes_instants_with_milliseconds() {
        let calendar = parse_calendar(GOOGLE_EXPORT, &TransformOptions::default()).expect("calendar");
        let json = canonical_json(&serde_json::to_value(&calendar.events[0].start).expect("json"));
        assert_eq!(
            json,
            serde_json::json!({ "date": "2023-03-06T14:30:00.000Z", "is_all_day": false })
        );
    }
}
