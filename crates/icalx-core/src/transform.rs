//! Projection of the generic component tree onto the typed calendar model.

use std::collections::BTreeMap;

use crate::date::{
    IcalDuration, OffsetSource, TzDatabase, parse_calendar_date, parse_date_only, parse_date_time,
    parse_duration,
};
use crate::error::{DateError, EventFailure, PartialCalendar, Scope, TransformError, ValidationError};
use crate::model::{
    Calendar, CalendarDate, CalendarEvent, CalendarMetadata, CalendarTimezone, Component,
    Properties, PropertyValue, Recurrence, TimezoneObservance,
};
use crate::recurrence::RecurrenceRule;
use crate::validate::{
    mutually_exclusive, optional_at_most_one, optional_no_parameters, optional_plain_value,
    require_exactly_one, require_no_parameters,
};

const EVENT_PROPERTIES: &[&str] = &[
    "DTSTART",
    "DTEND",
    "DURATION",
    "UID",
    "LAST-MODIFIED",
    "CREATED",
    "DTSTAMP",
    "SUMMARY",
    "LOCATION",
    "DESCRIPTION",
    "STATUS",
    "TRANSP",
    "RRULE",
    "SEQUENCE",
    "RECURRENCE-ID",
    "EXDATE",
    "ORGANIZER",
    "ATTENDEE",
];

const CALENDAR_PROPERTIES: &[&str] = &["VERSION", "PRODID", "CALSCALE", "X-WR-TIMEZONE"];

const TIMEZONE_PROPERTIES: &[&str] = &["TZID", "LAST-MODIFIED", "TZURL", "X-LIC-LOCATION"];

const OBSERVANCE_PROPERTIES: &[&str] = &["TZOFFSETFROM", "TZOFFSETTO", "DTSTART", "TZNAME", "RRULE"];

/// What to do when a single VEVENT fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventPolicy {
    /// Validate every event; report failures together with the events that
    /// did parse as [`TransformError::PartialEvents`].
    #[default]
    CollectAll,
    /// Abort on the first invalid event.
    FailFast,
}

#[derive(Clone, Copy)]
pub struct TransformOptions<'a> {
    pub policy: EventPolicy,
    pub offsets: &'a dyn OffsetSource,
}

impl Default for TransformOptions<'static> {
    fn default() -> Self {
        Self {
            policy: EventPolicy::default(),
            offsets: &TzDatabase,
        }
    }
}

impl<'a> TransformOptions<'a> {
    pub fn with_offsets(offsets: &'a dyn OffsetSource) -> Self {
        Self {
            policy: EventPolicy::default(),
            offsets,
        }
    }

    pub fn with_policy(mut self, policy: EventPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Resolves a single DTSTART-like property.
///
/// Date-times carrying a `TZID` omit the UTC suffix in the source; it is
/// appended before decoding. The returned `timezone` is only set when the
/// `TZID` differs from `default_timezone`.
pub fn match_date_parameters(
    date: Option<&[PropertyValue]>,
    name: &str,
    scope: Scope,
    default_timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<CalendarDate, ValidationError> {
    let occurrence = require_exactly_one(date, name, scope)?;
    resolve_date(occurrence, name, scope, default_timezone, offsets)
}

fn resolve_date(
    occurrence: &PropertyValue,
    name: &str,
    scope: Scope,
    default_timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<CalendarDate, ValidationError> {
    let is_all_day = occurrence.parameter("VALUE") == Some("DATE");
    let tzid = occurrence.parameter("TZID");
    let value = occurrence.value.as_str();

    let date = if is_all_day {
        parse_date_only(value, tzid.unwrap_or(default_timezone), offsets)
    } else if tzid.is_some() && !value.ends_with('Z') {
        parse_date_time(&format!("{value}Z"))
    } else {
        parse_date_time(value)
    }
    .map_err(|source| invalid_date(scope, name, source))?;

    Ok(CalendarDate {
        date,
        is_all_day,
        timezone: tzid
            .filter(|tz| *tz != default_timezone)
            .map(str::to_string),
    })
}

/// Extracts the `TZID` of a VTIMEZONE.
pub fn match_timezone(component: &Component) -> Result<String, ValidationError> {
    let tzid = component.property("TZID");
    let value = require_exactly_one(tzid, "TZID", Scope::Timezone)?;
    require_no_parameters(tzid, "TZID", Scope::Timezone)?;
    Ok(value.value.clone())
}

/// Projects a whole VTIMEZONE, including its observances.
pub fn match_timezone_definition(component: &Component) -> Result<CalendarTimezone, ValidationError> {
    reject_components(component, &["STANDARD", "DAYLIGHT"], "STANDARD and DAYLIGHT", Scope::Timezone)?;

    let tzid = match_timezone(component)?;
    let raw = |key: &str| -> Result<Option<String>, ValidationError> {
        Ok(optional_at_most_one(component.property(key), key, Scope::Timezone)?
            .map(|occurrence| occurrence.value.clone()))
    };

    Ok(CalendarTimezone {
        tzid,
        last_modified: raw("LAST-MODIFIED")?,
        tzurl: raw("TZURL")?,
        x_lic_location: raw("X-LIC-LOCATION")?,
        standard: component
            .components_named("STANDARD")
            .iter()
            .map(|observance| match_observance(observance, Scope::Standard))
            .collect::<Result<_, _>>()?,
        daylight: component
            .components_named("DAYLIGHT")
            .iter()
            .map(|observance| match_observance(observance, Scope::Daylight))
            .collect::<Result<_, _>>()?,
        rest: component.rest_properties(TIMEZONE_PROPERTIES),
    })
}

fn match_observance(component: &Component, scope: Scope) -> Result<TimezoneObservance, ValidationError> {
    let required = |key: &str| -> Result<String, ValidationError> {
        Ok(require_exactly_one(component.property(key), key, scope)?.value.clone())
    };
    let optional = |key: &str| -> Result<Option<String>, ValidationError> {
        Ok(optional_at_most_one(component.property(key), key, scope)?
            .map(|occurrence| occurrence.value.clone()))
    };

    Ok(TimezoneObservance {
        tzoffsetfrom: required("TZOFFSETFROM")?,
        tzoffsetto: required("TZOFFSETTO")?,
        dtstart: required("DTSTART")?,
        tzname: optional("TZNAME")?,
        rrule: optional("RRULE")?,
        rest: component.rest_properties(OBSERVANCE_PROPERTIES),
    })
}

/// The recurrence-related properties of one VEVENT.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceProperties<'a> {
    pub rrule: Option<&'a [PropertyValue]>,
    pub sequence: Option<&'a [PropertyValue]>,
    pub exdate: Option<&'a [PropertyValue]>,
    pub recurrence_id: Option<&'a [PropertyValue]>,
}

impl<'a> RecurrenceProperties<'a> {
    pub fn of(component: &'a Component) -> Self {
        Self {
            rrule: component.property("RRULE"),
            sequence: component.property("SEQUENCE"),
            exdate: component.property("EXDATE"),
            recurrence_id: component.property("RECURRENCE-ID"),
        }
    }
}

pub fn match_recurrence_rules(
    properties: RecurrenceProperties<'_>,
    default_timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<Recurrence, ValidationError> {
    let scope = Scope::Event;

    let sequence = optional_at_most_one(properties.sequence, "SEQUENCE", scope)?;
    optional_no_parameters(properties.sequence, "SEQUENCE", scope)?;

    let rrule = optional_at_most_one(properties.rrule, "RRULE", scope)?;
    optional_no_parameters(properties.rrule, "RRULE", scope)?;

    optional_at_most_one(properties.recurrence_id, "RECURRENCE-ID", scope)?;

    let sequence = sequence
        .map(|occurrence| {
            occurrence
                .value
                .trim()
                .parse::<i64>()
                .map_err(|_| ValidationError::NotANumber {
                    scope,
                    name: "SEQUENCE".to_string(),
                    value: occurrence.value.clone(),
                })
        })
        .transpose()?;

    let mut exdate = Vec::new();
    for entry in properties.exdate.unwrap_or_default() {
        if entry.value.contains(',') {
            for part in entry.value.split(',') {
                let single = PropertyValue {
                    value: part.trim().to_string(),
                    parameters: entry.parameters.clone(),
                };
                exdate.push(resolve_date(&single, "EXDATE", scope, default_timezone, offsets)?);
            }
        } else {
            exdate.push(resolve_date(entry, "EXDATE", scope, default_timezone, offsets)?);
        }
    }

    let rrule = rrule
        .map(|occurrence| {
            RecurrenceRule::parse(&occurrence.value).map_err(|err| ValidationError::InvalidRule {
                scope,
                rule: occurrence.value.clone(),
                reason: err.to_string(),
            })
        })
        .transpose()?;

    let recurrence_id = properties
        .recurrence_id
        .map(|_| {
            match_date_parameters(
                properties.recurrence_id,
                "RECURRENCE-ID",
                scope,
                default_timezone,
                offsets,
            )
        })
        .transpose()?;

    Ok(Recurrence {
        rrule,
        exdate,
        sequence,
        recurrence_id,
    })
}

/// Raw property table of a VALARM; alarms are not validated.
pub fn match_alarm(component: &Component) -> Properties {
    component.properties.clone()
}

pub fn match_event(
    component: &Component,
    timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<CalendarEvent, ValidationError> {
    let scope = Scope::Event;
    let property = |key: &str| component.property(key);

    reject_components(component, &["VALARM"], "VALARM", scope)?;

    // required
    let start_property = require_exactly_one(property("DTSTART"), "DTSTART", scope)?;
    require_exactly_one(property("DTSTAMP"), "DTSTAMP", scope)?;
    let uid = require_exactly_one(property("UID"), "UID", scope)?.value.clone();
    optional_at_most_one(property("LAST-MODIFIED"), "LAST-MODIFIED", scope)?;
    optional_at_most_one(property("CREATED"), "CREATED", scope)?;
    let title = require_exactly_one(property("SUMMARY"), "SUMMARY", scope)?.value.clone();
    require_no_parameters(property("UID"), "UID", scope)?;
    require_no_parameters(property("SUMMARY"), "SUMMARY", scope)?;

    // optional
    let location = optional_plain_value(property("LOCATION"), "LOCATION", scope)?;
    let description = optional_plain_value(property("DESCRIPTION"), "DESCRIPTION", scope)?;
    let status = optional_plain_value(property("STATUS"), "STATUS", scope)?;
    let transparency = optional_plain_value(property("TRANSP"), "TRANSP", scope)?;

    mutually_exclusive(
        &[
            (property("DTEND"), "DTEND"),
            (property("DURATION"), "DURATION"),
        ],
        "DTEND and DURATION are mutually exclusive and cannot both be set",
        scope,
    )?;

    let recurrence =
        match_recurrence_rules(RecurrenceProperties::of(component), timezone, offsets)?;

    let organizers = property("ORGANIZER").map(<[_]>::to_vec).unwrap_or_default();
    let attendees = property("ATTENDEE").map(<[_]>::to_vec).unwrap_or_default();

    let start = match_date_parameters(property("DTSTART"), "DTSTART", scope, timezone, offsets)?;

    let end = if property("DTEND").is_some() {
        match_date_parameters(property("DTEND"), "DTEND", scope, timezone, offsets)?
    } else if property("DURATION").is_some() {
        let raw = require_exactly_one(property("DURATION"), "DURATION", scope)?;
        let duration =
            parse_duration(&raw.value).map_err(|source| invalid_date(scope, "DURATION", source))?;
        shift_start(&start, start_property, &duration, timezone, offsets)
            .map_err(|source| invalid_date(scope, "DURATION", source))?
    } else if start.is_all_day {
        // RFC 5545 3.6.1: an all-day event without DTEND/DURATION lasts one day
        let one_day = IcalDuration {
            days: 1,
            ..IcalDuration::default()
        };
        shift_start(&start, start_property, &one_day, timezone, offsets)
            .map_err(|source| invalid_date(scope, "DTSTART", source))?
    } else {
        start.clone()
    };

    let modification_date = property("LAST-MODIFIED")
        .map(|_| match_date_parameters(property("LAST-MODIFIED"), "LAST-MODIFIED", scope, timezone, offsets))
        .transpose()?;
    let creation_date = property("CREATED")
        .map(|_| match_date_parameters(property("CREATED"), "CREATED", scope, timezone, offsets))
        .transpose()?;

    // DTSTAMP is when this record was produced, not when the event was
    // created; several VEVENTs sharing a UID are ordered by it.
    let dtstamp = match_date_parameters(property("DTSTAMP"), "DTSTAMP", scope, timezone, offsets)?;

    Ok(CalendarEvent {
        uid,
        title,
        dtstamp,
        start,
        end,
        location,
        description,
        status,
        transparency,
        modification_date,
        creation_date,
        organizers,
        attendees,
        recurrence,
        alarms: component
            .components_named("VALARM")
            .iter()
            .map(match_alarm)
            .collect(),
        rest: component.rest_properties(EVENT_PROPERTIES),
    })
}

pub fn match_calendar(
    component: &Component,
    options: &TransformOptions<'_>,
) -> Result<Calendar, TransformError> {
    let metadata = match_calendar_metadata(component)?;

    let mut events = Vec::new();
    let mut failures = Vec::new();

    for (index, raw) in component.components_named("VEVENT").iter().enumerate() {
        match match_event(raw, &metadata.timezone, options.offsets) {
            Ok(event) => events.push(event),
            Err(error) if options.policy == EventPolicy::FailFast => {
                return Err(TransformError::Invalid(error));
            }
            Err(error) => {
                let uid = raw
                    .property("UID")
                    .and_then(<[_]>::first)
                    .map(|occurrence| occurrence.value.clone());
                tracing::warn!(index, uid = ?uid, error = %error, "Rejected VEVENT");
                failures.push(EventFailure { index, uid, error });
            }
        }
    }

    tracing::debug!(
        accepted = events.len(),
        rejected = failures.len(),
        "Matched VEVENT components"
    );

    let calendar = Calendar { metadata, events };
    if failures.is_empty() {
        Ok(calendar)
    } else {
        Err(TransformError::PartialEvents(Box::new(PartialCalendar {
            calendar,
            failures,
        })))
    }
}

fn match_calendar_metadata(component: &Component) -> Result<CalendarMetadata, ValidationError> {
    let scope = Scope::Calendar;
    let property = |key: &str| component.property(key);

    let version = optional_plain_value(property("VERSION"), "VERSION", scope)?;
    let prodid = optional_plain_value(property("PRODID"), "PRODID", scope)?;
    let calscale = optional_plain_value(property("CALSCALE"), "CALSCALE", scope)?;
    let x_wr_timezone = optional_plain_value(property("X-WR-TIMEZONE"), "X-WR-TIMEZONE", scope)?;

    let defined_timezones = component
        .components_named("VTIMEZONE")
        .iter()
        .map(match_timezone_definition)
        .collect::<Result<Vec<_>, _>>()?;

    let timezone = resolve_default_timezone(x_wr_timezone, &defined_timezones)?;
    tracing::debug!(%timezone, "Resolved calendar timezone");

    let rest_components: BTreeMap<String, Vec<Component>> = component
        .components
        .iter()
        .filter(|(name, _)| !matches!(name.as_str(), "VEVENT" | "VTIMEZONE"))
        .map(|(name, nested)| (name.clone(), nested.clone()))
        .collect();

    Ok(CalendarMetadata {
        timezone,
        version,
        prodid,
        calscale,
        defined_timezones,
        rest: component.rest_properties(CALENDAR_PROPERTIES),
        rest_components,
    })
}

/// Picks the calendar's default timezone from `X-WR-TIMEZONE` and the
/// VTIMEZONE definitions.
fn resolve_default_timezone(
    x_wr_timezone: Option<String>,
    defined: &[CalendarTimezone],
) -> Result<String, ValidationError> {
    match (x_wr_timezone, defined) {
        (None, []) => Err(ValidationError::MissingTimezone),
        (None, [single]) => Ok(single.tzid.clone()),
        (None, many) => Err(ValidationError::AmbiguousTimezone {
            candidates: many.iter().map(|tz| tz.tzid.clone()).collect(),
        }),
        (Some(x_wr), []) => Ok(x_wr),
        (Some(x_wr), many) => {
            if many.iter().any(|tz| tz.tzid == x_wr) {
                Ok(x_wr)
            } else {
                Err(ValidationError::TimezoneMismatch {
                    x_wr_timezone: x_wr,
                    vtimezone: many
                        .iter()
                        .map(|tz| tz.tzid.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
    }
}

fn shift_start(
    start: &CalendarDate,
    start_property: &PropertyValue,
    duration: &IcalDuration,
    default_timezone: &str,
    offsets: &dyn OffsetSource,
) -> Result<CalendarDate, DateError> {
    if start.is_all_day {
        let date = parse_calendar_date(&start_property.value)?;
        let timezone = start_property.parameter("TZID").unwrap_or(default_timezone);
        return Ok(CalendarDate {
            date: duration.add_to_local_date(date, timezone, offsets)?,
            is_all_day: duration.is_whole_days(),
            timezone: start.timezone.clone(),
        });
    }

    let date = duration
        .add_to_instant(start.date)
        .ok_or_else(|| DateError::OutOfRange(start_property.value.clone()))?;
    Ok(CalendarDate {
        date,
        is_all_day: false,
        timezone: start.timezone.clone(),
    })
}

fn reject_components(
    component: &Component,
    allowed: &[&str],
    allowed_label: &'static str,
    scope: Scope,
) -> Result<(), ValidationError> {
    match component
        .components
        .keys()
        .find(|name| !allowed.contains(&name.as_str()))
    {
        Some(found) => Err(ValidationError::ForbiddenComponent {
            scope,
            allowed: allowed_label,
            found: found.clone(),
        }),
        None => Ok(()),
    }
}

fn invalid_date(scope: Scope, name: &str, source: DateError) -> ValidationError {
    ValidationError::InvalidDate {
        scope,
        name: name.to_string(),
        source,
    }
}
