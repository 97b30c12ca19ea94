use std::fmt;

use thiserror::Error;

use crate::model::{Calendar, CalendarEvent, CalendarMetadata};

/// Structural failure while reading the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("expected {expected} at line {line} (from {from} until {to}), got:\n{got}")]
    ExpectedLiteral {
        expected: String,
        line: usize,
        from: usize,
        to: usize,
        got: String,
    },

    #[error("expected end of line at {line}:{offset}, got:\n{got}")]
    ExpectedEndOfLine {
        line: usize,
        offset: usize,
        got: String,
    },

    #[error("unexpected end of input at line {line}, expected {expected}")]
    UnexpectedEndOfInput { line: usize, expected: String },

    #[error("malformed property at line {line} (missing ':'), got:\n{got}")]
    MalformedProperty { line: usize, got: String },
}

/// Failure decoding a date, date-time or duration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("invalid iCal date format ({input}), expected {expected}")]
    InvalidFormat {
        input: String,
        expected: &'static str,
    },

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid iCal duration ({0})")]
    InvalidDuration(String),

    #[error("date '{0}' is out of the representable range")]
    OutOfRange(String),
}

/// Component kind a validation rule was evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Calendar,
    Event,
    Alarm,
    Timezone,
    Standard,
    Daylight,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Calendar => "VCALENDAR",
            Scope::Event => "VEVENT",
            Scope::Alarm => "VALARM",
            Scope::Timezone => "VTIMEZONE",
            Scope::Standard => "STANDARD",
            Scope::Daylight => "DAYLIGHT",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violation of the iCalendar structural grammar on a parsed tree.
///
/// `received` holds a JSON snapshot of the data the rule looked at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{scope} must have {name}, received: {received}")]
    Missing {
        scope: Scope,
        name: String,
        received: String,
    },

    #[error("{scope} {name} must only occur once (found {count}), received: {received}")]
    Repeated {
        scope: Scope,
        name: String,
        count: usize,
        received: String,
    },

    #[error("{scope} {name} must not have parameters ([{index}]: {parameters}), received: {received}")]
    UnexpectedParameters {
        scope: Scope,
        name: String,
        index: usize,
        parameters: String,
        received: String,
    },

    #[error("{scope} {message}, received: {received}")]
    MutuallyExclusive {
        scope: Scope,
        message: String,
        received: String,
    },

    #[error("{scope} must not contain components other than {allowed} (found {found})")]
    ForbiddenComponent {
        scope: Scope,
        allowed: &'static str,
        found: String,
    },

    #[error("{scope} {name} must be a number, received: {value}")]
    NotANumber {
        scope: Scope,
        name: String,
        value: String,
    },

    #[error("{scope} {name} has an invalid value: {source}")]
    InvalidDate {
        scope: Scope,
        name: String,
        #[source]
        source: DateError,
    },

    #[error("{scope} RRULE '{rule}' is invalid: {reason}")]
    InvalidRule {
        scope: Scope,
        rule: String,
        reason: String,
    },

    #[error("VCALENDAR must have a configured timezone. Either use X-WR-TIMEZONE or VTIMEZONE")]
    MissingTimezone,

    #[error(
        "VCALENDAR defines several VTIMEZONEs ({}) and no X-WR-TIMEZONE to pick the default",
        .candidates.join(", ")
    )]
    AmbiguousTimezone { candidates: Vec<String> },

    #[error("VCALENDAR has both X-WR-TIMEZONE ({x_wr_timezone}) and VTIMEZONE ({vtimezone}), but they do not match")]
    TimezoneMismatch {
        x_wr_timezone: String,
        vtimezone: String,
    },
}

/// One rejected VEVENT of an otherwise usable calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFailure {
    /// Position among the calendar's VEVENT components.
    pub index: usize,
    /// The raw UID, if the component carried one.
    pub uid: Option<String>,
    pub error: ValidationError,
}

/// Result of a collect-all transform in which some events failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCalendar {
    pub calendar: Calendar,
    pub failures: Vec<EventFailure>,
}

impl PartialCalendar {
    pub fn metadata(&self) -> &CalendarMetadata {
        &self.calendar.metadata
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.calendar.events
    }
}

impl fmt::Display for PartialCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Failed to parse {} of {} events. The correctly parsed events and the calendar metadata are listed below, together with the error messages for the events that failed.",
            self.failures.len(),
            self.failures.len() + self.calendar.events.len()
        )?;
        writeln!(f)?;
        writeln!(f, "Errors:")?;
        for failure in &self.failures {
            writeln!(f)?;
            match &failure.uid {
                Some(uid) => writeln!(f, "[{}] {uid}: {}", failure.index, failure.error)?,
                None => writeln!(f, "[{}] {}", failure.index, failure.error)?,
            }
        }
        let events = serde_json::to_string_pretty(&self.calendar.events).map_err(|_| fmt::Error)?;
        let metadata =
            serde_json::to_string_pretty(&self.calendar.metadata).map_err(|_| fmt::Error)?;
        writeln!(f)?;
        writeln!(f, "Events:")?;
        writeln!(f)?;
        writeln!(f, "{events}")?;
        writeln!(f)?;
        writeln!(f, "Metadata:")?;
        writeln!(f)?;
        write!(f, "{metadata}")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// The calendar itself is invalid, or an event failed under fail-fast.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{0}")]
    PartialEvents(Box<PartialCalendar>),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid iCalendar syntax")]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}
