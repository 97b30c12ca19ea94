use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::recurrence::RecurrenceRule;

pub type Parameters = BTreeMap<String, String>;

/// Property key to every occurrence of it, in encounter order.
pub type Properties = BTreeMap<String, Vec<PropertyValue>>;

/// One `KEY;PARAM=VAL:VALUE` line, minus the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyValue {
    pub value: String,
    pub parameters: Parameters,
}

impl PropertyValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// A `BEGIN:X` .. `END:X` block of the generic syntax tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Component {
    pub properties: Properties,
    pub components: BTreeMap<String, Vec<Component>>,
}

impl Component {
    pub fn property(&self, key: &str) -> Option<&[PropertyValue]> {
        self.properties.get(key).map(Vec::as_slice)
    }

    pub fn components_named(&self, name: &str) -> &[Component] {
        self.components.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn push_property(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.entry(key.into()).or_default().push(value);
    }

    pub fn push_component(&mut self, name: impl Into<String>, component: Component) {
        self.components.entry(name.into()).or_default().push(component);
    }

    /// Copies every property whose key is not in `known`.
    pub fn rest_properties(&self, known: &[&str]) -> Properties {
        self.properties
            .iter()
            .filter(|(key, _)| !known.contains(&key.as_str()))
            .map(|(key, values)| (key.clone(), values.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDate {
    #[serde(serialize_with = "serialize_instant")]
    pub date: DateTime<Utc>,
    pub is_all_day: bool,
    /// Only set when it differs from the calendar's default timezone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recurrence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<RecurrenceRule>,
    pub exdate: Vec<CalendarDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_id: Option<CalendarDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub title: String,
    pub dtstamp: CalendarDate,
    pub start: CalendarDate,
    pub end: CalendarDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<CalendarDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<CalendarDate>,
    pub organizers: Vec<PropertyValue>,
    pub attendees: Vec<PropertyValue>,
    pub recurrence: Recurrence,
    /// Raw VALARM property tables; not validated yet.
    pub alarms: Vec<Properties>,
    pub rest: Properties,
}

/// A STANDARD or DAYLIGHT block of a VTIMEZONE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimezoneObservance {
    pub tzoffsetfrom: String,
    pub tzoffsetto: String,
    pub dtstart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tzname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
    pub rest: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarTimezone {
    pub tzid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tzurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_lic_location: Option<String>,
    pub standard: Vec<TimezoneObservance>,
    pub daylight: Vec<TimezoneObservance>,
    pub rest: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarMetadata {
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prodid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calscale: Option<String>,
    pub defined_timezones: Vec<CalendarTimezone>,
    pub rest: Properties,
    /// Nested components other than VEVENT and VTIMEZONE, kept verbatim.
    pub rest_components: BTreeMap<String, Vec<Component>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Calendar {
    pub metadata: CalendarMetadata,
    pub events: Vec<CalendarEvent>,
}

fn serialize_instant<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}
