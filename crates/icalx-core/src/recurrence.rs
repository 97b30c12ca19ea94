use std::fmt;

use chrono::DateTime;
use rrule::{RRule, RRuleError, RRuleSet, Tz, Unvalidated};
use serde::{Serialize, Serializer};

/// Opaque handle over an RRULE, parsed by the `rrule` engine.
///
/// The transform layer never looks inside; callers enumerate occurrences
/// through [`RecurrenceRule::build`].
#[derive(Clone)]
pub struct RecurrenceRule {
    source: String,
    rule: RRule<Unvalidated>,
}

impl RecurrenceRule {
    pub fn parse(text: &str) -> Result<Self, RRuleError> {
        let trimmed = text.trim();
        let body = trimmed.strip_prefix("RRULE:").unwrap_or(trimmed);
        let rule = body.parse::<RRule<Unvalidated>>()?;
        Ok(Self {
            source: trimmed.to_string(),
            rule,
        })
    }

    /// The rule text as it appeared in the calendar.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn rule(&self) -> &RRule<Unvalidated> {
        &self.rule
    }

    /// Validates the rule against `dtstart` and returns an occurrence set.
    pub fn build(&self, dtstart: DateTime<Tz>) -> Result<RRuleSet, RRuleError> {
        self.rule.clone().build(dtstart)
    }
}

impl PartialEq for RecurrenceRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for RecurrenceRule {}

impl fmt::Debug for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecurrenceRule").field(&self.source).finish()
    }
}

impl Serialize for RecurrenceRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}
