//! Composable cardinality and parameter rules shared by every scope.

use serde::Serialize;

use crate::error::{Scope, ValidationError};
use crate::model::PropertyValue;

/// Compact JSON rendering of the data a rule rejected.
pub fn snapshot<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unrenderable: {err}>"))
}

pub fn require_exactly_one<'a>(
    property: Option<&'a [PropertyValue]>,
    name: &str,
    scope: Scope,
) -> Result<&'a PropertyValue, ValidationError> {
    match property {
        None | Some([]) => Err(ValidationError::Missing {
            scope,
            name: name.to_string(),
            received: snapshot(&property),
        }),
        Some([single]) => Ok(single),
        Some(many) => Err(ValidationError::Repeated {
            scope,
            name: name.to_string(),
            count: many.len(),
            received: snapshot(many),
        }),
    }
}

pub fn optional_at_most_one<'a>(
    property: Option<&'a [PropertyValue]>,
    name: &str,
    scope: Scope,
) -> Result<Option<&'a PropertyValue>, ValidationError> {
    match property {
        None => Ok(None),
        Some(_) => require_exactly_one(property, name, scope).map(Some),
    }
}

pub fn require_no_parameters(
    property: Option<&[PropertyValue]>,
    name: &str,
    scope: Scope,
) -> Result<(), ValidationError> {
    let occurrences = property.ok_or_else(|| ValidationError::Missing {
        scope,
        name: name.to_string(),
        received: snapshot(&property),
    })?;

    match occurrences
        .iter()
        .position(|occurrence| !occurrence.parameters.is_empty())
    {
        Some(index) => Err(ValidationError::UnexpectedParameters {
            scope,
            name: name.to_string(),
            index,
            parameters: snapshot(&occurrences[index].parameters),
            received: snapshot(occurrences),
        }),
        None => Ok(()),
    }
}

pub fn optional_no_parameters(
    property: Option<&[PropertyValue]>,
    name: &str,
    scope: Scope,
) -> Result<(), ValidationError> {
    match property {
        None => Ok(()),
        Some(_) => require_no_parameters(property, name, scope),
    }
}

/// Fails when more than one of `properties` is present.
pub fn mutually_exclusive(
    properties: &[(Option<&[PropertyValue]>, &str)],
    message: &str,
    scope: Scope,
) -> Result<(), ValidationError> {
    let present: Vec<(&str, &[PropertyValue])> = properties
        .iter()
        .filter_map(|(property, name)| property.map(|values| (*name, values)))
        .collect();

    if present.len() > 1 {
        return Err(ValidationError::MutuallyExclusive {
            scope,
            message: message.to_string(),
            received: snapshot(&present),
        });
    }

    Ok(())
}

/// A single parameter-free occurrence, or nothing.
pub fn optional_plain_value(
    property: Option<&[PropertyValue]>,
    name: &str,
    scope: Scope,
) -> Result<Option<String>, ValidationError> {
    let value = optional_at_most_one(property, name, scope)?;
    optional_no_parameters(property, name, scope)?;
    Ok(value.map(|occurrence| occurrence.value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(raw: &[&str]) -> Vec<PropertyValue> {
        raw.iter().map(|v| PropertyValue::new(*v)).collect()
    }

    #[test]
    fn exactly_one_rejects_missing_and_repeated() {
        let one = values(&["a"]);
        let two = values(&["a", "b"]);

        assert_eq!(
            require_exactly_one(Some(one.as_slice()), "UID", Scope::Event).expect("one").value,
            "a"
        );
        let missing = require_exactly_one(None, "UID", Scope::Event).unwrap_err();
        assert_eq!(missing.to_string(), "VEVENT must have UID, received: null");
        assert!(matches!(
            require_exactly_one(Some(two.as_slice()), "UID", Scope::Event),
            Err(ValidationError::Repeated { count: 2, .. })
        ));
    }

    #[test]
    fn at_most_one_allows_absence() {
        assert_eq!(
            optional_at_most_one(None, "LOCATION", Scope::Event).expect("absent"),
            None
        );
        let two = values(&["a", "b"]);
        assert!(optional_at_most_one(Some(two.as_slice()), "LOCATION", Scope::Event).is_err());
    }

    #[test]
    fn parameters_are_reported_with_their_index() {
        let occurrences = vec![
            PropertyValue::new("a"),
            PropertyValue::new("b").with_parameter("LANGUAGE", "de"),
        ];
        let err = require_no_parameters(Some(occurrences.as_slice()), "SUMMARY", Scope::Event).unwrap_err();
        match err {
            ValidationError::UnexpectedParameters {
                index, parameters, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(parameters, r#"{"LANGUAGE":"de"}"#);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(require_no_parameters(None, "SUMMARY", Scope::Event).is_err());
        assert!(optional_no_parameters(None, "SUMMARY", Scope::Event).is_ok());
    }

    #[test]
    fn mutual_exclusion_counts_present_properties() {
        let end = values(&["20240101T000000Z"]);
        let duration = values(&["PT1H"]);
        let message = "DTEND and DURATION are mutually exclusive";

        assert!(
            mutually_exclusive(&[(Some(end.as_slice()), "DTEND"), (None, "DURATION")], message, Scope::Event)
                .is_ok()
        );
        let err = mutually_exclusive(
            &[(Some(end.as_slice()), "DTEND"), (Some(duration.as_slice()), "DURATION")],
            message,
            Scope::Event,
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("VEVENT DTEND and DURATION are mutually exclusive"));
    }
}
