use crate::error::SyntaxError;
use crate::lexer::Lexer;
use crate::model::{Component, Parameters, PropertyValue};

const BEGIN: &str = "BEGIN:";
const END: &str = "END:";

/// Parses the component named `expected_name` starting at the cursor.
///
/// Nested components are parsed recursively; the depth is bounded by the
/// nesting of the input.
pub fn parse_component(lexer: &mut Lexer, expected_name: &str) -> Result<Component, SyntaxError> {
    let mut component = Component::default();

    lexer.expect_literal(&format!("{BEGIN}{expected_name}"))?;
    lexer.expect_end_of_line()?;

    loop {
        if lexer.is_at_end() {
            return Err(SyntaxError::UnexpectedEndOfInput {
                line: lexer.line_number(),
                expected: format!("{END}{expected_name}"),
            });
        }

        if lexer.peek(BEGIN.len()) == BEGIN {
            let name = lexer.peek_line()[BEGIN.len()..].to_string();
            let nested = parse_component(lexer, &name)?;
            component.push_component(name, nested);
        } else if lexer.peek(END.len()) != END {
            let (key, value) = parse_property(lexer)?;
            component.push_property(key, value);
        } else {
            break;
        }
    }

    lexer.expect_literal(&format!("{END}{expected_name}"))?;
    lexer.expect_end_of_line()?;

    Ok(component)
}

/// Decodes the property line at the cursor and moves to the next line.
pub fn parse_property(lexer: &mut Lexer) -> Result<(String, PropertyValue), SyntaxError> {
    let line = lexer.peek_line();
    let colon = find_unquoted(line, ':').ok_or_else(|| SyntaxError::MalformedProperty {
        line: lexer.line_number(),
        got: line.to_string(),
    })?;

    let head = &line[..colon];
    let value = unescape_value(&line[colon + 1..]);

    let mut segments = split_unquoted(head, ';').into_iter();
    let key = segments.next().unwrap_or_default().to_string();
    let parameters: Parameters = segments.map(parse_parameter).collect();

    lexer.advance_line();

    Ok((key, PropertyValue { value, parameters }))
}

/// `\n`/`\N` become a newline, other escapes stand for the escaped character.
pub fn unescape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}

fn parse_parameter(raw: &str) -> (String, String) {
    let (name, value) = raw.split_once('=').unwrap_or((raw, ""));
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    (name.to_string(), value.to_string())
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unquoted(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(i) = find_unquoted(rest, separator) {
        parts.push(&rest[..i]);
        rest = &rest[i + separator.len_utf8()..];
    }
    parts.push(rest);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_root(input: &str) -> Result<Component, SyntaxError> {
        parse_component(&mut Lexer::new(input), "VCALENDAR")
    }

    #[test]
    fn parses_nested_components_in_order() {
        let raw = "BEGIN:VCALENDAR\nVERSION:2.0\nBEGIN:VEVENT\nUID:1\nBEGIN:VALARM\nACTION:DISPLAY\nEND:VALARM\nEND:VEVENT\nBEGIN:VEVENT\nUID:2\nEND:VEVENT\nEND:VCALENDAR\n";
        let root = parse_root(raw).expect("parse");

        assert_eq!(root.property("VERSION").expect("version")[0].value, "2.0");
        let events = root.components_named("VEVENT");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].property("UID").expect("uid")[0].value, "1");
        assert_eq!(events[1].property("UID").expect("uid")[0].value, "2");
        assert_eq!(events[0].components_named("VALARM").len(), 1);
    }

    #[test]
    fn keeps_every_occurrence_with_its_own_parameters() {
        let raw = "BEGIN:VCALENDAR\nATTENDEE;CN=Bob;ROLE=CHAIR:mailto:bob@example.com\nATTENDEE:mailto:alice@example.com\nEND:VCALENDAR\n";
        let root = parse_root(raw).expect("parse");
        let attendees = root.property("ATTENDEE").expect("attendees");

        assert_eq!(attendees.len(), 2);
        assert_eq!(attendees[0].value, "mailto:bob@example.com");
        assert_eq!(attendees[0].parameter("CN"), Some("Bob"));
        assert_eq!(attendees[0].parameter("ROLE"), Some("CHAIR"));
        assert_eq!(attendees[1].value, "mailto:alice@example.com");
        assert!(attendees[1].parameters.is_empty());
    }

    #[test]
    fn quoted_parameters_may_contain_colons() {
        let raw = "BEGIN:VCALENDAR\nORGANIZER;CN=\"Doe; Jane: CEO\":mailto:jane@example.com\nEND:VCALENDAR\n";
        let root = parse_root(raw).expect("parse");
        let organizer = &root.property("ORGANIZER").expect("organizer")[0];

        assert_eq!(organizer.value, "mailto:jane@example.com");
        assert_eq!(organizer.parameter("CN"), Some("Doe; Jane: CEO"));
    }

    #[test]
    fn unescapes_values() {
        assert_eq!(unescape_value(r"line\nnext"), "line\nnext");
        assert_eq!(unescape_value(r"a\, b\; c"), "a, b; c");
        assert_eq!(unescape_value(r"back\\slash"), r"back\slash");
        assert_eq!(unescape_value("dangling\\"), "dangling");
    }

    #[test]
    fn mismatched_end_is_a_syntax_error() {
        let raw = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:1\nEND:VTODO\nEND:VCALENDAR\n";
        let err = parse_root(raw).unwrap_err();
        assert!(matches!(
            err,
            SyntaxError::ExpectedLiteral { ref expected, line: 4, .. } if expected == "END:VEVENT"
        ));
    }

    #[test]
    fn missing_end_is_a_syntax_error() {
        let raw = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:1\n";
        assert!(matches!(
            parse_root(raw),
            Err(SyntaxError::UnexpectedEndOfInput { ref expected, .. }) if expected == "END:VEVENT"
        ));
    }

    #[test]
    fn property_without_colon_is_rejected() {
        let raw = "BEGIN:VCALENDAR\nGARBAGE\nEND:VCALENDAR\n";
        assert!(matches!(
            parse_root(raw),
            Err(SyntaxError::MalformedProperty { line: 2, .. })
        ));
    }

    #[test]
    fn root_must_be_the_expected_component() {
        assert!(matches!(
            parse_root("BEGIN:VEVENT\nEND:VEVENT\n"),
            Err(SyntaxError::ExpectedLiteral { line: 1, .. })
        ));
    }
}
