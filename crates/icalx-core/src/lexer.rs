use crate::error::SyntaxError;

/// Strips carriage returns, unfolds continuation lines and drops blank lines.
pub fn normalize_line_continuations(input: &str) -> Vec<String> {
    let stripped = input.replace('\r', "");
    let mut lines: Vec<String> = Vec::new();

    for raw in stripped.split('\n') {
        if let Some(continuation) = raw.strip_prefix(' ') {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        lines.push(raw.to_string());
    }

    lines.retain(|line| !line.is_empty());
    lines
}

/// Cursor over normalized content lines.
///
/// Never backtracks past the start of the current line; the grammar is
/// strictly line oriented.
#[derive(Debug, Clone)]
pub struct Lexer {
    lines: Vec<String>,
    line: usize,
    offset: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            lines: normalize_line_continuations(input),
            line: 0,
            offset: 0,
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.line >= self.lines.len()
    }

    /// 1-based number of the current line.
    pub fn line_number(&self) -> usize {
        self.line + 1
    }

    pub fn remaining_lines(&self) -> usize {
        self.lines.len().saturating_sub(self.line)
    }

    pub fn expect_literal(&mut self, literal: &str) -> Result<(), SyntaxError> {
        let current = self.current_line(literal)?;
        if current
            .get(self.offset..)
            .is_some_and(|rest| rest.starts_with(literal))
        {
            self.offset += literal.len();
            return Ok(());
        }

        Err(SyntaxError::ExpectedLiteral {
            expected: literal.to_string(),
            line: self.line_number(),
            from: self.offset,
            to: self.offset + literal.len(),
            got: current.to_string(),
        })
    }

    pub fn expect_end_of_line(&mut self) -> Result<(), SyntaxError> {
        let current = self.current_line("end of line")?;
        if current.len() == self.offset {
            self.advance_line();
            return Ok(());
        }

        Err(SyntaxError::ExpectedEndOfLine {
            line: self.line_number(),
            offset: self.offset,
            got: current.to_string(),
        })
    }

    /// Up to `n` characters at the cursor; empty past the end of input.
    pub fn peek(&self, n: usize) -> &str {
        let rest = self.peek_line();
        match rest.char_indices().nth(n) {
            Some((end, _)) => &rest[..end],
            None => rest,
        }
    }

    /// The unconsumed remainder of the current line.
    pub fn peek_line(&self) -> &str {
        self.lines
            .get(self.line)
            .and_then(|line| line.get(self.offset..))
            .unwrap_or("")
    }

    pub fn advance_line(&mut self) {
        self.line += 1;
        self.offset = 0;
    }

    fn current_line(&self, expected: &str) -> Result<&str, SyntaxError> {
        self.lines
            .get(self.line)
            .map(String::as_str)
            .ok_or_else(|| SyntaxError::UnexpectedEndOfInput {
                line: self.line_number(),
                expected: expected.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfolds_continuation_lines() {
        let lines = normalize_line_continuations(
            "BEGIN:VEVENT\r\nDESCRIPTION:Join with\r\n  Google Meet\r\n\r\nEND:VEVENT\r\n",
        );
        assert_eq!(
            lines,
            vec!["BEGIN:VEVENT", "DESCRIPTION:Join with Google Meet", "END:VEVENT"]
        );
    }

    #[test]
    fn expects_literals_and_line_ends() {
        let mut lexer = Lexer::new("BEGIN:VCALENDAR\nEND:VCALENDAR\n");
        lexer.expect_literal("BEGIN:").expect("literal");
        assert_eq!(lexer.peek(3), "VCA");
        assert_eq!(lexer.peek_line(), "VCALENDAR");
        lexer.expect_literal("VCALENDAR").expect("literal");
        lexer.expect_end_of_line().expect("eol");
        assert_eq!(lexer.line_number(), 2);
        assert_eq!(lexer.peek(4), "END:");
    }

    #[test]
    fn reports_literal_mismatch_position() {
        let mut lexer = Lexer::new("END:VTODO");
        let err = lexer.expect_literal("END:VEVENT").unwrap_err();
        assert_eq!(
            err,
            SyntaxError::ExpectedLiteral {
                expected: "END:VEVENT".to_string(),
                line: 1,
                from: 0,
                to: 10,
                got: "END:VTODO".to_string(),
            }
        );
    }

    #[test]
    fn rejects_trailing_text_before_newline() {
        let mut lexer = Lexer::new("BEGIN:VCALENDAR extra");
        lexer.expect_literal("BEGIN:VCALENDAR").expect("literal");
        assert!(matches!(
            lexer.expect_end_of_line(),
            Err(SyntaxError::ExpectedEndOfLine { line: 1, offset: 15, .. })
        ));
    }

    #[test]
    fn reading_past_the_end_is_an_error() {
        let mut lexer = Lexer::new("");
        assert!(lexer.is_at_end());
        assert_eq!(lexer.peek(6), "");
        assert!(matches!(
            lexer.expect_literal("BEGIN:VCALENDAR"),
            Err(SyntaxError::UnexpectedEndOfInput { line: 1, .. })
        ));
    }
}
