//! Dialect hooks consumed by the script parser.
//!
//! Each database dialect differs in how statements end: stored procedure
//! bodies need delimiter changes, string literals span lines with
//! dialect-specific quoting, and some vendors hide executable statements
//! inside comment directives. The parser stays dialect-agnostic and asks a
//! [`Dialect`] strategy object about these lexical rules.

use std::fmt;

/// Marks the end of a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter {
    token: String,
    alone_on_line: bool,
}

impl Delimiter {
    /// Create a new delimiter.
    pub fn new(token: impl Into<String>, alone_on_line: bool) -> Self {
        Self {
            token: token.into(),
            alone_on_line,
        }
    }

    /// The default `;` delimiter.
    pub fn semicolon() -> Self {
        Self::new(";", false)
    }

    /// The delimiter token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the delimiter must stand alone on its own line.
    pub fn alone_on_line(&self) -> bool {
        self.alone_on_line
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Lexical rules of one SQL dialect, injected into the script parser.
///
/// All hooks receive the "simplified" statement: the statement assembled so
/// far, reduced to a single line with line breaks replaced by spaces. They
/// are pure functions of that text; the parser owns all state.
pub trait Dialect: Send + Sync {
    /// The delimiter a script starts out with.
    fn default_delimiter(&self) -> Delimiter {
        Delimiter::semicolon()
    }

    /// Whether this line is a directive disguised as a comment that must be
    /// passed to the database rather than stripped.
    fn is_comment_directive(&self, _line: &str) -> bool {
        false
    }

    /// Whether this line is a single-line comment.
    fn is_single_line_comment(&self, line: &str) -> bool {
        line.starts_with("--")
    }

    /// Whether this line changes the statement delimiter.
    ///
    /// Returns the delimiter to use from here on; `None` means no delimiter
    /// is active. The default keeps the current delimiter.
    fn change_delimiter_if_necessary(
        &self,
        _statement: &str,
        _line: &str,
        current: Option<&Delimiter>,
    ) -> Option<Delimiter> {
        current.cloned()
    }

    /// Whether delimiter changes are explicit directives (e.g. a `DELIMITER`
    /// line) rather than implied by statement content.
    fn is_delimiter_change_explicit(&self) -> bool {
        false
    }

    /// Whether the statement assembled so far ends inside an unterminated
    /// multi-line string literal that continues on the next line.
    fn ends_with_open_multiline_string_literal(&self, statement: &str) -> bool;
}

/// Plain ANSI-ish dialect: `'` literals with `''` escapes, `;` delimiter.
#[derive(Debug, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn ends_with_open_multiline_string_literal(&self, statement: &str) -> bool {
        let cleaned = statement.replace("''", "");
        cleaned.matches('\'').count() % 2 == 1
    }
}

/// MySQL: `DELIMITER` directives, `#` comments, version-gated comment
/// directives, backslash escapes, `'` and `"` literals.
#[derive(Debug, Default)]
pub struct MySqlDialect;

const DELIMITER_KEYWORD: &str = "DELIMITER";

impl Dialect for MySqlDialect {
    fn is_comment_directive(&self, line: &str) -> bool {
        line.starts_with("/*!") && line.ends_with("*/;")
    }

    fn is_single_line_comment(&self, line: &str) -> bool {
        line.starts_with("--") || line.starts_with('#')
    }

    fn change_delimiter_if_necessary(
        &self,
        _statement: &str,
        line: &str,
        current: Option<&Delimiter>,
    ) -> Option<Delimiter> {
        if line.to_uppercase().starts_with(DELIMITER_KEYWORD) {
            let token = line[DELIMITER_KEYWORD.len()..].trim();
            if !token.is_empty() {
                return Some(Delimiter::new(token, false));
            }
        }
        current.cloned()
    }

    fn is_delimiter_change_explicit(&self) -> bool {
        true
    }

    fn ends_with_open_multiline_string_literal(&self, statement: &str) -> bool {
        // Escaped quotes never delimit a literal.
        let cleaned = statement
            .replace("''", "")
            .replace("\\'", "")
            .replace("\\\"", "");

        let mut open: Option<char> = None;
        for c in cleaned.chars() {
            match open {
                None if c == '\'' || c == '"' => open = Some(c),
                Some(quote) if c == quote => open = None,
                _ => {}
            }
        }
        open.is_some()
    }
}

/// PostgreSQL: dollar-quoted (`$$`, `$tag$`) multi-line literals.
#[derive(Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn ends_with_open_multiline_string_literal(&self, statement: &str) -> bool {
        let cleaned = statement.replace("''", "");
        let chars: Vec<char> = cleaned.chars().collect();

        enum Literal {
            None,
            Quote,
            Dollar(Vec<char>),
        }

        let mut state = Literal::None;
        let mut i = 0;
        while i < chars.len() {
            match &state {
                Literal::None => {
                    if chars[i] == '\'' {
                        state = Literal::Quote;
                        i += 1;
                    } else if let Some(tag) = dollar_tag(&chars, i) {
                        i += tag.len();
                        state = Literal::Dollar(tag);
                    } else {
                        i += 1;
                    }
                }
                Literal::Quote => {
                    if chars[i] == '\'' {
                        state = Literal::None;
                    }
                    i += 1;
                }
                Literal::Dollar(tag) => {
                    if chars[i..].starts_with(tag.as_slice()) {
                        i += tag.len();
                        state = Literal::None;
                    } else {
                        i += 1;
                    }
                }
            }
        }

        !matches!(state, Literal::None)
    }
}

/// Reads a `$tag$` opener (`$$`, `$BODY$`, `$xyz123$`, ...) at this offset.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    if chars.get(start) != Some(&'$') {
        return None;
    }
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if chars.get(end) == Some(&'$') {
        Some(chars[start..=end].to_vec())
    } else {
        None
    }
}
