//! SQL script parsing: placeholders, comment stripping, statement splitting.
//!
//! A script is parsed in a strictly ordered pipeline: split into lines,
//! substitute placeholder tokens, blank out comments, then feed the lines
//! through a [`StatementBuilder`] that assembles delimiter-terminated
//! statements. Each emitted [`Statement`] records the 1-based line of the
//! original source it started on, so execution errors point at the right
//! place in the file the user wrote.

use std::collections::HashMap;

use tracing::debug;

use crate::dialect::{Delimiter, Dialect};

/// One executable statement of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 1-based line of the original (pre-strip) source this statement began on.
    pub line_number: usize,
    /// The statement text, with the trailing delimiter stripped.
    pub sql: String,
}

/// Placeholder tokens substituted into scripts before parsing.
///
/// Tokens look like `${name}`. Unresolved placeholders are left verbatim;
/// checking that every placeholder resolved is the caller's concern.
#[derive(Debug, Clone)]
pub struct Placeholders {
    replacements: HashMap<String, String>,
    prefix: String,
    suffix: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            replacements: HashMap::new(),
            prefix: "${".to_string(),
            suffix: "}".to_string(),
        }
    }
}

impl Placeholders {
    /// Create an empty placeholder map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replacement.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.replacements.insert(name.into(), value.into());
    }

    /// Whether any replacements are configured.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    /// Substitute all configured placeholders in this line.
    pub fn apply(&self, line: &str) -> String {
        let mut replaced = line.to_string();
        for (name, value) in &self.replacements {
            let token = format!("{}{}{}", self.prefix, name, self.suffix);
            replaced = replaced.replace(&token, value);
        }
        replaced
    }
}

/// How a statement reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    /// The current delimiter was found at the end of a line.
    Delimited,
    /// An explicit delimiter-change directive was encountered.
    DelimiterChange,
}

/// Builds a SQL statement, one line at a time.
pub struct StatementBuilder<'d> {
    dialect: &'d dyn Dialect,
    /// The statement as written, line breaks preserved.
    statement: String,
    /// The statement reduced to a single line, for lexical matching.
    simplified: String,
    /// The original line the statement started on.
    line_number: usize,
    /// The delimiter currently terminating the statement. `None` while a
    /// dialect reports no active delimiter.
    delimiter: Option<Delimiter>,
    termination: Option<Termination>,
}

impl<'d> StatementBuilder<'d> {
    /// Create a builder starting with this delimiter.
    pub fn new(dialect: &'d dyn Dialect, delimiter: Option<Delimiter>) -> Self {
        Self {
            dialect,
            statement: String::new(),
            simplified: String::new(),
            line_number: 0,
            delimiter,
            termination: None,
        }
    }

    /// Record the original line number the statement starts on.
    pub fn set_line_number(&mut self, line_number: usize) {
        self.line_number = line_number;
    }

    /// Whether any non-blank content has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.simplified.is_empty()
    }

    /// Whether the statement is properly terminated.
    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// The delimiter in effect after this builder's lines were consumed.
    pub fn delimiter(&self) -> Option<&Delimiter> {
        self.delimiter.as_ref()
    }

    /// The assembled statement, with the delimiter stripped off.
    pub fn into_statement(self) -> Statement {
        Statement {
            line_number: self.line_number,
            sql: self.statement,
        }
    }

    /// Add this line to the statement being built.
    pub fn add_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() && self.is_empty() {
            // Blank leading lines never start a statement.
            return;
        }

        if !self.is_empty() {
            self.statement.push('\n');
            self.simplified.push(' ');
        }
        self.statement.push_str(line);
        self.simplified.push_str(trimmed);

        // Anything inside an open string literal must never be mistaken for
        // a terminator.
        if self
            .dialect
            .ends_with_open_multiline_string_literal(&self.simplified)
        {
            return;
        }

        let previous = self.delimiter.clone();
        self.delimiter =
            self.dialect
                .change_delimiter_if_necessary(&self.simplified, trimmed, previous.as_ref());
        if self.delimiter != previous && self.dialect.is_delimiter_change_explicit() {
            self.termination = Some(Termination::DelimiterChange);
            return;
        }

        if self.line_terminates_statement(trimmed) {
            self.strip_delimiter();
            self.termination = Some(Termination::Delimited);
        }
    }

    fn line_terminates_statement(&self, line: &str) -> bool {
        let Some(delimiter) = &self.delimiter else {
            return false;
        };

        let upper_line = line.to_uppercase();
        let upper_token = delimiter.token().to_uppercase();

        if delimiter.alone_on_line() && !upper_line.starts_with(&upper_token) {
            return false;
        }
        upper_line.ends_with(&upper_token)
    }

    fn strip_delimiter(&mut self) {
        let Some(delimiter) = &self.delimiter else {
            return;
        };

        let end = self.statement.trim_end().len();
        let start = end.saturating_sub(delimiter.token().len());
        let tail_matches = self
            .statement
            .get(start..end)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(delimiter.token()));
        if tail_matches {
            self.statement.truncate(start);
        }
    }
}

/// Parse a script into its ordered list of statements.
pub fn parse_script(
    source: &str,
    placeholders: &Placeholders,
    dialect: &dyn Dialect,
) -> Vec<Statement> {
    let substituted: Vec<String> = source
        .lines()
        .map(|line| placeholders.apply(line))
        .collect();
    let lines = strip_comments(&substituted, dialect);

    let mut statements = Vec::new();
    let mut delimiter = Some(dialect.default_delimiter());
    let mut builder = StatementBuilder::new(dialect, delimiter.clone());

    for (index, line) in lines.iter().enumerate() {
        if builder.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            builder.set_line_number(index + 1);
        }

        builder.add_line(line);

        match builder.termination() {
            Some(Termination::DelimiterChange) => {
                // The directive is consumed by the parser; it is not sent to
                // the database.
                delimiter = builder.delimiter().cloned();
                debug!("Statement delimiter changed at line {}: {:?}", index + 1, delimiter);
                builder = StatementBuilder::new(dialect, delimiter.clone());
            }
            Some(Termination::Delimited) => {
                if dialect.is_delimiter_change_explicit() {
                    // An explicitly changed delimiter stays active until the
                    // script changes it back.
                    delimiter = builder.delimiter().cloned();
                } else {
                    delimiter = Some(dialect.default_delimiter());
                }
                let statement = builder.into_statement();
                debug!("Found statement at line {}", statement.line_number);
                statements.push(statement);
                builder = StatementBuilder::new(dialect, delimiter.clone());
            }
            None => {}
        }
    }

    // A script ending mid-statement still yields the trailing statement.
    if !builder.is_empty() {
        statements.push(builder.into_statement());
    }

    statements
}

/// Blank out single-line and block comments, leaving line positions intact.
fn strip_comments(lines: &[String], dialect: &dyn Dialect) -> Vec<String> {
    let mut stripped = Vec::with_capacity(lines.len());
    let mut in_block_comment = false;

    for line in lines {
        let trimmed = line.trim();

        if !dialect.is_comment_directive(trimmed) {
            if !in_block_comment && dialect.is_single_line_comment(trimmed) {
                stripped.push(String::new());
                continue;
            }

            if !in_block_comment && trimmed.starts_with("/*") {
                in_block_comment = true;
            }

            if in_block_comment {
                if trimmed.ends_with("*/") {
                    in_block_comment = false;
                }
                stripped.push(String::new());
                continue;
            }
        }

        stripped.push(trimmed.to_string());
    }

    stripped
}
