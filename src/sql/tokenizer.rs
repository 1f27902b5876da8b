// ABOUTME: Splits SQL scripts into individual statements
// ABOUTME: Semicolons inside quoted literals and comments are not separators

/// Iterator over the statements of a SQL script.
///
/// Statements are trimmed, comments are removed, and entries that are empty
/// once comments are gone are skipped. The iterator is `Clone`, so a script
/// can be walked again from the start (for example to count statements
/// before replaying them).
///
/// Quoted literals use `'`, `"` or a backtick. Inside a literal, the active
/// quote character doubled (`''`) is an escaped quote. Backslashes are
/// ordinary characters: every dump this crate produces escapes by doubling.
#[derive(Debug, Clone)]
pub struct Statements<'a> {
    input: &'a str,
    pos: usize,
}

/// Statements of `sql`, lazily
///
/// # Examples
///
/// ```
/// # use sqlferry::sql::statements;
/// let sql = "INSERT INTO t VALUES ('a;b', 'it''s'); INSERT INTO t VALUES (1);";
/// let parsed: Vec<String> = statements(sql).collect();
/// assert_eq!(parsed, vec![
///     "INSERT INTO t VALUES ('a;b', 'it''s')",
///     "INSERT INTO t VALUES (1)",
/// ]);
/// ```
pub fn statements(sql: &str) -> Statements<'_> {
    Statements { input: sql, pos: 0 }
}

/// All statements of `sql` collected into a vector
pub fn split_statements(sql: &str) -> Vec<String> {
    statements(sql).collect()
}

impl<'a> Iterator for Statements<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.pos < self.input.len() {
            let (statement, next_pos) = scan_statement(self.input, self.pos);
            self.pos = next_pos;
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        None
    }
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Normal,
    Literal(char),
    LineComment,
    BlockComment,
}

/// Scan one statement starting at byte offset `start`.
///
/// Returns the statement text with comments removed and the offset just past
/// the terminating semicolon (or the end of input).
fn scan_statement(input: &str, start: usize) -> (String, usize) {
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input[start..].char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match state {
            State::Normal => match ch {
                ';' => return (current, start + offset + ch.len_utf8()),
                '\'' | '"' | '`' => {
                    state = State::Literal(ch);
                    current.push(ch);
                }
                '-' if matches!(chars.peek(), Some((_, '-'))) => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if matches!(chars.peek(), Some((_, '*'))) => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => current.push(ch),
            },
            State::Literal(quote) => {
                current.push(ch);
                if ch == quote {
                    if matches!(chars.peek(), Some((_, next)) if *next == quote) {
                        // Doubled quote stays inside the literal
                        chars.next();
                        current.push(quote);
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Normal;
                    current.push('\n');
                }
            }
            State::BlockComment => {
                if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    state = State::Normal;
                    current.push(' ');
                }
            }
        }
    }

    (current, input.len())
}
