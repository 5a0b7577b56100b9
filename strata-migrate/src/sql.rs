//! SQL script splitting.
//!
//! Scripts are split on `;` outside of string literals, quoted identifiers and
//! comments. `CREATE TRIGGER ... BEGIN ... END;` bodies are kept whole.

/// Lexer state while walking a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    /// Inside `'...'`.
    InQuote,
    /// Inside `"..."`, `` `...` `` or `[...]`.
    InAltQuote(char),
    InLineComment,
    InBlockComment,
}

/// Splits SQL scripts into individual statements.
#[derive(Debug, Clone)]
pub struct StatementSplitter {
    delimiter: char,
    keep_comments: bool,
}

impl Default for StatementSplitter {
    fn default() -> Self {
        Self {
            delimiter: ';',
            keep_comments: false,
        }
    }
}

impl StatementSplitter {
    /// Create a splitter with the default `;` delimiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different statement delimiter.
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Keep comments in the emitted statements.
    pub fn keep_comments(mut self, keep: bool) -> Self {
        self.keep_comments = keep;
        self
    }

    /// Split `script` into trimmed, non-empty statements without their delimiter.
    pub fn split(&self, script: &str) -> Vec<String> {
        let mut statements = Vec::new();
        let mut current = String::new();
        let mut word = String::new();
        let mut block_depth = 0usize;
        let mut state = State::Outside;
        let mut chars = script.chars().peekable();

        while let Some(c) = chars.next() {
            match state {
                State::Outside => {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        current.push(c);
                        continue;
                    }
                    self.close_word(&mut word, &current, &mut block_depth);

                    match c {
                        '\'' => {
                            state = State::InQuote;
                            current.push(c);
                        }
                        '"' | '`' => {
                            state = State::InAltQuote(c);
                            current.push(c);
                        }
                        '[' => {
                            state = State::InAltQuote(']');
                            current.push(c);
                        }
                        '-' if chars.peek() == Some(&'-') => {
                            chars.next();
                            state = State::InLineComment;
                            if self.keep_comments {
                                current.push_str("--");
                            }
                        }
                        '/' if chars.peek() == Some(&'*') => {
                            chars.next();
                            state = State::InBlockComment;
                            if self.keep_comments {
                                current.push_str("/*");
                            }
                        }
                        c if c == self.delimiter && block_depth == 0 => {
                            push_statement(&mut statements, &mut current);
                        }
                        _ => current.push(c),
                    }
                }
                State::InQuote => {
                    current.push(c);
                    if c == '\'' {
                        // '' is an escaped quote.
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            current.push('\'');
                        } else {
                            state = State::Outside;
                        }
                    }
                }
                State::InAltQuote(close) => {
                    current.push(c);
                    if c == close {
                        if chars.peek() == Some(&close) {
                            chars.next();
                            current.push(close);
                        } else {
                            state = State::Outside;
                        }
                    }
                }
                State::InLineComment => {
                    if c == '\n' {
                        state = State::Outside;
                        current.push('\n');
                    } else if self.keep_comments {
                        current.push(c);
                    }
                }
                State::InBlockComment => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        state = State::Outside;
                        if self.keep_comments {
                            current.push_str("*/");
                        } else {
                            current.push(' ');
                        }
                    } else if self.keep_comments {
                        current.push(c);
                    }
                }
            }
        }

        self.close_word(&mut word, &current, &mut block_depth);
        push_statement(&mut statements, &mut current);
        statements
    }

    fn close_word(&self, word: &mut String, current: &str, block_depth: &mut usize) {
        if word.is_empty() {
            return;
        }
        if word.eq_ignore_ascii_case("BEGIN") && is_trigger(current) {
            *block_depth += 1;
        } else if word.eq_ignore_ascii_case("CASE") && *block_depth > 0 {
            *block_depth += 1;
        } else if word.eq_ignore_ascii_case("END") && *block_depth > 0 {
            *block_depth -= 1;
        }
        word.clear();
    }
}

fn is_trigger(statement: &str) -> bool {
    let mut words = statement.split_whitespace().map(str::to_ascii_uppercase);
    if words.next().as_deref() != Some("CREATE") {
        return false;
    }
    words.take(4).any(|w| w == "TRIGGER")
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Split with the default settings.
pub fn split_statements(script: &str) -> Vec<String> {
    StatementSplitter::default().split(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        let stmts = split_statements("CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);");
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]);
    }

    #[test]
    fn test_split_ignores_delimiter_in_literals() {
        let stmts = split_statements(
            "INSERT INTO t VALUES ('a;b', 'it''s; fine');\nSELECT \"odd;name\" FROM t;",
        );
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "INSERT INTO t VALUES ('a;b', 'it''s; fine')");
        assert_eq!(stmts[1], "SELECT \"odd;name\" FROM t");
    }

    #[test]
    fn test_split_strips_comments() {
        let script = "-- leading; comment\nCREATE TABLE a (id INT); /* block; */\n-- trailing";
        let stmts = split_statements(script);
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)"]);
    }

    #[test]
    fn test_split_keeps_comments_when_asked() {
        let stmts = StatementSplitter::new()
            .keep_comments(true)
            .split("SELECT 1; -- note\n");
        assert_eq!(stmts, vec!["SELECT 1", "-- note"]);
    }

    #[test]
    fn test_trigger_body_is_one_statement() {
        let script = r#"
CREATE TRIGGER touch AFTER UPDATE ON users
BEGIN
    UPDATE users SET updated = CASE WHEN 1 THEN 2 ELSE 3 END WHERE id = NEW.id;
    INSERT INTO audit VALUES (NEW.id);
END;
SELECT 1;
"#;
        let stmts = split_statements(script);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TRIGGER"));
        assert!(stmts[0].ends_with("END"));
        assert_eq!(stmts[1], "SELECT 1");
    }

    #[test]
    fn test_begin_transaction_is_not_a_block() {
        let stmts = split_statements("BEGIN; SELECT 1; COMMIT;");
        assert_eq!(stmts, vec!["BEGIN", "SELECT 1", "COMMIT"]);
    }

    #[test]
    fn test_custom_delimiter() {
        let stmts = StatementSplitter::new().delimiter('$').split("SELECT 1$SELECT 2$");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_empty_script() {
        assert!(split_statements("   \n-- only a comment\n").is_empty());
    }
}
