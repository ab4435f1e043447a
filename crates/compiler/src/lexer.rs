//! `TokenIterator` — the lexer (§4.2)
//!
//! Produces a flat token stream from the (already preprocessed) source.
//! Each token carries the byte offset of its first character, which the
//! top-level `compile()` entry point later turns into a 1-indexed line
//! number for "Line N: …" error messages (§4.7).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    Identifier,
    IntLiteral,
    FloatLiteral,
    DoubleLiteral,
    BoolLiteral,
    StringLiteral,
    Operator,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset of the token's first character in the (preprocessed)
    /// source, used for "Line N: …" reporting.
    pub offset: usize,
}

impl Token {
    pub fn is(&self, s: &str) -> bool {
        self.text == s
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

const KEYWORDS: &[&str] = &[
    "float", "int", "double", "bool", "void", "Buffer", "true", "false", "return", "const",
    "class", "public", "private",
];

/// Operators, longest-match-first so that e.g. `===` is not lexed as `==`
/// followed by `=`.
const OPERATORS: &[&str] = &[
    ">>>=", "<<=", ">>=", "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "&=", "|=", "^=",
    "++", "--", "+=", "-=", "*=", "/=", "%=", "<<", ">>>", ">>", "?", ":", "=", "+", "-", "*",
    "/", "%", "&", "|", "^", "!", "<", ">", "(", ")", "{", "}", "[", "]", ";", ",", ".",
];

pub struct LexError {
    pub message: String,
    pub offset: usize,
}

/// Lex `source` into a token stream terminated by a single `Eof` token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut pos = 0usize;
    let mut tokens = Vec::new();

    while pos < len {
        let c = bytes[pos] as char;

        // whitespace
        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // line comment
        if c == '/' && pos + 1 < len && bytes[pos + 1] as char == '/' {
            while pos < len && bytes[pos] as char != '\n' {
                pos += 1;
            }
            continue;
        }

        // block comment
        if c == '/' && pos + 1 < len && bytes[pos + 1] as char == '*' {
            let start = pos;
            pos += 2;
            let mut closed = false;
            while pos + 1 < len {
                if bytes[pos] as char == '*' && bytes[pos + 1] as char == '/' {
                    pos += 2;
                    closed = true;
                    break;
                }
                pos += 1;
            }
            if !closed {
                return Err(LexError {
                    message: "Unterminated '/*' comment".to_string(),
                    offset: start,
                });
            }
            continue;
        }

        // string literal
        if c == '"' {
            let start = pos;
            pos += 1;
            let mut text = String::from("\"");
            let mut closed = false;
            while pos < len {
                let ch = bytes[pos] as char;
                if ch == '\\' && pos + 1 < len {
                    text.push(ch);
                    text.push(bytes[pos + 1] as char);
                    pos += 2;
                    continue;
                }
                if ch == '"' {
                    text.push('"');
                    pos += 1;
                    closed = true;
                    break;
                }
                text.push(ch);
                pos += 1;
            }
            if !closed {
                return Err(LexError {
                    message: "Unterminated string literal".to_string(),
                    offset: start,
                });
            }
            tokens.push(Token {
                kind: TokenKind::StringLiteral,
                text,
                offset: start,
            });
            continue;
        }

        // numeric literal: digits, optional '.', optional trailing 'f'
        if c.is_ascii_digit() {
            let start = pos;
            let mut saw_dot = false;
            while pos < len {
                let ch = bytes[pos] as char;
                if ch.is_ascii_digit() {
                    pos += 1;
                } else if ch == '.' && !saw_dot && pos + 1 < len && (bytes[pos + 1] as char).is_ascii_digit() {
                    saw_dot = true;
                    pos += 1;
                } else {
                    break;
                }
            }
            let mut is_float_suffix = false;
            if pos < len && (bytes[pos] as char == 'f' || bytes[pos] as char == 'F') {
                is_float_suffix = true;
                pos += 1;
            }
            let text = &source[start..pos];
            if text[..text.len() - usize::from(is_float_suffix)]
                .chars()
                .any(|ch| !ch.is_ascii_digit() && ch != '.')
            {
                return Err(LexError {
                    message: "Syntax error in numeric constant".to_string(),
                    offset: start,
                });
            }
            let kind = if is_float_suffix {
                TokenKind::FloatLiteral
            } else if saw_dot {
                TokenKind::DoubleLiteral
            } else {
                TokenKind::IntLiteral
            };
            tokens.push(Token {
                kind,
                text: text.to_string(),
                offset: start,
            });
            continue;
        }

        // identifier or keyword
        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < len {
                let ch = bytes[pos] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    pos += 1;
                } else {
                    break;
                }
            }
            let text = source[start..pos].to_string();
            let kind = if text == "true" || text == "false" {
                TokenKind::BoolLiteral
            } else if KEYWORDS.contains(&text.as_str()) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            tokens.push(Token {
                kind,
                text,
                offset: start,
            });
            continue;
        }

        // operator / punctuation, longest match first
        let rest = &source[pos..];
        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(*op)) {
            tokens.push(Token {
                kind: TokenKind::Operator,
                text: (*op).to_string(),
                offset: pos,
            });
            pos += op.len();
            continue;
        }

        return Err(LexError {
            message: format!("Unexpected character '{}'", c),
            offset: pos,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        offset: len,
    });

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_float_literal_suffix() {
        let tokens = tokenize("0.5f").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[0].text, "0.5f");
    }

    #[test]
    fn lexes_double_literal_with_dot() {
        let tokens = tokenize("0.5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::DoubleLiteral);
    }

    #[test]
    fn lexes_int_literal() {
        let tokens = tokenize("42").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::IntLiteral);
    }

    #[test]
    fn lexes_bool_literals() {
        let tokens = tokenize("true false").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::BoolLiteral);
        assert_eq!(tokens[1].kind, TokenKind::BoolLiteral);
    }

    #[test]
    fn longest_match_for_triple_equals() {
        let tokens = tokenize("a===b").unwrap();
        assert_eq!(tokens[1].text, "===");
    }

    #[test]
    fn skips_comments() {
        let tokens = tokenize("// hi\nint x; /* block */ int y;").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.text.clone()).collect();
        assert_eq!(kinds, vec!["int", "x", ";", "int", "y", ";", ""]);
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let err = tokenize("int x; /* oops").unwrap_err();
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn unexpected_character_errors() {
        let err = tokenize("int x = @;").unwrap_err();
        assert!(err.message.contains("Unexpected character"));
    }
}
