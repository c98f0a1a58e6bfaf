//! Tokenizer for the search query grammar.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Op {
    pub fn lexeme(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "~",
            Op::NotLike => "!~",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(Op),
    /// A `"..."`-delimited literal, already unescaped.
    Quoted(String),
    /// Any other run of non-whitespace, non-paren, non-operator characters:
    /// doubles as a path or a bare value depending on grammar position.
    Bare(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("unterminated quoted string starting at byte {0}")]
    UnterminatedString(usize),
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

const BARE_STOP_CHARS: &[char] = &['(', ')', '"', '=', '!', '<', '>', '~', '&', '|'];

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(&(idx, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }
            match ch {
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '"' => {
                    tokens.push(Token::Quoted(self.read_quoted(idx)?));
                }
                '&' => {
                    self.chars.next();
                    self.expect_char('&');
                    tokens.push(Token::And);
                }
                '|' => {
                    self.chars.next();
                    self.expect_char('|');
                    tokens.push(Token::Or);
                }
                '!' => {
                    self.chars.next();
                    if self.peek_is('=') {
                        self.chars.next();
                        tokens.push(Token::Op(Op::Ne));
                    } else if self.peek_is('~') {
                        self.chars.next();
                        tokens.push(Token::Op(Op::NotLike));
                    } else {
                        tokens.push(Token::Bare("!".to_string()));
                    }
                }
                '<' => {
                    self.chars.next();
                    if self.peek_is('=') {
                        self.chars.next();
                        tokens.push(Token::Op(Op::Le));
                    } else {
                        tokens.push(Token::Op(Op::Lt));
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.peek_is('=') {
                        self.chars.next();
                        tokens.push(Token::Op(Op::Ge));
                    } else {
                        tokens.push(Token::Op(Op::Gt));
                    }
                }
                '=' => {
                    self.chars.next();
                    tokens.push(Token::Op(Op::Eq));
                }
                '~' => {
                    self.chars.next();
                    tokens.push(Token::Op(Op::Like));
                }
                _ => {
                    tokens.push(Token::Bare(self.read_bare()));
                }
            }
        }
        Ok(tokens)
    }

    fn expect_char(&mut self, expected: char) {
        if self.peek_is(expected) {
            self.chars.next();
        }
    }

    fn peek_is(&mut self, expected: char) -> bool {
        matches!(self.chars.peek(), Some(&(_, ch)) if ch == expected)
    }

    fn read_quoted(&mut self, start: usize) -> Result<String, LexError> {
        self.chars.next(); // consume opening quote
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(value),
                Some((_, '\\')) => {
                    if let Some((_, escaped)) = self.chars.next() {
                        value.push(escaped);
                    } else {
                        return Err(LexError::UnterminatedString(start));
                    }
                }
                Some((_, ch)) => value.push(ch),
                None => return Err(LexError::UnterminatedString(start)),
            }
        }
    }

    fn read_bare(&mut self) -> String {
        let start = self.chars.peek().map(|&(idx, _)| idx).unwrap_or(self.input.len());
        let mut end = start;
        while let Some(&(idx, ch)) = self.chars.peek() {
            if ch.is_whitespace() || BARE_STOP_CHARS.contains(&ch) {
                break;
            }
            end = idx + ch.len_utf8();
            self.chars.next();
        }
        self.input[start..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    #[test]
    fn tokenizes_simple_comparison() {
        assert_eq!(
            tokenize("message=hello"),
            vec![
                Token::Bare("message".to_string()),
                Token::Op(Op::Eq),
                Token::Bare("hello".to_string()),
            ]
        );
    }

    #[test]
    fn tokenizes_all_operators() {
        for (src, op) in [
            ("=", Op::Eq),
            ("!=", Op::Ne),
            ("<", Op::Lt),
            ("<=", Op::Le),
            (">", Op::Gt),
            (">=", Op::Ge),
            ("~", Op::Like),
            ("!~", Op::NotLike),
        ] {
            assert_eq!(tokenize(src), vec![Token::Op(op)]);
        }
    }

    #[test]
    fn tokenizes_quoted_values_with_spaces() {
        assert_eq!(
            tokenize(r#"message="hello world""#),
            vec![
                Token::Bare("message".to_string()),
                Token::Op(Op::Eq),
                Token::Quoted("hello world".to_string()),
            ]
        );
    }

    #[test]
    fn tokenizes_parens_and_joins() {
        assert_eq!(
            tokenize("(a=1 && b=2) || c=3"),
            vec![
                Token::LParen,
                Token::Bare("a".to_string()),
                Token::Op(Op::Eq),
                Token::Bare("1".to_string()),
                Token::And,
                Token::Bare("b".to_string()),
                Token::Op(Op::Eq),
                Token::Bare("2".to_string()),
                Token::RParen,
                Token::Or,
                Token::Bare("c".to_string()),
                Token::Op(Op::Eq),
                Token::Bare("3".to_string()),
            ]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = Lexer::new(r#"message="unterminated"#).tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString(_)));
    }
}
