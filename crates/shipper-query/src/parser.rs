//! Recursive-descent parser over [`crate::token::Token`]s, producing an
//! [`Expr`] tree.
//!
//! Precedence follows the grammar verbatim: `||` binds loosest, `&&`
//! tighter, then parenthesized groups or bare comparisons. A `Group`'s
//! members carry the join that follows them so the compiler can re-emit
//! `AND`/`OR` in the order they were parsed, rather than assuming one
//! uniform operator per group.

use shipper_types::JoinOp;

use crate::token::{Lexer, Op, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub path: String,
    pub op: Op,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub expr: Expr,
    /// The join connecting this member to the next one. `None` on the
    /// last member of a group.
    pub join_after: Option<JoinOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Comparison(Comparison),
    Group(Vec<GroupMember>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("invalid path `{0}`: must match ^[A-Za-z0-9_.]+$")]
    InvalidPath(String),
    #[error("expected a comparison operator after `{0}`")]
    MissingOperator(String),
    #[error("expected a value after operator `{0}`")]
    MissingValue(String),
    #[error("expected a path, found `{0:?}`")]
    ExpectedPath(Token),
    #[error("unexpected trailing tokens after a complete expression")]
    TrailingTokens,
    #[error("empty query")]
    Empty,
    #[error(transparent)]
    Lex(#[from] crate::token::LexError),
}

/// Parse a query string into an [`Expr`] tree. Returns `Ok(None)` for an
/// empty (whitespace-only) query, matching the "empty query lists newest
/// rows" behavior.
pub fn parse(input: &str) -> Result<Option<Expr>, ParseError> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError::TrailingTokens);
    }
    Ok(Some(expr))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// `Or := And ( '||' And )*`
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_and()?;
        let mut members = vec![GroupMember { expr: first, join_after: None }];

        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            members.last_mut().unwrap().join_after = Some(JoinOp::Or);
            let next = self.parse_and()?;
            members.push(GroupMember { expr: next, join_after: None });
        }

        Ok(flatten(members))
    }

    /// `And := Primary ( '&&' Primary )*`
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_primary()?;
        let mut members = vec![GroupMember { expr: first, join_after: None }];

        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            members.last_mut().unwrap().join_after = Some(JoinOp::And);
            let next = self.parse_primary()?;
            members.push(GroupMember { expr: next, join_after: None });
        }

        Ok(flatten(members))
    }

    /// `Primary := '(' Expr ')' | Compare`
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let inner = self.parse_or()?;
            match self.advance() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(ParseError::UnbalancedParens),
            }
        } else {
            self.parse_compare()
        }
    }

    /// `Compare := Path Op Value`
    fn parse_compare(&mut self) -> Result<Expr, ParseError> {
        let path = match self.advance() {
            Some(Token::Bare(path)) => path.clone(),
            Some(other) => return Err(ParseError::ExpectedPath(other.clone())),
            None => return Err(ParseError::Empty),
        };
        if !is_valid_path(&path) {
            return Err(ParseError::InvalidPath(path));
        }

        let op = match self.advance() {
            Some(Token::Op(op)) => *op,
            _ => return Err(ParseError::MissingOperator(path)),
        };

        let value = match self.advance() {
            Some(Token::Bare(value)) => value.clone(),
            Some(Token::Quoted(value)) => value.clone(),
            _ => return Err(ParseError::MissingValue(op.lexeme().to_string())),
        };

        Ok(Expr::Comparison(Comparison { path, op, value }))
    }
}

/// A single-member list collapses to its lone child; anything else becomes
/// an explicit `Group`.
fn flatten(members: Vec<GroupMember>) -> Expr {
    if members.len() == 1 {
        members.into_iter().next().unwrap().expr
    } else {
        Expr::Group(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_parses_to_none() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn single_comparison_has_no_group_wrapper() {
        let expr = parse("message=hello").unwrap().unwrap();
        assert_eq!(
            expr,
            Expr::Comparison(Comparison {
                path: "message".to_string(),
                op: Op::Eq,
                value: "hello".to_string(),
            })
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a=1 && b=2 || c=3").unwrap().unwrap();
        // Expect: Group[ Group[a=1 AND b=2] OR c=3 ]
        match expr {
            Expr::Group(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].join_after, Some(JoinOp::Or));
                assert!(members[1].join_after.is_none());
                match &members[0].expr {
                    Expr::Group(inner) => {
                        assert_eq!(inner.len(), 2);
                        assert_eq!(inner[0].join_after, Some(JoinOp::And));
                    }
                    other => panic!("expected nested And group, got {other:?}"),
                }
            }
            other => panic!("expected Or group, got {other:?}"),
        }
    }

    #[test]
    fn parens_override_precedence() {
        let expr = parse("a=1 && (b=2 || c=3)").unwrap().unwrap();
        match expr {
            Expr::Group(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].join_after, Some(JoinOp::And));
                match &members[1].expr {
                    Expr::Group(inner) => assert_eq!(inner[0].join_after, Some(JoinOp::Or)),
                    other => panic!("expected nested Or group, got {other:?}"),
                }
            }
            other => panic!("expected And group, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_parens_is_an_error() {
        assert_eq!(parse("(a=1").unwrap_err(), ParseError::UnbalancedParens);
    }

    #[test]
    fn invalid_path_is_an_error() {
        let err = parse("bad-path=1").unwrap_err();
        assert!(matches!(err, ParseError::InvalidPath(_)));
    }

    #[test]
    fn missing_operand_is_an_error() {
        assert!(matches!(parse("message=").unwrap_err(), ParseError::MissingValue(_)));
        assert!(matches!(parse("message").unwrap_err(), ParseError::MissingOperator(_)));
    }

    #[test]
    fn quoted_value_with_spaces_parses() {
        let expr = parse(r#"message="hello world""#).unwrap().unwrap();
        assert_eq!(
            expr,
            Expr::Comparison(Comparison {
                path: "message".to_string(),
                op: Op::Eq,
                value: "hello world".to_string(),
            })
        );
    }

    #[test]
    fn dotted_path_parses() {
        let expr = parse("_meta.host=web-1").unwrap().unwrap();
        match expr {
            Expr::Comparison(cmp) => assert_eq!(cmp.path, "_meta.host"),
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    proptest::proptest! {
        #[test]
        fn parenthesization_never_panics(input in "[a-zA-Z0-9_.=!<>~&|() \"]{0,40}") {
            let _ = parse(&input);
        }
    }
}
