use std::rc::Rc;

use crate::error::{BuildError, Result};
use crate::surface::SurfaceHandle;

use super::{RegionExpr, SignedSurface};

/// Parses deck boundary syntax into a [`RegionExpr`].
///
/// Grammar: signed integers are surface literals, juxtaposition is
/// intersection, `:` is union, `#(...)` is complement, parentheses
/// group. `T` and `F` name the whole of space and the empty region.
/// Output of [`RegionExpr::render`] parses back to an expression that
/// renders byte-identically.
///
/// # Errors
///
/// Returns [`BuildError::MalformedRegion`] with the byte offset of the
/// first offending token.
pub fn parse(text: &str) -> Result<RegionExpr> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let expr = parser.union()?;
    if let Some(tok) = parser.peek() {
        return Err(malformed(tok.offset, "trailing input"));
    }
    Ok(expr)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TokenKind {
    Literal(i64),
    Colon,
    Open,
    Close,
    Hash,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn malformed(offset: usize, message: &str) -> crate::error::McgeomError {
    BuildError::MalformedRegion {
        offset,
        message: message.into(),
    }
    .into()
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let offset = i;
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b':' => {
                tokens.push(Token {
                    kind: TokenKind::Colon,
                    offset,
                });
                i += 1;
            }
            b'(' => {
                tokens.push(Token {
                    kind: TokenKind::Open,
                    offset,
                });
                i += 1;
            }
            b')' => {
                tokens.push(Token {
                    kind: TokenKind::Close,
                    offset,
                });
                i += 1;
            }
            b'#' => {
                tokens.push(Token {
                    kind: TokenKind::Hash,
                    offset,
                });
                i += 1;
            }
            b'T' => {
                tokens.push(Token {
                    kind: TokenKind::Always,
                    offset,
                });
                i += 1;
            }
            b'F' => {
                tokens.push(Token {
                    kind: TokenKind::Never,
                    offset,
                });
                i += 1;
            }
            b'+' | b'-' | b'0'..=b'9' => {
                let negative = bytes[i] == b'-';
                if bytes[i] == b'+' || bytes[i] == b'-' {
                    i += 1;
                }
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i == start {
                    return Err(malformed(offset, "sign without digits"));
                }
                let digits = &text[start..i];
                let value: i64 = digits
                    .parse()
                    .map_err(|_| malformed(offset, "literal out of range"))?;
                if value == 0 {
                    return Err(malformed(offset, "surface handle 0 is never issued"));
                }
                tokens.push(Token {
                    kind: TokenKind::Literal(if negative { -value } else { value }),
                    offset,
                });
            }
            other => {
                return Err(malformed(offset, &format!("unexpected byte {:?}", other as char)));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// `union := intersection (':' intersection)*`, left-associative.
    fn union(&mut self) -> Result<RegionExpr> {
        let mut expr = self.intersection()?;
        while matches!(self.peek().map(|t| t.kind), Some(TokenKind::Colon)) {
            self.pos += 1;
            let rhs = self.intersection()?;
            expr = RegionExpr::Or(Rc::new(expr), Rc::new(rhs));
        }
        Ok(expr)
    }

    /// `intersection := factor+`, left-associative juxtaposition.
    fn intersection(&mut self) -> Result<RegionExpr> {
        let mut expr = self.factor()?;
        while let Some(tok) = self.peek() {
            match tok.kind {
                TokenKind::Colon | TokenKind::Close => break,
                _ => {
                    let rhs = self.factor()?;
                    expr = RegionExpr::And(Rc::new(expr), Rc::new(rhs));
                }
            }
        }
        Ok(expr)
    }

    fn factor(&mut self) -> Result<RegionExpr> {
        let end = self.tokens.last().map_or(0, |t| t.offset);
        let Some(tok) = self.bump() else {
            return Err(malformed(end, "unexpected end of input"));
        };
        match tok.kind {
            TokenKind::Literal(value) => {
                let magnitude = value.unsigned_abs();
                let handle = u32::try_from(magnitude)
                    .map(SurfaceHandle)
                    .map_err(|_| malformed(tok.offset, "surface handle out of range"))?;
                Ok(RegionExpr::Literal(if value > 0 {
                    SignedSurface::positive(handle)
                } else {
                    SignedSurface::negative(handle)
                }))
            }
            TokenKind::Open => {
                let expr = self.union()?;
                self.expect_close(tok.offset)?;
                Ok(expr)
            }
            TokenKind::Hash => {
                let Some(open) = self.bump() else {
                    return Err(malformed(tok.offset, "dangling complement"));
                };
                if open.kind != TokenKind::Open {
                    return Err(malformed(open.offset, "complement requires parentheses"));
                }
                let inner = self.union()?;
                self.expect_close(open.offset)?;
                Ok(RegionExpr::Not(Rc::new(inner)))
            }
            TokenKind::Always => Ok(RegionExpr::Always),
            TokenKind::Never => Ok(RegionExpr::Never),
            TokenKind::Colon | TokenKind::Close => {
                Err(malformed(tok.offset, "expected a literal or group"))
            }
        }
    }

    fn expect_close(&mut self, open_offset: usize) -> Result<()> {
        match self.bump() {
            Some(tok) if tok.kind == TokenKind::Close => Ok(()),
            Some(tok) => Err(malformed(tok.offset, "expected closing parenthesis")),
            None => Err(malformed(open_offset, "unclosed parenthesis")),
        }
    }
}
