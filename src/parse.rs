use std::{collections::HashSet, fmt::Display};

use log::{debug, trace};
use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;

use crate::lex::{self, Token, TokenKind};

#[derive(Error, Debug, Diagnostic)]
#[error("Invalid expression")]
#[diagnostic(help("the formula only makes sense up to this point, check operators and parentheses"))]
pub struct InvalidExpressionError {
    #[source_code]
    src: NamedSource<String>,

    #[label("cannot continue from here")]
    bad_bit: SourceSpan,

    /// How many leading tokens formed a complete expression.
    pub consumed: usize,
}

/// A formula as a tree. Every node keeps the tokens it was built from, so
/// [`Expr::tokens`] gives back exactly the parsed token sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<'de> {
    Value(Token<'de>),
    Call {
        func: Token<'de>,
        open: Token<'de>,
        arg: Box<Expr<'de>>,
        second: Option<(Token<'de>, Box<Expr<'de>>)>,
        close: Token<'de>,
    },
    Unary {
        op: Token<'de>,
        operand: Box<Expr<'de>>,
    },
    Paren {
        open: Token<'de>,
        inner: Box<Expr<'de>>,
        close: Token<'de>,
    },
    Binary {
        lhs: Box<Expr<'de>>,
        op: Token<'de>,
        rhs: Box<Expr<'de>>,
    },
}

impl<'de> Expr<'de> {
    pub fn tokens(&self) -> Vec<Token<'de>> {
        let mut tokens = Vec::new();
        self.flatten_into(&mut tokens);
        tokens
    }

    fn flatten_into(&self, out: &mut Vec<Token<'de>>) {
        match self {
            Expr::Value(token) => out.push(*token),
            Expr::Call {
                func,
                open,
                arg,
                second,
                close,
            } => {
                out.extend([*func, *open]);
                arg.flatten_into(out);
                if let Some((separator, second)) = second {
                    out.push(*separator);
                    second.flatten_into(out);
                }
                out.push(*close);
            }
            Expr::Unary { op, operand } => {
                out.push(*op);
                operand.flatten_into(out);
            }
            Expr::Paren { open, inner, close } => {
                out.push(*open);
                inner.flatten_into(out);
                out.push(*close);
            }
            Expr::Binary { lhs, op, rhs } => {
                lhs.flatten_into(out);
                out.push(*op);
                rhs.flatten_into(out);
            }
        }
    }
}

impl Display for Expr<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Value(token) => write!(f, "{}", token.literal),
            Expr::Call {
                func, arg, second, ..
            } => match second {
                Some((_, second)) => write!(f, "({} {arg} {second})", func.literal),
                None => write!(f, "({} {arg})", func.literal),
            },
            Expr::Unary { op, operand } => write!(f, "({} {operand})", op.literal),
            Expr::Paren { inner, .. } => write!(f, "(group {inner})"),
            Expr::Binary { lhs, op, rhs } => write!(f, "({} {lhs} {rhs})", op.literal),
        }
    }
}

const POWER: u8 = 3;

fn priority(op: &str) -> Option<u8> {
    match op {
        "+" | "-" => Some(1),
        "*" | "/" => Some(2),
        "^" => Some(POWER),
        _ => None,
    }
}

pub struct Parser<'de> {
    whole: &'de str,
    tokens: Vec<Token<'de>>,
}

impl<'de> Parser<'de> {
    pub fn new(whole: &'de str) -> Result<Self, Error> {
        Ok(Parser {
            whole,
            tokens: lex::tokenize(whole)?,
        })
    }

    /// Parses tokens that were already produced from `whole`.
    pub fn from_tokens(whole: &'de str, tokens: Vec<Token<'de>>) -> Self {
        Parser { whole, tokens }
    }

    pub fn tokens(&self) -> &[Token<'de>] {
        &self.tokens
    }

    pub fn parse(self) -> Result<Expr<'de>, Error> {
        let mut grammar = Grammar::new(&self.tokens);
        if let Some(expr) = grammar.resolve(0, self.tokens.len()) {
            debug!("parsed `{}` as {expr}", self.whole);
            return Ok(expr);
        }

        let consumed = grammar.net_left();
        debug!(
            "`{}` resolves only through its first {consumed} of {} tokens",
            self.whole,
            self.tokens.len()
        );
        let bad_bit = match self.tokens.get(consumed) {
            Some(token) => token.span(),
            None => SourceSpan::from(self.whole.len()..self.whole.len()),
        };
        Err(InvalidExpressionError {
            src: NamedSource::new("<formula>", self.whole.to_string()),
            bad_bit,
            consumed,
        }
        .into())
    }
}

/// Ordered trial rules over windows `start..end` of a token slice. A rule
/// either matches the whole window or yields `None`.
struct Grammar<'a, 'de> {
    tokens: &'a [Token<'de>],
    failed: HashSet<(usize, usize)>,
}

impl<'a, 'de> Grammar<'a, 'de> {
    fn new(tokens: &'a [Token<'de>]) -> Self {
        Grammar {
            tokens,
            failed: HashSet::new(),
        }
    }

    fn resolve(&mut self, start: usize, end: usize) -> Option<Expr<'de>> {
        if start >= end || self.failed.contains(&(start, end)) {
            return None;
        }

        let expr = self
            .value(start, end)
            .or_else(|| self.call(start, end))
            .or_else(|| self.unary(start, end))
            .or_else(|| self.paren(start, end))
            .or_else(|| self.binary(start, end));

        if expr.is_none() {
            trace!("no rule matches tokens {start}..{end}");
            self.failed.insert((start, end));
        }
        expr
    }

    /// Length of the longest prefix that forms a complete expression.
    fn net_left(&mut self) -> usize {
        (1..self.tokens.len())
            .rev()
            .find(|&end| self.resolve(0, end).is_some())
            .unwrap_or(0)
    }

    fn value(&self, start: usize, end: usize) -> Option<Expr<'de>> {
        match &self.tokens[start..end] {
            [token] if token.kind.is_value() => Some(Expr::Value(*token)),
            _ => None,
        }
    }

    fn call(&mut self, start: usize, end: usize) -> Option<Expr<'de>> {
        if end - start < 4 {
            return None;
        }
        let (func, open, close) = (
            self.tokens[start],
            self.tokens[start + 1],
            self.tokens[end - 1],
        );
        if open.kind != TokenKind::LeftParen || close.kind != TokenKind::RightParen {
            return None;
        }

        match func.kind {
            TokenKind::Function1 => {
                let arg = self.resolve(start + 2, end - 1)?;
                Some(Expr::Call {
                    func,
                    open,
                    arg: Box::new(arg),
                    second: None,
                    close,
                })
            }
            TokenKind::Function2 => {
                for split in start + 2..end - 1 {
                    let separator = self.tokens[split];
                    if separator.kind != TokenKind::Separator {
                        continue;
                    }
                    let Some(arg) = self.resolve(start + 2, split) else {
                        continue;
                    };
                    let Some(second) = self.resolve(split + 1, end - 1) else {
                        continue;
                    };
                    return Some(Expr::Call {
                        func,
                        open,
                        arg: Box::new(arg),
                        second: Some((separator, Box::new(second))),
                        close,
                    });
                }
                None
            }
            _ => None,
        }
    }

    fn unary(&mut self, start: usize, end: usize) -> Option<Expr<'de>> {
        let op = self.tokens[start];
        if op.kind != TokenKind::Unary {
            return None;
        }
        let operand = self.resolve(start + 1, end)?;
        Some(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn paren(&mut self, start: usize, end: usize) -> Option<Expr<'de>> {
        if end - start < 3 {
            return None;
        }
        let (open, close) = (self.tokens[start], self.tokens[end - 1]);
        if open.kind != TokenKind::LeftParen || close.kind != TokenKind::RightParen {
            return None;
        }
        let inner = self.resolve(start + 1, end - 1)?;
        Some(Expr::Paren {
            open,
            inner: Box::new(inner),
            close,
        })
    }

    /// Splits at a binary operator, loosest binding first. Within one level
    /// the rightmost operator is the outermost, except for `^` which groups to
    /// the right.
    fn binary(&mut self, start: usize, end: usize) -> Option<Expr<'de>> {
        let mut splits: Vec<(usize, u8)> = (start + 1..end - 1)
            .filter(|&i| self.tokens[i].kind == TokenKind::Binary)
            .filter_map(|i| Some((i, priority(self.tokens[i].literal)?)))
            .collect();
        splits.sort_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| {
                if a.1 == POWER {
                    a.0.cmp(&b.0)
                } else {
                    b.0.cmp(&a.0)
                }
            })
        });

        for (split, _) in splits {
            let Some(lhs) = self.resolve(start, split) else {
                continue;
            };
            let Some(rhs) = self.resolve(split + 1, end) else {
                continue;
            };
            return Some(Expr::Binary {
                lhs: Box::new(lhs),
                op: self.tokens[split],
                rhs: Box::new(rhs),
            });
        }
        None
    }
}
