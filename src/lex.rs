use std::{fmt::Display, sync::LazyLock};

use miette::{Diagnostic, Error, LabeledSpan, NamedSource, SourceSpan, miette};
use thiserror::Error;

pub const CONSTANTS: &[&str] = &["i", "pi", "e"];

pub const FUNCTIONS_1: &[&str] = &[
    "real", "im", "abs", "phi", "sin", "cos", "tg", "ctg", "sh", "ch", "th", "cth", "sch", "csch",
    "exp", "ln", "sqrt", "asin", "acos", "atg", "actg", "arsh", "arch", "arth", "arcth",
];

pub const FUNCTIONS_2: &[&str] = &["log", "root"];

pub const BINARY_OPERATORS: &[&str] = &["+", "-", "*", "/", "^"];

pub const COMPARATORS: &[&str] = &["=", "<", ">", "<=", ">="];

const PUNCTUATION: &[&str] = &[",", "(", ")"];

/// Every keyword the lexer recognizes, longest first so that `im` wins over
/// `i` and `csch` over `cos`.
static KEYWORDS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    let mut keywords: Vec<&'static str> = CONSTANTS
        .iter()
        .chain(FUNCTIONS_1)
        .chain(FUNCTIONS_2)
        .chain(BINARY_OPERATORS)
        .chain(COMPARATORS)
        .chain(PUNCTUATION)
        .copied()
        .collect();
    keywords.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    keywords.dedup();
    keywords
});

fn source(whole: &str) -> NamedSource<String> {
    NamedSource::new("<formula>", whole.to_string())
}

#[derive(Error, Debug, Diagnostic)]
#[error("Unknown token '{token}'")]
#[diagnostic(help("remove or correct the character: `{token}`"))]
pub struct UnknownTokenError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this character")]
    bad_bit: SourceSpan,

    pub token: char,
}

#[derive(Error, Debug, Diagnostic)]
#[error("Too many variables: '{first}' and '{second}'")]
#[diagnostic(help("a formula has a single variable, write `{first}` instead of `{second}`"))]
pub struct TooManyVariablesError {
    #[source_code]
    src: NamedSource<String>,

    #[label("first variable")]
    first_bit: SourceSpan,

    #[label("second variable")]
    second_bit: SourceSpan,

    pub first: char,
    pub second: char,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'de> {
    pub kind: TokenKind,
    pub literal: &'de str,
    /// Byte offset of the token in the formula. An inserted multiplication
    /// sits at the offset of the token that follows it.
    ///
    /// Keywords carry their canonical spelling as `literal`; numbers and
    /// variables carry the formula text they were read from.
    pub offset: usize,
}

impl Token<'_> {
    pub fn span(&self) -> SourceSpan {
        SourceSpan::from(self.offset..self.offset + self.literal.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    Unary,
    Binary,
    Separator,
    Comparator,
    LeftParen,
    RightParen,
    Function1,
    Function2,
    Variable,
    Number(f64),
    Constant,
}

impl TokenKind {
    pub fn is_value(self) -> bool {
        matches!(
            self,
            TokenKind::Variable | TokenKind::Number(_) | TokenKind::Constant
        )
    }

    /// Classifies a keyword. `-` depends on what came before it: after a value
    /// or a closing parenthesis it subtracts, anywhere else it negates.
    fn of_keyword(keyword: &str, prev: Option<TokenKind>) -> TokenKind {
        let after_operand =
            matches!(prev, Some(kind) if kind.is_value() || kind == TokenKind::RightParen);
        match keyword {
            "-" if !after_operand => TokenKind::Unary,
            "," => TokenKind::Separator,
            "(" => TokenKind::LeftParen,
            ")" => TokenKind::RightParen,
            _ if BINARY_OPERATORS.contains(&keyword) => TokenKind::Binary,
            _ if COMPARATORS.contains(&keyword) => TokenKind::Comparator,
            _ if FUNCTIONS_1.contains(&keyword) => TokenKind::Function1,
            _ if FUNCTIONS_2.contains(&keyword) => TokenKind::Function2,
            _ => TokenKind::Constant,
        }
    }
}

impl Display for Token<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.literal;
        match self.kind {
            TokenKind::Unary => write!(f, "UNARY {lit} null"),
            TokenKind::Binary => write!(f, "BINARY {lit} null"),
            TokenKind::Separator => write!(f, "SEPARATOR {lit} null"),
            TokenKind::Comparator => write!(f, "COMPARATOR {lit} null"),
            TokenKind::LeftParen => write!(f, "LEFT_PAREN {lit} null"),
            TokenKind::RightParen => write!(f, "RIGHT_PAREN {lit} null"),
            TokenKind::Function1 => write!(f, "FUNCTION1 {lit} null"),
            TokenKind::Function2 => write!(f, "FUNCTION2 {lit} null"),
            TokenKind::Variable => write!(f, "VARIABLE {lit} null"),
            TokenKind::Number(n) => {
                if n == n.trunc() {
                    write!(f, "NUMBER {lit} {n}.0")
                } else {
                    write!(f, "NUMBER {lit} {n}")
                }
            }
            TokenKind::Constant => write!(f, "CONSTANT {lit} null"),
        }
    }
}

pub struct Lexer<'de> {
    whole: &'de str,
    /// `whole` with its whitespace stripped.
    compact: String,
    /// Offset in `whole` of every byte of `compact`.
    offsets: Vec<usize>,
    pos: usize,
    variable: Option<(char, usize)>,
    prev: Option<TokenKind>,
    peeked: Option<Token<'de>>,
}

impl<'de> Lexer<'de> {
    pub fn new(input: &'de str) -> Self {
        let mut compact = String::with_capacity(input.len());
        let mut offsets = Vec::with_capacity(input.len());
        for (offset, c) in input.char_indices().filter(|(_, c)| !c.is_whitespace()) {
            compact.push(c);
            offsets.extend(offset..offset + c.len_utf8());
        }

        Lexer {
            whole: input,
            compact,
            offsets,
            pos: 0,
            variable: None,
            prev: None,
            peeked: None,
        }
    }

    /// The variable letter seen so far, if any.
    pub fn variable(&self) -> Option<char> {
        self.variable.map(|(letter, _)| letter)
    }

    /// Consumes `len` bytes of `compact` and returns the text they came from,
    /// including any whitespace in between.
    fn advance(&mut self, len: usize) -> &'de str {
        let whole = self.whole;
        let start = self.offsets[self.pos];
        let end = self.offsets[self.pos + len - 1] + 1;
        self.pos += len;
        &whole[start..end]
    }

    fn scan(&mut self) -> Option<Result<Token<'de>, Error>> {
        let rest = &self.compact[self.pos..];
        let c = rest.chars().next()?;
        let offset = self.offsets[self.pos];

        // keyword literals are the keyword itself, so `l n` reads as `ln`
        if let Some(&keyword) = KEYWORDS.iter().find(|k| rest.starts_with(**k)) {
            let kind = TokenKind::of_keyword(keyword, self.prev);
            self.pos += keyword.len();
            return Some(Ok(Token {
                kind,
                literal: keyword,
                offset,
            }));
        }

        match c {
            'a'..='z' | 'A'..='Z' => {
                match self.variable {
                    None => self.variable = Some((c, offset)),
                    Some((first, _)) if first == c => {}
                    Some((first, first_offset)) => {
                        return Some(Err(TooManyVariablesError {
                            src: source(self.whole),
                            first_bit: SourceSpan::from(first_offset..first_offset + 1),
                            second_bit: SourceSpan::from(offset..offset + 1),
                            first,
                            second: c,
                        }
                        .into()));
                    }
                }
                let literal = self.advance(1);
                Some(Ok(Token {
                    kind: TokenKind::Variable,
                    literal,
                    offset,
                }))
            }
            '0'..='9' => {
                let digits = |s: &str| s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());

                // digits, then an optional `.digits`; a dot without digits after
                // it is not part of the number
                let mut end = digits(rest);
                if let Some(fraction) = rest[end..].strip_prefix('.') {
                    let more = digits(fraction);
                    if more > 0 {
                        end += 1 + more;
                    }
                }

                let parsed: Result<f64, _> = rest[..end].parse();
                let literal = self.advance(end);
                let n = match parsed {
                    Ok(n) => n,
                    Err(e) => {
                        return Some(Err(miette!(
                            code = "ParseFloatError",
                            labels = vec![LabeledSpan::at(
                                offset..offset + literal.len(),
                                "this numeric literal"
                            )],
                            "{e}",
                        )
                        .with_source_code(self.whole.to_string())));
                    }
                };

                Some(Ok(Token {
                    kind: TokenKind::Number(n),
                    literal,
                    offset,
                }))
            }
            c => Some(Err(UnknownTokenError {
                src: source(self.whole),
                bad_bit: SourceSpan::from(offset..offset + c.len_utf8()),
                token: c,
            }
            .into())),
        }
    }
}

impl<'de> Iterator for Lexer<'de> {
    type Item = Result<Token<'de>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.peeked.take() {
            self.prev = Some(token.kind);
            return Some(Ok(token));
        }

        let token = match self.scan()? {
            Ok(token) => token,
            Err(e) => {
                self.pos = self.compact.len();
                return Some(Err(e));
            }
        };

        // two values next to each other multiply: `2i`, `2z`, `zpi`
        if token.kind.is_value() && self.prev.is_some_and(TokenKind::is_value) {
            self.peeked = Some(token);
            self.prev = Some(TokenKind::Binary);
            return Some(Ok(Token {
                kind: TokenKind::Binary,
                literal: "*",
                offset: token.offset,
            }));
        }

        self.prev = Some(token.kind);
        Some(Ok(token))
    }
}

pub fn tokenize(formula: &str) -> Result<Vec<Token<'_>>, Error> {
    Lexer::new(formula).collect()
}
