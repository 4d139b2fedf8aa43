//! Formulas over one complex variable, evaluated with all of their branches.
//!
//! A formula such as `ln(z)+2*i` goes through three stages:
//!
//! 1. [`lex`] splits it into [`Token`]s, inserting `*` between adjacent values
//!    (`2i` reads as `2*i`).
//! 2. [`parse`] resolves the tokens into an [`Expr`] tree by trying each
//!    grammar rule in turn.
//! 3. [`eval`] compiles the tree into a [`CompiledFunction`] which maps a point
//!    to every value the formula takes there. Logarithms, and everything built
//!    on them, contribute one value per branch in `-window..=window`; binary
//!    operators combine every value on the left with every value on the right.
//!
//! ```
//! use complex_solver::compile_formula;
//! use num_complex::Complex64;
//!
//! let function = compile_formula("ln(z)").unwrap();
//! let values = function.evaluate(Complex64::new(1.0, 0.0), 2);
//! assert_eq!(values.len(), 5);
//! ```

use miette::Error;

pub mod cache;
pub mod eval;
pub mod lex;
pub mod parse;
pub mod points;

pub use cache::FormulaCache;
pub use eval::{
    CompiledFunction, DEFAULT_BRANCH_WINDOW, MAX_ROOT_DEGREE, NotSupportedError, compile,
};
pub use lex::{Lexer, Token, TokenKind, TooManyVariablesError, UnknownTokenError, tokenize};
pub use parse::{Expr, InvalidExpressionError, Parser};
pub use points::{LabeledPoint, PointError, PointValues, evaluate_points, parse_points};

/// Tokenizes, parses and compiles `formula`.
pub fn compile_formula(formula: &str) -> Result<CompiledFunction, Error> {
    let expr = Parser::new(formula)?.parse()?;
    compile(&expr)
}

/// How a failed compile should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The formula text is wrong; the caller has to fix it.
    BadFormula,
    /// The formula parsed but names something the evaluator cannot compute.
    Unsupported,
}

impl FailureKind {
    pub fn of(error: &Error) -> Option<Self> {
        if error.downcast_ref::<UnknownTokenError>().is_some()
            || error.downcast_ref::<TooManyVariablesError>().is_some()
            || error.downcast_ref::<InvalidExpressionError>().is_some()
        {
            Some(FailureKind::BadFormula)
        } else if error.downcast_ref::<NotSupportedError>().is_some() {
            Some(FailureKind::Unsupported)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures() {
        for formula in ["xy", "z#", "3+", ""] {
            let err = compile_formula(formula).unwrap_err();
            assert_eq!(FailureKind::of(&err), Some(FailureKind::BadFormula), "{formula}");
        }

        let tokens = vec![Token {
            kind: TokenKind::Constant,
            literal: "tau",
            offset: 0,
        }];
        let expr = Parser::from_tokens("tau", tokens).parse().unwrap();
        let err = compile(&expr).unwrap_err();
        assert_eq!(FailureKind::of(&err), Some(FailureKind::Unsupported));

        assert_eq!(FailureKind::of(&miette::miette!("something else")), None);
    }
}
