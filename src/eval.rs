use std::{
    f64::consts::{E, FRAC_PI_2, PI},
    str::FromStr,
};

use log::debug;
use miette::{Diagnostic, Error};
use num_complex::Complex64;
use thiserror::Error;

use crate::{lex::TokenKind, parse::Expr};

/// Branches `-6..=6` of every logarithm unless the caller asks otherwise.
pub const DEFAULT_BRANCH_WINDOW: u32 = 6;

const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);

#[derive(Error, Debug, Diagnostic)]
#[error("'{name}' is not supported")]
#[diagnostic(help("the formula was accepted by the parser but cannot be evaluated"))]
pub struct NotSupportedError {
    pub name: String,
}

impl NotSupportedError {
    fn new(name: &str) -> Self {
        NotSupportedError {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Real,
    Im,
    Abs,
    Phi,
    Sin,
    Cos,
    Tg,
    Ctg,
    Sh,
    Ch,
    Th,
    Cth,
    Sch,
    Csch,
    Exp,
    Ln,
    Sqrt,
    Asin,
    Acos,
    Atg,
    Actg,
    Arsh,
    Arch,
    Arth,
    Arcth,
}

impl FromStr for Function {
    type Err = NotSupportedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "real" => Function::Real,
            "im" => Function::Im,
            "abs" => Function::Abs,
            "phi" => Function::Phi,
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tg" => Function::Tg,
            "ctg" => Function::Ctg,
            "sh" => Function::Sh,
            "ch" => Function::Ch,
            "th" => Function::Th,
            "cth" => Function::Cth,
            "sch" => Function::Sch,
            "csch" => Function::Csch,
            "exp" => Function::Exp,
            "ln" => Function::Ln,
            "sqrt" => Function::Sqrt,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atg" => Function::Atg,
            "actg" => Function::Actg,
            "arsh" => Function::Arsh,
            "arch" => Function::Arch,
            "arth" => Function::Arth,
            "arcth" => Function::Arcth,
            _ => return Err(NotSupportedError::new(s)),
        })
    }
}

impl Function {
    fn apply(self, z: Complex64, window: u32) -> Vec<Complex64> {
        match self {
            Function::Real => vec![z.re.into()],
            Function::Im => vec![z.im.into()],
            Function::Abs => vec![z.norm().into()],
            Function::Phi => vec![z.arg().into()],
            Function::Sin => vec![z.sin()],
            Function::Cos => vec![z.cos()],
            Function::Tg => vec![z.tan()],
            Function::Ctg => vec![z.tan().inv()],
            Function::Sh => vec![z.sinh()],
            Function::Ch => vec![z.cosh()],
            Function::Th => vec![z.tanh()],
            Function::Cth => vec![z.tanh().inv()],
            Function::Sch => vec![z.cosh().inv()],
            Function::Csch => vec![z.sinh().inv()],
            Function::Exp => vec![z.exp()],
            Function::Ln => ln_branches(z, window),
            Function::Sqrt => roots(z, 2),
            Function::Asin => asin(z, window),
            Function::Acos => asin(z, window)
                .into_iter()
                .map(|w| Complex64::from(FRAC_PI_2) - w)
                .collect(),
            Function::Atg => atg(z, window),
            Function::Actg => atg(z.inv(), window)
                .into_iter()
                .map(|w| Complex64::from(FRAC_PI_2) - w)
                .collect(),
            Function::Arsh => ln_branches(z + (z * z + 1.0).sqrt(), window),
            Function::Arch => ln_branches(z + (z * z - 1.0).sqrt(), window),
            Function::Arth => arth(z, window),
            Function::Arcth => nonzero_reciprocals(arth(z.inv(), window)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function2 {
    Log,
    Root,
}

impl FromStr for Function2 {
    type Err = NotSupportedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Function2::Log),
            "root" => Ok(Function2::Root),
            _ => Err(NotSupportedError::new(s)),
        }
    }
}

impl Function2 {
    fn apply(self, xs: &[Complex64], ys: &[Complex64], window: u32) -> Vec<Complex64> {
        match self {
            Function2::Log => {
                let numerators: Vec<_> = xs.iter().flat_map(|&x| ln_branches(x, window)).collect();
                let denominators: Vec<_> =
                    ys.iter().flat_map(|&y| ln_branches(y, window)).collect();
                cross(&numerators, &denominators, |a, b| a / b)
            }
            Function2::Root => xs
                .iter()
                .flat_map(|&x| ys.iter().flat_map(move |n| roots(x, n.re.trunc() as i64)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl FromStr for BinaryOp {
    type Err = NotSupportedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(BinaryOp::Add),
            "-" => Ok(BinaryOp::Sub),
            "*" => Ok(BinaryOp::Mul),
            "/" => Ok(BinaryOp::Div),
            "^" => Ok(BinaryOp::Pow),
            _ => Err(NotSupportedError::new(s)),
        }
    }
}

impl BinaryOp {
    fn apply(self, lhs: Complex64, rhs: Complex64) -> Complex64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => power(lhs, rhs),
        }
    }
}

fn constant(name: &str) -> Result<Complex64, NotSupportedError> {
    match name {
        "i" => Ok(I),
        "pi" => Ok(PI.into()),
        "e" => Ok(E.into()),
        _ => Err(NotSupportedError::new(name)),
    }
}

/// `ln|z| + i(arg z + 2πk)` for every `k` in `-window..=window`.
pub fn ln_branches(z: Complex64, window: u32) -> Vec<Complex64> {
    let principal = z.ln();
    let window = i64::from(window);
    (-window..=window)
        .map(|k| principal + Complex64::new(0.0, 2.0 * PI * k as f64))
        .collect()
}

/// Degrees above this many roots give no values instead of exhausting memory.
pub const MAX_ROOT_DEGREE: u64 = 1 << 20;

/// The `|degree|` roots of `z`, `k = 0..|degree|`. A negative degree gives the
/// roots of `1/z`. Degree zero, and degrees beyond [`MAX_ROOT_DEGREE`], have
/// none.
pub fn roots(z: Complex64, degree: i64) -> Vec<Complex64> {
    if degree == 0 || degree.unsigned_abs() > MAX_ROOT_DEGREE {
        return Vec::new();
    }
    let degree_f = degree as f64;
    let (r, theta) = z.to_polar();
    let modulus = r.powf(1.0 / degree_f);
    (0..degree.unsigned_abs())
        .map(|k| Complex64::from_polar(modulus, (theta + 2.0 * PI * k as f64) / degree_f))
        .collect()
}

/// Every pairing of one value from `lhs` with one from `rhs`, `lhs`-major.
fn cross(
    lhs: &[Complex64],
    rhs: &[Complex64],
    op: impl Fn(Complex64, Complex64) -> Complex64,
) -> Vec<Complex64> {
    let op = &op;
    lhs.iter()
        .flat_map(|&l| rhs.iter().map(move |&r| op(l, r)))
        .collect()
}

fn power(base: Complex64, exponent: Complex64) -> Complex64 {
    if exponent.im == 0.0 && exponent.re.fract() == 0.0 && exponent.re.abs() <= f64::from(i32::MAX)
    {
        return base.powi(exponent.re as i32);
    }
    if base == Complex64::default() && exponent.re > 0.0 {
        return Complex64::default();
    }
    base.powc(exponent)
}

fn asin(z: Complex64, window: u32) -> Vec<Complex64> {
    ln_branches(I * z + (ONE - z * z).sqrt(), window)
        .into_iter()
        .map(|w| -I * w)
        .collect()
}

fn atg(z: Complex64, window: u32) -> Vec<Complex64> {
    let half_i = I / 2.0;
    cross(
        &ln_branches(ONE - I * z, window),
        &ln_branches(ONE + I * z, window),
        |a, b| half_i * (a - b),
    )
}

fn arth(z: Complex64, window: u32) -> Vec<Complex64> {
    cross(
        &ln_branches(ONE + z, window),
        &ln_branches(ONE - z, window),
        |a, b| (a - b) / 2.0,
    )
}

fn nonzero_reciprocals(values: Vec<Complex64>) -> Vec<Complex64> {
    values
        .into_iter()
        .filter(|w| *w != Complex64::default())
        .map(|w| w.inv())
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Constant(Complex64),
    Variable,
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Box<Node>),
    Call2(Function2, Box<Node>, Box<Node>),
}

impl Node {
    fn build(expr: &Expr<'_>) -> Result<Node, NotSupportedError> {
        Ok(match expr {
            Expr::Value(token) => match token.kind {
                TokenKind::Number(n) => Node::Constant(n.into()),
                TokenKind::Variable => Node::Variable,
                TokenKind::Constant => Node::Constant(constant(token.literal)?),
                _ => return Err(NotSupportedError::new(token.literal)),
            },
            Expr::Unary { op, operand } => match op.literal {
                "-" => Node::Negate(Box::new(Node::build(operand)?)),
                other => return Err(NotSupportedError::new(other)),
            },
            Expr::Paren { inner, .. } => Node::build(inner)?,
            Expr::Binary { lhs, op, rhs } => Node::Binary(
                op.literal.parse()?,
                Box::new(Node::build(lhs)?),
                Box::new(Node::build(rhs)?),
            ),
            Expr::Call {
                func,
                arg,
                second: None,
                ..
            } => Node::Call(func.literal.parse()?, Box::new(Node::build(arg)?)),
            Expr::Call {
                func,
                arg,
                second: Some((_, second)),
                ..
            } => Node::Call2(
                func.literal.parse()?,
                Box::new(Node::build(arg)?),
                Box::new(Node::build(second)?),
            ),
        })
    }

    fn eval(&self, z: Complex64, window: u32) -> Vec<Complex64> {
        match self {
            Node::Constant(value) => vec![*value],
            Node::Variable => vec![z],
            Node::Negate(operand) => operand.eval(z, window).into_iter().map(|w| -w).collect(),
            Node::Binary(op, lhs, rhs) => {
                let op = *op;
                cross(&lhs.eval(z, window), &rhs.eval(z, window), |l, r| {
                    op.apply(l, r)
                })
            }
            Node::Call(function, arg) => arg
                .eval(z, window)
                .into_iter()
                .flat_map(|w| function.apply(w, window))
                .collect(),
            Node::Call2(function, first, second) => {
                function.apply(&first.eval(z, window), &second.eval(z, window), window)
            }
        }
    }
}

/// A parsed formula resolved against the function table. It owns everything
/// it needs, so the tree and the formula text can be dropped after
/// compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    root: Node,
}

impl CompiledFunction {
    /// Every value the formula takes at `z`, with logarithms expanded over
    /// branches `-window..=window`.
    pub fn evaluate(&self, z: Complex64, window: u32) -> Vec<Complex64> {
        self.root.eval(z, window)
    }
}

pub fn compile(expr: &Expr<'_>) -> Result<CompiledFunction, Error> {
    let root = Node::build(expr)?;
    debug!("compiled {expr}");
    Ok(CompiledFunction { root })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex, parse::Parser};

    fn function(formula: &str) -> CompiledFunction {
        compile(&Parser::new(formula).unwrap().parse().unwrap()).unwrap()
    }

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-9
    }

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn grammar_and_evaluator_agree() {
        for name in lex::FUNCTIONS_1 {
            assert!(name.parse::<Function>().is_ok(), "{name}");
        }
        for name in lex::FUNCTIONS_2 {
            assert!(name.parse::<Function2>().is_ok(), "{name}");
        }
        for name in lex::BINARY_OPERATORS {
            assert!(name.parse::<BinaryOp>().is_ok(), "{name}");
        }
        for name in lex::CONSTANTS {
            assert!(constant(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_names_are_not_supported() {
        assert_eq!("sec".parse::<Function>().unwrap_err().name, "sec");
        assert_eq!("%".parse::<BinaryOp>().unwrap_err().name, "%");
        assert!(constant("tau").is_err());
    }

    #[test]
    fn arithmetic() {
        assert_eq!(function("2+3*4").evaluate(c(0.0, 0.0), 6), vec![c(14.0, 0.0)]);
        assert_eq!(function("2-3-4").evaluate(c(0.0, 0.0), 6), vec![c(-5.0, 0.0)]);
        assert_eq!(function("2^3^2").evaluate(c(0.0, 0.0), 6), vec![c(512.0, 0.0)]);
        assert_eq!(function("-z").evaluate(c(1.0, -2.0), 6), vec![c(-1.0, 2.0)]);
        assert_eq!(function("z^2").evaluate(c(0.0, 1.0), 6), vec![c(-1.0, 0.0)]);
    }

    #[test]
    fn constants() {
        let values = function("e^(i*pi)").evaluate(c(0.0, 0.0), 0);
        assert_eq!(values.len(), 1);
        assert!(close(values[0], c(-1.0, 0.0)));
        assert_eq!(function("2i").evaluate(c(5.0, 5.0), 0), vec![c(0.0, 2.0)]);
    }

    #[test]
    fn real_valued_functions() {
        let z = c(3.0, -4.0);
        assert_eq!(function("real(z)").evaluate(z, 6), vec![c(3.0, 0.0)]);
        assert_eq!(function("im(z)").evaluate(z, 6), vec![c(-4.0, 0.0)]);
        assert_eq!(function("abs(z)").evaluate(z, 6), vec![c(5.0, 0.0)]);
        assert!(close(function("phi(i)").evaluate(z, 6)[0], c(FRAC_PI_2, 0.0)));
    }

    #[test]
    fn single_valued_functions() {
        let z = c(0.3, 0.7);
        let cases: [(&str, Complex64); 8] = [
            ("sin(z)", z.sin()),
            ("cos(z)", z.cos()),
            ("tg(z)", z.tan()),
            ("ctg(z)", ONE / z.tan()),
            ("th(z)", z.tanh()),
            ("cth(z)", ONE / z.tanh()),
            ("sch(z)", ONE / z.cosh()),
            ("csch(z)", ONE / z.sinh()),
        ];
        for (formula, expected) in cases {
            let values = function(formula).evaluate(z, 6);
            assert_eq!(values.len(), 1, "{formula}");
            assert!(close(values[0], expected), "{formula}: {values:?}");
        }
    }

    #[test]
    fn ln_enumerates_the_window() {
        let values = function("ln(1)").evaluate(c(0.0, 0.0), 0);
        assert_eq!(values, vec![c(0.0, 0.0)]);

        let values = function("ln(1)").evaluate(c(0.0, 0.0), 3);
        assert_eq!(values.len(), 7);
        for (value, k) in values.iter().zip(-3..=3) {
            assert!(close(*value, c(0.0, 2.0 * PI * k as f64)));
        }
    }

    #[test]
    fn branches_multiply_through_binary_operators() {
        let values = function("ln(z)+ln(z)").evaluate(c(1.0, 0.0), 2);
        assert_eq!(values.len(), 25);
        let values = function("-ln(z)*2").evaluate(c(1.0, 0.0), 2);
        assert_eq!(values.len(), 5);
    }

    #[test]
    fn nested_logarithms_use_the_same_window() {
        assert_eq!(function("ln(ln(z))").evaluate(c(2.0, 0.0), 1).len(), 9);
        assert_eq!(function("log(z, 2)").evaluate(c(2.0, 0.0), 1).len(), 9);
    }

    #[test]
    fn two_argument_log() {
        let values = function("log(8, 2)").evaluate(c(0.0, 0.0), 0);
        assert_eq!(values.len(), 1);
        assert!(close(values[0], c(3.0, 0.0)));
    }

    #[test]
    fn roots_ignore_the_window() {
        let values = function("root(8, 3)").evaluate(c(0.0, 0.0), 6);
        assert_eq!(values.len(), 3);
        for value in &values {
            assert!(close(value.powi(3), c(8.0, 0.0)), "{value}");
        }
        assert!(close(values[0], c(2.0, 0.0)));

        assert_eq!(function("root(z, 3.9)").evaluate(c(1.0, 0.0), 6).len(), 3);
        assert!(function("root(z, 0)").evaluate(c(1.0, 0.0), 6).is_empty());

        let values = function("root(4, -2)").evaluate(c(0.0, 0.0), 6);
        assert_eq!(values.len(), 2);
        for value in values {
            assert!(close(value * value, c(0.25, 0.0)));
        }
    }

    #[test]
    fn huge_root_degrees_have_no_values() {
        let root = function("root(1, z)");
        assert!(root.evaluate(c(1e30, 0.0), 0).is_empty());
        assert!(root.evaluate(c(-1e30, 0.0), 0).is_empty());
        assert!(root.evaluate(c(f64::INFINITY, 0.0), 0).is_empty());
        assert!(root.evaluate(c(f64::NAN, 0.0), 0).is_empty());
        assert!(roots(ONE, MAX_ROOT_DEGREE as i64 + 1).is_empty());
        assert_eq!(roots(ONE, 1000).len(), 1000);
    }

    #[test]
    fn sqrt_has_two_values() {
        let values = function("sqrt(z)").evaluate(c(-4.0, 0.0), 6);
        assert_eq!(values.len(), 2);
        assert!(close(values[0], c(0.0, 2.0)));
        assert!(close(values[1], c(0.0, -2.0)));
    }

    #[test]
    fn inverse_functions_invert() {
        let z = c(0.4, -0.3);
        let window = 2;
        let checks: [(&str, fn(Complex64) -> Complex64, usize); 6] = [
            ("asin(z)", |w| w.sin(), 5),
            ("acos(z)", |w| w.cos(), 5),
            ("atg(z)", |w| w.tan(), 25),
            ("arsh(z)", |w| w.sinh(), 5),
            ("arch(z)", |w| w.cosh(), 5),
            ("arth(z)", |w| w.tanh(), 25),
        ];
        for (formula, forward, count) in checks {
            let values = function(formula).evaluate(z, window);
            assert_eq!(values.len(), count, "{formula}");
            for value in values {
                assert!(close(forward(value), z), "{formula}: {value}");
            }
        }
    }

    #[test]
    fn principal_branches_match_num_complex() {
        let z = c(0.4, 0.2);
        let middle = |formula: &str| function(formula).evaluate(z, 0)[0];
        assert!(close(middle("asin(z)"), z.asin()));
        assert!(close(middle("acos(z)"), z.acos()));
        assert!(close(middle("atg(z)"), z.atan()));
        assert!(close(middle("arsh(z)"), z.asinh()));
        assert!(close(middle("arth(z)"), z.atanh()));
    }

    #[test]
    fn atg_takes_the_logarithms_in_arctangent_order() {
        let z = c(0.4, -0.3);
        let half_i = I / 2.0;
        let expected = half_i * ((ONE - I * z).ln() - (ONE + I * z).ln());
        assert_eq!(function("atg(z)").evaluate(z, 0).len(), 1);
        assert!(close(function("atg(z)").evaluate(z, 0)[0], expected));
    }

    #[test]
    fn actg_is_a_quarter_turn_minus_atg_of_the_reciprocal() {
        let z = c(0.4, -0.3);
        let values = function("actg(z)").evaluate(z, 2);
        let atgs = atg(z.inv(), 2);
        assert_eq!(values.len(), 25);
        for (value, a) in values.iter().zip(&atgs) {
            assert!(close(*value, Complex64::from(FRAC_PI_2) - a));
        }
        assert!(close(
            function("actg(z)").evaluate(z, 0)[0],
            Complex64::from(FRAC_PI_2) - z.inv().atan()
        ));
    }

    #[test]
    fn arcth_is_the_reciprocal_of_arth_of_the_reciprocal() {
        let z = c(0.4, -0.3);
        let values = function("arcth(z)").evaluate(z, 2);
        let expected = function("1/arth(1/z)").evaluate(z, 2);
        assert_eq!(values.len(), 25);
        for (value, e) in values.iter().zip(&expected) {
            assert!(close(*value, *e));
        }
        assert!(close(
            function("arcth(z)").evaluate(z, 0)[0],
            z.inv().atanh().inv()
        ));
    }

    #[test]
    fn arcth_skips_zero_branches() {
        // arth(0) is zero wherever both logarithms take the same branch
        let branches = arth(Complex64::default(), 1);
        assert_eq!(branches.len(), 9);
        assert_eq!(nonzero_reciprocals(branches).len(), 6);
    }

    #[test]
    fn compiled_functions_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledFunction>();

        let compiled = function("ln(z)*z");
        std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=4)
                .map(|n| {
                    let compiled = &compiled;
                    scope.spawn(move || compiled.evaluate(c(n as f64, 0.0), 1).len())
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), 3);
            }
        });
    }

    #[test]
    fn the_tree_can_be_dropped() {
        let compiled = {
            let formula = String::from("z+1");
            let expr = Parser::new(&formula).unwrap().parse().unwrap();
            compile(&expr).unwrap()
        };
        assert_eq!(compiled.evaluate(c(1.0, 1.0), 6), vec![c(2.0, 1.0)]);
    }
}
