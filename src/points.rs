use miette::Diagnostic;
use num_complex::Complex64;
use thiserror::Error;

use crate::CompiledFunction;

#[derive(Error, Debug, Diagnostic, PartialEq)]
#[error("Invalid point `{input}`")]
#[diagnostic(help("write a point as `label=re,im` or just `re,im`"))]
pub struct PointError {
    pub input: String,
}

/// An input point and the caller's name for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPoint {
    pub label: String,
    pub z: Complex64,
}

impl LabeledPoint {
    pub fn new(label: impl Into<String>, re: f64, im: f64) -> Self {
        LabeledPoint {
            label: label.into(),
            z: Complex64::new(re, im),
        }
    }

    /// Reads `label=re,im`, or `re,im` labeled with `index`.
    pub fn parse(input: &str, index: usize) -> Result<Self, PointError> {
        let invalid = || PointError {
            input: input.to_string(),
        };

        let (label, coordinates) = match input.split_once('=') {
            Some((label, coordinates)) if !label.trim().is_empty() => {
                (label.trim().to_string(), coordinates)
            }
            Some(_) => return Err(invalid()),
            None => (index.to_string(), input),
        };
        let (re, im) = coordinates.split_once(',').ok_or_else(invalid)?;
        let re = re.trim().parse().map_err(|_| invalid())?;
        let im = im.trim().parse().map_err(|_| invalid())?;

        Ok(LabeledPoint::new(label, re, im))
    }
}

pub fn parse_points<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<LabeledPoint>, PointError> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| LabeledPoint::parse(input.as_ref(), index))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointValues {
    pub label: String,
    pub values: Vec<Complex64>,
}

/// Evaluates `function` at every point, keeping the input order.
pub fn evaluate_points(
    function: &CompiledFunction,
    points: &[LabeledPoint],
    window: u32,
) -> Vec<PointValues> {
    points
        .iter()
        .map(|point| PointValues {
            label: point.label.clone(),
            values: function.evaluate(point.z, window),
        })
        .collect()
}
