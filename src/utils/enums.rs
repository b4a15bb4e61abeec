use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{CatfitError, Float};

/// The model recipes known to the [`FitBuilder`](crate::builder::FitBuilder).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// A Gaussian signal on top of a third-order Chebychev polynomial background.
    GaussPol,
}
impl Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::GaussPol => write!(f, "Gauss+Pol"),
        }
    }
}
impl FromStr for ModelKind {
    type Err = CatfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(' ', "").as_str() {
            "gauss+pol" | "gaus+pol" | "gausspol" | "gaussian+polynomial" => Ok(Self::GaussPol),
            _ => Err(CatfitError::ParseError {
                name: s.to_string(),
                object: "ModelKind".to_string(),
            }),
        }
    }
}

/// A comparison between an observable and a numeric literal in a cut expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
}
impl Comparison {
    /// Apply the comparison as `lhs <op> rhs`.
    pub fn apply(&self, lhs: Float, rhs: Float) -> bool {
        match self {
            Comparison::Less => lhs < rhs,
            Comparison::LessEqual => lhs <= rhs,
            Comparison::Greater => lhs > rhs,
            Comparison::GreaterEqual => lhs >= rhs,
            Comparison::Equal => lhs == rhs,
            Comparison::NotEqual => lhs != rhs,
        }
    }
    /// The comparison obtained by swapping operands, so that `a <op> b` is `b <op.flipped()> a`.
    pub fn flipped(&self) -> Self {
        match self {
            Comparison::Less => Comparison::Greater,
            Comparison::LessEqual => Comparison::GreaterEqual,
            Comparison::Greater => Comparison::Less,
            Comparison::GreaterEqual => Comparison::LessEqual,
            Comparison::Equal => Comparison::Equal,
            Comparison::NotEqual => Comparison::NotEqual,
        }
    }
}
impl Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Less => write!(f, "<"),
            Comparison::LessEqual => write!(f, "<="),
            Comparison::Greater => write!(f, ">"),
            Comparison::GreaterEqual => write!(f, ">="),
            Comparison::Equal => write!(f, "=="),
            Comparison::NotEqual => write!(f, "!="),
        }
    }
}
impl FromStr for Comparison {
    type Err = CatfitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(Self::Less),
            "<=" => Ok(Self::LessEqual),
            ">" => Ok(Self::Greater),
            ">=" => Ok(Self::GreaterEqual),
            "==" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            _ => Err(CatfitError::ParseError {
                name: s.to_string(),
                object: "Comparison".to_string(),
            }),
        }
    }
}
