use serde::{Deserialize, Serialize};

use crate::{
    config::ObservableConfig,
    utils::{enums::Comparison, histogram, Histogram},
    CatfitError, CatfitResult, Float,
};

/// Reading datasets from ROOT files.
pub mod io;

/// The name given to every imported dataset.
pub const DATASET_NAME: &str = "data_obs";

/// A bounded real-valued variable with a fit range and a binning used for plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    /// Variable (and branch) name
    pub name: String,
    /// Axis title
    pub title: String,
    /// Current value
    pub value: Float,
    /// Lower edge of the range
    pub min: Float,
    /// Upper edge of the range
    pub max: Float,
    /// Number of bins over the range
    pub bins: usize,
}

impl Observable {
    /// Create an [`Observable`] with a single bin over `[min, max]`.
    pub fn new(name: &str, value: Float, min: Float, max: Float) -> CatfitResult<Self> {
        if !(min < max) {
            return Err(CatfitError::Custom(format!(
                "Observable \"{name}\" needs min < max, got [{min}, {max}]"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            title: name.to_string(),
            value,
            min,
            max,
            bins: 1,
        })
    }

    /// Set the axis title.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Set the number of bins (at least one).
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(1);
        self
    }

    /// Build the observable described by the configuration. The bin count is the truncated
    /// quotient of the range and the bin width.
    pub fn from_config(config: &ObservableConfig) -> CatfitResult<Self> {
        let bins = ((config.xmax - config.xmin) / config.binw) as usize;
        Ok(Self::new(&config.name, config.x0, config.xmin, config.xmax)?
            .with_title(&config.title)
            .with_bins(bins))
    }

    /// The `(min, max)` range.
    pub fn range(&self) -> (Float, Float) {
        (self.min, self.max)
    }

    /// Whether `x` lies inside the (closed) range.
    pub fn contains(&self, x: Float) -> bool {
        x >= self.min && x <= self.max
    }

    /// Width of one plotting bin.
    pub fn bin_width(&self) -> Float {
        (self.max - self.min) / self.bins as Float
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Term {
    Always,
    Never,
    Compare { op: Comparison, value: Float },
}

impl Term {
    fn accepts(&self, x: Float) -> bool {
        match self {
            Term::Always => true,
            Term::Never => false,
            Term::Compare { op, value } => op.apply(x, *value),
        }
    }
}

/// A selection on the observable, written like `x>0` or `26<=x && x<=32`.
///
/// A cut is a disjunction (`||`) of conjunctions (`&&`) of comparisons between the observable
/// and a numeric literal. The literals `1`/`true` and `0`/`false` select everything and nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    clauses: Vec<Vec<Term>>,
}

impl Cut {
    /// A cut which accepts every value.
    pub fn always() -> Self {
        Self {
            clauses: vec![vec![Term::Always]],
        }
    }

    /// Parse `text` as a cut on the variable named `variable`.
    pub fn parse(text: &str, variable: &str) -> CatfitResult<Self> {
        let parse_error = || CatfitError::ParseError {
            name: text.to_string(),
            object: "Cut".to_string(),
        };
        if text.trim().is_empty() {
            return Ok(Self::always());
        }
        let mut clauses = Vec::new();
        for clause in text.split("||") {
            let mut terms = Vec::new();
            for raw in clause.split("&&") {
                let term = strip_parentheses(raw.trim());
                terms.push(parse_term(term, variable).ok_or_else(parse_error)?);
            }
            clauses.push(terms);
        }
        Ok(Self { clauses })
    }

    /// Whether `x` passes the cut.
    pub fn accepts(&self, x: Float) -> bool {
        self.clauses
            .iter()
            .any(|terms| terms.iter().all(|term| term.accepts(x)))
    }
}

fn strip_parentheses(mut term: &str) -> &str {
    while term.starts_with('(') && term.ends_with(')') && term.len() >= 2 {
        term = term[1..term.len() - 1].trim();
    }
    term
}

fn parse_term(term: &str, variable: &str) -> Option<Term> {
    match term {
        "1" | "true" | "kTRUE" => return Some(Term::Always),
        "0" | "false" | "kFALSE" => return Some(Term::Never),
        _ => {}
    }
    // two-character operators first so "<=" is not read as "<"
    let (position, symbol) = ["<=", ">=", "==", "!=", "<", ">"]
        .iter()
        .filter_map(|symbol| term.find(symbol).map(|position| (position, *symbol)))
        .min_by_key(|(position, symbol)| (*position, std::cmp::Reverse(symbol.len())))?;
    let op: Comparison = symbol.parse().ok()?;
    let lhs = term[..position].trim();
    let rhs = term[position + symbol.len()..].trim();
    if lhs == variable {
        rhs.parse::<Float>()
            .ok()
            .map(|value| Term::Compare { op, value })
    } else if rhs == variable {
        lhs.parse::<Float>().ok().map(|value| Term::Compare {
            op: op.flipped(),
            value,
        })
    } else {
        None
    }
}

/// An unbinned dataset of a single observable, optionally weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name
    pub name: String,
    /// Name of the observable the values belong to
    pub observable: String,
    values: Vec<Float>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    weights: Option<Vec<Float>>,
}

impl Dataset {
    /// Import `values` (and optional per-event `weights`) of `observable`, keeping only entries
    /// inside the observable range which pass `cut`.
    pub fn from_values(
        name: &str,
        observable: &Observable,
        values: &[Float],
        weights: Option<&[Float]>,
        cut: &Cut,
    ) -> CatfitResult<Self> {
        if let Some(weights) = weights {
            if weights.len() != values.len() {
                return Err(CatfitError::Custom(format!(
                    "Dataset \"{name}\" has {} values but {} weights",
                    values.len(),
                    weights.len()
                )));
            }
        }
        let keep: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, &x)| x.is_finite() && observable.contains(x) && cut.accepts(x))
            .map(|(i, _)| i)
            .collect();
        Ok(Self {
            name: name.to_string(),
            observable: observable.name.clone(),
            values: keep.iter().map(|&i| values[i]).collect(),
            weights: weights.map(|w| keep.iter().map(|&i| w[i]).collect()),
        })
    }

    /// The number of stored entries.
    pub fn n_events(&self) -> usize {
        self.values.len()
    }

    /// The sum of the entry weights (equal to [`Dataset::n_events`] for unweighted data).
    pub fn weighted_len(&self) -> Float {
        match &self.weights {
            Some(weights) => weights.iter().sum(),
            None => self.values.len() as Float,
        }
    }

    /// The stored observable values.
    pub fn values(&self) -> &[Float] {
        &self.values
    }

    /// The stored weights, if the dataset is weighted.
    pub fn weights(&self) -> Option<&[Float]> {
        self.weights.as_deref()
    }

    /// Whether the dataset carries per-entry weights.
    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }

    /// Weight of entry `index` (1 for unweighted data).
    pub fn weight(&self, index: usize) -> Float {
        self.weights
            .as_ref()
            .and_then(|w| w.get(index).copied())
            .unwrap_or(1.0)
    }

    /// The weighted number of entries passing `cut`.
    pub fn sum_entries(&self, cut: &Cut) -> Float {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, &x)| cut.accepts(x))
            .map(|(i, _)| self.weight(i))
            .sum()
    }

    /// Bin the dataset with the binning of `observable`.
    pub fn histogram(&self, observable: &Observable) -> Histogram {
        histogram(
            &self.values,
            observable.bins,
            observable.range(),
            self.weights(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn observable() -> Observable {
        Observable::from_config(&ObservableConfig::default()).unwrap()
    }

    #[test]
    fn observable_from_config() {
        let x = observable();
        assert_eq!(x.name, "x");
        assert_eq!(x.title, "M(#mu#mu) [GeV]");
        assert_eq!(x.bins, 29);
        assert_relative_eq!(x.bin_width(), 2.0);
        assert!(x.contains(12.0));
        assert!(x.contains(70.0));
        assert!(!x.contains(70.5));
        assert!(Observable::new("y", 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn cut_parsing() {
        let cut = Cut::parse("x>0", "x").unwrap();
        assert!(cut.accepts(0.5));
        assert!(!cut.accepts(0.0));

        let window = Cut::parse("26<=x && x<=32", "x").unwrap();
        assert!(window.accepts(26.0));
        assert!(window.accepts(32.0));
        assert!(!window.accepts(25.9));
        assert!(!window.accepts(32.1));

        let sidebands = Cut::parse("(x < 20) || x >= 40", "x").unwrap();
        assert!(sidebands.accepts(15.0));
        assert!(sidebands.accepts(40.0));
        assert!(!sidebands.accepts(30.0));

        assert!(Cut::parse("1", "x").unwrap().accepts(-1e9));
        assert!(!Cut::parse("0", "x").unwrap().accepts(1.0));
        assert!(Cut::parse("", "x").unwrap().accepts(3.0));
        assert!(Cut::parse("x != 3", "x").unwrap().accepts(2.0));
    }

    #[test]
    fn cut_rejects_unknown_variables() {
        assert!(matches!(
            Cut::parse("y>0", "x"),
            Err(CatfitError::ParseError { .. })
        ));
        assert!(Cut::parse("x>>0", "x").is_err());
        assert!(Cut::parse("x>abc", "x").is_err());
        assert!(Cut::parse("x", "x").is_err());
    }

    #[test]
    fn import_applies_range_and_cut() {
        let x = observable();
        let cut = Cut::parse("x>0 && x!=30", "x").unwrap();
        let values = [5.0, 12.0, 28.0, 30.0, 70.0, 71.0, Float::NAN];
        let ds = Dataset::from_values(DATASET_NAME, &x, &values, None, &cut).unwrap();
        assert_eq!(ds.values(), &[12.0, 28.0, 70.0]);
        assert!(!ds.is_weighted());
        assert_relative_eq!(ds.weighted_len(), 3.0);
        let window = Cut::parse("26<=x && x<=32", "x").unwrap();
        assert_relative_eq!(ds.sum_entries(&window), 1.0);
    }

    #[test]
    fn weighted_import() {
        let x = observable();
        let values = [20.0, 80.0, 30.0];
        let weights = [0.5, 3.0, 2.0];
        let ds = Dataset::from_values(DATASET_NAME, &x, &values, Some(&weights), &Cut::always())
            .unwrap();
        assert_eq!(ds.weights(), Some(&[0.5, 2.0][..]));
        assert_relative_eq!(ds.weighted_len(), 2.5);
        assert_relative_eq!(ds.weight(1), 2.0);
        let h = ds.histogram(&x);
        assert_relative_eq!(h.counts.iter().sum::<Float>(), 2.5);

        assert!(Dataset::from_values(DATASET_NAME, &x, &values, Some(&[1.0]), &Cut::always())
            .is_err());
    }
}
