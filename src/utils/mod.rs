use crate::Float;

/// Useful enumerations for model kinds and comparison operators.
pub mod enums;

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (Float, Float)) -> Vec<Float> {
    let bin_width = (range.1 - range.0) / (bins as Float);
    (0..=bins)
        .map(|i| range.0 + (i as Float * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with evenly
/// spaced `bins` over a given `range`
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: Float, bins: usize, limits: (Float, Float)) -> Option<usize> {
    if bins > 0 && value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as Float;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// A simple struct which represents a histogram
#[derive(Debug, Clone)]
pub struct Histogram {
    /// The number of counts in each bin (can be `f64`s since these might be weighted counts)
    pub counts: Vec<Float>,
    /// The sum of squared weights in each bin, used for the bin errors
    pub sumw2: Vec<Float>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<Float>,
}

/// A method which creates a histogram from some data by binning it with evenly spaced `bins` within
/// the given `range`. Values outside the range are ignored. A missing `weights` slice means every
/// value has unit weight.
pub fn histogram(
    values: &[Float],
    bins: usize,
    range: (Float, Float),
    weights: Option<&[Float]>,
) -> Histogram {
    let mut counts = vec![0.0; bins];
    let mut sumw2 = vec![0.0; bins];
    for (i, &value) in values.iter().enumerate() {
        if let Some(bin_index) = get_bin_index(value, bins, range) {
            let weight = weights.and_then(|w| w.get(i).copied()).unwrap_or(1.0);
            counts[bin_index] += weight;
            sumw2[bin_index] += weight * weight;
        }
    }
    Histogram {
        counts,
        sumw2,
        bin_edges: get_bin_edges(bins, range),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_binning() {
        assert_eq!(get_bin_index(0.5, 3, (0.0, 1.0)), Some(1));
        assert_eq!(get_bin_index(0.0, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.1, 3, (0.0, 1.0)), Some(0));
        assert_eq!(get_bin_index(0.9, 3, (0.0, 1.0)), Some(2));
        assert_eq!(get_bin_index(1.0, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(2.0, 3, (0.0, 1.0)), None);
        assert_eq!(get_bin_index(0.5, 0, (0.0, 1.0)), None);
    }

    #[test]
    fn test_histogram() {
        let values = [12.5, 13.9, 14.0, 69.0, 70.0, 11.0];
        let h = histogram(&values, 29, (12.0, 70.0), None);
        assert_eq!(h.counts.len(), 29);
        assert_eq!(h.bin_edges.len(), 30);
        assert_relative_eq!(h.counts[0], 2.0);
        assert_relative_eq!(h.counts[1], 1.0);
        assert_relative_eq!(h.counts[28], 1.0);
        assert_relative_eq!(h.counts.iter().sum::<Float>(), 4.0);
        assert_relative_eq!(h.bin_edges[1], 14.0);

        let weights = [2.0, 0.5, 1.0, 1.0, 1.0, 1.0];
        let h = histogram(&values, 29, (12.0, 70.0), Some(&weights));
        assert_relative_eq!(h.counts[0], 2.5);
        assert_relative_eq!(h.sumw2[0], 4.25);
    }
}
