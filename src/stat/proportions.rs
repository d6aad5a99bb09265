/// Normalize per-population counts to proportions of the locus total.
///
/// The output has one entry per population in universe order. An empty locus
/// yields all zeros so every row keeps the same shape.
pub fn population_proportions(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts
        .iter()
        .map(|&n| n as f64 / total as f64)
        .collect()
}

/// Tally population indices into a count vector over `num_populations` entries.
pub fn count_populations<I>(pop_indices: I, num_populations: usize) -> Vec<usize>
where
    I: IntoIterator<Item = usize>,
{
    let mut counts = vec![0; num_populations];
    for idx in pop_indices {
        counts[idx] += 1;
    }
    counts
}
