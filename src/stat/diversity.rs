/// Unbiased Simpson's diversity over per-population counts of present samples.
///
/// `D = 1 - sum(n_i * (n_i - 1)) / (N * (N - 1))`. Undefined for fewer than two
/// observations, in which case `None` is returned.
pub fn simpson_diversity(counts: &[usize]) -> Option<f64> {
    let total: u64 = counts.iter().map(|&n| n as u64).sum();
    if total < 2 {
        return None;
    }

    let same_pairs: u64 = counts
        .iter()
        .map(|&n| n as u64)
        .map(|n| n * n.saturating_sub(1))
        .sum();
    let all_pairs = total * (total - 1);

    Some(1.0 - same_pairs as f64 / all_pairs as f64)
}
