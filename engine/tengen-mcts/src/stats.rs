//! Small statistical helpers for node statistics.

/// One-sided 95% Student-t quantiles for 1..=30 degrees of freedom.
const T_TABLE: [f32; 30] = [
    6.314, 2.920, 2.353, 2.132, 2.015, 1.943, 1.895, 1.860, 1.833, 1.812,
    1.796, 1.782, 1.771, 1.761, 1.753, 1.746, 1.740, 1.734, 1.729, 1.725,
    1.721, 1.717, 1.714, 1.711, 1.708, 1.706, 1.703, 1.701, 1.699, 1.697,
];

/// One-sided 95% Student-t quantile for the given degrees of freedom.
///
/// Exact table for small samples, `z + 1.56/df` beyond it (within 1e-3 of
/// the true quantile for every df > 30).
pub fn t_quantile(df: u32) -> f32 {
    match df {
        0 => T_TABLE[0],
        1..=30 => T_TABLE[df as usize - 1],
        _ => 1.645 + 1.56 / df as f32,
    }
}

/// Median of an unsorted sample. Returns 0 for an empty one.
pub fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}
