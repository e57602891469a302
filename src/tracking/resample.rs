//! Weight bookkeeping shared by both particle filters

use rand::Rng;

/// Normalize weights to unit sum
///
/// Returns `false` (leaving the weights untouched) when the sum is zero or
/// not finite, which the caller treats as a collapsed population.
pub fn normalize(weights: &mut [f32]) -> bool {
    let sum: f64 = weights.iter().map(|&w| w as f64).sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return false;
    }
    let inv = 1.0 / sum;
    for w in weights.iter_mut() {
        *w = (*w as f64 * inv) as f32;
    }
    true
}

/// Effective sample size `1 / Σ w²` of normalized weights
pub fn effective_sample_size(weights: &[f32]) -> f32 {
    let sq: f64 = weights.iter().map(|&w| (w as f64) * (w as f64)).sum();
    if sq > 0.0 {
        (1.0 / sq) as f32
    } else {
        0.0
    }
}

/// Systematic resampling
///
/// Draws one uniform offset and walks `N` evenly spaced pointers through the
/// cumulative weights, writing the selected source index for every slot into
/// `indices`. Weights must be normalized.
pub fn systematic_indices<R: Rng + ?Sized>(weights: &[f32], rng: &mut R, indices: &mut Vec<usize>) {
    let n = weights.len();
    indices.clear();
    if n == 0 {
        return;
    }

    let step = 1.0 / n as f64;
    let mut pointer = rng.gen::<f64>() * step;
    let mut cumulative = weights[0] as f64;
    let mut source = 0;

    for _ in 0..n {
        while pointer >= cumulative && source < n - 1 {
            source += 1;
            cumulative += weights[source] as f64;
        }
        indices.push(source);
        pointer += step;
    }
}

/// Gather `items` through `indices` into `scratch`, then swap it in
pub fn apply_indices<T: Clone>(items: &mut Vec<T>, indices: &[usize], scratch: &mut Vec<T>) {
    scratch.clear();
    scratch.extend(indices.iter().map(|&i| items[i].clone()));
    std::mem::swap(items, scratch);
}

/// Weighted median of `values`
///
/// The smallest value at which the cumulative weight reaches half the total.
pub fn weighted_median(values: &[f32], weights: &[f32]) -> Option<f32> {
    debug_assert_eq!(values.len(), weights.len());
    if values.is_empty() {
        return None;
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let total: f64 = weights.iter().map(|&w| w as f64).sum();
    let half = total / 2.0;
    let mut cumulative = 0.0f64;
    for &i in &order {
        cumulative += weights[i] as f64;
        if cumulative >= half {
            return Some(values[i]);
        }
    }
    order.last().map(|&i| values[i])
}
