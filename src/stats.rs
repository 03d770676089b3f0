//! Correlation coefficients and their two-sided significance
//!
//! Uses Student's t and the standard normal distribution via `statrs`.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::types::CorrelationMethod;

/// Largest sample for which Kendall's tau uses the exact permutation distribution
pub const KENDALL_EXACT_MAX_N: usize = 33;

/// A coefficient together with its two-sided p-value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficient {
    pub value: f64,
    pub p_value: f64,
}

/// Compute the coefficient for `method`.
///
/// Returns `None` when the inputs differ in length, hold fewer than two points, or
/// either side is constant, since no coefficient is defined then.
pub fn correlate(method: CorrelationMethod, x: &[f64], y: &[f64]) -> Option<Coefficient> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    match method {
        CorrelationMethod::Pearson => pearson(x, y),
        CorrelationMethod::Spearman => spearman(x, y),
        CorrelationMethod::Kendall => kendall(x, y),
    }
}

/// Pearson product-moment correlation
pub fn pearson(x: &[f64], y: &[f64]) -> Option<Coefficient> {
    let r = pearson_r(x, y)?;
    Some(Coefficient {
        value: r,
        p_value: t_test_p_value(r, x.len()),
    })
}

/// Spearman rank correlation: Pearson over average ranks
pub fn spearman(x: &[f64], y: &[f64]) -> Option<Coefficient> {
    let rx = average_ranks(x);
    let ry = average_ranks(y);
    let rho = pearson_r(&rx, &ry)?;
    Some(Coefficient {
        value: rho,
        p_value: t_test_p_value(rho, x.len()),
    })
}

/// Kendall's tau-b with tie correction
pub fn kendall(x: &[f64], y: &[f64]) -> Option<Coefficient> {
    let n = x.len();
    let mut concordant: u64 = 0;
    let mut discordant: u64 = 0;

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            let product = dx * dy;
            if product > 0.0 {
                concordant += 1;
            } else if product < 0.0 {
                discordant += 1;
            }
        }
    }

    let x_ties = tie_groups(x);
    let y_ties = tie_groups(y);
    let total = (n * (n - 1) / 2) as f64;
    let x_tied: f64 = x_ties.iter().map(|&t| (t * (t - 1)) as f64 / 2.0).sum();
    let y_tied: f64 = y_ties.iter().map(|&t| (t * (t - 1)) as f64 / 2.0).sum();

    let denominator = ((total - x_tied) * (total - y_tied)).sqrt();
    if !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }

    let s = concordant as f64 - discordant as f64;
    let tau = (s / denominator).clamp(-1.0, 1.0);

    let p_value = if x_ties.is_empty() && y_ties.is_empty() && n <= KENDALL_EXACT_MAX_N {
        kendall_exact_p_value(n, discordant as usize)
    } else {
        kendall_asymptotic_p_value(n, s, &x_ties, &y_ties)
    };

    Some(Coefficient {
        value: tau,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Pearson r, clamped into [-1, 1]
fn pearson_r(x: &[f64], y: &[f64]) -> Option<f64> {
    // r is scale invariant; scaling keeps the sums of squares finite
    let x = scaled(x)?;
    let y = scaled(y)?;

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(&y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if !(var_x > 0.0 && var_y > 0.0 && var_x.is_finite() && var_y.is_finite()) {
        return None;
    }

    let r = cov / (var_x * var_y).sqrt();
    if r.is_finite() {
        Some(r.clamp(-1.0, 1.0))
    } else {
        None
    }
}

/// Scale by a power of two so the largest magnitude lands in [0.5, 1].
///
/// Power-of-two scaling is exact, so in-range inputs give bit-identical results.
/// `None` for an all-zero or non-finite column.
fn scaled(values: &[f64]) -> Option<Vec<f64>> {
    let peak = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return None;
    }
    let exponent = peak.log2().ceil().clamp(-1020.0, 1020.0) as i32;
    let factor = 2f64.powi(-exponent);
    Some(values.iter().map(|v| v * factor).collect())
}

/// Two-sided p-value of a correlation coefficient under H0: rho = 0,
/// using t = r * sqrt((n - 2) / (1 - r^2)) with n - 2 degrees of freedom
fn t_test_p_value(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }

    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();

    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// 1-based ranks; ties receive the mean of the ranks they span
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Sizes of groups of equal values, only groups larger than one
fn tie_groups(values: &[f64]) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut groups = Vec::new();
    let mut run = 1;
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
        } else {
            if run > 1 {
                groups.push(run);
            }
            run = 1;
        }
    }
    if run > 1 {
        groups.push(run);
    }
    groups
}

/// Exact two-sided p-value for tau without ties.
///
/// The number of discordant pairs follows the distribution of inversions of a
/// random permutation, built here one element at a time.
fn kendall_exact_p_value(n: usize, discordant: usize) -> f64 {
    let total = n * (n - 1) / 2;
    let c = discordant.min(total - discordant);
    if 2 * c == total {
        return 1.0;
    }

    // dist[k] = P(inversions == k), truncated at c
    let mut dist = vec![0.0_f64; c + 1];
    dist[0] = 1.0;
    for j in 2..=n {
        let mut prefix = vec![0.0_f64; c + 2];
        for k in 0..=c {
            prefix[k + 1] = prefix[k] + dist[k];
        }
        for k in 0..=c {
            let lo = k.saturating_sub(j - 1);
            dist[k] = (prefix[k + 1] - prefix[lo]) / j as f64;
        }
    }

    (2.0 * dist.iter().sum::<f64>()).min(1.0)
}

/// Normal approximation with tie-corrected variance of S = concordant - discordant
fn kendall_asymptotic_p_value(n: usize, s: f64, x_ties: &[usize], y_ties: &[usize]) -> f64 {
    if n < 3 {
        return 1.0;
    }
    let nf = n as f64;

    let sum_a = |ties: &[usize]| -> f64 {
        ties.iter()
            .map(|&t| {
                let t = t as f64;
                t * (t - 1.0) * (2.0 * t + 5.0)
            })
            .sum()
    };
    let sum_b = |ties: &[usize]| -> f64 {
        ties.iter()
            .map(|&t| {
                let t = t as f64;
                t * (t - 1.0)
            })
            .sum()
    };
    let sum_c = |ties: &[usize]| -> f64 {
        ties.iter()
            .map(|&t| {
                let t = t as f64;
                t * (t - 1.0) * (t - 2.0)
            })
            .sum()
    };

    let v0 = nf * (nf - 1.0) * (2.0 * nf + 5.0);
    let v1 = sum_b(x_ties) * sum_b(y_ties) / (2.0 * nf * (nf - 1.0));
    let v2 = sum_c(x_ties) * sum_c(y_ties) / (9.0 * nf * (nf - 1.0) * (nf - 2.0));
    let variance = (v0 - sum_a(x_ties) - sum_a(y_ties)) / 18.0 + v1 + v2;

    if !variance.is_finite() || variance <= 0.0 {
        return 1.0;
    }

    let z = s / variance.sqrt();
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.sf(z.abs())).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_exact_negative() {
        let x = [10.0, 20.0, 30.0];
        let y = [100.0, 80.0, 60.0];
        let c = pearson(&x, &y).unwrap();
        assert_eq!(c.value, -1.0);
        assert_eq!(c.p_value, 0.0);
    }

    #[test]
    fn test_pearson_known_value() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 5.0, 4.0, 5.0];
        let c = pearson(&x, &y).unwrap();
        // r = 6 / sqrt(10 * 6)
        assert!((c.value - 0.774_596_669).abs() < 1e-6);
        // t = 2.1213, df = 3
        assert!((c.p_value - 0.1240).abs() < 1e-3);
    }

    #[test]
    fn test_pearson_survives_huge_magnitudes() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let huge = pearson(&[1e300, -1e300, 1e300, 5e299], &y).unwrap();
        let plain = pearson(&[2.0, -2.0, 2.0, 1.0], &y).unwrap();

        // r = 0.25 / sqrt(2.6875 * 5)
        assert!((plain.value - 0.068_199).abs() < 1e-5);
        assert!((huge.value - plain.value).abs() < 1e-9);
        assert!(huge.p_value < 1.0);
    }

    #[test]
    fn test_constant_input_is_undefined() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(spearman(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).is_none());
        assert!(kendall(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_average_ranks_with_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn test_spearman_monotonic() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 25.0];
        let c = spearman(&x, &y).unwrap();
        assert_eq!(c.value, 1.0);
    }

    #[test]
    fn test_kendall_exact_small_sample() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 3.0, 2.0, 5.0, 4.0];
        let c = kendall(&x, &y).unwrap();
        // 8 concordant, 2 discordant
        assert!((c.value - 0.6).abs() < 1e-12);
        // P(inversions <= 2) for n = 5 is (1 + 4 + 9) / 120
        assert!((c.p_value - 2.0 * 14.0 / 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_kendall_perfect_order() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let c = kendall(&x, &x).unwrap();
        assert_eq!(c.value, 1.0);
        // 2 / 4!
        assert!((c.p_value - 2.0 / 24.0).abs() < 1e-12);
    }

    #[test]
    fn test_kendall_ties_use_normal_approximation() {
        let x = [1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 3.0, 3.0, 5.0, 6.0];
        let c = kendall(&x, &y).unwrap();
        assert!(c.value > 0.7 && c.value <= 1.0);
        assert!(c.p_value > 0.0 && c.p_value < 0.1);
    }

    #[test]
    fn test_two_points_have_no_significance() {
        let c = pearson(&[1.0, 2.0], &[3.0, 5.0]).unwrap();
        assert_eq!(c.p_value, 1.0);
    }
}
