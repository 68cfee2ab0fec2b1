
/// Converts a Phred-scaled quality into a natural-log probability of error.
/// # Arguments
/// * `phred` - the Phred-scaled quality value
/// # Examples
/// * `phred_to_ln_prob(10.0)` - returns ln(0.1)
/// * `phred_to_ln_prob(30.0)` - returns ln(0.001)
pub fn phred_to_ln_prob(phred: f64) -> f64 {
    -phred / 10.0 * std::f64::consts::LN_10
}

/// Converts a natural-log probability into Phred scale.
pub fn ln_prob_to_phred(ln_prob: f64) -> f64 {
    -10.0 * ln_prob / std::f64::consts::LN_10
}

/// Converts a plain probability into a natural-log probability.
/// # Panics
/// * if `prob` is negative
pub fn prob_to_ln_prob(prob: f64) -> f64 {
    assert!(prob >= 0.0);
    prob.ln()
}

/// Given ln(p), returns ln(1 - p) without leaving log space.
/// Stable for p near 1 because it goes through `ln_1p`.
pub fn ln_prob_invert(ln_prob: f64) -> f64 {
    debug_assert!(ln_prob <= 0.0);
    (-ln_prob.exp()).ln_1p()
}

/// Returns ln(n!) by direct summation.
/// Observation counts here are read depths, so the loop is short and exact enough.
fn ln_factorial(n: u64) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

/// Log PMF of a multinomial draw: ln P(obs | probs), with `obs[i]` draws of category `i`.
/// # Arguments
/// * `probs` - per-category probabilities, must sum to ~1
/// * `obs` - observed counts per category
/// # Panics
/// * if `probs.len() != obs.len()`
pub fn multinomial_ln_pmf(probs: &[f64], obs: &[u64]) -> f64 {
    assert_eq!(probs.len(), obs.len());
    let total: u64 = obs.iter().sum();
    let mut result = ln_factorial(total);
    for (&p, &k) in probs.iter().zip(obs.iter()) {
        result -= ln_factorial(k);
        if k > 0 {
            result += k as f64 * p.ln();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_phred_conversions() {
        assert_close(phred_to_ln_prob(30.0), 0.001_f64.ln());
        assert_close(ln_prob_to_phred(0.001_f64.ln()), 30.0);
        assert_close(ln_prob_to_phred(phred_to_ln_prob(17.0)), 17.0);
    }

    #[test]
    fn test_ln_prob_invert() {
        assert_close(ln_prob_invert(0.25_f64.ln()), 0.75_f64.ln());
        // double inversion is identity
        assert_close(ln_prob_invert(ln_prob_invert(0.001_f64.ln())), 0.001_f64.ln());
    }

    #[test]
    fn test_multinomial_ln_pmf() {
        // all twenty reads on one strand, ~= -13.86 nats
        let skewed = multinomial_ln_pmf(&[0.5, 0.5], &[0, 20]);
        assert_close(skewed, 20.0 * 0.5_f64.ln());

        // balanced case is far more likely
        let balanced = multinomial_ln_pmf(&[0.5, 0.5], &[10, 10]);
        assert!(balanced > skewed);

        // empty observation is certain
        assert_close(multinomial_ln_pmf(&[0.5, 0.5], &[0, 0]), 0.0);
    }

    #[test]
    fn test_multinomial_simple_binomial() {
        // C(3,1) * 0.5^3 = 3/8
        let lp = multinomial_ln_pmf(&[0.5, 0.5], &[1, 2]);
        assert_close(lp, (3.0 / 8.0_f64).ln());
    }
}
