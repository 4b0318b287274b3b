//! Shared inference utilities.

/// Numerically stable softmax.
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .map(f64::from)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (f64::from(l) - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins on ties.
#[must_use]
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, -2.0, 0.5, 3.0]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_softmax_large_logits() {
        let probs = softmax(&[1000.0, 1000.0, -1000.0, 0.0]);
        assert!((probs[0] - 0.5).abs() < 1e-12);
        assert!(probs[2] < 1e-12);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2, 0.0]), 1);
        assert_eq!(argmax(&[0.5, 0.5, 0.1, 0.1]), 0);
        assert_eq!(argmax(&[-3.0, -2.0, -1.0, -4.0]), 2);
    }

    #[test]
    fn test_confidence_matches_argmax_mass() {
        let logits = [0.3, 2.1, -0.4, 1.9];
        let probs = softmax(&logits);
        let idx = argmax(&logits);
        let max = probs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!((probs[idx] - max).abs() < f64::EPSILON);
    }
}
