use rand::Rng;

/// Clamp a probability into `[0, 1]`. NaN becomes zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Bernoulli trial on a sanitized probability.
pub fn roll<R: Rng + ?Sized>(rng: &mut R, chance: f64) -> bool {
    let chance = clamp_unit(chance);
    if chance <= 0.0 {
        return false;
    }
    if chance >= 1.0 {
        return true;
    }
    rng.gen::<f64>() < chance
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn clamps_out_of_range_and_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(-3.0), 0.0);
        assert_eq!(clamp_unit(7.5), 1.0);
        assert_eq!(clamp_unit(0.25), 0.25);
    }

    #[test]
    fn degenerate_chances_never_consult_rng() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(!roll(&mut rng, f64::NAN));
        assert!(!roll(&mut rng, 0.0));
        assert!(roll(&mut rng, f64::INFINITY));
    }
}
