//! Gain/loss between two consecutive snapshots of the same holding

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Earnings {
    /// Absolute change in value: `(current - previous) * quantity`.
    pub absolute: f64,
    /// Percentage change in price relative to the previous price.
    pub relative: f64,
}

impl Earnings {
    /// Returns `None` when there is no usable previous price.
    pub fn between(previous_price: Option<f64>, current_price: f64, quantity: f64) -> Option<Self> {
        let previous = previous_price.filter(|p| *p > 0.0 && p.is_finite())?;
        let delta = current_price - previous;
        Some(Self {
            absolute: delta * quantity,
            relative: delta / previous * 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earnings_from_previous_price() {
        let earnings = Earnings::between(Some(100.0), 110.0, 5.0).unwrap();
        assert!((earnings.absolute - 50.0).abs() < 1e-9);
        assert!((earnings.relative - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_earnings_loss() {
        let earnings = Earnings::between(Some(200.0), 150.0, 2.0).unwrap();
        assert!((earnings.absolute + 100.0).abs() < 1e-9);
        assert!((earnings.relative + 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_earnings_undefined_without_previous_price() {
        assert!(Earnings::between(None, 110.0, 5.0).is_none());
        assert!(Earnings::between(Some(0.0), 110.0, 5.0).is_none());
        assert!(Earnings::between(Some(-3.0), 110.0, 5.0).is_none());
    }
}
