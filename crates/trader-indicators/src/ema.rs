//! Exponential moving average, shared by MACD.

use rust_decimal::Decimal;

/// EMA series over `values` with the standard smoothing factor
/// `k = 2 / (period + 1)`.
///
/// The first EMA value is the SMA of the first `period` inputs, so the
/// output length is `values.len() - period + 1`. Returns an empty vec when
/// the input is shorter than `period` or `period` is zero.
pub fn ema_series(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = Decimal::TWO / Decimal::from(period as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let seed: Decimal =
        values[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as u64);

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut ema = seed;
    for &v in &values[period..] {
        ema = v * k + ema * one_minus_k;
        out.push(ema);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_on_short_input() {
        assert!(ema_series(&[dec!(1), dec!(2)], 3).is_empty());
        assert!(ema_series(&[dec!(1)], 0).is_empty());
    }

    #[test]
    fn test_seed_is_sma() {
        let series = ema_series(&[dec!(2), dec!(4), dec!(6)], 3);
        assert_eq!(series, vec![dec!(4)]);
    }

    #[test]
    fn test_flat_input_stays_flat() {
        let series = ema_series(&[dec!(100); 10], 5);
        assert_eq!(series.len(), 6);
        for v in series {
            assert_eq!(v, dec!(100));
        }
    }

    #[test]
    fn test_ema_tracks_rising_input() {
        let values: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let series = ema_series(&values, 3);
        // Strictly increasing, always below the latest value.
        for w in series.windows(2) {
            assert!(w[1] > w[0]);
        }
        assert!(*series.last().unwrap() < dec!(10));
    }
}
