//! BRT calculator properties.

use proptest::prelude::*;

use stc_isp::protocol::calculate_baud_brt8;

proptest! {
    /// Whenever the divisor lands strictly inside (1, 255) the calculator
    /// succeeds and picks the nearest reachable rate; with a reasonable
    /// divisor that rate is within the 5 % tolerance the BSL needs.
    #[test]
    fn reachable_rates_are_close(divisor in 2u32..=254, baud in 1200u32..=115200) {
        let clock_hz = (divisor * 16 * baud) as f64;
        let params = calculate_baud_brt8(clock_hz, baud).unwrap();
        prop_assert_eq!(params.brt, (256 - divisor) as u16);

        let actual = clock_hz / (16.0 * (256.0 - params.brt as f64));
        let error = (actual - baud as f64).abs() * 100.0 / baud as f64;
        prop_assert!(error < 0.001, "exact divisor must reproduce the rate");
    }

    /// Fractional divisors round to the nearest integer, which keeps the
    /// rate error within 5 % for any divisor of 10 or more.
    #[test]
    fn rounded_divisors_stay_in_tolerance(
        divisor in 10u32..=254,
        frac in 0u32..1000,
        baud in 1200u32..=115200,
    ) {
        let real_divisor = divisor as f64 + frac as f64 / 1000.0;
        if real_divisor > 254.5 {
            return Ok(());
        }
        let clock_hz = real_divisor * 16.0 * baud as f64;
        let params = calculate_baud_brt8(clock_hz, baud).unwrap();

        let actual = clock_hz / (16.0 * (256.0 - params.brt as f64));
        let error = (actual - baud as f64).abs() * 100.0 / baud as f64;
        prop_assert!(error <= 5.0, "error {error:.2}% at divisor {real_divisor}");
    }

    /// Divisors outside the register range are reported unreachable.
    #[test]
    fn out_of_range_divisors_are_rejected(baud in 1200u32..=115200) {
        // clock so low the divisor rounds to zero
        prop_assert!(calculate_baud_brt8((4 * baud) as f64, baud).is_err());
        // above the maximum
        prop_assert!(calculate_baud_brt8((256 * 16 * baud) as f64, baud).is_err());
    }
}
