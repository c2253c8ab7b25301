use crate::telemetry::Reading;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Integrates power over time with the trapezoidal rule and returns kWh,
/// rounded to three decimals.
///
/// Readings must already be sorted by timestamp. Gaps between captures are
/// bridged linearly; nothing is interpolated or dropped.
pub fn integrate(readings: &[Reading]) -> f64 {
    let watt_hours: f64 = readings
        .windows(2)
        .map(|pair| {
            let hours = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64
                / 1000.0
                / SECONDS_PER_HOUR;
            let avg_power = (pair[0].watt + pair[1].watt) / 2.0;
            avg_power * hours
        })
        .sum();

    round_to_millis(watt_hours / 1000.0)
}

fn round_to_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
