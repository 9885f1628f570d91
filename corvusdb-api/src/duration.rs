use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// An openCypher-style duration: months and days are kept separate from
/// seconds because a month has no fixed length in seconds, matching the
/// ISO-8601 period model rather than `chrono::Duration`'s fixed-width one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

impl Duration {
    pub fn new(months: i64, days: i64, seconds: i64, nanos: i32) -> Self {
        Duration {
            months,
            days,
            seconds,
            nanos,
        }
    }

    pub fn zero() -> Self {
        Duration::new(0, 0, 0, 0)
    }

    /// Total elapsed magnitude used for ordering, approximating a month as
    /// 30 days and a day as 24h, matching the spec's "total elapsed
    /// magnitude" comparison rule.
    fn total_nanos_approx(&self) -> i128 {
        let day_nanos: i128 = 86_400_000_000_000;
        let month_nanos: i128 = day_nanos * 30;
        self.months as i128 * month_nanos
            + self.days as i128 * day_nanos
            + self.seconds as i128 * 1_000_000_000
            + self.nanos as i128
    }

    /// Parses an ISO-8601 period/duration string, e.g. `P1Y2M3DT4H5M6.7S`.
    pub fn parse(s: &str) -> Option<Duration> {
        let mut chars = s.chars().peekable();
        if chars.next()? != 'P' {
            return None;
        }
        let mut months = 0i64;
        let mut days = 0i64;
        let mut seconds = 0i64;
        let mut nanos = 0i32;
        let mut in_time = false;

        while let Some(&c) = chars.peek() {
            if c == 'T' {
                in_time = true;
                chars.next();
                continue;
            }
            let mut num = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' || d == '-' {
                    num.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let unit = chars.next()?;
            let value: f64 = num.parse().ok()?;
            match (in_time, unit) {
                (false, 'Y') => months += (value * 12.0) as i64,
                (false, 'M') => months += value as i64,
                (false, 'W') => days += (value * 7.0) as i64,
                (false, 'D') => days += value as i64,
                (true, 'H') => seconds += (value * 3600.0) as i64,
                (true, 'M') => seconds += (value * 60.0) as i64,
                (true, 'S') => {
                    let whole = value.trunc() as i64;
                    let frac = value.fract();
                    seconds += whole;
                    nanos += (frac * 1_000_000_000.0).round() as i32;
                }
                _ => return None,
            }
        }
        Some(Duration::new(months, days, seconds, nanos))
    }

    pub fn to_iso8601(&self) -> String {
        let mut out = String::from("P");
        let years = self.months / 12;
        let rem_months = self.months % 12;
        if years != 0 {
            out.push_str(&format!("{}Y", years));
        }
        if rem_months != 0 {
            out.push_str(&format!("{}M", rem_months));
        }
        if self.days != 0 {
            out.push_str(&format!("{}D", self.days));
        }
        if self.seconds != 0 || self.nanos != 0 {
            out.push('T');
            let hours = self.seconds / 3600;
            let rem = self.seconds % 3600;
            let minutes = rem / 60;
            let secs = rem % 60;
            if hours != 0 {
                out.push_str(&format!("{}H", hours));
            }
            if minutes != 0 {
                out.push_str(&format!("{}M", minutes));
            }
            if secs != 0 || self.nanos != 0 || (hours == 0 && minutes == 0) {
                if self.nanos != 0 {
                    let frac = self.nanos as f64 / 1_000_000_000.0;
                    out.push_str(&format!("{}S", secs as f64 + frac));
                } else {
                    out.push_str(&format!("{}S", secs));
                }
            }
        }
        if out == "P" {
            out.push_str("T0S");
        }
        out
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.months == other.months
            && self.days == other.days
            && self.seconds == other.seconds
            && self.nanos == other.nanos
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(
            self.total_nanos_approx()
                .cmp(&other.total_nanos_approx()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_duration() {
        let d = Duration::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.days, 3);
        assert_eq!(d.seconds, 4 * 3600 + 5 * 60 + 6);
    }

    #[test]
    fn orders_by_total_magnitude() {
        let a = Duration::new(0, 1, 0, 0);
        let b = Duration::new(0, 0, 90_000, 0);
        assert!(a < b);
    }
}
