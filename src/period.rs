use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use chrono::{Datelike, NaiveDate};

/// Number of periods covered by a report history, target included.
pub const WINDOW_LEN: usize = 5;

/// A reporting month (competência).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// Accepts any warehouse value that starts with `YYYY-MM`, such as a
    /// full date or a timestamp.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        raw.trim().get(..7)?.parse().ok()
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The target period and the four before it, oldest first.
    pub fn window(self) -> [Period; WINDOW_LEN] {
        let mut periods = [self; WINDOW_LEN];
        for idx in (0..WINDOW_LEN - 1).rev() {
            periods[idx] = periods[idx + 1].previous();
        }
        periods
    }
}

impl FromStr for Period {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 7 {
            anyhow::bail!("invalid period {s:?}, expected YYYY-MM");
        }
        let date = NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
            .with_context(|| format!("invalid period {s:?}, expected YYYY-MM"))?;
        Self::new(date.year(), date.month())
            .with_context(|| format!("period {s:?} out of range"))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_displays_year_month() {
        let p = period("2025-09");
        assert_eq!(p, Period::new(2025, 9).unwrap());
        assert_eq!(p.to_string(), "2025-09");
        assert_eq!(Period::new(2025, 13), None);
    }

    #[test]
    fn rejects_malformed_periods() {
        assert!("2025-13".parse::<Period>().is_err());
        assert!("2025-9".parse::<Period>().is_err());
        assert!("september".parse::<Period>().is_err());
        assert!("2025-09-01".parse::<Period>().is_err());
    }

    #[test]
    fn lenient_parse_takes_leading_year_month() {
        assert_eq!(Period::parse_lenient("2025-09-01"), Some(period("2025-09")));
        assert_eq!(Period::parse_lenient(" 2025-09 "), Some(period("2025-09")));
        assert_eq!(Period::parse_lenient("2025"), None);
        assert_eq!(Period::parse_lenient(""), None);
    }

    #[test]
    fn window_ends_at_target_in_ascending_order() {
        let window = period("2025-09").window();
        let labels: Vec<String> = window.iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, ["2025-05", "2025-06", "2025-07", "2025-08", "2025-09"]);
    }

    #[test]
    fn window_crosses_year_boundary() {
        let window = period("2025-02").window();
        let labels: Vec<String> = window.iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, ["2024-10", "2024-11", "2024-12", "2025-01", "2025-02"]);
    }
}
