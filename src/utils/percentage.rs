use std::{fmt::Display, ops::Deref, str::FromStr};

use anyhow::anyhow;

/// Non negative share of a whole, used by the report filter.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

impl Percentage {
    pub const ZERO: Percentage = Percentage(0.);

    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. || value.is_nan() {
            None
        } else {
            Some(Percentage(value))
        }
    }
}

impl FromStr for Percentage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('%');
        let v = s.parse::<f64>()?;
        Percentage::new_opt(v).ok_or_else(|| anyhow!("Can't parse {s} into percentage"))
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Share of `value_ms` in `whole_ms`. An empty whole counts as 0%.
pub fn share_of(value_ms: i64, whole_ms: i64) -> Percentage {
    if whole_ms <= 0 {
        return Percentage(0.);
    }
    Percentage(value_ms.max(0) as f64 / whole_ms as f64 * 100.)
}

#[cfg(test)]
mod tests {
    use super::{share_of, Percentage};

    #[test]
    fn test_parse() {
        assert_eq!(*"12.5%".parse::<Percentage>().unwrap(), 12.5);
        assert_eq!(*"3".parse::<Percentage>().unwrap(), 3.);
        assert!("-1".parse::<Percentage>().is_err());
        assert!("abc".parse::<Percentage>().is_err());
    }

    #[test]
    fn test_share_of() {
        assert_eq!(*share_of(250, 1000), 25.);
        assert_eq!(*share_of(10, 0), 0.);
    }
}
