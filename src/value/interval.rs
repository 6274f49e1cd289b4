use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(-)?P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,](\d{1,9}))?S)?)?$",
    )
    .expect("duration pattern is valid")
});

/// A calendar duration in ISO-8601 `PnYnMnDTnHnMnS` form.
///
/// Components are kept separately because months and years have no fixed
/// length; the canonical text only ever omits zero components, it never
/// carries one unit over into another. Weeks are folded into days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interval {
    pub negative: bool,
    pub years: u64,
    pub months: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub nanos: u32,
}

impl Interval {
    pub fn is_zero(&self) -> bool {
        self.years == 0
            && self.months == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
            && self.nanos == 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("PT0S");
        }
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str("P")?;
        for (amount, unit) in [(self.years, 'Y'), (self.months, 'M'), (self.days, 'D')] {
            if amount != 0 {
                write!(f, "{amount}{unit}")?;
            }
        }
        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 || self.nanos != 0 {
            f.write_str("T")?;
            if self.hours != 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes != 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.nanos != 0 {
                let fraction = format!("{:09}", self.nanos);
                write!(f, "{}.{}S", self.seconds, fraction.trim_end_matches('0'))?;
            } else if self.seconds != 0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIntervalError {
    BadFormat,
    Overflow,
}

impl fmt::Display for ParseIntervalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadFormat => write!(f, "not an ISO-8601 duration"),
            Self::Overflow => write!(f, "duration component out of range"),
        }
    }
}

impl std::error::Error for ParseIntervalError {}

impl FromStr for Interval {
    type Err = ParseIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DURATION.captures(s).ok_or(ParseIntervalError::BadFormat)?;
        // "P" and "PT" alone are not durations.
        if caps.iter().skip(2).all(|c| c.is_none()) {
            return Err(ParseIntervalError::BadFormat);
        }
        if s.ends_with('T') {
            return Err(ParseIntervalError::BadFormat);
        }
        let number = |i: usize| -> Result<u64, ParseIntervalError> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().map_err(|_| ParseIntervalError::Overflow),
                None => Ok(0),
            }
        };
        let weeks = number(4)?;
        let days = weeks
            .checked_mul(7)
            .and_then(|d| d.checked_add(number(5).ok()?))
            .ok_or(ParseIntervalError::Overflow)?;
        let nanos = match caps.get(9) {
            Some(m) => {
                let digits = m.as_str();
                let padded = format!("{digits:0<9}");
                padded.parse().map_err(|_| ParseIntervalError::Overflow)?
            }
            None => 0,
        };
        Ok(Interval {
            negative: caps.get(1).is_some(),
            years: number(2)?,
            months: number(3)?,
            days,
            hours: number(6)?,
            minutes: number(7)?,
            seconds: number(8)?,
            nanos,
        })
    }
}
