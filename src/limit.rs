//! Parsed rate limits and the rate-string notation.
//!
//! A [`Limit`] is an immutable "N per M granularity" ceiling such as
//! `100 per 1 minute`. Rate strings follow the usual notation:
//!
//! ```text
//! 100/minute
//! 10 per 2 hours
//! 100/minute;1000/day      (items separated by ';', ',' or '|')
//! ```
//!
//! Limits are compared by effective rate (`amount / period`); the lower rate is
//! the *tighter* limit. See [`Limit::compare`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const SEPARATORS: [char; 3] = [';', ',', '|'];

/// Unit a limit's period is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// One second.
    Second,
    /// Sixty seconds.
    Minute,
    /// Sixty minutes.
    Hour,
    /// Twenty-four hours.
    Day,
    /// Thirty days.
    Month,
    /// Twelve months (360 days).
    Year,
}

impl Granularity {
    /// Length of one unit in seconds.
    pub const fn seconds(self) -> u64 {
        match self {
            Granularity::Second => 1,
            Granularity::Minute => 60,
            Granularity::Hour => 60 * 60,
            Granularity::Day => 24 * 60 * 60,
            Granularity::Month => 30 * 24 * 60 * 60,
            Granularity::Year => 12 * 30 * 24 * 60 * 60,
        }
    }

    /// Singular lowercase name, as used in rate strings and storage keys.
    pub const fn name(self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        let word = word.to_ascii_lowercase();
        let singular = word.strip_suffix('s').unwrap_or(&word);
        match singular {
            "second" => Some(Granularity::Second),
            "minute" => Some(Granularity::Minute),
            "hour" => Some(Granularity::Hour),
            "day" => Some(Granularity::Day),
            "month" => Some(Granularity::Month),
            "year" => Some(Granularity::Year),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rate string could not be parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The expression was empty or whitespace only.
    #[error("empty rate limit expression")]
    Empty,
    /// One item of the expression did not match `amount (/|per) [multiples] granularity`.
    #[error("malformed rate limit '{item}': {reason}")]
    Malformed {
        /// Offending item, trimmed.
        item: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// How one limit's effective rate relates to another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tightness {
    /// Lower allowed rate.
    Tighter,
    /// Higher allowed rate.
    Looser,
    /// Same allowed rate (possibly over a different period).
    Equal,
}

/// A parsed rate ceiling: `amount` hits per `multiples` x `granularity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Limit {
    amount: u64,
    multiples: u64,
    granularity: Granularity,
}

impl Limit {
    /// Build a limit; `amount` and `multiples` must be non-zero.
    pub fn new(amount: u64, multiples: u64, granularity: Granularity) -> Result<Self, ParseError> {
        if amount == 0 || multiples == 0 {
            return Err(ParseError::Malformed {
                item: format!("{amount} per {multiples} {granularity}"),
                reason: "amount and multiples must be positive",
            });
        }
        Ok(Self { amount, multiples, granularity })
    }

    /// `amount` hits per one `granularity`.
    pub fn per(amount: u64, granularity: Granularity) -> Result<Self, ParseError> {
        Self::new(amount, 1, granularity)
    }

    /// Ceiling of hits allowed in one period.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Number of granularity units in one period.
    pub fn multiples(&self) -> u64 {
        self.multiples
    }

    /// Unit of the period.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Period length in whole seconds.
    pub fn period_secs(&self) -> u64 {
        self.multiples.saturating_mul(self.granularity.seconds())
    }

    /// Period length.
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs())
    }

    /// Compare effective rates. Exact: cross-multiplies instead of dividing.
    pub fn compare(&self, other: &Limit) -> Tightness {
        let lhs = u128::from(self.amount) * u128::from(other.period_secs());
        let rhs = u128::from(other.amount) * u128::from(self.period_secs());
        match lhs.cmp(&rhs) {
            std::cmp::Ordering::Less => Tightness::Tighter,
            std::cmp::Ordering::Greater => Tightness::Looser,
            std::cmp::Ordering::Equal => Tightness::Equal,
        }
    }

    /// Strictly lower effective rate than `other`.
    pub fn is_tighter_than(&self, other: &Limit) -> bool {
        self.compare(other) == Tightness::Tighter
    }

    /// Counter key for this limit under a caller key and scope.
    pub fn key_for(&self, key: &str, scope: &str) -> String {
        format!(
            "LIMITER/{key}/{scope}/{}/{}/{}",
            self.amount, self.multiples, self.granularity
        )
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {} {}", self.amount, self.multiples, self.granularity)
    }
}

impl FromStr for Limit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Parse an expression holding exactly one limit.
pub fn parse(expr: &str) -> Result<Limit, ParseError> {
    let mut limits = parse_many(expr)?;
    if limits.len() != 1 {
        return Err(ParseError::Malformed {
            item: expr.trim().to_string(),
            reason: "expected a single rate limit",
        });
    }
    Ok(limits.remove(0))
}

/// Parse a `;`, `,` or `|` separated list of limits, preserving order.
pub fn parse_many(expr: &str) -> Result<Vec<Limit>, ParseError> {
    if expr.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    expr.split(SEPARATORS.as_slice()).map(parse_item).collect()
}

fn parse_item(raw: &str) -> Result<Limit, ParseError> {
    let item = raw.trim();
    let malformed = |reason| ParseError::Malformed { item: item.to_string(), reason };
    if item.is_empty() {
        return Err(malformed("empty item"));
    }

    let (amount, rest) = take_number(item).ok_or_else(|| malformed("expected a leading amount"))??;
    let rest = rest.trim_start();
    let rest = match rest.strip_prefix('/') {
        Some(rest) => rest,
        None => strip_keyword(rest, "per").ok_or_else(|| malformed("expected '/' or 'per'"))?,
    };
    let rest = rest.trim_start();
    let (multiples, rest) = match take_number(rest) {
        Some(parsed) => parsed?,
        None => (1, rest),
    };
    let granularity =
        Granularity::from_word(rest.trim()).ok_or_else(|| malformed("unknown granularity"))?;

    Limit::new(amount, multiples, granularity)
        .map_err(|_| malformed("amount and multiples must be positive"))
}

/// Leading run of ASCII digits. `None` when there is no digit at all.
fn take_number(s: &str) -> Option<Result<(u64, &str), ParseError>> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let (digits, rest) = s.split_at(end);
    Some(
        digits
            .parse::<u64>()
            .map(|n| (n, rest))
            .map_err(|_| ParseError::Malformed { item: s.to_string(), reason: "number out of range" }),
    )
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword).then(|| &s[keyword.len()..])
}
