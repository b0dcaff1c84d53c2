//! Season/episode selection mini-grammar: `all`, `N`, `N-M` and comma lists.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use tracing::debug;

/// A filter over 1-based season or episode numbers.
///
/// Selections are kept as sorted, merged, non-overlapping ranges, so a wide
/// range costs the same as a narrow one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SelectionSpec {
    #[default]
    All,
    Only(Vec<RangeInclusive<u32>>),
}

impl SelectionSpec {
    /// Parses a selection string.
    ///
    /// Malformed tokens are dropped rather than rejected, so a typo narrows a
    /// batch instead of aborting it. `0` is not a valid number: a range that
    /// starts at 0 begins at 1 instead, and `0` alone is dropped. An empty
    /// result, an empty input or the literal `all` (any case) yields
    /// [`SelectionSpec::All`].
    ///
    /// ```
    /// use framewalk::SelectionSpec;
    ///
    /// let spec = SelectionSpec::parse(Some("1,3-5,8"));
    /// assert!(spec.contains(4));
    /// assert!(!spec.contains(2));
    /// assert_eq!(SelectionSpec::parse(Some("ALL")), SelectionSpec::All);
    /// ```
    pub fn parse(input: Option<&str>) -> Self {
        let Some(input) = input.map(str::trim) else {
            return Self::All;
        };
        if input.is_empty() || input.eq_ignore_ascii_case("all") {
            return Self::All;
        }

        let mut ranges = Vec::new();
        for token in input.split(',').map(str::trim) {
            if token.is_empty() {
                continue;
            }

            if let Some((start, end)) = token.split_once('-') {
                let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                else {
                    debug!(token, "Skipping malformed range");
                    continue;
                };
                let (low, high) = if start <= end { (start, end) } else { (end, start) };
                if high == 0 {
                    debug!(token, "Skipping zero range");
                    continue;
                }
                ranges.push(low.max(1)..=high);
            } else {
                match token.parse::<u32>() {
                    Ok(0) => debug!(token, "Skipping zero selection"),
                    Ok(n) => ranges.push(n..=n),
                    Err(_) => debug!(token, "Skipping malformed selection token"),
                }
            }
        }

        if ranges.is_empty() {
            Self::All
        } else {
            Self::Only(normalise(ranges))
        }
    }

    pub fn contains(&self, n: u32) -> bool {
        match self {
            Self::All => true,
            Self::Only(ranges) => ranges.iter().any(|r| r.contains(&n)),
        }
    }
}

/// Sorts `ranges` and merges the ones that overlap or touch.
fn normalise(mut ranges: Vec<RangeInclusive<u32>>) -> Vec<RangeInclusive<u32>> {
    ranges.sort_by_key(|r| *r.start());
    let mut merged: Vec<RangeInclusive<u32>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if *range.start() <= last.end().saturating_add(1) => {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

impl FromStr for SelectionSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

impl fmt::Display for SelectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(ranges) => {
                let parts: Vec<String> = ranges
                    .iter()
                    .map(|r| {
                        if r.start() == r.end() {
                            r.start().to_string()
                        } else {
                            format!("{}-{}", r.start(), r.end())
                        }
                    })
                    .collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}
