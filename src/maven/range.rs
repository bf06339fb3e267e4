use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::maven::version::{Version, VersionParseError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeParseError {
    #[error("empty version range")]
    Empty,
    #[error("unbalanced brackets in version range {0:?}")]
    Unbalanced(String),
    #[error("interval {0:?} must have exactly two bounds")]
    BoundCount(String),
    #[error("lower bound exceeds upper bound in {0:?}")]
    Inverted(String),
    #[error("invalid version in range {range:?}: {source}")]
    Version { range: String, source: VersionParseError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A closed, open or half-open interval over versions. Missing bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Interval {
    pub fn contains(&self, version: &Version) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(b) if b.inclusive => version.compare_semantic(&b.version).is_ge(),
            Some(b) => version.compare_semantic(&b.version).is_gt(),
        };
        let below_upper = match &self.upper {
            None => true,
            Some(b) if b.inclusive => version.compare_semantic(&b.version).is_le(),
            Some(b) => version.compare_semantic(&b.version).is_lt(),
        };
        above_lower && below_upper
    }
}

/// The version requirement of a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRange {
    /// `*`, `[,)`: any version
    Any,
    /// `1.0`: a soft requirement, Maven's "recommended" version
    Soft(Version),
    /// `[1.0]`: a hard pin
    Exact(Version),
    /// `1.2~`: any `1.2.x`
    Fuzzy { major: u32, minor: u32 },
    /// `[1.0,2.0)` or a union `[1,2),[3,4)`
    Intervals(Vec<Interval>),
}

impl VersionRange {
    pub fn parse(s: &str) -> Result<VersionRange, RangeParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RangeParseError::Empty);
        }
        if s == "*" {
            return Ok(VersionRange::Any);
        }

        if let Some(prefix) = s.strip_suffix('~') {
            let version = Version::parse(prefix)
                .map_err(|source| RangeParseError::Version { range: s.to_string(), source })?;
            return Ok(VersionRange::Fuzzy { major: version.major, minor: version.minor });
        }

        if !s.starts_with('[') && !s.starts_with('(') {
            let version = Version::parse(s)
                .map_err(|source| RangeParseError::Version { range: s.to_string(), source })?;
            return Ok(VersionRange::Soft(version));
        }

        let mut intervals = Vec::new();
        let mut rest = s;
        while !rest.is_empty() {
            let close = rest.find([']', ')'])
                .ok_or_else(|| RangeParseError::Unbalanced(s.to_string()))?;
            let (interval_str, tail) = rest.split_at(close + 1);
            intervals.push(Self::parse_interval(interval_str, s)?);

            rest = tail.trim_start();
            if let Some(t) = rest.strip_prefix(',') {
                rest = t.trim_start();
                if rest.is_empty() {
                    return Err(RangeParseError::Unbalanced(s.to_string()));
                }
            }
            else if !rest.is_empty() {
                return Err(RangeParseError::Unbalanced(s.to_string()));
            }
        }

        if let [single] = intervals.as_slice() {
            match (&single.lower, &single.upper) {
                (None, None) => return Ok(VersionRange::Any),
                (Some(l), Some(u)) if l.version == u.version && l.inclusive && u.inclusive => {
                    return Ok(VersionRange::Exact(l.version.clone()));
                }
                _ => {}
            }
        }

        Ok(VersionRange::Intervals(intervals))
    }

    fn parse_interval(interval: &str, full: &str) -> Result<Interval, RangeParseError> {
        let lower_inclusive = match interval.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(RangeParseError::Unbalanced(full.to_string())),
        };
        let upper_inclusive = interval.ends_with(']');
        let inner = &interval[1..interval.len() - 1];
        if inner.contains(['[', '(', ']', ')']) {
            return Err(RangeParseError::Unbalanced(full.to_string()));
        }

        let parse_bound = |text: &str, inclusive: bool| -> Result<Option<Bound>, RangeParseError> {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            let version = Version::parse(text)
                .map_err(|source| RangeParseError::Version { range: full.to_string(), source })?;
            Ok(Some(Bound { version, inclusive }))
        };

        let parts: Vec<&str> = inner.split(',').collect();
        match parts.as_slice() {
            [single] => {
                // "[1.0]" pins; "(1.0)" is meaningless
                if !lower_inclusive || !upper_inclusive || single.trim().is_empty() {
                    return Err(RangeParseError::BoundCount(interval.to_string()));
                }
                let bound = parse_bound(single, true)?;
                Ok(Interval { lower: bound.clone(), upper: bound })
            }
            [lower, upper] => {
                let lower = parse_bound(lower, lower_inclusive)?;
                let upper = parse_bound(upper, upper_inclusive)?;
                if let (Some(l), Some(u)) = (&lower, &upper) {
                    if l.version.compare_semantic(&u.version).is_gt() {
                        return Err(RangeParseError::Inverted(full.to_string()));
                    }
                }
                Ok(Interval { lower, upper })
            }
            _ => Err(RangeParseError::BoundCount(interval.to_string())),
        }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionRange::Any => true,
            VersionRange::Soft(v) | VersionRange::Exact(v) => v.compare_semantic(version).is_eq(),
            VersionRange::Fuzzy { major, minor } => version.major == *major && version.minor == *minor,
            VersionRange::Intervals(intervals) => intervals.iter().any(|i| i.contains(version)),
        }
    }

    /// The version to use without consulting the repositories, if the range names exactly one
    pub fn direct_version(&self) -> Option<&Version> {
        match self {
            VersionRange::Soft(v) | VersionRange::Exact(v) => Some(v),
            _ => None,
        }
    }

    /// Picks the highest of the available versions that satisfies this range
    pub fn select<'a>(&self, available: impl IntoIterator<Item = &'a Version>) -> Option<&'a Version> {
        available.into_iter()
            .filter(|v| self.matches(v))
            .max()
    }
}

impl Display for VersionRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRange::Any => write!(f, "*"),
            VersionRange::Soft(v) => write!(f, "{}", v),
            VersionRange::Exact(v) => write!(f, "[{}]", v),
            VersionRange::Fuzzy { major, minor } => write!(f, "{}.{}~", major, minor),
            VersionRange::Intervals(intervals) => {
                for (i, interval) in intervals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match &interval.lower {
                        Some(b) => write!(f, "{}{}", if b.inclusive { '[' } else { '(' }, b.version)?,
                        None => write!(f, "(")?,
                    }
                    write!(f, ",")?;
                    match &interval.upper {
                        Some(b) => write!(f, "{}{}", b.version, if b.inclusive { ']' } else { ')' })?,
                        None => write!(f, ")")?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl FromStr for VersionRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[rstest]
    #[case::half_open("[1.0,2.0)", "1.0", true)]
    #[case::half_open_upper("[1.0,2.0)", "2.0", false)]
    #[case::half_open_inside("[1.0,2.0)", "1.9.9", true)]
    #[case::snapshot_below_release("[1.0,2.0)", "1.0-SNAPSHOT", false)]
    #[case::snapshot_of_upper_is_inside("[1.0,2.0)", "2.0-SNAPSHOT", true)]
    #[case::open_lower("(1.0,2.0]", "1.0", false)]
    #[case::closed_upper("(1.0,2.0]", "2.0", true)]
    #[case::unbounded_lower("(,1.0]", "0.1", true)]
    #[case::unbounded_upper("[1.0,)", "99", true)]
    #[case::union_first("[1,2),[3,4)", "1.5", true)]
    #[case::union_gap("[1,2),[3,4)", "2.5", false)]
    #[case::union_second("[1,2),[3,4)", "3.0", true)]
    #[case::exact("[1.5]", "1.5", true)]
    #[case::exact_other("[1.5]", "1.5.1", false)]
    #[case::exact_spelling("[1.5]", "1.5.0", true)]
    #[case::soft("1.5", "1.5", true)]
    #[case::soft_other("1.5", "1.6", false)]
    #[case::fuzzy("1.2~", "1.2.17", true)]
    #[case::fuzzy_other("1.2~", "1.3", false)]
    #[case::any("*", "0.0.1", true)]
    #[case::any_bracketed("[,)", "7.0", true)]
    fn test_matches(#[case] range: &str, #[case] version: &str, #[case] expected: bool) {
        let range = VersionRange::parse(range).unwrap();
        assert_eq!(range.matches(&v(version)), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::unbalanced("[1.0,2.0")]
    #[case::three_bounds("[1,2,3]")]
    #[case::inverted("[2.0,1.0]")]
    #[case::bad_version("[x,2.0)")]
    #[case::open_pin("(1.0)")]
    #[case::trailing_comma("[1,2),")]
    #[case::garbage_between("[1,2)x[3,4)")]
    fn test_parse_invalid(#[case] range: &str) {
        assert!(VersionRange::parse(range).is_err());
    }

    #[test]
    fn test_select_highest_matching() {
        let available = vec![v("1.0"), v("1.5"), v("2.0"), v("1.7-SNAPSHOT")];
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert_eq!(range.select(&available).unwrap().as_str(), "1.7-SNAPSHOT");

        let range = VersionRange::parse("[3.0,)").unwrap();
        assert!(range.select(&available).is_none());
    }

    #[test]
    fn test_display_roundtrips_structure() {
        for s in ["[1.0,2.0)", "(,1.0]", "[1.5]", "1.5", "1.2~", "*", "[1,2),[3,4)"] {
            let range = VersionRange::parse(s).unwrap();
            assert_eq!(VersionRange::parse(&range.to_string()).unwrap(), range);
        }
    }
}
