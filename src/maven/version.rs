use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

lazy_static! {
    static ref NUMERIC_PREFIX: Regex = Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?(.*)$").unwrap();
    static ref TIMESTAMP_SUFFIX: Regex = Regex::new(r"^(.*)-(\d{8}\.\d{6})(?:-(\d+))?$").unwrap();
    static ref BUILD_NUMBER_SUFFIX: Regex = Regex::new(r"^(.*?)-(\d+)$").unwrap();
    static ref VALID_CHARS: Regex = Regex::new(r"^[A-Za-z0-9._+-]+$").unwrap();
}

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,
    #[error("invalid character in version {0:?}")]
    InvalidCharacter(String),
    #[error("version {0:?} does not start with a numeric component")]
    NotNumeric(String),
    #[error("numeric component out of range in version {0:?}")]
    Overflow(String),
    #[error("dangling separator in version {0:?}")]
    DanglingSeparator(String),
}

/// Marks whether a version denotes a moving snapshot, a pinned (timestamped) snapshot or a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    Release,
    /// `1.0-SNAPSHOT`
    Snapshot,
    /// `1.0-20230102.101112-3`, the unique form a snapshot is deployed as
    Timestamped { timestamp: String },
}

/// A Maven-style version: `major.minor.revision[-qualifier][-buildNumber]`, optionally a snapshot.
///
/// Ordering is total: versions that are semantically equivalent but spelled differently
///  (`1.0` vs. `1.0.0`) are ordered by their text so that `Eq` and `Ord` agree.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub qualifier: Option<String>,
    pub build_number: Option<u32>,
    pub snapshot: SnapshotKind,
    text: String,
}

impl Version {
    pub fn new(major: u32, minor: u32, revision: u32) -> Version {
        Version {
            major,
            minor,
            revision,
            qualifier: None,
            build_number: None,
            snapshot: SnapshotKind::Release,
            text: format!("{}.{}.{}", major, minor, revision),
        }
    }

    pub fn parse(s: &str) -> Result<Version, VersionParseError> {
        if s.is_empty() {
            return Err(VersionParseError::Empty);
        }
        if !VALID_CHARS.is_match(s) {
            return Err(VersionParseError::InvalidCharacter(s.to_string()));
        }

        let (base, snapshot, timestamp_build) = if let Some(stripped) = s.strip_suffix(SNAPSHOT_SUFFIX) {
            (stripped, SnapshotKind::Snapshot, None)
        }
        else if let Some(captures) = TIMESTAMP_SUFFIX.captures(s) {
            let build_number = match captures.get(3) {
                None => None,
                Some(m) => Some(m.as_str().parse::<u32>().map_err(|_| VersionParseError::Overflow(s.to_string()))?),
            };
            let base = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            (base, SnapshotKind::Timestamped { timestamp: captures[2].to_string() }, build_number)
        }
        else {
            (s, SnapshotKind::Release, None)
        };

        let captures = NUMERIC_PREFIX.captures(base)
            .ok_or_else(|| VersionParseError::NotNumeric(s.to_string()))?;

        let numeric = |idx: usize| -> Result<u32, VersionParseError> {
            match captures.get(idx) {
                None => Ok(0),
                Some(m) => m.as_str().parse::<u32>().map_err(|_| VersionParseError::Overflow(s.to_string())),
            }
        };
        let major = numeric(1)?;
        let minor = numeric(2)?;
        let revision = numeric(3)?;

        let rest = captures.get(4).map(|m| m.as_str()).unwrap_or_default();
        let (qualifier, build_number) = Self::split_rest(rest, s)?;

        // a timestamped snapshot carries its build number in the timestamp suffix
        let build_number = timestamp_build.or(build_number);

        Ok(Version {
            major,
            minor,
            revision,
            qualifier,
            build_number,
            snapshot,
            text: s.to_string(),
        })
    }

    fn split_rest(rest: &str, full: &str) -> Result<(Option<String>, Option<u32>), VersionParseError> {
        if rest.is_empty() {
            return Ok((None, None));
        }

        let dash_separated = rest.starts_with('-');
        let rest = match rest.strip_prefix('-').or_else(|| rest.strip_prefix('.')) {
            Some(r) => r,
            // e.g. "1.0beta"
            None => rest,
        };
        if rest.is_empty() || rest.ends_with('-') || rest.ends_with('.') {
            return Err(VersionParseError::DanglingSeparator(full.to_string()));
        }

        if dash_separated && rest.chars().all(|c| c.is_ascii_digit()) {
            // "1.0-3" is a build number, "1.2.3.4" has a numeric qualifier
            let n = rest.parse::<u32>().map_err(|_| VersionParseError::Overflow(full.to_string()))?;
            return Ok((None, Some(n)));
        }

        if let Some(captures) = BUILD_NUMBER_SUFFIX.captures(rest) {
            let qualifier = &captures[1];
            if !qualifier.is_empty() && !qualifier.chars().all(|c| c.is_ascii_digit()) {
                let n = captures[2].parse::<u32>().map_err(|_| VersionParseError::Overflow(full.to_string()))?;
                return Ok((Some(qualifier.to_string()), Some(n)));
            }
        }

        Ok((Some(rest.to_string()), None))
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot != SnapshotKind::Release
    }

    /// The release this (snapshot) version leads up to
    pub fn release(&self) -> Version {
        let mut text = format!("{}.{}.{}", self.major, self.minor, self.revision);
        if let Some(q) = &self.qualifier {
            text.push('-');
            text.push_str(q);
        }
        Version {
            major: self.major,
            minor: self.minor,
            revision: self.revision,
            qualifier: self.qualifier.clone(),
            build_number: None,
            snapshot: SnapshotKind::Release,
            text,
        }
    }

    /// The `-SNAPSHOT` directory name a timestamped snapshot is deployed under
    pub fn base_version(&self) -> String {
        match &self.snapshot {
            SnapshotKind::Timestamped { timestamp } => {
                let suffix = match self.build_number {
                    Some(n) => format!("-{}-{}", timestamp, n),
                    None => format!("-{}", timestamp),
                };
                let base = self.text.strip_suffix(&suffix).unwrap_or(&self.text);
                format!("{}{}", base, SNAPSHOT_SUFFIX)
            }
            _ => self.text.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn qualifier_key(&self) -> QualifierKey {
        QualifierKey::of(self.qualifier.as_deref())
    }

    fn snapshot_key(&self) -> (u8, &str) {
        match &self.snapshot {
            SnapshotKind::Timestamped { timestamp } => (0, timestamp.as_str()),
            SnapshotKind::Snapshot => (1, ""),
            SnapshotKind::Release => (2, ""),
        }
    }

    /// Semantic comparison, ignoring spelling differences such as `1.0` vs. `1.0.0`
    pub fn compare_semantic(&self, other: &Version) -> Ordering {
        (self.major, self.minor, self.revision)
            .cmp(&(other.major, other.minor, other.revision))
            .then_with(|| self.qualifier_key().cmp(&other.qualifier_key()))
            .then_with(|| self.snapshot_key().cmp(&other.snapshot_key()))
            .then_with(|| self.build_number.cmp(&other.build_number))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum QualifierSegment {
    // declaration order is significant: strings sort below numbers
    Text(String),
    Number(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QualifierKey {
    rank: u8,
    segments: Vec<QualifierSegment>,
}

impl QualifierKey {
    const RELEASE: u8 = 5;

    fn of(qualifier: Option<&str>) -> QualifierKey {
        let qualifier = match qualifier {
            None => return QualifierKey { rank: Self::RELEASE, segments: vec![] },
            Some(q) => q,
        };

        let mut segments = Self::tokenize(qualifier);

        let rank = match segments.first() {
            Some(QualifierSegment::Number(_)) => 8,
            Some(QualifierSegment::Text(t)) => match t.as_str() {
                "alpha" | "a" => 1,
                "beta" | "b" => 2,
                "milestone" | "m" => 3,
                "rc" | "cr" => 4,
                "ga" | "final" | "release" => Self::RELEASE,
                "sp" => 6,
                _ => 7,
            },
            None => Self::RELEASE,
        };
        if (1..=6).contains(&rank) {
            segments.remove(0);
        }

        QualifierKey { rank, segments }
    }

    fn tokenize(qualifier: &str) -> Vec<QualifierSegment> {
        let mut result = Vec::new();
        let mut current = String::new();
        let mut current_is_digit = false;

        let flush = |current: &mut String, is_digit: bool, result: &mut Vec<QualifierSegment>| {
            if current.is_empty() {
                return;
            }
            if is_digit {
                // overly long digit runs fall back to text comparison
                match current.parse::<u64>() {
                    Ok(n) => result.push(QualifierSegment::Number(n)),
                    Err(_) => result.push(QualifierSegment::Text(current.clone())),
                }
            }
            else {
                result.push(QualifierSegment::Text(current.to_ascii_lowercase()));
            }
            current.clear();
        };

        for c in qualifier.chars() {
            if c == '.' || c == '-' || c == '_' || c == '+' {
                flush(&mut current, current_is_digit, &mut result);
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != current_is_digit {
                flush(&mut current, current_is_digit, &mut result);
            }
            current_is_digit = is_digit;
            current.push(c);
        }
        flush(&mut current, current_is_digit, &mut result);
        result
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_semantic(other)
            .then_with(|| self.text.cmp(&other.text))
    }
}
impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
