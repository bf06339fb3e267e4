use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::Error;

const ENV_PREFIX: &str = "MC_";
const ENV_REPOSITORY_PREFIX: &str = "MC_REPOSITORY_";

/// How long a cached answer from a repository (metadata, a part's availability) stays valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum UpdatePolicy {
    Always,
    Daily,
    /// minutes
    Interval(u64),
    Never,
}

impl UpdatePolicy {
    pub fn is_expired(&self, checked_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            UpdatePolicy::Always => true,
            UpdatePolicy::Never => false,
            UpdatePolicy::Daily => checked_at.date_naive() < now.date_naive(),
            UpdatePolicy::Interval(minutes) => now.signed_duration_since(checked_at) >= chrono::Duration::minutes(*minutes as i64),
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "always" => Ok(UpdatePolicy::Always),
            "daily" => Ok(UpdatePolicy::Daily),
            "never" => Ok(UpdatePolicy::Never),
            other => match other.strip_prefix("interval:") {
                Some(minutes) => minutes.parse::<u64>()
                    .map(UpdatePolicy::Interval)
                    .map_err(|_| format!("invalid update interval {:?}", minutes)),
                None => Err(format!("unknown update policy {:?}", other)),
            },
        }
    }
}

impl TryFrom<String> for UpdatePolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for UpdatePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdatePolicy::Always => write!(f, "always"),
            UpdatePolicy::Daily => write!(f, "daily"),
            UpdatePolicy::Interval(m) => write!(f, "interval:{}", m),
            UpdatePolicy::Never => write!(f, "never"),
        }
    }
}

impl Serialize for UpdatePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicy {
    /// a part without a published checksum is rejected
    Require,
    VerifyIfPresent,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RepositoryLocation {
    /// a directory in Maven layout
    Local(PathBuf),
    /// base URL, with trailing '/'
    Remote(String),
}

impl RepositoryLocation {
    pub fn parse(url: &str) -> Result<RepositoryLocation, Error> {
        if let Some(path) = url.strip_prefix("file://").or_else(|| url.strip_prefix("file:")) {
            return Ok(RepositoryLocation::Local(PathBuf::from(path)));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            let mut url = url.to_string();
            if !url.ends_with('/') {
                url.push('/');
            }
            return Ok(RepositoryLocation::Remote(url));
        }
        Err(Error::Config(format!("unsupported repository URL {:?}", url)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositorySettings {
    pub id: String,
    pub location: RepositoryLocation,
    pub user: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub offline: bool,
    pub releases: bool,
    pub snapshots: bool,
    pub release_policy: UpdatePolicy,
    pub snapshot_policy: UpdatePolicy,
    pub checksum_policy: ChecksumPolicy,
    pub changes_url: Option<String>,
}

impl RepositorySettings {
    /// Settings with default policies: serves releases and snapshots, checks daily, requires checksums
    pub fn new(id: impl Into<String>, location: RepositoryLocation) -> RepositorySettings {
        RepositorySettings {
            id: id.into(),
            location,
            user: None,
            password: None,
            offline: false,
            releases: true,
            snapshots: true,
            release_policy: UpdatePolicy::Daily,
            snapshot_policy: UpdatePolicy::Daily,
            checksum_policy: ChecksumPolicy::Require,
            changes_url: None,
        }
    }

    pub fn update_policy(&self, snapshot: bool) -> UpdatePolicy {
        if snapshot { self.snapshot_policy } else { self.release_policy }
    }

    pub fn serves(&self, snapshot: bool) -> bool {
        if snapshot { self.snapshots } else { self.releases }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSettings {
    /// per network operation
    pub timeout: Duration,
    pub retries: u32,
    pub retry_base_delay: Duration,
    pub download_concurrency: usize,
    pub walker_concurrency: usize,
    pub lock_timeout: Duration,
    pub stale_lock_age: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_base_delay: Duration::from_millis(200),
            download_concurrency: 8,
            walker_concurrency: 8,
            lock_timeout: Duration::from_secs(60),
            stale_lock_age: Duration::from_secs(10 * 60),
        }
    }
}

/// The effective repository configuration of a resolution session
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryReflection {
    pub cache_root: PathBuf,
    pub offline: bool,
    pub repositories: Vec<RepositorySettings>,
    pub network: NetworkSettings,
}

impl RepositoryReflection {
    pub fn repository(&self, id: &str) -> Option<&RepositorySettings> {
        self.repositories.iter().find(|r| r.id == id)
    }

    /// `<cacheRoot>/.mc`, where session-spanning bookkeeping lives
    pub fn bookkeeping_dir(&self) -> PathBuf {
        self.cache_root.join(".mc")
    }
}

/// One source of configuration. All fields are optional, a layer only overrides what it sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub cache_root: Option<PathBuf>,
    pub offline: Option<bool>,
    pub network: Option<NetworkLayer>,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkLayer {
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub download_concurrency: Option<usize>,
    pub walker_concurrency: Option<usize>,
    pub lock_timeout_secs: Option<u64>,
    pub stale_lock_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryLayer {
    pub id: String,
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub offline: Option<bool>,
    pub enabled: Option<bool>,
    pub releases: Option<bool>,
    pub snapshots: Option<bool>,
    pub release_policy: Option<UpdatePolicy>,
    pub snapshot_policy: Option<UpdatePolicy>,
    pub checksum_policy: Option<ChecksumPolicy>,
    pub changes_url: Option<String>,
}

impl RepositoryLayer {
    pub fn new(id: &str, url: &str) -> RepositoryLayer {
        RepositoryLayer {
            id: id.to_string(),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    fn merge(&mut self, other: RepositoryLayer) {
        fn over<T>(target: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *target = value;
            }
        }
        over(&mut self.url, other.url);
        over(&mut self.user, other.user);
        over(&mut self.password, other.password);
        over(&mut self.offline, other.offline);
        over(&mut self.enabled, other.enabled);
        over(&mut self.releases, other.releases);
        over(&mut self.snapshots, other.snapshots);
        over(&mut self.release_policy, other.release_policy);
        over(&mut self.snapshot_policy, other.snapshot_policy);
        over(&mut self.checksum_policy, other.checksum_policy);
        over(&mut self.changes_url, other.changes_url);
    }
}

impl ConfigLayer {
    pub fn from_toml(text: &str) -> Result<ConfigLayer, Error> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reads `MC_CACHE_ROOT`, `MC_OFFLINE` and `MC_REPOSITORY_<ID>_<FIELD>` from an environment
    ///  snapshot. `<ID>` is matched case-insensitively against known repository ids, with `_`
    ///  standing in for `-`.
    pub fn from_environment<'a>(env: impl IntoIterator<Item = (&'a str, &'a str)>, known_ids: &[String]) -> Result<ConfigLayer, Error> {
        let mut layer = ConfigLayer::default();

        for (key, value) in env {
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            match key {
                "MC_CACHE_ROOT" => layer.cache_root = Some(PathBuf::from(value)),
                "MC_OFFLINE" => layer.offline = Some(parse_bool(key, value)?),
                _ => {
                    let Some(rest) = key.strip_prefix(ENV_REPOSITORY_PREFIX) else {
                        continue;
                    };
                    let Some((env_id, field)) = rest.rsplit_once('_') else {
                        continue;
                    };
                    let id = known_ids.iter()
                        .find(|id| id.replace('-', "_").eq_ignore_ascii_case(env_id))
                        .cloned()
                        .unwrap_or_else(|| env_id.to_ascii_lowercase());

                    let mut repo = RepositoryLayer { id, ..Default::default() };
                    match field {
                        "URL" => repo.url = Some(value.to_string()),
                        "USER" => repo.user = Some(value.to_string()),
                        "PASSWORD" => repo.password = Some(value.to_string()),
                        "OFFLINE" => repo.offline = Some(parse_bool(key, value)?),
                        _ => {
                            debug!("ignoring unknown environment variable {}", key);
                            continue;
                        }
                    }
                    merge_repository(&mut layer.repositories, repo);
                }
            }
        }
        Ok(layer)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean, was {:?}", key, value))),
    }
}

fn merge_repository(repositories: &mut Vec<RepositoryLayer>, repo: RepositoryLayer) {
    match repositories.iter_mut().find(|r| r.id == repo.id) {
        Some(existing) => existing.merge(repo),
        None => repositories.push(repo),
    }
}

/// Merges configuration layers into one [RepositoryReflection]. Later layers override earlier ones
///  field by field; repositories are matched by id and keep the order of their first declaration.
pub struct RepositoryConfigurationCompiler {
    default_cache_root: PathBuf,
    layers: Vec<(String, ConfigLayer)>,
}

impl RepositoryConfigurationCompiler {
    pub fn new(default_cache_root: PathBuf) -> RepositoryConfigurationCompiler {
        RepositoryConfigurationCompiler {
            default_cache_root,
            layers: Vec::new(),
        }
    }

    /// `$HOME/.m2/mc-cache`, or `.mc-cache` in the working directory if there is no home
    pub fn default_cache_root(home: Option<&Path>) -> PathBuf {
        match home {
            Some(home) => home.join(".m2").join("mc-cache"),
            None => PathBuf::from(".mc-cache"),
        }
    }

    pub fn layer(mut self, source: impl Into<String>, layer: ConfigLayer) -> Self {
        self.layers.push((source.into(), layer));
        self
    }

    pub fn toml(self, source: impl Into<String>, text: &str) -> Result<Self, Error> {
        let source = source.into();
        let layer = ConfigLayer::from_toml(text)
            .map_err(|e| Error::Config(format!("{}: {}", source, e)))?;
        Ok(self.layer(source, layer))
    }

    pub fn toml_file(self, path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        self.toml(path.display().to_string(), &text)
    }

    pub fn environment<'a>(self, env: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self, Error> {
        let known_ids = self.repository_ids();
        let layer = ConfigLayer::from_environment(env, &known_ids)?;
        Ok(self.layer("environment", layer))
    }

    fn repository_ids(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for (_, layer) in &self.layers {
            for repo in &layer.repositories {
                if !result.contains(&repo.id) {
                    result.push(repo.id.clone());
                }
            }
        }
        result
    }

    pub fn compile(self) -> Result<RepositoryReflection, Error> {
        let mut cache_root = None;
        let mut offline = false;
        let mut network = NetworkSettings::default();
        let mut repositories: Vec<RepositoryLayer> = Vec::new();

        for (source, layer) in self.layers {
            debug!("applying configuration layer {}", source);
            if layer.cache_root.is_some() {
                cache_root = layer.cache_root;
            }
            if let Some(o) = layer.offline {
                offline = o;
            }
            if let Some(n) = layer.network {
                apply_network(&mut network, n);
            }
            for repo in layer.repositories {
                merge_repository(&mut repositories, repo);
            }
        }

        let mut compiled = Vec::new();
        for repo in repositories {
            if repo.enabled == Some(false) {
                debug!("repository {} is disabled", repo.id);
                continue;
            }
            let url = repo.url
                .ok_or_else(|| Error::Config(format!("repository {} has no URL", repo.id)))?;
            compiled.push(RepositorySettings {
                location: RepositoryLocation::parse(&url)?,
                user: repo.user,
                password: repo.password,
                offline: offline || repo.offline.unwrap_or(false),
                releases: repo.releases.unwrap_or(true),
                snapshots: repo.snapshots.unwrap_or(true),
                release_policy: repo.release_policy.unwrap_or(UpdatePolicy::Daily),
                snapshot_policy: repo.snapshot_policy.unwrap_or(UpdatePolicy::Daily),
                checksum_policy: repo.checksum_policy.unwrap_or(ChecksumPolicy::Require),
                changes_url: repo.changes_url,
                id: repo.id,
            });
        }

        if compiled.is_empty() {
            return Err(Error::NoRepository);
        }
        if network.download_concurrency == 0 || network.walker_concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        Ok(RepositoryReflection {
            cache_root: cache_root.unwrap_or(self.default_cache_root),
            offline,
            repositories: compiled,
            network,
        })
    }
}

fn apply_network(network: &mut NetworkSettings, layer: NetworkLayer) {
    if let Some(v) = layer.timeout_secs { network.timeout = Duration::from_secs(v); }
    if let Some(v) = layer.retries { network.retries = v; }
    if let Some(v) = layer.retry_base_delay_ms { network.retry_base_delay = Duration::from_millis(v); }
    if let Some(v) = layer.download_concurrency { network.download_concurrency = v; }
    if let Some(v) = layer.walker_concurrency { network.walker_concurrency = v; }
    if let Some(v) = layer.lock_timeout_secs { network.lock_timeout = Duration::from_secs(v); }
    if let Some(v) = layer.stale_lock_age_secs { network.stale_lock_age = Duration::from_secs(v); }
}

/// Collects the environment variables relevant to configuration and property resolution
pub fn environment_snapshot() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use rstest::*;
    use super::*;

    const SETTINGS: &str = r#"
cache_root = "/var/cache/mc"

[network]
retries = 5

[[repository]]
id = "central"
url = "https://repo1.maven.org/maven2"
release_policy = "never"

[[repository]]
id = "third-party"
url = "https://repo.example.com/third-party"
snapshots = false
checksum_policy = "verify-if-present"
"#;

    const VIEW: &str = r#"
[[repository]]
id = "central"
url = "https://mirror.example.com/central"

[[repository]]
id = "local"
url = "file:/srv/maven"
"#;

    fn compiler() -> RepositoryConfigurationCompiler {
        RepositoryConfigurationCompiler::new(PathBuf::from("/default"))
    }

    #[test]
    fn test_layers_override_field_by_field() {
        let reflection = compiler()
            .toml("settings", SETTINGS).unwrap()
            .toml("view", VIEW).unwrap()
            .compile().unwrap();

        assert_eq!(reflection.cache_root, PathBuf::from("/var/cache/mc"));
        assert_eq!(reflection.network.retries, 5);
        let ids: Vec<&str> = reflection.repositories.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["central", "third-party", "local"]);

        let central = reflection.repository("central").unwrap();
        assert_eq!(central.location, RepositoryLocation::Remote("https://mirror.example.com/central/".to_string()));
        assert_eq!(central.release_policy, UpdatePolicy::Never);
        assert_eq!(central.checksum_policy, ChecksumPolicy::Require);

        let third_party = reflection.repository("third-party").unwrap();
        assert!(!third_party.snapshots);
        assert_eq!(third_party.checksum_policy, ChecksumPolicy::VerifyIfPresent);

        assert_eq!(reflection.repository("local").unwrap().location, RepositoryLocation::Local(PathBuf::from("/srv/maven")));
    }

    #[test]
    fn test_environment_layer() {
        let env = vec![
            ("MC_OFFLINE", "true"),
            ("MC_REPOSITORY_THIRD_PARTY_USER", "jdoe"),
            ("MC_REPOSITORY_THIRD_PARTY_PASSWORD", "secret"),
            ("MC_REPOSITORY_EXTRA_URL", "https://extra.example.com"),
            ("PATH", "/usr/bin"),
        ];
        let reflection = compiler()
            .toml("settings", SETTINGS).unwrap()
            .environment(env).unwrap()
            .compile().unwrap();

        assert!(reflection.offline);
        assert!(reflection.repositories.iter().all(|r| r.offline));
        let third_party = reflection.repository("third-party").unwrap();
        assert_eq!(third_party.user.as_deref(), Some("jdoe"));
        assert_eq!(third_party.password.as_deref(), Some("secret"));
        assert!(reflection.repository("extra").is_some());
    }

    #[test]
    fn test_disabled_repositories() {
        let disable = ConfigLayer {
            repositories: vec![
                RepositoryLayer { id: "central".to_string(), enabled: Some(false), ..Default::default() },
                RepositoryLayer { id: "third-party".to_string(), enabled: Some(false), ..Default::default() },
            ],
            ..Default::default()
        };
        let result = compiler()
            .toml("settings", SETTINGS).unwrap()
            .layer("overrides", disable)
            .compile();
        assert!(matches!(result, Err(Error::NoRepository)));
    }

    #[rstest]
    #[case::unknown_field("bogus = 1")]
    #[case::bad_policy("[[repository]]\nid = \"x\"\nurl = \"https://x\"\nrelease_policy = \"sometimes\"")]
    fn test_invalid_toml(#[case] text: &str) {
        assert!(compiler().toml("settings", text).is_err());
    }

    #[test]
    fn test_unsupported_url() {
        let result = compiler()
            .toml("settings", "[[repository]]\nid = \"x\"\nurl = \"ftp://x\"").unwrap()
            .compile();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[rstest]
    #[case(UpdatePolicy::Always, 0, true)]
    #[case(UpdatePolicy::Never, 100_000, false)]
    #[case(UpdatePolicy::Daily, 30, false)]
    #[case(UpdatePolicy::Daily, 60 * 13, true)]
    #[case(UpdatePolicy::Interval(60), 59, false)]
    #[case(UpdatePolicy::Interval(60), 60, true)]
    fn test_update_policy(#[case] policy: UpdatePolicy, #[case] minutes_ago: i64, #[case] expected: bool) {
        let now = Utc.with_ymd_and_hms(2023, 1, 2, 12, 0, 0).unwrap();
        let checked_at = now - chrono::Duration::minutes(minutes_ago);
        assert_eq!(policy.is_expired(checked_at, now), expected);
    }
}
