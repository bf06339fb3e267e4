use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use failsafe::backoff::Exponential;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::futures::CircuitBreaker;
use hyper::{Body, Client, Method, Request, Response, StatusCode, Uri};
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use hyper::body::to_bytes;
use hyper_tls::HttpsConnector;
use tracing::{debug, trace};

use crate::config::ChecksumPolicy;
use crate::repo::repository::FetchError;
use crate::util::blob::Blob;
use crate::util::checksum::{Checksum, ChecksumAlgorithm};
use crate::util::idle_timeout::IdleTimeout;
use crate::util::validating_body::{validator_for, ValidatingBody};

const USER_AGENT_VALUE: &str = concat!("mc/", env!("CARGO_PKG_VERSION"));
const BREAKER_FAILURES: u32 = 5;

type Breaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Downloads files relative to a fixed base URI, checking the body's integrity against a published
///  checksum: a checksum header if the server sends one, the `.sha1` / `.md5` sibling otherwise.
///
/// Instances do HTTP connection caching internally, so keeping them alive has performance benefits.
///  Repeated transport failures open a circuit breaker so that an unreachable server is skipped
///  quickly instead of timing out on every request.
pub struct ValidatingHttpDownloader {
    client: Client<HttpsConnector<HttpConnector>>,
    base_uri: String, // with trailing '/'
    authorization: Option<HeaderValue>,
    timeout: Duration,
    circuit_breaker: Breaker,
}
impl ValidatingHttpDownloader {
    pub fn new(base_uri: String, credentials: Option<(&str, &str)>, timeout: Duration) -> anyhow::Result<ValidatingHttpDownloader> {
        let mut base_uri = base_uri;
        if !base_uri.ends_with('/') {
            base_uri.push('/');
        }

        // check that the base URI is valid
        Uri::try_from(base_uri.clone())?;

        let authorization = match credentials {
            None => None,
            Some((user, password)) => {
                let encoded = STANDARD.encode(format!("{}:{}", user, password));
                Some(HeaderValue::from_str(&format!("Basic {}", encoded))?)
            }
        };

        let backoff = backoff::exponential(Duration::from_secs(5), Duration::from_secs(120));
        let circuit_breaker = Config::new()
            .failure_policy(failure_policy::consecutive_failures(BREAKER_FAILURES, backoff))
            .build();

        Ok(ValidatingHttpDownloader {
            client: Client::builder()
                .build::<_, Body>(HttpsConnector::new()),
            base_uri,
            authorization,
            timeout,
            circuit_breaker,
        })
    }

    pub fn uri(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        }
        else {
            format!("{}{}", self.base_uri, path.trim_start_matches('/'))
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<Response<Body>, FetchError> {
        let uri = self.uri(path);
        let mut builder = Request::builder()
            .method(method)
            .uri(Uri::try_from(uri.as_str()).map_err(|e| FetchError::Network(e.to_string()))?)
            .header(USER_AGENT, USER_AGENT_VALUE);
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        let request = builder.body(Body::empty())
            .map_err(|e| FetchError::Network(e.to_string()))?;

        trace!("requesting {:?}", request);

        let timeout = self.timeout;
        let response = async {
            match tokio::time::timeout(timeout, self.client.request(request)).await {
                Err(_) => Err(FetchError::Timeout),
                Ok(Err(e)) => Err(FetchError::Network(e.to_string())),
                Ok(Ok(response)) => Self::check_status(response),
            }
        };

        // only transport failures count towards opening the circuit
        let is_failure = |e: &FetchError| matches!(e, FetchError::Timeout | FetchError::Network(_));
        match self.circuit_breaker.call_with(is_failure, response).await {
            Ok(response) => Ok(response),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                debug!("circuit breaker for {} is open, skipping request for {}", self.base_uri, path);
                Err(FetchError::Network(format!("{} is temporarily disabled after repeated failures", self.base_uri)))
            }
        }
    }

    fn check_status(response: Response<Body>) -> Result<Response<Body>, FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::Unauthenticated(status.as_u16())),
            _ => Err(FetchError::Network(format!("upstream request failed: {}", status))),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool, FetchError> {
        match self.request(Method::HEAD, path).await {
            Ok(_) => Ok(true),
            Err(FetchError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetches a (small) file completely, without checksum validation
    pub async fn get_bytes(&self, path: &str) -> Result<Bytes, FetchError> {
        let response = self.request(Method::GET, path).await?;
        match tokio::time::timeout(self.timeout, to_bytes(response.into_body())).await {
            Err(_) => Err(FetchError::Timeout),
            Ok(Err(e)) => Err(FetchError::Network(e.to_string())),
            Ok(Ok(bytes)) => Ok(bytes),
        }
    }

    pub async fn get(&self, path: &str, checksum_policy: ChecksumPolicy) -> Result<Blob, FetchError> {
        let artifact_response = self.request(Method::GET, path).await?;

        let checksum = match checksum_policy {
            ChecksumPolicy::Ignore => None,
            _ => match Self::checksum_from_headers(&artifact_response) {
                Some(checksum) => Some(checksum),
                None => self.published_checksum(path).await?,
            },
        };

        if checksum.is_none() && checksum_policy == ChecksumPolicy::Require {
            return Err(FetchError::MissingChecksum);
        }

        // the body is streamed later, so the timeout has to travel with it
        let body = IdleTimeout::new(artifact_response.into_body(), self.timeout);
        let validators = checksum.iter().map(validator_for).collect();
        Ok(Blob {
            data: Box::pin(ValidatingBody::new(body, validators)),
            checksum,
        })
    }

    fn checksum_from_headers(response: &Response<Body>) -> Option<Checksum> {
        let header = |names: &[&str]| names.iter()
            .filter_map(|n| response.headers().get(*n))
            .filter_map(|h| h.to_str().ok())
            .next()
            .map(|s| s.to_string());

        if let Some(sha1) = header(&["x-checksum-sha1", "x-goog-meta-checksum-sha1"]) {
            if let Ok(checksum) = Checksum::parse(ChecksumAlgorithm::Sha1, &sha1) {
                return Some(checksum);
            }
        }
        if let Some(md5) = header(&["x-checksum-md5", "x-goog-meta-checksum-md5"]) {
            if let Ok(checksum) = Checksum::parse(ChecksumAlgorithm::Md5, &md5) {
                return Some(checksum);
            }
        }
        None
    }

    /// The content of the `.sha1` sibling, falling back to `.md5`
    async fn published_checksum(&self, path: &str) -> Result<Option<Checksum>, FetchError> {
        for algorithm in ChecksumAlgorithm::ALL {
            let checksum_path = format!("{}.{}", path, algorithm.extension());
            match self.get_bytes(&checksum_path).await {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    match Checksum::parse(algorithm, &text) {
                        Ok(checksum) => return Ok(Some(checksum)),
                        Err(e) => debug!("ignoring malformed checksum file {}: {}", checksum_path, e),
                    }
                }
                Err(FetchError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
