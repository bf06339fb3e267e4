use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router, Server};

use mc_core::config::{NetworkSettings, RepositoryLocation, RepositoryReflection, RepositorySettings};
use mc_core::maven::coordinates::{Coordinate, PartIdentification};
use mc_core::maven::paths::as_maven_path;
use mc_core::util::checksum::ChecksumAlgorithm;

/// A Maven-layout repository served over HTTP from memory, counting requests per path
#[derive(Default)]
pub struct TestRepository {
    files: Mutex<BTreeMap<String, Bytes>>,
    requests: Mutex<BTreeMap<String, usize>>,
}

impl TestRepository {
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        self.files.lock().unwrap().insert(path.trim_start_matches('/').to_string(), data.into());
    }

    /// Publishes a POM and a jar for `coordinate`, each with a `.sha1` file
    pub fn publish(&self, coordinate: &str, body: &str) {
        let coordinate = Coordinate::parse(coordinate).unwrap();
        let pom = format!("<project><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version>{}</project>",
            coordinate.group(), coordinate.artifact(), coordinate.version, body);
        self.publish_part(&coordinate, PartIdentification::pom(), pom.into_bytes());
        self.publish_part(&coordinate, PartIdentification::jar(), format!("classes of {}", coordinate).into_bytes());
    }

    pub fn publish_part(&self, coordinate: &Coordinate, part: PartIdentification, data: Vec<u8>) {
        let path = as_maven_path(&coordinate.part(part));
        self.put(&format!("{}.sha1", path), ChecksumAlgorithm::Sha1.digest_hex(&data));
        self.put(&path, data);
    }

    pub fn requests(&self, path: &str) -> usize {
        self.requests.lock().unwrap().get(path.trim_start_matches('/')).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().values().sum()
    }
}

async fn serve_file(State(repository): State<Arc<TestRepository>>, Path(path): Path<String>) -> Response {
    let path = path.trim_start_matches('/').to_string();
    *repository.requests.lock().unwrap().entry(path.clone()).or_default() += 1;

    let data = repository.files.lock().unwrap().get(&path).cloned();
    match data {
        Some(data) => data.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Starts serving `repository` on an ephemeral port, returning the repository's base URL
pub fn serve(repository: Arc<TestRepository>) -> String {
    let app = Router::new()
        .route("/repo/*path", get(serve_file))
        .with_state(repository);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    let address = listener.local_addr().unwrap();
    let server = Server::from_tcp(listener).unwrap().serve(app.into_make_service());
    tokio::spawn(server);
    format!("http://{}/repo/", address)
}

pub fn reflection(url: &str, cache_root: &FsPath) -> RepositoryReflection {
    RepositoryReflection {
        cache_root: cache_root.to_path_buf(),
        offline: false,
        repositories: vec![RepositorySettings::new("test", RepositoryLocation::Remote(url.to_string()))],
        network: NetworkSettings {
            retries: 1,
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        },
    }
}

pub fn dependency(coordinate: &str) -> String {
    let coordinate = Coordinate::parse(coordinate).unwrap();
    format!("<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></dependency>",
        coordinate.group(), coordinate.artifact(), coordinate.version)
}

pub fn dependencies(coordinates: &[&str]) -> String {
    format!("<dependencies>{}</dependencies>", coordinates.iter().map(|c| dependency(c)).collect::<String>())
}
