pub mod blob;
pub mod checksum;
pub mod http_downloader;
pub mod idle_timeout;
pub mod validating_body;
