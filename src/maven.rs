pub mod coordinates;
pub mod metadata_xml;
pub mod paths;
pub mod pom;
pub mod range;
pub mod version;
