pub mod in_flight;
pub mod local_cache;
pub mod lock_file;
