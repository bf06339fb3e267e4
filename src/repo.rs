pub mod availability;
pub mod changes;
pub mod local_repo;
pub mod remote_repo;
pub mod repository;
