pub mod capability_repository;

pub use capability_repository::{
    CapabilityRepository, NewCapability, NewConnection, SqliteCapabilityRepository,
};

#[cfg(test)]
pub use capability_repository::MockCapabilityRepository;
