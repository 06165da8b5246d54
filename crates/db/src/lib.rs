pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod scope;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{Repositories, RepositoryError};
pub use scope::{AdminScope, TenantScope};
