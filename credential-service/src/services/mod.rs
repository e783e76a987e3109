pub mod credential;
pub mod database;
pub mod error;
pub mod events;
pub mod jwt;
pub mod metrics;
pub mod non_critical;
pub mod store;
pub mod sweeper;
pub mod user_directory;

pub use credential::{CredentialService, LoginResult, PurgeReport, TokenPair, TokenPolicy};
pub use database::Database;
pub use error::ServiceError;
pub use events::{EventNotifier, EventPublisher, MockEventPublisher, RedisEventPublisher};
pub use jwt::{AccessTokenClaims, TokenCodec};
pub use store::{CredentialStores, InMemoryCredentialStore};
pub use sweeper::spawn_expiry_sweeper;
pub use user_directory::{HttpUserDirectory, MockUserDirectory, UserDirectory};
