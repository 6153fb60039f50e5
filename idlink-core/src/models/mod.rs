pub mod connection;
pub mod id;
pub mod identity;

pub use connection::ProviderConnection;
pub use id::{generate_id, ConnectionId, IdentityId};
pub use identity::{AuthIdentity, AuthStatus, Profile};
