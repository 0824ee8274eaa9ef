//! Session and credential handling for the Weather Whisper client.

pub mod gateway;
pub mod http;
pub mod session;
pub mod storage;
pub mod types;
pub mod validate;

pub use gateway::{AuthGateway, LogoutOutcome};
pub use http::{requires_credential, ApiClient};
pub use session::{AuthFeedback, RefreshTicket, SessionManager, SessionSnapshot, SessionState};
pub use storage::{FileStore, KeyValueStore, MemoryStore, PersistenceAdapter, TieredStorage, Tier};
pub use types::{CredentialPair, RegisteredUser, User};
pub use validate::FieldRules;
