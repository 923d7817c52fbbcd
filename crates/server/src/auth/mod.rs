pub mod session;

pub use session::{AuthenticatedSession, Principal, SessionAuthenticator};
