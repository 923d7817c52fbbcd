pub mod authz;
pub mod handler;
pub mod protocol;

pub use handler::{router, ChatRouterState};
