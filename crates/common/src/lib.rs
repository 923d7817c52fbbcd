// parley-common: shared domain types and the chat wire protocol

pub mod protocol;
pub mod types;
