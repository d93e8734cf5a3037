//! Staging sessions

pub mod cookie;
pub mod store;

pub use cookie::SessionCookie;
pub use store::{is_well_formed, EvictionReport, SessionGrant, TempSessionStore};
