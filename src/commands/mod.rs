pub mod classify;
pub mod credentials;
