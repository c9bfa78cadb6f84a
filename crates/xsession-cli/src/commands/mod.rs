pub mod common;
pub mod release;
pub mod sessions;
pub mod sweep;
