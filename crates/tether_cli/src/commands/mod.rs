//! CLI command implementations.

pub mod dump;
pub mod init;
pub mod inspect;
pub mod verify;
