pub mod config;
pub mod init;
pub mod secrets;
pub mod validate;
