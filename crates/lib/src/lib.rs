//! Propbot core library — menu catalog, dispatch engine, channels, and the
//! bot service used by the CLI.

pub mod catalog;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod init;
pub mod server;
