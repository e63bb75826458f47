pub mod cli;
pub mod companion;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guide;
pub mod identity;
pub mod local;
pub mod pairing;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod tools;
pub mod types;
pub mod week;

pub mod metadata {
    include!(concat!(env!("OUT_DIR"), "/pkg_info.rs"));
}

pub use companion::Companion;
pub use error::{CompanionError, CompanionResult};
