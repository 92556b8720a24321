//! Common utilities and types shared across offsetkv

pub mod config;
pub mod error;
pub mod utils;

pub use config::{StoreConfig, SyncPolicy, ENV_PREFIX};
pub use error::{Error, Result};
pub use utils::{crc32, decode_key, encode_key, parse_duration};
