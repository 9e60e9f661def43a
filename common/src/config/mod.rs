pub mod config;

pub use config::{
    BinlogConfig, DatabaseConfig, StateChangeConfig, StateLogConfig, StatelogdConfig, UltraverseConfig,
};
