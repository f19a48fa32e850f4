//! # PACS工作列表管理模块
//!
//! 提供配置加载、校验以及日志初始化

pub mod config;
pub mod logging;

pub use config::{ConfigManager, DashboardConfig, LogFormat, LoggingConfig};
pub use logging::init_tracing;
