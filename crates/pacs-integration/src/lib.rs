//! # PACS集成模块
//!
//! 与工作列表后端的HTTP集成：
//! - 医生分配与取消分配接口
//! - 医生列表接口

pub mod api;

pub use api::{ApiClientConfig, HttpWorklistClient};
