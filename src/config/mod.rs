// ==========================================
// HACCP 过程控制系统 - 配置层
// ==========================================
// 存储: config_kv 表 (key-value + scope)
// ==========================================

pub mod config_manager;

pub use config_manager::{ConfigManager, MonitoringConfig};
