// ==========================================
// HACCP 过程控制系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供外部调用方(被排除的 HTTP 层)调用
// ==========================================

pub mod error;
pub mod monitoring_api;
pub mod process_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use monitoring_api::MonitoringApi;
pub use process_api::ProcessApi;
