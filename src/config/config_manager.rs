// ==========================================
// HACCP 过程控制系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键全集
// ==========================================

/// 监测周期间隔(分钟)
pub const KEY_CYCLE_INTERVAL_MINUTES: &str = "monitoring/cycle_interval_minutes";
/// 采集器超时(秒)
pub const KEY_COLLECTOR_TIMEOUT_SECONDS: &str = "monitoring/collector_timeout_seconds";
/// 就绪评估的"近期失败"窗口(分钟)
pub const KEY_RECENT_FAILURE_WINDOW_MINUTES: &str = "monitoring/recent_failure_window_minutes";

/// 默认监测周期间隔: 30 分钟
pub const DEFAULT_CYCLE_INTERVAL_MINUTES: i64 = 30;
/// 默认采集器超时: 10 秒
pub const DEFAULT_COLLECTOR_TIMEOUT_SECONDS: u64 = 10;
/// 默认近期失败窗口: 60 分钟
pub const DEFAULT_RECENT_FAILURE_WINDOW_MINUTES: i64 = 60;

// ==========================================
// MonitoringConfig - 监测配置快照
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct MonitoringConfig {
    pub cycle_interval_minutes: i64,
    pub collector_timeout_seconds: u64,
    pub recent_failure_window_minutes: i64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cycle_interval_minutes: DEFAULT_CYCLE_INTERVAL_MINUTES,
            collector_timeout_seconds: DEFAULT_COLLECTOR_TIMEOUT_SECONDS,
            recent_failure_window_minutes: DEFAULT_RECENT_FAILURE_WINDOW_MINUTES,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明: 为保证连接行为一致,会对传入连接再次应用统一 PRAGMA(幂等)。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值(scope_id='global')
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 写入 global scope 配置值(INSERT OR REPLACE)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            "#,
            params![key, value],
        )?;

        Ok(())
    }

    /// 读取整型配置,缺失或解析失败时回退默认值
    fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        match self.get_config_value(key) {
            Ok(Some(v)) => v.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 监测周期间隔(分钟),默认 30
    pub fn cycle_interval_minutes(&self) -> i64 {
        self.get_i64_or(KEY_CYCLE_INTERVAL_MINUTES, DEFAULT_CYCLE_INTERVAL_MINUTES)
    }

    /// 采集器超时(秒),默认 10
    pub fn collector_timeout_seconds(&self) -> u64 {
        let v = self.get_i64_or(
            KEY_COLLECTOR_TIMEOUT_SECONDS,
            DEFAULT_COLLECTOR_TIMEOUT_SECONDS as i64,
        );
        if v <= 0 {
            DEFAULT_COLLECTOR_TIMEOUT_SECONDS
        } else {
            v as u64
        }
    }

    /// 近期失败窗口(分钟),默认 60
    pub fn recent_failure_window_minutes(&self) -> i64 {
        self.get_i64_or(
            KEY_RECENT_FAILURE_WINDOW_MINUTES,
            DEFAULT_RECENT_FAILURE_WINDOW_MINUTES,
        )
    }

    /// 读取完整监测配置快照
    pub fn monitoring_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            cycle_interval_minutes: self.cycle_interval_minutes(),
            collector_timeout_seconds: self.collector_timeout_seconds(),
            recent_failure_window_minutes: self.recent_failure_window_minutes(),
        }
    }
}
