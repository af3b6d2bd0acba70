// ==========================================
// HACCP 过程控制系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为,避免"部分模块外键开启/部分不开启"
// - 统一 busy_timeout,减少并发写入时的偶发 busy 错误
// - 集中建表语句,主程序与测试共用同一份 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 说明: 版本号用于提示/告警(不做自动迁移),避免静默在旧库上运行导致隐性错误。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema(幂等)
///
/// # 说明
/// - 枚举列以 SCREAMING_SNAKE_CASE 文本存储,与 serde 格式一致
/// - 时间列以 TEXT 存储,格式 %Y-%m-%d %H:%M:%S
/// - monitoring_log / alert / transition_record 只追加,不设 UPDATE 通道
///   (alert 的 resolved 字段除外)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS production_process (
            process_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            batch_no TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'DRAFT',
            started_at TEXT,
            ended_at TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS process_stage (
            stage_id TEXT PRIMARY KEY,
            process_id TEXT NOT NULL REFERENCES production_process(process_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            sequence_order INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            is_critical_control_point INTEGER NOT NULL DEFAULT 0,
            is_operational_prp INTEGER NOT NULL DEFAULT 0,
            actual_start TEXT,
            actual_end TEXT,
            readiness_window_start TEXT,
            UNIQUE (process_id, sequence_order)
        );

        CREATE TABLE IF NOT EXISTS monitoring_requirement (
            requirement_id TEXT PRIMARY KEY,
            stage_id TEXT NOT NULL REFERENCES process_stage(stage_id) ON DELETE CASCADE,
            parameter_name TEXT NOT NULL,
            parameter_type TEXT NOT NULL,
            is_mandatory INTEGER NOT NULL DEFAULT 1,
            is_critical_limit INTEGER NOT NULL DEFAULT 0,
            target_value REAL,
            tolerance_min REAL,
            tolerance_max REAL,
            unit TEXT,
            frequency TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            supersedes_id TEXT
        );

        -- 只追加: 即使阶段回退,日志为审计目的独立留存(无级联删除)
        CREATE TABLE IF NOT EXISTS monitoring_log (
            log_id TEXT PRIMARY KEY,
            requirement_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            process_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            measured_value REAL,
            within_limits INTEGER NOT NULL,
            pass_fail_status TEXT NOT NULL,
            deviation_severity TEXT NOT NULL,
            measurement_method TEXT,
            equipment_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_monitoring_log_req_time
            ON monitoring_log (requirement_id, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_monitoring_log_stage
            ON monitoring_log (stage_id, recorded_at);

        CREATE TABLE IF NOT EXISTS alert (
            alert_id TEXT PRIMARY KEY,
            process_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            requirement_id TEXT NOT NULL,
            log_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            message TEXT NOT NULL,
            requires_immediate_action INTEGER NOT NULL DEFAULT 0,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_by TEXT,
            resolved_at TEXT,
            resolution_notes TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_alert_process_open
            ON alert (process_id, resolved);

        CREATE TABLE IF NOT EXISTS transition_record (
            record_id TEXT PRIMARY KEY,
            process_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            transition_type TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            reason TEXT,
            bypassed_checks INTEGER NOT NULL DEFAULT 0,
            target_stage_id TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transition_record_process
            ON transition_record (process_id, created_at);

        -- 持久化调度注册表: 取代内存任务字典,重启后按 IN_PROGRESS 阶段重建
        CREATE TABLE IF NOT EXISTS monitoring_task (
            process_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'STOPPED',
            cycle_interval_minutes INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (process_id, stage_id)
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}
