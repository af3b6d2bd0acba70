// ==========================================
// HACCP 过程控制系统 - 预警仓储
// ==========================================
// 职责: 管理 alert 表的数据访问
// 说明: 预警的创建走 MonitoringLogRepository::insert_with_alert
//       (与触发日志同一事务);本仓储负责查询与解决。
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::alert::Alert;
use crate::domain::types::DeviationSeverity;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_opt_ts, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// alert 行映射(monitoring_repo 的快照查询共用)
pub(crate) fn map_alert_row(row: &Row<'_>) -> RepositoryResult<Alert> {
    let severity_str: String = row.get(5)?;
    Ok(Alert {
        alert_id: row.get(0)?,
        process_id: row.get(1)?,
        stage_id: row.get(2)?,
        requirement_id: row.get(3)?,
        log_id: row.get(4)?,
        severity: DeviationSeverity::from_str(&severity_str)
            .map_err(RepositoryError::ValidationError)?,
        message: row.get(6)?,
        requires_immediate_action: row.get(7)?,
        resolved: row.get(8)?,
        resolved_by: row.get(9)?,
        resolved_at: parse_opt_ts(row.get(10)?)?,
        resolution_notes: row.get(11)?,
        created_at: parse_ts(&row.get::<_, String>(12)?)?,
    })
}

// ==========================================
// AlertRepository - 预警仓储
// ==========================================
pub struct AlertRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AlertRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按 ID 查询预警
    pub fn find_by_id(&self, alert_id: &str) -> RepositoryResult<Option<Alert>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE alert_id = ?1", Self::SELECT_BASE))?;

        let mut rows = stmt.query(params![alert_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_alert_row(row)?)),
            None => Ok(None),
        }
    }

    /// 标记预警已解决
    ///
    /// # 返回
    /// - Ok(Alert): 更新后的预警
    /// - Err(NotFound): 预警不存在
    /// - Err(AlreadyResolved): 重复解决
    pub fn resolve(
        &self,
        alert_id: &str,
        resolved_by: &str,
        notes: Option<&str>,
        resolved_at: NaiveDateTime,
    ) -> RepositoryResult<Alert> {
        let existing = self.find_by_id(alert_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "alert".to_string(),
            id: alert_id.to_string(),
        })?;

        if existing.resolved {
            return Err(RepositoryError::AlreadyResolved(format!(
                "预警已于 {} 由 {} 解决: alert_id={}",
                existing
                    .resolved_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                existing.resolved_by.as_deref().unwrap_or("-"),
                alert_id
            )));
        }

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE alert
            SET resolved = 1, resolved_by = ?2, resolved_at = ?3, resolution_notes = ?4
            WHERE alert_id = ?1 AND resolved = 0
            "#,
            params![alert_id, resolved_by, format_ts(&resolved_at), notes],
        )?;
        drop(conn);

        self.find_by_id(alert_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "alert".to_string(),
            id: alert_id.to_string(),
        })
    }

    /// 查询过程的未解决预警,可按阶段过滤
    pub fn list_open(
        &self,
        process_id: &str,
        stage_id: Option<&str>,
    ) -> RepositoryResult<Vec<Alert>> {
        let conn = self.get_conn()?;
        let mut result = Vec::new();

        match stage_id {
            Some(stage_id) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE process_id = ?1 AND stage_id = ?2 AND resolved = 0 ORDER BY created_at",
                    Self::SELECT_BASE
                ))?;
                let mut rows = stmt.query(params![process_id, stage_id])?;
                while let Some(row) = rows.next()? {
                    result.push(map_alert_row(row)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE process_id = ?1 AND resolved = 0 ORDER BY created_at",
                    Self::SELECT_BASE
                ))?;
                let mut rows = stmt.query(params![process_id])?;
                while let Some(row) = rows.next()? {
                    result.push(map_alert_row(row)?);
                }
            }
        }

        Ok(result)
    }

    /// 统计阶段未解决预警数(监测状态查询用)
    pub fn count_open_by_stage(&self, stage_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alert WHERE stage_id = ?1 AND resolved = 0",
            params![stage_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    const SELECT_BASE: &'static str = r#"
        SELECT alert_id, process_id, stage_id, requirement_id, log_id,
               severity, message, requires_immediate_action,
               resolved, resolved_by, resolved_at, resolution_notes, created_at
        FROM alert
    "#;
}
