// ==========================================
// HACCP 过程控制系统 - 监测任务注册表仓储
// ==========================================
// 职责: 管理 monitoring_task 表的数据访问
// 说明: 注册表持久化调度状态,取代源系统的内存任务字典;
//       启动时按 IN_PROGRESS 阶段集合重建,调度可恢复。
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::monitoring::MonitoringTask;
use crate::domain::types::TaskScheduleState;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// MonitoringTaskRepository - 任务注册表仓储
// ==========================================
pub struct MonitoringTaskRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MonitoringTaskRepository {
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

    /// 写入/更新任务调度状态(INSERT OR REPLACE)
    pub fn upsert(&self, task: &MonitoringTask) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO monitoring_task (
                process_id, stage_id, state, cycle_interval_minutes, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                task.process_id,
                task.stage_id,
                task.state.to_string(),
                task.cycle_interval_minutes,
                format_ts(&task.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 查询单个任务项
    pub fn find(
        &self,
        process_id: &str,
        stage_id: &str,
    ) -> RepositoryResult<Option<MonitoringTask>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE process_id = ?1 AND stage_id = ?2",
            Self::SELECT_BASE
        ))?;

        let mut rows = stmt.query(params![process_id, stage_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// 查询全部 SCHEDULED 任务(启动恢复用)
    pub fn list_scheduled(&self) -> RepositoryResult<Vec<MonitoringTask>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE state = 'SCHEDULED' ORDER BY process_id, stage_id",
            Self::SELECT_BASE
        ))?;

        let mut result = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    /// 将过程的全部任务置为 STOPPED(停止监测时)
    pub fn stop_all_for_process(&self, process_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE monitoring_task
            SET state = 'STOPPED', updated_at = datetime('now')
            WHERE process_id = ?1 AND state = 'SCHEDULED'
            "#,
            params![process_id],
        )?;
        Ok(affected)
    }

    const SELECT_BASE: &'static str = r#"
        SELECT process_id, stage_id, state, cycle_interval_minutes, updated_at
        FROM monitoring_task
    "#;

    fn map_row(row: &Row<'_>) -> RepositoryResult<MonitoringTask> {
        let state_str: String = row.get(2)?;
        Ok(MonitoringTask {
            process_id: row.get(0)?,
            stage_id: row.get(1)?,
            state: TaskScheduleState::from_str(&state_str)
                .map_err(RepositoryError::ValidationError)?,
            cycle_interval_minutes: row.get(3)?,
            updated_at: parse_ts(&row.get::<_, String>(4)?)?,
        })
    }
}
