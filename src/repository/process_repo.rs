// ==========================================
// HACCP 过程控制系统 - 生产过程仓储
// ==========================================
// 职责: 管理 production_process / process_stage 表的数据访问
// 红线: 不含业务逻辑;阶段状态只能由 ProcessStageMachine 驱动写入
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::process::{ProcessStage, ProductionProcess};
use crate::domain::types::{ProcessStatus, StageStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_opt_ts, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ProductionProcessRepository - 生产过程仓储
// ==========================================
pub struct ProductionProcessRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionProcessRepository {
    /// 创建新的仓储实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入生产过程
    pub fn insert(&self, process: &ProductionProcess) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO production_process (
                process_id, name, batch_no, status,
                started_at, ended_at, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                process.process_id,
                process.name,
                process.batch_no,
                process.status.to_string(),
                process.started_at.as_ref().map(format_ts),
                process.ended_at.as_ref().map(format_ts),
                process.created_by,
                format_ts(&process.created_at),
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询过程
    ///
    /// # 返回
    /// - Ok(Some(ProductionProcess)): 找到
    /// - Ok(None): 未找到
    pub fn find_by_id(&self, process_id: &str) -> RepositoryResult<Option<ProductionProcess>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT process_id, name, batch_no, status,
                   started_at, ended_at, created_by, created_at
            FROM production_process
            WHERE process_id = ?1
            "#,
        )?;

        let mut rows = stmt.query(params![process_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// 按 ID 查询过程,未找到时返回 NotFound 错误
    pub fn get_by_id(&self, process_id: &str) -> RepositoryResult<ProductionProcess> {
        self.find_by_id(process_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "production_process".to_string(),
                id: process_id.to_string(),
            })
    }

    /// 更新过程状态及起止时间
    pub fn update_status(
        &self,
        process_id: &str,
        status: ProcessStatus,
        started_at: Option<NaiveDateTime>,
        ended_at: Option<NaiveDateTime>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE production_process
            SET status = ?2,
                started_at = COALESCE(?3, started_at),
                ended_at = COALESCE(?4, ended_at)
            WHERE process_id = ?1
            "#,
            params![
                process_id,
                status.to_string(),
                started_at.as_ref().map(format_ts),
                ended_at.as_ref().map(format_ts),
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "production_process".to_string(),
                id: process_id.to_string(),
            });
        }
        Ok(())
    }

    /// 按状态列出过程(启动恢复时查询 IN_PROGRESS 过程)
    pub fn list_by_status(&self, status: ProcessStatus) -> RepositoryResult<Vec<ProductionProcess>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT process_id, name, batch_no, status,
                   started_at, ended_at, created_by, created_at
            FROM production_process
            WHERE status = ?1
            ORDER BY created_at
            "#,
        )?;

        let mut result = Vec::new();
        let mut rows = stmt.query(params![status.to_string()])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    fn map_row(row: &Row<'_>) -> RepositoryResult<ProductionProcess> {
        let status_str: String = row.get(3)?;
        Ok(ProductionProcess {
            process_id: row.get(0)?,
            name: row.get(1)?,
            batch_no: row.get(2)?,
            status: ProcessStatus::from_str(&status_str)
                .map_err(RepositoryError::ValidationError)?,
            started_at: parse_opt_ts(row.get(4)?)?,
            ended_at: parse_opt_ts(row.get(5)?)?,
            created_by: row.get(6)?,
            created_at: parse_ts(&row.get::<_, String>(7)?)?,
        })
    }
}

// ==========================================
// ProcessStageRepository - 过程阶段仓储
// ==========================================
pub struct ProcessStageRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProcessStageRepository {
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

    /// 批量插入阶段(创建过程时,同一事务)
    pub fn batch_insert(&self, stages: &[ProcessStage]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut count = 0;
        for stage in stages {
            tx.execute(
                r#"
                INSERT INTO process_stage (
                    stage_id, process_id, name, sequence_order, status,
                    is_critical_control_point, is_operational_prp,
                    actual_start, actual_end, readiness_window_start
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    stage.stage_id,
                    stage.process_id,
                    stage.name,
                    stage.sequence_order,
                    stage.status.to_string(),
                    stage.is_critical_control_point,
                    stage.is_operational_prp,
                    stage.actual_start.as_ref().map(format_ts),
                    stage.actual_end.as_ref().map(format_ts),
                    stage.readiness_window_start.as_ref().map(format_ts),
                ],
            )?;
            count += 1;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    /// 按 ID 查询阶段
    pub fn find_by_id(&self, stage_id: &str) -> RepositoryResult<Option<ProcessStage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("{} WHERE stage_id = ?1", Self::SELECT_BASE))?;

        let mut rows = stmt.query(params![stage_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// 按 ID 查询阶段,未找到时返回 NotFound 错误
    pub fn get_by_id(&self, stage_id: &str) -> RepositoryResult<ProcessStage> {
        self.find_by_id(stage_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "process_stage".to_string(),
                id: stage_id.to_string(),
            })
    }

    /// 查询过程的全部阶段,按 sequence_order 升序
    pub fn find_by_process(&self, process_id: &str) -> RepositoryResult<Vec<ProcessStage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE process_id = ?1 ORDER BY sequence_order",
            Self::SELECT_BASE
        ))?;

        let mut result = Vec::new();
        let mut rows = stmt.query(params![process_id])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    /// 查询过程当前活动(IN_PROGRESS)阶段
    ///
    /// 不变式: 过程 IN_PROGRESS 时有且仅有一个
    pub fn find_active_stage(&self, process_id: &str) -> RepositoryResult<Option<ProcessStage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE process_id = ?1 AND status = 'IN_PROGRESS' ORDER BY sequence_order LIMIT 1",
            Self::SELECT_BASE
        ))?;

        let mut rows = stmt.query(params![process_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// 统计过程中 IN_PROGRESS 阶段数(不变式校验用)
    pub fn count_in_progress(&self, process_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM process_stage WHERE process_id = ?1 AND status = 'IN_PROGRESS'",
            params![process_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 更新阶段状态及时间窗口
    ///
    /// # 参数
    /// - actual_start / actual_end / readiness_window_start: None 表示保持原值
    pub fn update_status(
        &self,
        stage_id: &str,
        status: StageStatus,
        actual_start: Option<NaiveDateTime>,
        actual_end: Option<NaiveDateTime>,
        readiness_window_start: Option<NaiveDateTime>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE process_stage
            SET status = ?2,
                actual_start = COALESCE(?3, actual_start),
                actual_end = COALESCE(?4, actual_end),
                readiness_window_start = COALESCE(?5, readiness_window_start)
            WHERE stage_id = ?1
            "#,
            params![
                stage_id,
                status.to_string(),
                actual_start.as_ref().map(format_ts),
                actual_end.as_ref().map(format_ts),
                readiness_window_start.as_ref().map(format_ts),
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "process_stage".to_string(),
                id: stage_id.to_string(),
            });
        }
        Ok(())
    }

    const SELECT_BASE: &'static str = r#"
        SELECT stage_id, process_id, name, sequence_order, status,
               is_critical_control_point, is_operational_prp,
               actual_start, actual_end, readiness_window_start
        FROM process_stage
    "#;

    fn map_row(row: &Row<'_>) -> RepositoryResult<ProcessStage> {
        let status_str: String = row.get(4)?;
        Ok(ProcessStage {
            stage_id: row.get(0)?,
            process_id: row.get(1)?,
            name: row.get(2)?,
            sequence_order: row.get(3)?,
            status: StageStatus::from_str(&status_str).map_err(RepositoryError::ValidationError)?,
            is_critical_control_point: row.get(5)?,
            is_operational_prp: row.get(6)?,
            actual_start: parse_opt_ts(row.get(7)?)?,
            actual_end: parse_opt_ts(row.get(8)?)?,
            readiness_window_start: parse_opt_ts(row.get(9)?)?,
        })
    }
}
