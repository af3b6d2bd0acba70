// ==========================================
// HACCP 过程控制系统 - 转换审计记录仓储
// ==========================================
// 职责: 管理 transition_record 表的数据访问
// 红线: 只追加,无 UPDATE/DELETE 通道
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::transition::TransitionRecord;
use crate::domain::types::TransitionType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use rusqlite::{params, Connection, Row};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// TransitionRecordRepository - 转换记录仓储
// ==========================================
pub struct TransitionRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransitionRecordRepository {
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

    /// 追加转换记录
    pub fn insert(&self, record: &TransitionRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO transition_record (
                record_id, process_id, stage_id, transition_type,
                requested_by, reason, bypassed_checks, target_stage_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.record_id,
                record.process_id,
                record.stage_id,
                record.transition_type.to_string(),
                record.requested_by,
                record.reason,
                record.bypassed_checks,
                record.target_stage_id,
                format_ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    /// 查询过程的全部转换记录,按时间升序
    pub fn list_by_process(&self, process_id: &str) -> RepositoryResult<Vec<TransitionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT record_id, process_id, stage_id, transition_type,
                   requested_by, reason, bypassed_checks, target_stage_id, created_at
            FROM transition_record
            WHERE process_id = ?1
            ORDER BY created_at, rowid
            "#,
        )?;

        let mut result = Vec::new();
        let mut rows = stmt.query(params![process_id])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    fn map_row(row: &Row<'_>) -> RepositoryResult<TransitionRecord> {
        let type_str: String = row.get(3)?;
        Ok(TransitionRecord {
            record_id: row.get(0)?,
            process_id: row.get(1)?,
            stage_id: row.get(2)?,
            transition_type: TransitionType::from_str(&type_str)
                .map_err(RepositoryError::ValidationError)?,
            requested_by: row.get(4)?,
            reason: row.get(5)?,
            bypassed_checks: row.get(6)?,
            target_stage_id: row.get(7)?,
            created_at: parse_ts(&row.get::<_, String>(8)?)?,
        })
    }
}
