// ==========================================
// HACCP 过程控制系统 - 监测数据仓储
// ==========================================
// 职责: 管理 monitoring_requirement / monitoring_log 表的数据访问
// 红线: monitoring_log 只追加,创建后不可变
// 红线: 超限日志与预警在同一事务内写入(insert_with_alert)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::alert::Alert;
use crate::domain::monitoring::{MonitoringLog, MonitoringRequirement};
use crate::domain::types::{DeviationSeverity, ParameterType, PassFailStatus, SamplingFrequency};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{format_ts, parse_ts};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// MonitoringRequirementRepository - 监测要求仓储
// ==========================================
pub struct MonitoringRequirementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MonitoringRequirementRepository {
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

    /// 批量插入监测要求(创建过程时,同一事务)
    pub fn batch_insert(&self, requirements: &[MonitoringRequirement]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut count = 0;
        for req in requirements {
            Self::insert_in_tx(&tx, req)?;
            count += 1;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(count)
    }

    fn insert_in_tx(tx: &Transaction<'_>, req: &MonitoringRequirement) -> RepositoryResult<()> {
        tx.execute(
            r#"
            INSERT INTO monitoring_requirement (
                requirement_id, stage_id, parameter_name, parameter_type,
                is_mandatory, is_critical_limit,
                target_value, tolerance_min, tolerance_max, unit,
                frequency, is_active, supersedes_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                req.requirement_id,
                req.stage_id,
                req.parameter_name,
                req.parameter_type.to_string(),
                req.is_mandatory,
                req.is_critical_limit,
                req.target_value,
                req.tolerance_min,
                req.tolerance_max,
                req.unit,
                req.frequency.as_db_str(),
                req.is_active,
                req.supersedes_id,
            ],
        )?;
        Ok(())
    }

    /// 按 ID 查询监测要求
    pub fn find_by_id(&self, requirement_id: &str) -> RepositoryResult<Option<MonitoringRequirement>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE requirement_id = ?1",
            Self::SELECT_BASE
        ))?;

        let mut rows = stmt.query(params![requirement_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::map_row(row)?)),
            None => Ok(None),
        }
    }

    /// 查询阶段的全部生效监测要求
    pub fn find_active_by_stage(&self, stage_id: &str) -> RepositoryResult<Vec<MonitoringRequirement>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE stage_id = ?1 AND is_active = 1 ORDER BY parameter_name",
            Self::SELECT_BASE
        ))?;

        let mut result = Vec::new();
        let mut rows = stmt.query(params![stage_id])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    /// 修订监测要求: 旧版本置为失效,新版本带 supersedes_id 插入(同一事务)
    ///
    /// # 说明
    /// 要求一旦被日志引用即不可变更,修订必须走版本化路径;
    /// 旧行除 is_active 外不做任何 UPDATE。
    pub fn supersede(
        &self,
        old_requirement_id: &str,
        new_requirement: &MonitoringRequirement,
    ) -> RepositoryResult<()> {
        if new_requirement.supersedes_id.as_deref() != Some(old_requirement_id) {
            return Err(RepositoryError::ValidationError(format!(
                "新版本要求的 supersedes_id 必须指向被修订要求: {}",
                old_requirement_id
            )));
        }

        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let affected = tx.execute(
            "UPDATE monitoring_requirement SET is_active = 0 WHERE requirement_id = ?1 AND is_active = 1",
            params![old_requirement_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "monitoring_requirement".to_string(),
                id: old_requirement_id.to_string(),
            });
        }

        Self::insert_in_tx(&tx, new_requirement)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    const SELECT_BASE: &'static str = r#"
        SELECT requirement_id, stage_id, parameter_name, parameter_type,
               is_mandatory, is_critical_limit,
               target_value, tolerance_min, tolerance_max, unit,
               frequency, is_active, supersedes_id
        FROM monitoring_requirement
    "#;

    fn map_row(row: &Row<'_>) -> RepositoryResult<MonitoringRequirement> {
        let type_str: String = row.get(3)?;
        let freq_str: String = row.get(10)?;
        Ok(MonitoringRequirement {
            requirement_id: row.get(0)?,
            stage_id: row.get(1)?,
            parameter_name: row.get(2)?,
            parameter_type: ParameterType::from_str(&type_str)
                .map_err(RepositoryError::ValidationError)?,
            is_mandatory: row.get(4)?,
            is_critical_limit: row.get(5)?,
            target_value: row.get(6)?,
            tolerance_min: row.get(7)?,
            tolerance_max: row.get(8)?,
            unit: row.get(9)?,
            frequency: SamplingFrequency::parse_db_str(&freq_str)
                .map_err(RepositoryError::ValidationError)?,
            is_active: row.get(11)?,
            supersedes_id: row.get(12)?,
        })
    }
}

// ==========================================
// MonitoringLogRepository - 监测日志仓储
// ==========================================
pub struct MonitoringLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MonitoringLogRepository {
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

    /// 写入监测日志,超限时在同一事务内写入预警
    ///
    /// # 不变式
    /// 超限日志(within_limits=false 且非 SKIPPED)必须携带预警,
    /// 两者要么同时可见,要么都不可见。
    pub fn insert_with_alert(
        &self,
        log: &MonitoringLog,
        alert: Option<&Alert>,
    ) -> RepositoryResult<()> {
        if !log.within_limits && log.pass_fail_status == PassFailStatus::Fail && alert.is_none() {
            return Err(RepositoryError::ValidationError(
                "超限日志必须携带预警记录".to_string(),
            ));
        }

        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO monitoring_log (
                log_id, requirement_id, stage_id, process_id, recorded_at,
                measured_value, within_limits, pass_fail_status, deviation_severity,
                measurement_method, equipment_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                log.log_id,
                log.requirement_id,
                log.stage_id,
                log.process_id,
                format_ts(&log.recorded_at),
                log.measured_value,
                log.within_limits,
                log.pass_fail_status.to_string(),
                log.deviation_severity.to_string(),
                log.measurement_method,
                log.equipment_id,
            ],
        )?;

        if let Some(alert) = alert {
            tx.execute(
                r#"
                INSERT INTO alert (
                    alert_id, process_id, stage_id, requirement_id, log_id,
                    severity, message, requires_immediate_action,
                    resolved, resolved_by, resolved_at, resolution_notes, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL, NULL, ?9)
                "#,
                params![
                    alert.alert_id,
                    alert.process_id,
                    alert.stage_id,
                    alert.requirement_id,
                    alert.log_id,
                    alert.severity.to_string(),
                    alert.message,
                    alert.requires_immediate_action,
                    format_ts(&alert.created_at),
                ],
            )?;
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    /// 查询阶段自指定时刻以来的日志,按 recorded_at 升序
    pub fn find_by_stage_since(
        &self,
        stage_id: &str,
        since: &NaiveDateTime,
    ) -> RepositoryResult<Vec<MonitoringLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE stage_id = ?1 AND recorded_at >= ?2 ORDER BY recorded_at, rowid",
            Self::SELECT_BASE
        ))?;

        let mut result = Vec::new();
        let mut rows = stmt.query(params![stage_id, format_ts(since)])?;
        while let Some(row) = rows.next()? {
            result.push(Self::map_row(row)?);
        }
        Ok(result)
    }

    /// 查询阶段内每个要求的最近采样时间(到期判定用)
    ///
    /// # 说明
    /// SKIPPED 日志同样计入,避免采集持续失败时每周期重复轰炸;
    /// 重试节奏与正常采样节奏一致。
    pub fn last_sample_times(
        &self,
        stage_id: &str,
        since: &NaiveDateTime,
    ) -> RepositoryResult<HashMap<String, NaiveDateTime>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT requirement_id, MAX(recorded_at)
            FROM monitoring_log
            WHERE stage_id = ?1 AND recorded_at >= ?2
            GROUP BY requirement_id
            "#,
        )?;

        let mut result = HashMap::new();
        let mut rows = stmt.query(params![stage_id, format_ts(since)])?;
        while let Some(row) = rows.next()? {
            let requirement_id: String = row.get(0)?;
            let ts: String = row.get(1)?;
            result.insert(requirement_id, parse_ts(&ts)?);
        }
        Ok(result)
    }

    /// 查询阶段内每个要求的最近一条日志(监测状态查询用)
    pub fn last_logs_by_requirement(
        &self,
        stage_id: &str,
    ) -> RepositoryResult<HashMap<String, MonitoringLog>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            {} WHERE stage_id = ?1 AND recorded_at = (
                SELECT MAX(m2.recorded_at) FROM monitoring_log m2
                WHERE m2.stage_id = ?1 AND m2.requirement_id = monitoring_log.requirement_id
            )
            "#,
            Self::SELECT_BASE
        ))?;

        let mut result = HashMap::new();
        let mut rows = stmt.query(params![stage_id])?;
        while let Some(row) = rows.next()? {
            let log = Self::map_row(row)?;
            result.insert(log.requirement_id.clone(), log);
        }
        Ok(result)
    }

    /// 读取阶段就绪评估快照: 窗口内日志 + 过程未解决预警
    ///
    /// # 一致性
    /// 两次查询在同一事务内执行,保证评估期间不会观察到
    /// 半写入的日志+预警对。
    pub fn fetch_readiness_snapshot(
        &self,
        process_id: &str,
        stage_id: &str,
        window_start: &NaiveDateTime,
    ) -> RepositoryResult<(Vec<MonitoringLog>, Vec<Alert>)> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let logs = {
            let mut stmt = tx.prepare(&format!(
                "{} WHERE stage_id = ?1 AND recorded_at >= ?2 ORDER BY recorded_at, rowid",
                Self::SELECT_BASE
            ))?;
            let mut result = Vec::new();
            let mut rows = stmt.query(params![stage_id, format_ts(window_start)])?;
            while let Some(row) = rows.next()? {
                result.push(Self::map_row(row)?);
            }
            result
        };

        let alerts = {
            let mut stmt = tx.prepare(
                r#"
                SELECT alert_id, process_id, stage_id, requirement_id, log_id,
                       severity, message, requires_immediate_action,
                       resolved, resolved_by, resolved_at, resolution_notes, created_at
                FROM alert
                WHERE process_id = ?1 AND resolved = 0
                ORDER BY created_at
                "#,
            )?;
            let mut result = Vec::new();
            let mut rows = stmt.query(params![process_id])?;
            while let Some(row) = rows.next()? {
                result.push(crate::repository::alert_repo::map_alert_row(row)?);
            }
            result
        };

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok((logs, alerts))
    }

    const SELECT_BASE: &'static str = r#"
        SELECT log_id, requirement_id, stage_id, process_id, recorded_at,
               measured_value, within_limits, pass_fail_status, deviation_severity,
               measurement_method, equipment_id
        FROM monitoring_log
    "#;

    fn map_row(row: &Row<'_>) -> RepositoryResult<MonitoringLog> {
        let pass_fail_str: String = row.get(7)?;
        let severity_str: String = row.get(8)?;
        Ok(MonitoringLog {
            log_id: row.get(0)?,
            requirement_id: row.get(1)?,
            stage_id: row.get(2)?,
            process_id: row.get(3)?,
            recorded_at: parse_ts(&row.get::<_, String>(4)?)?,
            measured_value: row.get(5)?,
            within_limits: row.get(6)?,
            pass_fail_status: PassFailStatus::from_str(&pass_fail_str)
                .map_err(RepositoryError::ValidationError)?,
            deviation_severity: DeviationSeverity::from_str(&severity_str)
                .map_err(RepositoryError::ValidationError)?,
            measurement_method: row.get(9)?,
            equipment_id: row.get(10)?,
        })
    }
}
