// ==========================================
// HACCP 过程控制系统 - 过程 API
// ==========================================
// 职责: 过程生命周期的业务接口(创建/启动/转换/中止/查询)
// 说明: HTTP/RPC 外壳不在范围内,本层即对外契约
// ==========================================

use crate::api::error::ApiResult;
use crate::domain::monitoring::MonitoringRequirement;
use crate::domain::process::{ProcessStage, ProductionProcess, StageTemplate};
use crate::domain::transition::TransitionRecord;
use crate::domain::types::TransitionType;
use crate::engine::stage_machine::{ProcessStageMachine, TransitionRequest, TransitionResult};
use crate::repository::{
    MonitoringRequirementRepository, ProcessStageRepository, ProductionProcessRepository,
    TransitionRecordRepository,
};
use std::sync::Arc;
use tracing::info;

use crate::api::error::ApiError;

// ==========================================
// ProcessApi - 过程 API
// ==========================================
pub struct ProcessApi {
    process_repo: Arc<ProductionProcessRepository>,
    stage_repo: Arc<ProcessStageRepository>,
    requirement_repo: Arc<MonitoringRequirementRepository>,
    transition_repo: Arc<TransitionRecordRepository>,
    machine: Arc<ProcessStageMachine>,
}

impl ProcessApi {
    pub fn new(
        process_repo: Arc<ProductionProcessRepository>,
        stage_repo: Arc<ProcessStageRepository>,
        requirement_repo: Arc<MonitoringRequirementRepository>,
        transition_repo: Arc<TransitionRecordRepository>,
        machine: Arc<ProcessStageMachine>,
    ) -> Self {
        Self {
            process_repo,
            stage_repo,
            requirement_repo,
            transition_repo,
            machine,
        }
    }

    /// 按阶段模板创建 DRAFT 过程
    ///
    /// # 参数
    /// - name / batch_no / created_by: 过程标识信息
    /// - stage_templates: 有序阶段模板(含各阶段监测要求)
    ///
    /// # 返回
    /// - Ok(process_id)
    pub fn create_process(
        &self,
        name: &str,
        batch_no: &str,
        created_by: &str,
        stage_templates: &[StageTemplate],
    ) -> ApiResult<String> {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidInput("过程名称不能为空".to_string()));
        }
        if stage_templates.is_empty() {
            return Err(ApiError::InvalidInput(
                "过程必须至少包含一个阶段".to_string(),
            ));
        }

        let process = ProductionProcess::new_draft(
            name.to_string(),
            batch_no.to_string(),
            created_by.to_string(),
        );

        let mut stages = Vec::with_capacity(stage_templates.len());
        let mut requirements = Vec::new();
        for (i, tpl) in stage_templates.iter().enumerate() {
            let stage = ProcessStage::new_pending(
                process.process_id.clone(),
                tpl.name.clone(),
                (i + 1) as i32,
                tpl.is_critical_control_point,
                tpl.is_operational_prp,
            );
            for req_tpl in &tpl.requirements {
                requirements.push(MonitoringRequirement::from_template(
                    &stage.stage_id,
                    req_tpl,
                ));
            }
            stages.push(stage);
        }

        self.process_repo.insert(&process)?;
        self.stage_repo.batch_insert(&stages)?;
        self.requirement_repo.batch_insert(&requirements)?;

        info!(
            process_id = %process.process_id,
            batch_no = %batch_no,
            stages = stages.len(),
            requirements = requirements.len(),
            "过程已创建"
        );
        Ok(process.process_id)
    }

    /// 启动过程(激活阶段 1,开启监测)
    pub async fn start_process(
        &self,
        process_id: &str,
        requested_by: &str,
    ) -> ApiResult<ProductionProcess> {
        Ok(self.machine.start_process(process_id, requested_by).await?)
    }

    /// 请求阶段转换(五类之一)
    pub async fn request_transition(
        &self,
        process_id: &str,
        stage_id: &str,
        transition_type: TransitionType,
        request: TransitionRequest,
    ) -> ApiResult<TransitionResult> {
        Ok(self
            .machine
            .request_transition(process_id, stage_id, transition_type, request)
            .await?)
    }

    /// 中止过程
    pub async fn abort_process(
        &self,
        process_id: &str,
        requested_by: &str,
        reason: &str,
    ) -> ApiResult<ProductionProcess> {
        Ok(self
            .machine
            .abort_process(process_id, requested_by, reason)
            .await?)
    }

    /// 查询过程及其阶段序列
    pub fn get_process(
        &self,
        process_id: &str,
    ) -> ApiResult<(ProductionProcess, Vec<ProcessStage>)> {
        let process = self.process_repo.get_by_id(process_id)?;
        let stages = self.stage_repo.find_by_process(process_id)?;
        Ok((process, stages))
    }

    /// 查询过程的转换审计记录
    pub fn list_transitions(&self, process_id: &str) -> ApiResult<Vec<TransitionRecord>> {
        Ok(self.transition_repo.list_by_process(process_id)?)
    }
}
