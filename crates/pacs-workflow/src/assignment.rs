//! 医生分配工作流
//!
//! 计算分配差异，对每位医生分别发起分配或取消分配请求，
//! 部分失败不影响其余请求。至少一项成功后写入乐观覆盖层。

use crate::reconciliation::{OptimisticOverlay, SharedOverlays};
use crate::state_machine::StudyStateMachine;
use async_trait::async_trait;
use chrono::Utc;
use pacs_core::{dedup_ordered, Doctor, DoctorId, Result, Study, StudyId, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// 分配差异
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssignmentDiff {
    /// 目标集合中新增的医生（保持目标顺序）
    pub to_assign: Vec<DoctorId>,
    /// 当前集合中被移除的医生（保持当前顺序）
    pub to_unassign: Vec<DoctorId>,
}

impl AssignmentDiff {
    pub fn compute(current: &[DoctorId], target: &[DoctorId]) -> Self {
        let current_set: HashSet<&DoctorId> = current.iter().collect();
        let target_set: HashSet<&DoctorId> = target.iter().collect();

        Self {
            to_assign: dedup_ordered(
                target
                    .iter()
                    .filter(|id| !current_set.contains(id))
                    .cloned()
                    .collect(),
            ),
            to_unassign: dedup_ordered(
                current
                    .iter()
                    .filter(|id| !target_set.contains(id))
                    .cloned()
                    .collect(),
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_assign.is_empty() && self.to_unassign.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_assign.len() + self.to_unassign.len()
    }
}

/// 分配接口响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignResponse {
    pub success: bool,
    #[serde(default)]
    pub assigned_doctors: Option<Vec<DoctorId>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 取消分配接口响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// 分配服务（网络层）
///
/// 对已处于目标状态的医生重复调用不应返回错误。
#[async_trait]
pub trait AssignmentService: Send + Sync {
    async fn assign(&self, study_id: &StudyId, doctor_id: &DoctorId) -> Result<AssignResponse>;

    async fn unassign(&self, study_id: &StudyId, doctor_id: &DoctorId) -> Result<UnassignResponse>;
}

/// 子操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Assign,
    Unassign,
}

/// 子操作结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubOperationStatus {
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubOperationResult {
    pub doctor_id: DoctorId,
    pub kind: OperationKind,
    pub status: SubOperationStatus,
}

impl SubOperationResult {
    pub fn succeeded(&self) -> bool {
        self.status == SubOperationStatus::Succeeded
    }
}

/// 消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Success,
    Info,
    Warning,
    Error,
}

/// 面向用户的提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl UserMessage {
    fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

/// 一次分配请求的完整报告
#[derive(Debug, Clone)]
pub struct AssignmentReport {
    /// 关联日志用的请求标识
    pub request_id: Uuid,
    pub study_id: StudyId,
    pub results: Vec<SubOperationResult>,
    /// 写入的乐观覆盖层；全部失败时为空
    pub overlay: Option<OptimisticOverlay>,
}

impl AssignmentReport {
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }

    /// 每位医生一条提示；医生名称取自当前医生列表，找不到时显示标识
    pub fn messages(&self, doctors: &[Doctor]) -> Vec<UserMessage> {
        let name_of = |id: &DoctorId| {
            doctors
                .iter()
                .find(|doctor| &doctor.id == id)
                .map(Doctor::display_name)
                .unwrap_or_else(|| id.to_string())
        };

        self.results
            .iter()
            .map(|result| {
                let name = name_of(&result.doctor_id);
                match (&result.status, result.kind) {
                    (SubOperationStatus::Succeeded, OperationKind::Assign) => {
                        UserMessage::new(MessageLevel::Success, format!("Assigned to {}", name))
                    }
                    (SubOperationStatus::Succeeded, OperationKind::Unassign) => {
                        UserMessage::new(MessageLevel::Success, format!("Unassigned {}", name))
                    }
                    (SubOperationStatus::Failed { reason }, OperationKind::Assign) => UserMessage::new(
                        MessageLevel::Error,
                        format!("Failed to assign {}: {}", name, reason),
                    ),
                    (SubOperationStatus::Failed { reason }, OperationKind::Unassign) => {
                        UserMessage::new(
                            MessageLevel::Error,
                            format!("Failed to unassign {}: {}", name, reason),
                        )
                    }
                }
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        let total = self.results.len();
        match self.succeeded_count() {
            0 => "No assignment changes were applied".to_string(),
            n if n == total => format!("All {} assignment changes applied", total),
            n => format!("{} of {} assignment changes applied", n, total),
        }
    }
}

/// 分配操作结果
#[derive(Debug, Clone)]
pub enum AssignmentOutcome {
    /// 目标集合与当前一致，没有发出任何请求
    NoChanges,
    /// 报告已完成，不允许再分配
    Locked { status: WorkflowStatus },
    Completed(AssignmentReport),
}

impl AssignmentOutcome {
    pub fn report(&self) -> Option<&AssignmentReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn messages(&self, doctors: &[Doctor]) -> Vec<UserMessage> {
        match self {
            Self::NoChanges => vec![UserMessage::new(
                MessageLevel::Info,
                "No changes to make - the selected doctors are already assigned",
            )],
            Self::Locked { status } => vec![UserMessage::new(
                MessageLevel::Warning,
                format!("Study cannot be reassigned: {}", status.label()),
            )],
            Self::Completed(report) => report.messages(doctors),
        }
    }
}

/// 分配工作流
pub struct AssignmentWorkflow {
    service: Arc<dyn AssignmentService>,
    overlays: SharedOverlays,
    state_machine: StudyStateMachine,
}

impl AssignmentWorkflow {
    pub fn new(service: Arc<dyn AssignmentService>, overlays: SharedOverlays) -> Self {
        Self {
            service,
            overlays,
            state_machine: StudyStateMachine::new(),
        }
    }

    pub fn overlays(&self) -> &SharedOverlays {
        &self.overlays
    }

    /// 将检查的医生集合调整为 `target`
    ///
    /// 差异基于当前有效值（可能尚未确认），因此允许在前一次请求未完成时再次调用。
    pub async fn assign(&self, study: &Study, target: &[DoctorId]) -> AssignmentOutcome {
        let current = self
            .overlays
            .read(|scheduler| scheduler.effective(study, Utc::now()).study.into_owned());

        if !self.state_machine.accepts_assignment(&current.workflow_status) {
            info!(
                "Study {} is {}, assignment refused",
                study.id, current.workflow_status
            );
            return AssignmentOutcome::Locked {
                status: current.workflow_status,
            };
        }

        let diff = AssignmentDiff::compute(&current.assigned_doctor_ids, target);
        if diff.is_empty() {
            info!("No assignment changes for study {}", study.id);
            return AssignmentOutcome::NoChanges;
        }

        let request_id = Uuid::new_v4();
        info!(
            "[{}] Updating assignment for study {}: +{} -{}",
            request_id,
            study.id,
            diff.to_assign.len(),
            diff.to_unassign.len()
        );

        let results = self.dispatch(request_id, &study.id, diff).await;
        let overlay = self.reconcile(request_id, study, &results);

        AssignmentOutcome::Completed(AssignmentReport {
            request_id,
            study_id: study.id.clone(),
            results,
            overlay,
        })
    }

    /// 仅取消选定医生的分配
    pub async fn unassign_selected(&self, study: &Study, doctors: &[DoctorId]) -> AssignmentOutcome {
        let current = self.overlays.read(|scheduler| {
            scheduler
                .effective(study, Utc::now())
                .study
                .assigned_doctor_ids
                .clone()
        });
        let target: Vec<DoctorId> = current
            .into_iter()
            .filter(|id| !doctors.contains(id))
            .collect();
        self.assign(study, &target).await
    }

    /// 后台执行分配；关闭界面不会取消已发出的请求
    pub fn spawn(self: &Arc<Self>, study: Study, target: Vec<DoctorId>) -> JoinHandle<AssignmentOutcome> {
        let workflow = Arc::clone(self);
        tokio::spawn(async move { workflow.assign(&study, &target).await })
    }

    /// 并发发出所有子操作，按提交顺序收集结果
    async fn dispatch(
        &self,
        request_id: Uuid,
        study_id: &StudyId,
        diff: AssignmentDiff,
    ) -> Vec<SubOperationResult> {
        let mut handles = Vec::with_capacity(diff.len());

        for doctor_id in diff.to_assign {
            let service = Arc::clone(&self.service);
            let study_id = study_id.clone();
            let target = doctor_id.clone();
            let handle = tokio::spawn(async move {
                match service.assign(&study_id, &target).await {
                    Ok(response) if response.success => SubOperationStatus::Succeeded,
                    Ok(response) => SubOperationStatus::Failed {
                        reason: response
                            .message
                            .unwrap_or_else(|| "rejected by server".to_string()),
                    },
                    Err(e) => SubOperationStatus::Failed {
                        reason: e.to_string(),
                    },
                }
            });
            handles.push((doctor_id, OperationKind::Assign, handle));
        }

        for doctor_id in diff.to_unassign {
            let service = Arc::clone(&self.service);
            let study_id = study_id.clone();
            let target = doctor_id.clone();
            let handle = tokio::spawn(async move {
                match service.unassign(&study_id, &target).await {
                    Ok(response) if response.success => SubOperationStatus::Succeeded,
                    Ok(response) => SubOperationStatus::Failed {
                        reason: response
                            .message
                            .unwrap_or_else(|| "rejected by server".to_string()),
                    },
                    Err(e) => SubOperationStatus::Failed {
                        reason: e.to_string(),
                    },
                }
            });
            handles.push((doctor_id, OperationKind::Unassign, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (doctor_id, kind, handle) in handles {
            let status = match handle.await {
                Ok(status) => status,
                Err(e) => {
                    error!("[{}] Assignment task for {} failed: {}", request_id, doctor_id, e);
                    SubOperationStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            match &status {
                SubOperationStatus::Succeeded => {
                    info!("[{}] {:?} {} on study {} succeeded", request_id, kind, doctor_id, study_id)
                }
                SubOperationStatus::Failed { reason } => error!(
                    "[{}] {:?} {} on study {} failed: {}",
                    request_id, kind, doctor_id, study_id, reason
                ),
            }

            results.push(SubOperationResult {
                doctor_id,
                kind,
                status,
            });
        }
        results
    }

    /// 将成功的子操作叠加到最新的有效值上
    fn reconcile(
        &self,
        request_id: Uuid,
        study: &Study,
        results: &[SubOperationResult],
    ) -> Option<OptimisticOverlay> {
        if !results.iter().any(SubOperationResult::succeeded) {
            warn!("[{}] No assignment changes succeeded for study {}", request_id, study.id);
            return None;
        }

        self.overlays.write(|scheduler| {
            let now = Utc::now();
            let latest = scheduler.effective(study, now).study.into_owned();

            let mut doctors = latest.assigned_doctor_ids;
            for result in results.iter().filter(|r| r.succeeded()) {
                match result.kind {
                    OperationKind::Assign => {
                        if !doctors.contains(&result.doctor_id) {
                            doctors.push(result.doctor_id.clone());
                        }
                    }
                    OperationKind::Unassign => doctors.retain(|id| id != &result.doctor_id),
                }
            }

            let status = match self
                .state_machine
                .assignment_status(&latest.workflow_status, doctors.len())
            {
                Ok(status) => status,
                Err(e) => {
                    warn!("[{}] Skipping optimistic update for study {}: {}", request_id, study.id, e);
                    return None;
                }
            };

            let overlay = OptimisticOverlay::new(study, status, doctors, now);
            scheduler.apply(overlay.clone());
            Some(overlay)
        })
    }
}

impl std::fmt::Debug for AssignmentWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentWorkflow")
            .field("overlays", &self.overlays)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pacs_core::PacsError;
    use std::sync::Mutex;

    /// 记录调用并按医生返回预设结果
    #[derive(Default)]
    struct MockService {
        calls: Mutex<Vec<(OperationKind, DoctorId)>>,
        failing: Vec<DoctorId>,
    }

    impl MockService {
        fn failing(ids: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: ids.iter().map(|id| DoctorId::from(*id)).collect(),
            }
        }

        fn calls(&self) -> Vec<(OperationKind, DoctorId)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssignmentService for MockService {
        async fn assign(&self, _study_id: &StudyId, doctor_id: &DoctorId) -> Result<AssignResponse> {
            self.calls.lock().unwrap().push((OperationKind::Assign, doctor_id.clone()));
            if self.failing.contains(doctor_id) {
                return Err(PacsError::Network("connection reset".to_string()));
            }
            Ok(AssignResponse {
                success: true,
                ..Default::default()
            })
        }

        async fn unassign(&self, _study_id: &StudyId, doctor_id: &DoctorId) -> Result<UnassignResponse> {
            self.calls.lock().unwrap().push((OperationKind::Unassign, doctor_id.clone()));
            Ok(UnassignResponse {
                success: !self.failing.contains(doctor_id),
                message: None,
            })
        }
    }

    fn ids(raw: &[&str]) -> Vec<DoctorId> {
        raw.iter().map(|id| DoctorId::from(*id)).collect()
    }

    fn workflow(service: Arc<MockService>) -> AssignmentWorkflow {
        AssignmentWorkflow::new(service, SharedOverlays::with_ttl(Duration::seconds(15)))
    }

    #[test]
    fn test_diff() {
        let diff = AssignmentDiff::compute(&ids(&["A", "B"]), &ids(&["B", "C"]));
        assert_eq!(diff.to_assign, ids(&["C"]));
        assert_eq!(diff.to_unassign, ids(&["A"]));

        assert!(AssignmentDiff::compute(&ids(&["A", "B"]), &ids(&["B", "A", "A"])).is_empty());
    }

    #[tokio::test]
    async fn test_no_changes_makes_no_calls() {
        let service = Arc::new(MockService::default());
        let workflow = workflow(service.clone());
        let mut study = Study::new("s1", WorkflowStatus::AssignedToDoctor);
        study.assigned_doctor_ids = ids(&["A"]);

        let outcome = workflow.assign(&study, &ids(&["A"])).await;
        assert!(matches!(outcome, AssignmentOutcome::NoChanges));
        assert_eq!(outcome.messages(&[])[0].level, MessageLevel::Info);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_locked_study_makes_no_calls() {
        let service = Arc::new(MockService::default());
        let workflow = workflow(service.clone());
        let study = Study::new("s1", WorkflowStatus::FinalReportDownloaded);

        let outcome = workflow.assign(&study, &ids(&["A"])).await;
        assert!(matches!(outcome, AssignmentOutcome::Locked { .. }));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let service = Arc::new(MockService::failing(&["D2"]));
        let workflow = workflow(service.clone());
        let study = Study::new("S1", WorkflowStatus::PendingAssignment);

        let outcome = workflow.assign(&study, &ids(&["D1", "D2"])).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(service.calls().len(), 2);

        let doctors = vec![Doctor::new("D1", "Smith")];
        let messages = report.messages(&doctors);
        assert_eq!(messages[0].level, MessageLevel::Success);
        assert!(messages[0].text.contains("Dr. Smith"));
        assert_eq!(messages[1].level, MessageLevel::Error);
        assert!(messages[1].text.contains("D2"));

        let overlay = report.overlay.as_ref().unwrap();
        assert_eq!(overlay.assigned_doctor_ids, ids(&["D1"]));
        assert_eq!(overlay.workflow_status, WorkflowStatus::AssignedToDoctor);
    }

    #[tokio::test]
    async fn test_all_failed_leaves_no_overlay() {
        let service = Arc::new(MockService::failing(&["D1"]));
        let workflow = workflow(service);
        let study = Study::new("S1", WorkflowStatus::New);

        let outcome = workflow.assign(&study, &ids(&["D1"])).await;
        assert!(outcome.report().unwrap().overlay.is_none());
        assert!(workflow.overlays().read(|s| s.is_empty()));
    }

    #[tokio::test]
    async fn test_reentrant_assignment_uses_unconfirmed_state() {
        let service = Arc::new(MockService::default());
        let workflow = Arc::new(workflow(service.clone()));
        let study = Study::new("S1", WorkflowStatus::PendingAssignment);

        workflow.spawn(study.clone(), ids(&["A"])).await.unwrap();
        // 仓库尚未更新，第二次点击基于乐观状态计算差异
        let outcome = workflow.assign(&study, &ids(&["A", "B"])).await;

        let report = outcome.report().unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].doctor_id, DoctorId::from("B"));
        assert_eq!(report.overlay.as_ref().unwrap().assigned_doctor_ids, ids(&["A", "B"]));
    }

    #[tokio::test]
    async fn test_unassign_all_returns_to_pending() {
        let service = Arc::new(MockService::default());
        let workflow = workflow(service.clone());
        let mut study = Study::new("S1", WorkflowStatus::AssignedToDoctor);
        study.assigned_doctor_ids = ids(&["A", "B"]);

        let outcome = workflow.unassign_selected(&study, &ids(&["A", "B"])).await;
        let overlay = outcome.report().unwrap().overlay.clone().unwrap();
        assert!(overlay.assigned_doctor_ids.is_empty());
        assert_eq!(overlay.workflow_status, WorkflowStatus::PendingAssignment);
        assert_eq!(outcome.report().unwrap().summary(), "All 2 assignment changes applied");
    }
}
