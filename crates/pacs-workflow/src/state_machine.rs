//! 检查状态机
//!
//! 管理报告生命周期的阶段转换，并给出分配按钮的显示规则

use pacs_core::{PacsError, Result, Study, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 报告生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStage {
    Unassigned,            // 未分配
    PendingAssignment,     // 待分配
    AssignedToDoctor,      // 已分配
    ReportInProgress,      // 报告中
    ReportFinalized,       // 已定稿
    ReportDownloaded,      // 已下载
    FinalReportDownloaded, // 最终报告已下载
    Archived,              // 已归档
}

impl ReportStage {
    /// 由工作流状态推导阶段；未知状态视为未分配
    pub fn of(status: &WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::NewStudyReceived | WorkflowStatus::New | WorkflowStatus::Other(_) => {
                Self::Unassigned
            }
            WorkflowStatus::PendingAssignment => Self::PendingAssignment,
            WorkflowStatus::AssignedToDoctor => Self::AssignedToDoctor,
            WorkflowStatus::DoctorOpenedReport
            | WorkflowStatus::ReportInProgress
            | WorkflowStatus::ReportDrafted => Self::ReportInProgress,
            WorkflowStatus::ReportFinalized => Self::ReportFinalized,
            WorkflowStatus::ReportUploaded
            | WorkflowStatus::ReportDownloadedRadiologist
            | WorkflowStatus::ReportDownloaded => Self::ReportDownloaded,
            WorkflowStatus::FinalReportDownloaded => Self::FinalReportDownloaded,
            WorkflowStatus::Archived => Self::Archived,
        }
    }

    /// 阶段对应的代表状态
    pub fn status(&self) -> WorkflowStatus {
        match self {
            Self::Unassigned => WorkflowStatus::NewStudyReceived,
            Self::PendingAssignment => WorkflowStatus::PendingAssignment,
            Self::AssignedToDoctor => WorkflowStatus::AssignedToDoctor,
            Self::ReportInProgress => WorkflowStatus::ReportInProgress,
            Self::ReportFinalized => WorkflowStatus::ReportFinalized,
            Self::ReportDownloaded => WorkflowStatus::ReportDownloaded,
            Self::FinalReportDownloaded => WorkflowStatus::FinalReportDownloaded,
            Self::Archived => WorkflowStatus::Archived,
        }
    }
}

/// 检查状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StudyEvent {
    Assign,
    Unassign,
    OpenReport,
    CloseReport,
    SaveDraft,
    Finalize,
    Download,
    FinalDownload,
    Archive,
}

impl StudyEvent {
    /// 工作列表自身触发的事件；其余事件由报告编辑器等外部参与者驱动
    pub fn is_core_triggered(&self) -> bool {
        matches!(self, Self::Assign | Self::Unassign)
    }
}

/// 检查状态机
#[derive(Debug)]
pub struct StudyStateMachine {
    transitions: HashMap<(ReportStage, StudyEvent), ReportStage>,
}

impl StudyStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        use ReportStage::*;

        let mut transitions = HashMap::new();

        // 定稿后不可再分配
        for stage in [
            Unassigned,
            PendingAssignment,
            AssignedToDoctor,
            ReportInProgress,
            ReportDownloaded,
            Archived,
        ] {
            transitions.insert((stage, StudyEvent::Assign), AssignedToDoctor);
            transitions.insert((stage, StudyEvent::Unassign), PendingAssignment);
        }

        transitions.insert((AssignedToDoctor, StudyEvent::OpenReport), ReportInProgress);
        transitions.insert((ReportInProgress, StudyEvent::CloseReport), AssignedToDoctor);
        transitions.insert((ReportInProgress, StudyEvent::SaveDraft), ReportInProgress);
        transitions.insert((ReportInProgress, StudyEvent::Finalize), ReportFinalized);
        transitions.insert((ReportFinalized, StudyEvent::Download), ReportDownloaded);
        transitions.insert((ReportDownloaded, StudyEvent::Download), ReportDownloaded);
        transitions.insert((ReportFinalized, StudyEvent::FinalDownload), FinalReportDownloaded);
        transitions.insert((ReportDownloaded, StudyEvent::FinalDownload), FinalReportDownloaded);
        transitions.insert((ReportFinalized, StudyEvent::Archive), Archived);
        transitions.insert((ReportDownloaded, StudyEvent::Archive), Archived);
        transitions.insert((FinalReportDownloaded, StudyEvent::Archive), Archived);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: ReportStage, event: StudyEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: ReportStage, event: StudyEvent) -> Result<ReportStage> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(PacsError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }

    /// 获取阶段的所有可能事件
    pub fn get_possible_events(&self, current: ReportStage) -> Vec<StudyEvent> {
        self.transitions
            .keys()
            .filter(|(stage, _)| *stage == current)
            .map(|(_, event)| *event)
            .collect()
    }

    /// 分配/取消分配后乐观覆盖层应显示的状态
    ///
    /// 医生集合为空时回到待分配。
    pub fn assignment_status(&self, from: &WorkflowStatus, remaining: usize) -> Result<WorkflowStatus> {
        let event = if remaining == 0 {
            StudyEvent::Unassign
        } else {
            StudyEvent::Assign
        };
        Ok(self.transition(ReportStage::of(from), event)?.status())
    }

    pub fn accepts_assignment(&self, status: &WorkflowStatus) -> bool {
        self.can_transition(ReportStage::of(status), StudyEvent::Assign)
    }
}

impl Default for StudyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 分配按钮文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonLabel {
    Assign,
    Reassign,
    Done,
}

impl ButtonLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "Assign",
            Self::Reassign => "Reassign",
            Self::Done => "Done",
        }
    }
}

/// 分配按钮描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentButton {
    pub label: ButtonLabel,
    pub enabled: bool,
    /// 紧急样式，与工作流状态无关
    pub emergency: bool,
    /// 乐观覆盖层仍在生效
    pub recently_updated: bool,
}

impl AssignmentButton {
    /// 按优先级顺序应用按钮规则
    pub fn for_study(study: &Study, recently_updated: bool) -> Self {
        let label = match study.workflow_status {
            WorkflowStatus::FinalReportDownloaded | WorkflowStatus::ReportFinalized => {
                ButtonLabel::Done
            }
            WorkflowStatus::AssignedToDoctor | WorkflowStatus::ReportInProgress => {
                ButtonLabel::Reassign
            }
            _ => ButtonLabel::Assign,
        };

        Self {
            label,
            enabled: label != ButtonLabel::Done,
            emergency: study.is_emergency(),
            recently_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_core::StudyPriority;

    #[test]
    fn test_valid_transitions() {
        let sm = StudyStateMachine::new();

        assert!(sm.can_transition(ReportStage::Unassigned, StudyEvent::Assign));
        assert!(sm.can_transition(ReportStage::AssignedToDoctor, StudyEvent::OpenReport));
        assert!(sm.can_transition(ReportStage::ReportInProgress, StudyEvent::CloseReport));
        assert!(sm.can_transition(ReportStage::ReportInProgress, StudyEvent::Finalize));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = StudyStateMachine::new();

        assert!(!sm.can_transition(ReportStage::ReportFinalized, StudyEvent::Assign));
        assert!(!sm.can_transition(ReportStage::FinalReportDownloaded, StudyEvent::Unassign));
        assert!(!sm.can_transition(ReportStage::Unassigned, StudyEvent::Finalize));

        let result = sm.transition(ReportStage::Archived, StudyEvent::OpenReport);
        assert!(matches!(result, Err(PacsError::InvalidStateTransition { .. })));
    }

    #[test]
    fn test_assignment_status() {
        let sm = StudyStateMachine::new();

        assert_eq!(
            sm.assignment_status(&WorkflowStatus::ReportInProgress, 2).unwrap(),
            WorkflowStatus::AssignedToDoctor
        );
        assert_eq!(
            sm.assignment_status(&WorkflowStatus::AssignedToDoctor, 0).unwrap(),
            WorkflowStatus::PendingAssignment
        );
        assert!(sm.assignment_status(&WorkflowStatus::ReportFinalized, 1).is_err());
    }

    #[test]
    fn test_only_assignment_is_core_triggered() {
        let sm = StudyStateMachine::new();
        let core: Vec<StudyEvent> = sm
            .get_possible_events(ReportStage::PendingAssignment)
            .into_iter()
            .filter(StudyEvent::is_core_triggered)
            .collect();
        assert_eq!(core.len(), 2);
        assert!(!StudyEvent::Finalize.is_core_triggered());
    }

    #[test]
    fn test_button_rule() {
        let mut study = Study::new("s1", WorkflowStatus::ReportFinalized);
        let button = AssignmentButton::for_study(&study, false);
        assert_eq!(button.label, ButtonLabel::Done);
        assert!(!button.enabled);

        study.workflow_status = WorkflowStatus::ReportInProgress;
        assert_eq!(AssignmentButton::for_study(&study, false).label, ButtonLabel::Reassign);

        study.workflow_status = WorkflowStatus::Other("awaiting_qc".to_string());
        study.priority = StudyPriority::Stat;
        let button = AssignmentButton::for_study(&study, true);
        assert_eq!(button.label, ButtonLabel::Assign);
        assert!(button.emergency);
        assert!(button.recently_updated);
    }

    #[test]
    fn test_button_agrees_with_state_machine() {
        let sm = StudyStateMachine::new();

        for status in WorkflowStatus::KNOWN {
            let study = Study::new("s1", status.clone());
            let done = AssignmentButton::for_study(&study, false).label == ButtonLabel::Done;
            assert_eq!(done, !sm.accepts_assignment(&status), "status {}", status);
        }
    }
}
