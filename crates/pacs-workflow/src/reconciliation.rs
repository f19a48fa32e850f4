//! 乐观更新覆盖层
//!
//! 分配成功后，本地立即显示新的医生和状态，直到权威快照追上或超时。
//! 覆盖层只在渲染时合并，从不修改原始检查记录。

use chrono::{DateTime, Duration, Utc};
use pacs_core::{DoctorId, Study, StudyId, WorkflowStatus};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// 单个检查的乐观覆盖层
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticOverlay {
    pub study_id: StudyId,
    pub workflow_status: WorkflowStatus,
    pub assigned_doctor_ids: Vec<DoctorId>,
    pub applied_at: DateTime<Utc>,
    /// 创建覆盖层时权威数据的状态与医生
    base_status: WorkflowStatus,
    base_doctor_ids: Vec<DoctorId>,
}

impl OptimisticOverlay {
    pub fn new(
        authoritative: &Study,
        workflow_status: WorkflowStatus,
        assigned_doctor_ids: Vec<DoctorId>,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            study_id: authoritative.id.clone(),
            workflow_status,
            assigned_doctor_ids,
            applied_at,
            base_status: authoritative.workflow_status.clone(),
            base_doctor_ids: authoritative.assigned_doctor_ids.clone(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.applied_at >= ttl
    }

    /// 权威数据是否仍与覆盖层创建时一致
    fn based_on(&self, study: &Study) -> bool {
        study.workflow_status == self.base_status
            && same_doctors(&study.assigned_doctor_ids, &self.base_doctor_ids)
    }

    /// 权威数据是否已与覆盖层显示的值一致
    fn confirmed_by(&self, study: &Study) -> bool {
        study.workflow_status == self.workflow_status
            && same_doctors(&study.assigned_doctor_ids, &self.assigned_doctor_ids)
    }

    /// 合并到检查记录上，返回新的记录
    pub fn apply_to(&self, study: &Study) -> Study {
        let mut merged = study.clone();
        merged.workflow_status = self.workflow_status.clone();
        merged.assigned_doctor_ids = self.assigned_doctor_ids.clone();
        merged
    }
}

fn same_doctors(a: &[DoctorId], b: &[DoctorId]) -> bool {
    let a: HashSet<&DoctorId> = a.iter().collect();
    let b: HashSet<&DoctorId> = b.iter().collect();
    a == b
}

/// 覆盖层被权威数据取代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedeResult {
    NoOverlay,
    /// 权威数据与覆盖层一致
    Confirmed,
    /// 权威数据不同，以权威数据为准
    Conflict,
}

/// 渲染时使用的检查（可能叠加了覆盖层）
#[derive(Debug, Clone)]
pub struct MergedStudy<'a> {
    pub study: Cow<'a, Study>,
    pub optimistic: bool,
}

impl AsRef<Study> for MergedStudy<'_> {
    fn as_ref(&self) -> &Study {
        &self.study
    }
}

/// 覆盖层调度器
///
/// 每个覆盖层最多存活 `ttl`，到期后无论权威数据是否追上都会丢弃。
#[derive(Debug, Clone)]
pub struct ReconciliationScheduler {
    ttl: Duration,
    overlays: HashMap<StudyId, OptimisticOverlay>,
}

impl ReconciliationScheduler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            overlays: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// 应用覆盖层
    ///
    /// 新覆盖层建立在已有覆盖层的乐观值之上时，沿用其权威基线。
    pub fn apply(&mut self, mut overlay: OptimisticOverlay) {
        if let Some(existing) = self.overlays.get(&overlay.study_id) {
            if overlay.base_status == existing.workflow_status
                && same_doctors(&overlay.base_doctor_ids, &existing.assigned_doctor_ids)
            {
                overlay.base_status = existing.base_status.clone();
                overlay.base_doctor_ids = existing.base_doctor_ids.clone();
            }
        }
        debug!(
            "Optimistic overlay for study {}: {} with {} doctors",
            overlay.study_id,
            overlay.workflow_status,
            overlay.assigned_doctor_ids.len()
        );
        self.overlays.insert(overlay.study_id.clone(), overlay);
    }

    pub fn get(&self, study_id: &StudyId) -> Option<&OptimisticOverlay> {
        self.overlays.get(study_id)
    }

    /// 未过期的覆盖层
    pub fn active(&self, study_id: &StudyId, now: DateTime<Utc>) -> Option<&OptimisticOverlay> {
        self.overlays
            .get(study_id)
            .filter(|overlay| !overlay.is_expired(now, self.ttl))
    }

    /// 丢弃所有过期覆盖层，返回被丢弃的检查
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<StudyId> {
        let ttl = self.ttl;
        let expired: Vec<StudyId> = self
            .overlays
            .values()
            .filter(|overlay| overlay.is_expired(now, ttl))
            .map(|overlay| overlay.study_id.clone())
            .collect();

        for study_id in &expired {
            self.overlays.remove(study_id);
            debug!("Optimistic overlay for study {} expired", study_id);
        }
        expired
    }

    /// 权威数据到达，立即丢弃覆盖层
    pub fn supersede(&mut self, study_id: &StudyId, authoritative: &Study) -> SupersedeResult {
        let Some(overlay) = self.overlays.remove(study_id) else {
            return SupersedeResult::NoOverlay;
        };

        if overlay.confirmed_by(authoritative) {
            debug!("Authoritative data confirmed overlay for study {}", study_id);
            SupersedeResult::Confirmed
        } else {
            info!(
                "Authoritative data for study {} replaced optimistic state ({} -> {})",
                study_id, overlay.workflow_status, authoritative.workflow_status
            );
            SupersedeResult::Conflict
        }
    }

    /// 处理刷新后的完整快照
    ///
    /// 仓库中已变化的检查会取代覆盖层；从快照中消失的检查直接丢弃覆盖层。
    /// 返回被取代的数量。
    pub fn ingest_snapshot(&mut self, studies: &[Study]) -> usize {
        let by_id: HashMap<&StudyId, &Study> =
            studies.iter().map(|study| (&study.id, study)).collect();

        let stale: Vec<StudyId> = self
            .overlays
            .values()
            .filter(|overlay| match by_id.get(&overlay.study_id) {
                Some(study) => !overlay.based_on(study),
                None => true,
            })
            .map(|overlay| overlay.study_id.clone())
            .collect();

        for study_id in &stale {
            match by_id.get(study_id) {
                Some(study) => {
                    self.supersede(study_id, study);
                }
                None => {
                    self.overlays.remove(study_id);
                    debug!("Study {} left the snapshot, overlay dropped", study_id);
                }
            }
        }
        stale.len()
    }

    /// 检查的有效值（覆盖层优先）
    ///
    /// 覆盖层的基线与传入的权威数据不一致时不再合并，权威数据优先。
    pub fn effective<'a>(&self, study: &'a Study, now: DateTime<Utc>) -> MergedStudy<'a> {
        match self
            .active(&study.id, now)
            .filter(|overlay| overlay.based_on(study))
        {
            Some(overlay) => MergedStudy {
                study: Cow::Owned(overlay.apply_to(study)),
                optimistic: true,
            },
            None => MergedStudy {
                study: Cow::Borrowed(study),
                optimistic: false,
            },
        }
    }

    /// 将覆盖层合并到整个列表
    pub fn merge<'a>(&self, studies: &'a [Study], now: DateTime<Utc>) -> Vec<MergedStudy<'a>> {
        studies
            .iter()
            .map(|study| self.effective(study, now))
            .collect()
    }
}

/// 在渲染线程和分配任务之间共享的覆盖层
///
/// 锁只在同步代码中短暂持有，不跨越 `.await`。
#[derive(Debug, Clone)]
pub struct SharedOverlays(Arc<RwLock<ReconciliationScheduler>>);

impl SharedOverlays {
    pub fn new(scheduler: ReconciliationScheduler) -> Self {
        Self(Arc::new(RwLock::new(scheduler)))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(ReconciliationScheduler::new(ttl))
    }

    pub fn read<R>(&self, f: impl FnOnce(&ReconciliationScheduler) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut ReconciliationScheduler) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
