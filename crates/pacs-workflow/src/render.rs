//! 行渲染投影
//!
//! 将过滤、虚拟窗口、列可见性和选择状态组合成需要绘制的行，不做任何I/O。

use crate::columns::{ColumnConfig, ColumnKey};
use crate::reconciliation::MergedStudy;
use crate::selection::SelectionManager;
use crate::state_machine::AssignmentButton;
use crate::virtualization::{RowWindow, Spacers, VirtualizationEngine};
use crate::worklist::{Category, CategoryCounts, Classification, FilterEngine, StudyQuery};
use pacs_core::{Study, WorkflowStatus};
use serde::Serialize;

/// 状态徽标
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBadge {
    pub status: WorkflowStatus,
    pub label: String,
    /// 未映射的状态没有分类
    pub category: Option<Category>,
}

/// 行操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowAction {
    OpenViewer,
    Download,
    Share,
    Discussion,
    ViewReport,
    AssignDoctor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowActionState {
    pub action: RowAction,
    pub enabled: bool,
}

/// 待绘制的一行
#[derive(Debug, Clone, Serialize)]
pub struct RenderableRow {
    /// 在过滤结果中的位置
    pub index: usize,
    /// 叠加覆盖层后的有效值
    pub study: Study,
    pub selected: bool,
    pub emergency: bool,
    pub optimistic: bool,
    pub badge: StatusBadge,
    pub button: AssignmentButton,
    pub actions: Vec<RowActionState>,
}

impl RenderableRow {
    /// 按给定列顺序生成单元格文本
    pub fn cells(&self, columns: &[ColumnKey]) -> Vec<(ColumnKey, String)> {
        columns
            .iter()
            .map(|key| (*key, key.cell_text(&self.study)))
            .collect()
    }

    pub fn action_enabled(&self, action: RowAction) -> bool {
        self.actions
            .iter()
            .any(|state| state.action == action && state.enabled)
    }
}

/// 表头复选框状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderCheckbox {
    Unchecked,
    Indeterminate,
    Checked,
}

/// 一帧完整的渲染结果
#[derive(Debug, Clone, Serialize)]
pub struct RenderFrame {
    pub category: Category,
    pub counts: CategoryCounts,
    pub columns: Vec<ColumnKey>,
    pub rows: Vec<RenderableRow>,
    /// 过滤后的总行数
    pub total_rows: usize,
    #[serde(skip)]
    pub window: Option<RowWindow>,
    #[serde(skip)]
    pub spacers: Spacers,
    pub total_height: f64,
    pub page: usize,
    pub page_count: usize,
    pub header: HeaderCheckbox,
    pub selected_count: usize,
}

/// 渲染编排
#[derive(Debug, Clone, Default)]
pub struct RenderOrchestrator {
    filter: FilterEngine,
}

impl RenderOrchestrator {
    pub fn new(filter: FilterEngine) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    /// 过滤、开窗并生成行
    pub fn project(
        &self,
        studies: &[MergedStudy<'_>],
        query: &StudyQuery,
        columns: &ColumnConfig,
        selection: &SelectionManager,
        viewport: &mut VirtualizationEngine,
    ) -> RenderFrame {
        let classification = self.filter.apply(studies, query);
        self.compose(classification, query.category, columns, selection, viewport)
    }

    /// 基于已有的过滤结果生成行
    pub fn compose(
        &self,
        classification: Classification<'_, MergedStudy<'_>>,
        category: Category,
        columns: &ColumnConfig,
        selection: &SelectionManager,
        viewport: &mut VirtualizationEngine,
    ) -> RenderFrame {
        let Classification { visible, counts } = classification;
        let window = viewport.set_total_count(visible.len());

        let rows = match window {
            Some(window) => visible[window.range()]
                .iter()
                .enumerate()
                .map(|(offset, merged)| {
                    self.row(window.start_index + offset, merged, selection)
                })
                .collect(),
            None => Vec::new(),
        };

        let ids = visible.iter().map(|merged| &merged.study.id);
        let header = if selection.all_selected(ids.clone()) {
            HeaderCheckbox::Checked
        } else if selection.some_selected(ids) {
            HeaderCheckbox::Indeterminate
        } else {
            HeaderCheckbox::Unchecked
        };

        RenderFrame {
            category,
            counts,
            columns: columns.visible_columns(),
            rows,
            total_rows: visible.len(),
            window,
            spacers: viewport.spacers(),
            total_height: viewport.total_height(),
            page: viewport.page(),
            page_count: viewport.page_count(),
            header,
            selected_count: selection.len(),
        }
    }

    fn row(&self, index: usize, merged: &MergedStudy<'_>, selection: &SelectionManager) -> RenderableRow {
        let study: &Study = &merged.study;
        let category = self.filter.category_of(study);
        let button = AssignmentButton::for_study(study, merged.optimistic);
        let has_report = matches!(category, Some(Category::Completed | Category::Archived));

        let actions = [
            (RowAction::OpenViewer, true),
            (RowAction::Download, true),
            (RowAction::Share, true),
            (RowAction::Discussion, true),
            (RowAction::ViewReport, has_report),
            (RowAction::AssignDoctor, button.enabled),
        ]
        .into_iter()
        .map(|(action, enabled)| RowActionState { action, enabled })
        .collect();

        RenderableRow {
            index,
            selected: selection.is_selected(&study.id),
            emergency: study.is_emergency(),
            optimistic: merged.optimistic,
            badge: StatusBadge {
                status: study.workflow_status.clone(),
                label: study.workflow_status.label().to_string(),
                category,
            },
            button,
            actions,
            study: study.clone(),
        }
    }
}
