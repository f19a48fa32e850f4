//! 工作列表会话
//!
//! 持有检查快照和各个状态容器，对外提供统一的操作入口

use crate::columns::{ColumnChange, ColumnConfig, ColumnKey, ColumnPersistence, ColumnVisibilityStore};
use crate::export::ExportRequest;
use crate::reconciliation::{ReconciliationScheduler, SharedOverlays, SupersedeResult};
use crate::render::{RenderFrame, RenderOrchestrator};
use crate::selection::SelectionManager;
use crate::virtualization::{
    viewport_height_for, DisplayMode, LayoutHeights, RowWindow, VirtualizationEngine,
};
use crate::worklist::{Category, CategoryCounts, CategoryMapping, FilterEngine, SortField, SortSpec, StudyQuery};
use chrono::{DateTime, Duration, Utc};
use pacs_core::{Doctor, PacsError, Result, Study, StudyId, StudySnapshot};

/// 会话参数
#[derive(Debug, Clone)]
pub struct WorklistOptions {
    pub row_height: f64,
    pub overscan: usize,
    pub viewport_height: f64,
    pub display_mode: DisplayMode,
    pub overlay_ttl: Duration,
    pub category_mapping: CategoryMapping,
}

impl Default for WorklistOptions {
    fn default() -> Self {
        Self {
            row_height: 44.0,
            overscan: 10,
            viewport_height: 600.0,
            display_mode: DisplayMode::Virtualized,
            overlay_ttl: Duration::seconds(15),
            category_mapping: CategoryMapping::default(),
        }
    }
}

/// 工作列表会话
///
/// 检查记录只读持有；分配结果通过共享覆盖层在渲染时合并。
#[derive(Debug)]
pub struct WorklistSession {
    studies: Vec<Study>,
    doctors: Vec<Doctor>,
    query: StudyQuery,
    selection: SelectionManager,
    columns: ColumnVisibilityStore,
    viewport: VirtualizationEngine,
    orchestrator: RenderOrchestrator,
    overlays: SharedOverlays,
}

impl WorklistSession {
    /// 创建会话并加载已保存的列配置
    pub fn new(options: WorklistOptions, persistence: Box<dyn ColumnPersistence>) -> Result<Self> {
        let viewport = VirtualizationEngine::new(
            options.row_height,
            options.viewport_height,
            options.overscan,
        )?
        .with_mode(options.display_mode);

        if options.overlay_ttl <= Duration::zero() {
            return Err(PacsError::Validation(
                "overlay TTL must be positive".to_string(),
            ));
        }

        Ok(Self {
            studies: Vec::new(),
            doctors: Vec::new(),
            query: StudyQuery::default(),
            selection: SelectionManager::new(),
            columns: ColumnVisibilityStore::open(persistence),
            viewport,
            orchestrator: RenderOrchestrator::new(FilterEngine::new(options.category_mapping)),
            overlays: SharedOverlays::new(ReconciliationScheduler::new(options.overlay_ttl)),
        })
    }

    /// 供分配工作流共享的覆盖层
    pub fn overlays(&self) -> SharedOverlays {
        self.overlays.clone()
    }

    pub fn studies(&self) -> &[Study] {
        &self.studies
    }

    pub fn study(&self, id: &StudyId) -> Option<&Study> {
        self.studies.iter().find(|study| &study.id == id)
    }

    /// 当前有效值（叠加未过期的覆盖层）
    pub fn effective_study(&self, id: &StudyId, now: DateTime<Utc>) -> Option<Study> {
        let study = self.study(id)?;
        Some(self.overlays.read(|scheduler| scheduler.effective(study, now).study.into_owned()))
    }

    /// 加载完整快照，返回被排除的记录错误
    pub fn load_snapshot(&mut self, snapshot: StudySnapshot) -> Vec<PacsError> {
        let StudySnapshot { studies, rejected } = snapshot;
        let superseded = self
            .overlays
            .write(|scheduler| scheduler.ingest_snapshot(&studies));

        tracing::info!(
            "Loaded {} studies ({} rejected, {} overlays superseded)",
            studies.len(),
            rejected.len(),
            superseded
        );
        self.studies = studies;
        self.prune_selection(Utc::now());
        rejected
    }

    /// 单个检查的权威更新
    pub fn push_update(&mut self, study: Study) -> SupersedeResult {
        let result = self
            .overlays
            .write(|scheduler| scheduler.supersede(&study.id, &study));

        match self.studies.iter_mut().find(|existing| existing.id == study.id) {
            Some(existing) => *existing = study,
            None => self.studies.push(study),
        }
        self.prune_selection(Utc::now());
        result
    }

    pub fn set_doctors(&mut self, doctors: Vec<Doctor>) {
        self.doctors = doctors;
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.doctors
    }

    pub fn query(&self) -> &StudyQuery {
        &self.query
    }

    pub fn category(&self) -> Category {
        self.query.category
    }

    /// 切换分类；先清空选择，再计算新的过滤结果
    pub fn set_category(&mut self, category: Category) {
        self.selection.select_none();
        if self.query.category != category {
            tracing::debug!("Switching category {} -> {}", self.query.category, category);
        }
        self.query.category = category;
        self.viewport.scroll_to(0.0);
        self.viewport.set_page(0);
    }

    pub fn set_search(&mut self, search: Option<String>) {
        self.query.search = search;
        self.viewport.scroll_to(0.0);
        self.viewport.set_page(0);
        self.prune_selection(Utc::now());
    }

    /// 点击列头排序；重复点击同一列翻转方向
    pub fn sort_by(&mut self, field: SortField) -> SortSpec {
        let spec = self.query.sort.unwrap_or_default().toggled(field);
        self.query.sort = Some(spec);
        spec
    }

    pub fn counts(&self, now: DateTime<Utc>) -> CategoryCounts {
        let merged = self.overlays.read(|scheduler| scheduler.merge(&self.studies, now));
        self.orchestrator.filter().counts(&merged)
    }

    /// 当前分类、搜索和排序下的有效检查
    pub fn visible_studies(&self, now: DateTime<Utc>) -> Vec<Study> {
        let merged = self.overlays.read(|scheduler| scheduler.merge(&self.studies, now));
        self.orchestrator
            .filter()
            .apply(&merged, &self.query)
            .visible
            .into_iter()
            .map(|merged| merged.study.clone().into_owned())
            .collect()
    }

    fn prune_selection(&mut self, now: DateTime<Utc>) {
        if self.selection.is_empty() {
            return;
        }
        let visible: Vec<StudyId> = self
            .visible_studies(now)
            .into_iter()
            .map(|study| study.id)
            .collect();
        let removed = self.selection.retain(&visible);
        if removed > 0 {
            tracing::debug!("Dropped {} selected studies no longer in view", removed);
        }
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn toggle_selection(&mut self, id: &StudyId) -> bool {
        self.selection.toggle(id)
    }

    pub fn select_all_visible(&mut self, now: DateTime<Utc>) -> usize {
        let visible: Vec<StudyId> = self
            .visible_studies(now)
            .into_iter()
            .map(|study| study.id)
            .collect();
        self.selection.select_all(&visible);
        self.selection.len()
    }

    pub fn select_none(&mut self) {
        self.selection.select_none();
    }

    pub fn columns(&self) -> &ColumnConfig {
        self.columns.config()
    }

    pub fn set_column(&mut self, key: ColumnKey, visible: bool) -> ColumnChange {
        self.columns.set(key, visible)
    }

    pub fn toggle_column(&mut self, key: ColumnKey) -> ColumnChange {
        self.columns.toggle(key)
    }

    pub fn reset_columns(&mut self) -> ColumnConfig {
        self.columns.reset_to_default()
    }

    pub fn scroll_to(&mut self, offset: f64) -> Option<RowWindow> {
        self.viewport.scroll_to(offset)
    }

    pub fn resize(&mut self, viewport_height: f64) -> Option<RowWindow> {
        self.viewport.resize(viewport_height)
    }

    /// 浏览器窗口尺寸变化，扣除页面布局后得到表格视口
    pub fn resize_window(
        &mut self,
        window_height: f64,
        layout: &LayoutHeights,
        min_height: f64,
    ) -> Option<RowWindow> {
        self.resize(viewport_height_for(window_height, layout, min_height))
    }

    pub fn set_page(&mut self, page: usize) -> Option<RowWindow> {
        self.viewport.set_page(page)
    }

    /// 生成一帧渲染结果；先丢弃过期的覆盖层
    pub fn frame(&mut self, now: DateTime<Utc>) -> RenderFrame {
        let expired = self.overlays.write(|scheduler| scheduler.sweep_expired(now));
        if !expired.is_empty() {
            tracing::debug!("{} optimistic overlays expired", expired.len());
        }

        let merged = self.overlays.read(|scheduler| scheduler.merge(&self.studies, now));
        let classification = self.orchestrator.filter().apply(&merged, &self.query);

        let visible: Vec<&StudyId> = classification
            .visible
            .iter()
            .map(|merged| &merged.study.id)
            .collect();
        self.selection.retain(visible);

        self.orchestrator.compose(
            classification,
            self.query.category,
            self.columns.config(),
            &self.selection,
            &mut self.viewport,
        )
    }

    /// 导出请求；`selected_only` 且有选择时只导出选中的行
    pub fn export_request(&self, selected_only: bool, now: DateTime<Utc>) -> ExportRequest {
        let mut rows = self.visible_studies(now);
        if selected_only && !self.selection.is_empty() {
            rows.retain(|study| self.selection.is_selected(&study.id));
        }

        let columns = self
            .columns
            .config()
            .visible_columns()
            .into_iter()
            .filter(ColumnKey::is_data)
            .collect();

        tracing::info!("Export requested for {} rows in {}", rows.len(), self.query.category);
        ExportRequest {
            category: self.query.category,
            columns,
            rows,
            requested_at: now,
        }
    }
}
