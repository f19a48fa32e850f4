//! # PACS工作列表核心
//!
//! 工作列表渲染与医生分配工作流，包括：
//! - 分类过滤：按工作流状态归入标签页并统计数量
//! - 列可见性：必要列保护与持久化
//! - 虚拟滚动：只渲染视口内的行
//! - 分配工作流：逐医生分配并维护乐观覆盖层

pub mod assignment;
pub mod columns;
pub mod engine;
pub mod export;
pub mod reconciliation;
pub mod render;
pub mod selection;
pub mod state_machine;
pub mod virtualization;
pub mod worklist;

// 重新导出主要类型
pub use assignment::{
    AssignResponse, AssignmentDiff, AssignmentOutcome, AssignmentReport, AssignmentService,
    AssignmentWorkflow, MessageLevel, OperationKind, SubOperationResult, SubOperationStatus,
    UnassignResponse, UserMessage,
};
pub use columns::{
    ColumnChange, ColumnConfig, ColumnKey, ColumnPersistence, ColumnVisibilityStore,
    FileColumnPersistence, InMemoryColumnPersistence,
};
pub use engine::{WorklistOptions, WorklistSession};
pub use export::{ExportRequest, Exporter};
pub use reconciliation::{
    MergedStudy, OptimisticOverlay, ReconciliationScheduler, SharedOverlays, SupersedeResult,
};
pub use render::{HeaderCheckbox, RenderFrame, RenderOrchestrator, RenderableRow, RowAction};
pub use selection::SelectionManager;
pub use state_machine::{AssignmentButton, ButtonLabel, ReportStage, StudyEvent, StudyStateMachine};
pub use virtualization::{compute_window, DisplayMode, LayoutHeights, RowWindow, VirtualizationEngine};
pub use worklist::{
    Category, CategoryCounts, CategoryMapping, FilterEngine, SortDirection, SortField, SortSpec,
    StudyQuery,
};
