//! 工作列表分类与过滤
//!
//! 将检查按工作流状态归入标签页分类，计算各分类数量，并应用搜索和排序

use pacs_core::utils::contains_lowercase;
use pacs_core::{PacsError, Result, Study, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 工作列表分类（标签页）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    All,
    Pending,
    #[serde(alias = "inprogress")]
    InProgress,
    Completed,
    Archived,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::All,
        Category::Pending,
        Category::InProgress,
        Category::Completed,
        Category::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Pending => "pending",
            Category::InProgress => "in_progress",
            Category::Completed => "completed",
            Category::Archived => "archived",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::All => "All",
            Category::Pending => "Pending",
            Category::InProgress => "In Progress",
            Category::Completed => "Completed",
            Category::Archived => "Archived",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = PacsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(Category::All),
            "pending" => Ok(Category::Pending),
            "in_progress" | "inprogress" => Ok(Category::InProgress),
            "completed" | "done" => Ok(Category::Completed),
            "archived" | "final" => Ok(Category::Archived),
            other => Err(PacsError::Validation(format!("Unknown category: {}", other))),
        }
    }
}

/// 工作流状态到分类的映射表
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryMapping {
    table: HashMap<WorkflowStatus, Category>,
}

impl CategoryMapping {
    /// 创建空映射，所有状态仅归入 `all`
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// 设置状态所属分类，返回之前的分类
    pub fn insert(&mut self, status: WorkflowStatus, category: Category) -> Option<Category> {
        self.table.insert(status, category)
    }

    /// 应用字符串形式的覆盖项（来自配置）
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (status, category) in overrides {
            let category = category.parse::<Category>()?;
            let status = WorkflowStatus::parse(status);
            tracing::debug!("Category override: {} -> {}", status, category);
            self.insert(status, category);
        }
        Ok(self)
    }

    /// 查询状态所属分类；未映射的状态返回 `None`（仅出现在 `all`）
    pub fn category_of(&self, status: &WorkflowStatus) -> Option<Category> {
        match self.table.get(status) {
            Some(Category::All) | None => None,
            Some(category) => Some(*category),
        }
    }

    /// 某分类下的全部状态
    pub fn statuses_in(&self, category: Category) -> Vec<WorkflowStatus> {
        let mut statuses: Vec<WorkflowStatus> = self
            .table
            .iter()
            .filter(|(_, c)| **c == category)
            .map(|(status, _)| status.clone())
            .collect();
        statuses.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        statuses
    }
}

impl Default for CategoryMapping {
    fn default() -> Self {
        let mut mapping = Self::empty();

        for status in [
            WorkflowStatus::NewStudyReceived,
            WorkflowStatus::New,
            WorkflowStatus::PendingAssignment,
        ] {
            mapping.insert(status, Category::Pending);
        }

        for status in [
            WorkflowStatus::AssignedToDoctor,
            WorkflowStatus::DoctorOpenedReport,
            WorkflowStatus::ReportInProgress,
        ] {
            mapping.insert(status, Category::InProgress);
        }

        for status in [
            WorkflowStatus::ReportDrafted,
            WorkflowStatus::ReportFinalized,
            WorkflowStatus::ReportUploaded,
            WorkflowStatus::ReportDownloadedRadiologist,
            WorkflowStatus::ReportDownloaded,
            WorkflowStatus::FinalReportDownloaded,
        ] {
            mapping.insert(status, Category::Completed);
        }

        mapping.insert(WorkflowStatus::Archived, Category::Archived);
        mapping
    }
}

/// 各分类数量（始终基于完整输入计算）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub all: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub archived: usize,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::All => self.all,
            Category::Pending => self.pending,
            Category::InProgress => self.in_progress,
            Category::Completed => self.completed,
            Category::Archived => self.archived,
        }
    }

    fn record(&mut self, category: Option<Category>) {
        self.all += 1;
        match category {
            Some(Category::Pending) => self.pending += 1,
            Some(Category::InProgress) => self.in_progress += 1,
            Some(Category::Completed) => self.completed += 1,
            Some(Category::Archived) => self.archived += 1,
            Some(Category::All) | None => {}
        }
    }
}

/// 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    StudyDate,
    UploadDate,
    ReportedDate,
    PatientName,
    PatientId,
    Modality,
    Priority,
}

impl FromStr for SortField {
    type Err = PacsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "study_date" | "studydate" => Ok(SortField::StudyDate),
            "upload_date" | "uploaddate" => Ok(SortField::UploadDate),
            "reported_date" | "reporteddate" => Ok(SortField::ReportedDate),
            "patient_name" | "patientname" => Ok(SortField::PatientName),
            "patient_id" | "patientid" => Ok(SortField::PatientId),
            "modality" => Ok(SortField::Modality),
            "priority" => Ok(SortField::Priority),
            other => Err(PacsError::Validation(format!("Unknown sort field: {}", other))),
        }
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

/// 排序规则
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    /// 点击列头：同一字段翻转方向，新字段从升序开始
    pub fn toggled(&self, field: SortField) -> Self {
        if self.field == field {
            Self {
                field,
                direction: self.direction.reversed(),
            }
        } else {
            Self {
                field,
                direction: SortDirection::Ascending,
            }
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::StudyDate,
            direction: SortDirection::Descending,
        }
    }
}

/// 工作列表查询条件
#[derive(Debug, Clone, PartialEq)]
pub struct StudyQuery {
    pub category: Category,
    pub search: Option<String>,
    pub sort: Option<SortSpec>,
}

impl StudyQuery {
    pub fn category(category: Category) -> Self {
        Self {
            category,
            search: None,
            sort: None,
        }
    }

    /// 规范化后的搜索词（小写、去空白），空白查询视为无过滤
    fn normalized_search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase)
    }
}

impl Default for StudyQuery {
    fn default() -> Self {
        Self {
            category: Category::All,
            search: None,
            sort: Some(SortSpec::default()),
        }
    }
}

/// 分类结果
#[derive(Debug)]
pub struct Classification<'a, T> {
    pub visible: Vec<&'a T>,
    pub counts: CategoryCounts,
}

/// 过滤引擎
///
/// 纯函数式：不修改输入的检查记录。
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    mapping: CategoryMapping,
}

impl FilterEngine {
    pub fn new(mapping: CategoryMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &CategoryMapping {
        &self.mapping
    }

    pub fn category_of(&self, study: &Study) -> Option<Category> {
        self.mapping.category_of(&study.workflow_status)
    }

    /// 检查是否属于指定分类
    pub fn matches(&self, study: &Study, category: Category) -> bool {
        match category {
            Category::All => true,
            other => self.category_of(study) == Some(other),
        }
    }

    /// 统计各分类数量
    pub fn counts<T: AsRef<Study>>(&self, studies: &[T]) -> CategoryCounts {
        let mut counts = CategoryCounts::default();
        for study in studies {
            counts.record(self.category_of(study.as_ref()));
        }
        counts
    }

    /// 按分类过滤，数量基于完整输入
    pub fn classify<'a, T: AsRef<Study>>(
        &self,
        studies: &'a [T],
        category: Category,
    ) -> Classification<'a, T> {
        let mut counts = CategoryCounts::default();
        let mut visible = Vec::new();

        for study in studies {
            let study_category = self.category_of(study.as_ref());
            counts.record(study_category);

            if category == Category::All || study_category == Some(category) {
                visible.push(study);
            }
        }

        Classification { visible, counts }
    }

    /// 分类后依次应用搜索和排序
    pub fn apply<'a, T: AsRef<Study>>(
        &self,
        studies: &'a [T],
        query: &StudyQuery,
    ) -> Classification<'a, T> {
        let mut classification = self.classify(studies, query.category);

        if let Some(needle) = query.normalized_search() {
            classification
                .visible
                .retain(|study| matches_search(study.as_ref(), &needle));
        }

        if let Some(spec) = query.sort {
            sort_studies(&mut classification.visible, spec);
        }

        classification
    }
}

/// 搜索匹配，`needle` 需已转为小写
pub fn matches_search(study: &Study, needle: &str) -> bool {
    contains_lowercase(study.patient_name.as_deref(), needle)
        || contains_lowercase(study.patient_id.as_deref(), needle)
        || contains_lowercase(study.description.as_deref(), needle)
        || contains_lowercase(study.modality.as_deref(), needle)
        || contains_lowercase(study.accession_number.as_deref(), needle)
        || contains_lowercase(study.location.as_deref(), needle)
}

/// 稳定排序，缺失值始终排在末尾
pub fn sort_studies<T: AsRef<Study>>(studies: &mut [&T], spec: SortSpec) {
    studies.sort_by(|a, b| compare_by((*a).as_ref(), (*b).as_ref(), spec));
}

fn compare_by(a: &Study, b: &Study, spec: SortSpec) -> Ordering {
    match spec.field {
        SortField::StudyDate => compare_optional(a.study_date, b.study_date, spec.direction),
        SortField::UploadDate => compare_optional(a.upload_date, b.upload_date, spec.direction),
        SortField::ReportedDate => {
            compare_optional(a.reported_date, b.reported_date, spec.direction)
        }
        SortField::PatientName => compare_optional(
            lowercase(a.patient_name.as_deref()),
            lowercase(b.patient_name.as_deref()),
            spec.direction,
        ),
        SortField::PatientId => compare_optional(
            lowercase(a.patient_id.as_deref()),
            lowercase(b.patient_id.as_deref()),
            spec.direction,
        ),
        SortField::Modality => compare_optional(
            lowercase(a.modality.as_deref()),
            lowercase(b.modality.as_deref()),
            spec.direction,
        ),
        SortField::Priority => compare_optional(Some(a.priority), Some(b.priority), spec.direction),
    }
}

fn lowercase(value: Option<&str>) -> Option<String> {
    value.map(str::to_lowercase)
}

fn compare_optional<V: Ord>(a: Option<V>, b: Option<V>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match direction {
            SortDirection::Ascending => a.cmp(&b),
            SortDirection::Descending => b.cmp(&a),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn study(id: &str, status: WorkflowStatus) -> Study {
        Study::new(id, status)
    }

    #[test]
    fn test_completed_scenario() {
        // 50个检查，其中3个报告已定稿
        let studies: Vec<Study> = (0..50)
            .map(|i| {
                let status = match i {
                    7 | 21 | 44 => WorkflowStatus::ReportFinalized,
                    i if i % 2 == 0 => WorkflowStatus::NewStudyReceived,
                    _ => WorkflowStatus::AssignedToDoctor,
                };
                study(&format!("s{}", i), status)
            })
            .collect();

        let engine = FilterEngine::default();
        let all = engine.classify(&studies, Category::All);
        assert_eq!(all.counts.completed, 3);
        assert_eq!(all.counts.all, 50);

        let completed = engine.classify(&studies, Category::Completed);
        let ids: Vec<&str> = completed.visible.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s7", "s21", "s44"]);
        // 数量不受当前分类影响
        assert_eq!(completed.counts, all.counts);
    }

    #[test]
    fn test_unmapped_status_only_in_all() {
        let studies = vec![
            study("a", WorkflowStatus::Other("qc_hold".to_string())),
            study("b", WorkflowStatus::Archived),
        ];
        let engine = FilterEngine::default();

        let counts = engine.counts(&studies);
        assert_eq!(counts.all, 2);
        assert_eq!(counts.archived, 1);
        assert_eq!(
            counts.pending + counts.in_progress + counts.completed + counts.archived,
            1
        );

        for category in [Category::Pending, Category::InProgress, Category::Completed] {
            assert!(engine.classify(&studies, category).visible.is_empty());
        }
        assert_eq!(engine.classify(&studies, Category::All).visible.len(), 2);
    }

    #[test]
    fn test_mapping_overrides() {
        let mapping = CategoryMapping::default()
            .with_overrides([("doctor_opened_report", "pending"), ("qc_hold", "archived")])
            .unwrap();

        assert_eq!(
            mapping.category_of(&WorkflowStatus::DoctorOpenedReport),
            Some(Category::Pending)
        );
        assert_eq!(
            mapping.category_of(&WorkflowStatus::parse("qc_hold")),
            Some(Category::Archived)
        );
        assert!(CategoryMapping::default()
            .with_overrides([("new", "bogus")])
            .is_err());
    }

    #[test]
    fn test_search_and_sort() {
        let mut a = study("a", WorkflowStatus::New);
        a.patient_name = Some("Zed".to_string());
        a.study_date = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let mut b = study("b", WorkflowStatus::New);
        b.patient_name = Some("alice".to_string());
        b.modality = Some("CT".to_string());
        b.study_date = Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        let mut c = study("c", WorkflowStatus::New);
        c.modality = Some("MR".to_string());
        let studies = vec![a, b, c];
        let engine = FilterEngine::default();

        let query = StudyQuery::default();
        let ids: Vec<&str> = engine
            .apply(&studies, &query)
            .visible
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        // 默认按检查日期倒序，缺失日期在末尾
        assert_eq!(ids, vec!["b", "a", "c"]);

        let query = StudyQuery {
            sort: Some(SortSpec::default().toggled(SortField::PatientName)),
            ..StudyQuery::default()
        };
        let ids: Vec<&str> = engine
            .apply(&studies, &query)
            .visible
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let query = StudyQuery {
            search: Some("  ct ".to_string()),
            ..StudyQuery::default()
        };
        let result = engine.apply(&studies, &query);
        assert_eq!(result.visible.len(), 1);
        assert_eq!(result.counts.all, 3);
    }

    #[test]
    fn test_sort_toggle() {
        let spec = SortSpec::default();
        let same = spec.toggled(SortField::StudyDate);
        assert_eq!(same.direction, SortDirection::Ascending);
        let other = same.toggled(SortField::Modality);
        assert_eq!(other.field, SortField::Modality);
        assert_eq!(other.direction, SortDirection::Ascending);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("inprogress".parse::<Category>().unwrap(), Category::InProgress);
        assert_eq!("In-Progress".parse::<Category>().unwrap(), Category::InProgress);
        assert!("bogus".parse::<Category>().is_err());
    }
}
