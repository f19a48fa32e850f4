//! 核心数据模型定义

use crate::error::{PacsError, Result};
use crate::utils::parse_datetime;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;

/// 检查标识符（不透明，由外部检查仓库分配）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyId(String);

impl StudyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudyId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 医生标识符
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorId(String);

impl DoctorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DoctorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DoctorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 报告工作流状态
///
/// 未知状态保留原始字符串，不视为错误。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowStatus {
    NewStudyReceived,            // 新检查已接收
    New,                         // 新检查
    PendingAssignment,           // 待分配
    AssignedToDoctor,            // 已分配医生
    DoctorOpenedReport,          // 医生已打开报告
    ReportInProgress,            // 报告书写中
    ReportDrafted,               // 报告草稿
    ReportFinalized,             // 报告已定稿
    ReportUploaded,              // 报告已上传
    ReportDownloadedRadiologist, // 放射科医生已下载报告
    ReportDownloaded,            // 报告已下载
    FinalReportDownloaded,       // 最终报告已下载
    Archived,                    // 已归档
    Other(String),
}

impl WorkflowStatus {
    /// 所有已知状态
    pub const KNOWN: [WorkflowStatus; 13] = [
        WorkflowStatus::NewStudyReceived,
        WorkflowStatus::New,
        WorkflowStatus::PendingAssignment,
        WorkflowStatus::AssignedToDoctor,
        WorkflowStatus::DoctorOpenedReport,
        WorkflowStatus::ReportInProgress,
        WorkflowStatus::ReportDrafted,
        WorkflowStatus::ReportFinalized,
        WorkflowStatus::ReportUploaded,
        WorkflowStatus::ReportDownloadedRadiologist,
        WorkflowStatus::ReportDownloaded,
        WorkflowStatus::FinalReportDownloaded,
        WorkflowStatus::Archived,
    ];

    /// 从原始字符串解析状态（大小写不敏感）
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new_study_received" => Self::NewStudyReceived,
            "new" => Self::New,
            "pending_assignment" => Self::PendingAssignment,
            "assigned_to_doctor" => Self::AssignedToDoctor,
            "doctor_opened_report" => Self::DoctorOpenedReport,
            "report_in_progress" => Self::ReportInProgress,
            "report_drafted" => Self::ReportDrafted,
            "report_finalized" => Self::ReportFinalized,
            "report_uploaded" => Self::ReportUploaded,
            "report_downloaded_radiologist" => Self::ReportDownloadedRadiologist,
            "report_downloaded" => Self::ReportDownloaded,
            "final_report_downloaded" => Self::FinalReportDownloaded,
            "archived" => Self::Archived,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::NewStudyReceived => "new_study_received",
            Self::New => "new",
            Self::PendingAssignment => "pending_assignment",
            Self::AssignedToDoctor => "assigned_to_doctor",
            Self::DoctorOpenedReport => "doctor_opened_report",
            Self::ReportInProgress => "report_in_progress",
            Self::ReportDrafted => "report_drafted",
            Self::ReportFinalized => "report_finalized",
            Self::ReportUploaded => "report_uploaded",
            Self::ReportDownloadedRadiologist => "report_downloaded_radiologist",
            Self::ReportDownloaded => "report_downloaded",
            Self::FinalReportDownloaded => "final_report_downloaded",
            Self::Archived => "archived",
            Self::Other(raw) => raw,
        }
    }

    /// 状态显示名称
    pub fn label(&self) -> &str {
        match self {
            Self::NewStudyReceived => "New Study Received",
            Self::New => "New Study",
            Self::PendingAssignment => "Pending Assignment",
            Self::AssignedToDoctor => "Assigned to Doctor",
            Self::DoctorOpenedReport => "Doctor Opened Report",
            Self::ReportInProgress => "Report in Progress",
            Self::ReportDrafted => "Report Drafted",
            Self::ReportFinalized => "Report Finalized",
            Self::ReportUploaded => "Report Uploaded",
            Self::ReportDownloadedRadiologist => "Report Downloaded by Radiologist",
            Self::ReportDownloaded => "Report Downloaded",
            Self::FinalReportDownloaded => "Final Report Downloaded",
            Self::Archived => "Archived",
            Self::Other(_) => "Unknown Status",
        }
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::NewStudyReceived
    }
}

impl From<String> for WorkflowStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<WorkflowStatus> for String {
    fn from(value: WorkflowStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 检查优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StudyPriority {
    Normal,    // 常规
    Urgent,    // 急
    Stat,      // 立即
    Emergency, // 紧急
}

impl StudyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Urgent => "URGENT",
            Self::Stat => "STAT",
            Self::Emergency => "EMERGENCY",
        }
    }

    /// 是否为需要突出显示的紧急级别
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Urgent | Self::Stat | Self::Emergency)
    }
}

impl Default for StudyPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<String> for StudyPriority {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMERGENCY" => Self::Emergency,
            "STAT" => Self::Stat,
            "URGENT" => Self::Urgent,
            // ROUTINE 与 NORMAL 等价，其余未知值按常规处理
            _ => Self::Normal,
        }
    }
}

impl From<StudyPriority> for String {
    fn from(value: StudyPriority) -> Self {
        value.as_str().to_string()
    }
}

/// 检查信息
///
/// 只读快照；核心从不原地修改，乐观更新通过覆盖层在渲染时合并。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    #[serde(alias = "_id")]
    pub id: StudyId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workflow_status: WorkflowStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: StudyPriority,
    #[serde(default, deserialize_with = "lenient_text")]
    pub case_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub assigned_doctor_ids: Vec<DoctorId>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub patient_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub patient_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub age_gender: Option<String>,
    #[serde(default, alias = "studyDescription", deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub series_images: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub modality: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub accession_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reported_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub seen_by: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub study_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub upload_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub reported_date: Option<DateTime<Utc>>,
    /// 其余展示字段，原样透传
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// 展示字段只读不校验：格式异常时按缺失处理，不排除整条记录

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        Some(serde_json::Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}

/// 日期支持 RFC 3339、`YYYY-MM-DD`、DICOM `YYYYMMDD` 以及毫秒时间戳
fn lenient_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match &value {
        Some(serde_json::Value::String(raw)) => parse_datetime(raw),
        Some(serde_json::Value::Number(millis)) => millis
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    };

    if parsed.is_none() {
        if let Some(raw) = value.filter(|raw| !raw.is_null()) {
            tracing::debug!("Ignoring unparseable date value {}", raw);
        }
    }
    Ok(parsed)
}

impl Study {
    /// 创建仅包含必要字段的检查
    pub fn new(id: impl Into<String>, workflow_status: WorkflowStatus) -> Self {
        Self {
            id: StudyId::new(id),
            workflow_status,
            priority: StudyPriority::Normal,
            case_type: None,
            assigned_doctor_ids: Vec::new(),
            patient_id: None,
            patient_name: None,
            age_gender: None,
            description: None,
            series_images: None,
            modality: None,
            location: None,
            accession_number: None,
            reported_by: None,
            seen_by: None,
            study_date: None,
            upload_date: None,
            reported_date: None,
            extra: serde_json::Map::new(),
        }
    }

    /// 从仓库返回的原始记录解析检查
    pub fn from_record(record: serde_json::Value) -> Result<Self> {
        let mut study: Study = serde_json::from_value(record)
            .map_err(|e| PacsError::MalformedStudy(e.to_string()))?;

        if study.id.as_str().trim().is_empty() {
            return Err(PacsError::MalformedStudy("study id is empty".to_string()));
        }

        study.assigned_doctor_ids = dedup_ordered(std::mem::take(&mut study.assigned_doctor_ids));
        Ok(study)
    }

    /// 是否为紧急检查（优先级或病例类型）
    pub fn is_emergency(&self) -> bool {
        self.priority.is_elevated()
            || self
                .case_type
                .as_deref()
                .map(|case_type| case_type.eq_ignore_ascii_case("emergency"))
                .unwrap_or(false)
    }

    pub fn has_doctor(&self, doctor_id: &DoctorId) -> bool {
        self.assigned_doctor_ids.contains(doctor_id)
    }
}

impl AsRef<Study> for Study {
    fn as_ref(&self) -> &Study {
        self
    }
}

/// 去重并保持原有顺序
pub fn dedup_ordered(ids: Vec<DoctorId>) -> Vec<DoctorId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// 医生信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    #[serde(alias = "_id")]
    pub id: DoctorId,
    #[serde(alias = "fullName")]
    pub name: String,
    #[serde(default = "default_active", alias = "isActive")]
    pub active: bool,
    #[serde(default, alias = "isOnline", alias = "isLoggedIn")]
    pub online: bool,
}

fn default_active() -> bool {
    true
}

impl Doctor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DoctorId::new(id),
            name: name.into(),
            active: true,
            online: false,
        }
    }

    /// 医生显示名称
    pub fn display_name(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            self.id.to_string()
        } else if name.starts_with("Dr.") {
            name.to_string()
        } else {
            format!("Dr. {}", name)
        }
    }
}

/// 检查快照
///
/// 格式错误的记录被排除并单独报告，不影响其余记录的渲染。
#[derive(Debug, Default)]
pub struct StudySnapshot {
    pub studies: Vec<Study>,
    pub rejected: Vec<PacsError>,
}

impl StudySnapshot {
    /// 从原始记录列表构建快照
    pub fn from_records(records: Vec<serde_json::Value>) -> Self {
        let mut snapshot = Self::default();
        let mut seen = HashSet::new();

        for (index, record) in records.into_iter().enumerate() {
            match Study::from_record(record) {
                Ok(study) => {
                    if seen.insert(study.id.clone()) {
                        snapshot.studies.push(study);
                    } else {
                        tracing::warn!("Duplicate study id {} at record {}", study.id, index);
                        snapshot.rejected.push(PacsError::MalformedStudy(format!(
                            "record {}: duplicate study id {}",
                            index, study.id
                        )));
                    }
                }
                Err(e) => {
                    tracing::warn!("Excluding malformed study record {}: {}", index, e);
                    let reason = match e {
                        PacsError::MalformedStudy(reason) => reason,
                        other => other.to_string(),
                    };
                    snapshot
                        .rejected
                        .push(PacsError::MalformedStudy(format!("record {}: {}", index, reason)));
                }
            }
        }

        snapshot
    }

    /// 从JSON文本构建快照，支持顶层数组或 `{"data": [...]}` / `{"studies": [...]}`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let records = match value {
            serde_json::Value::Array(records) => records,
            serde_json::Value::Object(mut map) => match map
                .remove("data")
                .or_else(|| map.remove("studies"))
            {
                Some(serde_json::Value::Array(records)) => records,
                _ => {
                    return Err(PacsError::Validation(
                        "expected an array of study records".to_string(),
                    ))
                }
            },
            _ => {
                return Err(PacsError::Validation(
                    "expected an array of study records".to_string(),
                ))
            }
        };

        Ok(Self::from_records(records))
    }
}
