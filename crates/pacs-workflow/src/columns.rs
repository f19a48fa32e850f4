//! 列可见性配置
//!
//! 维护可见列集合并持久化，保护必要列不被隐藏

use pacs_core::utils::{display_text, format_datetime};
use pacs_core::{PacsError, Result, Study};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// 工作列表列
///
/// 声明顺序即显示顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnKey {
    Checkbox,
    Status,
    RandomEmoji,
    User,
    DownloadBtn,
    ShareBtn,
    Discussion,
    PatientId,
    PatientName,
    AgeGender,
    Description,
    Series,
    Modality,
    Location,
    StudyDate,
    UploadDate,
    ReportedDate,
    ReportedBy,
    Accession,
    SeenBy,
    Actions,
    Report,
    AssignDoctor,
}

impl ColumnKey {
    pub const ALL: [ColumnKey; 23] = [
        ColumnKey::Checkbox,
        ColumnKey::Status,
        ColumnKey::RandomEmoji,
        ColumnKey::User,
        ColumnKey::DownloadBtn,
        ColumnKey::ShareBtn,
        ColumnKey::Discussion,
        ColumnKey::PatientId,
        ColumnKey::PatientName,
        ColumnKey::AgeGender,
        ColumnKey::Description,
        ColumnKey::Series,
        ColumnKey::Modality,
        ColumnKey::Location,
        ColumnKey::StudyDate,
        ColumnKey::UploadDate,
        ColumnKey::ReportedDate,
        ColumnKey::ReportedBy,
        ColumnKey::Accession,
        ColumnKey::SeenBy,
        ColumnKey::Actions,
        ColumnKey::Report,
        ColumnKey::AssignDoctor,
    ];

    /// 不可隐藏的必要列
    pub const ESSENTIAL: [ColumnKey; 3] =
        [ColumnKey::PatientId, ColumnKey::PatientName, ColumnKey::Status];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKey::Checkbox => "checkbox",
            ColumnKey::Status => "status",
            ColumnKey::RandomEmoji => "randomEmoji",
            ColumnKey::User => "user",
            ColumnKey::DownloadBtn => "downloadBtn",
            ColumnKey::ShareBtn => "shareBtn",
            ColumnKey::Discussion => "discussion",
            ColumnKey::PatientId => "patientId",
            ColumnKey::PatientName => "patientName",
            ColumnKey::AgeGender => "ageGender",
            ColumnKey::Description => "description",
            ColumnKey::Series => "series",
            ColumnKey::Modality => "modality",
            ColumnKey::Location => "location",
            ColumnKey::StudyDate => "studyDate",
            ColumnKey::UploadDate => "uploadDate",
            ColumnKey::ReportedDate => "reportedDate",
            ColumnKey::ReportedBy => "reportedBy",
            ColumnKey::Accession => "accession",
            ColumnKey::SeenBy => "seenBy",
            ColumnKey::Actions => "actions",
            ColumnKey::Report => "report",
            ColumnKey::AssignDoctor => "assignDoctor",
        }
    }

    /// 列头标题
    pub fn title(&self) -> &'static str {
        match self {
            ColumnKey::Checkbox => "",
            ColumnKey::Status => "Status",
            ColumnKey::RandomEmoji => "",
            ColumnKey::User => "User",
            ColumnKey::DownloadBtn => "Download",
            ColumnKey::ShareBtn => "Share",
            ColumnKey::Discussion => "Discussion",
            ColumnKey::PatientId => "Patient ID",
            ColumnKey::PatientName => "Patient Name",
            ColumnKey::AgeGender => "Age/Sex",
            ColumnKey::Description => "Description",
            ColumnKey::Series => "Series",
            ColumnKey::Modality => "Modality",
            ColumnKey::Location => "Location",
            ColumnKey::StudyDate => "Study Date",
            ColumnKey::UploadDate => "Upload Date",
            ColumnKey::ReportedDate => "Reported Date",
            ColumnKey::ReportedBy => "Reported By",
            ColumnKey::Accession => "Accession",
            ColumnKey::SeenBy => "Seen By",
            ColumnKey::Actions => "Actions",
            ColumnKey::Report => "Report",
            ColumnKey::AssignDoctor => "Assign Doctor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        ColumnKey::ALL.iter().copied().find(|key| key.as_str() == raw)
    }

    pub fn is_essential(&self) -> bool {
        ColumnKey::ESSENTIAL.contains(self)
    }

    /// 默认可见性
    pub fn default_visibility(&self) -> bool {
        !matches!(
            self,
            ColumnKey::UploadDate | ColumnKey::ReportedBy | ColumnKey::Accession | ColumnKey::SeenBy
        )
    }

    /// 是否为数据列（按钮、复选框等交互列除外）
    pub fn is_data(&self) -> bool {
        !matches!(
            self,
            ColumnKey::Checkbox
                | ColumnKey::RandomEmoji
                | ColumnKey::User
                | ColumnKey::DownloadBtn
                | ColumnKey::ShareBtn
                | ColumnKey::Discussion
                | ColumnKey::Actions
                | ColumnKey::Report
                | ColumnKey::AssignDoctor
        )
    }

    /// 单元格显示文本；交互列返回空串
    pub fn cell_text(&self, study: &Study) -> String {
        match self {
            ColumnKey::Status => study.workflow_status.label().to_string(),
            ColumnKey::PatientId => display_text(study.patient_id.as_deref()),
            ColumnKey::PatientName => display_text(study.patient_name.as_deref()),
            ColumnKey::AgeGender => display_text(study.age_gender.as_deref()),
            ColumnKey::Description => display_text(study.description.as_deref()),
            ColumnKey::Series => display_text(study.series_images.as_deref()),
            ColumnKey::Modality => display_text(study.modality.as_deref()),
            ColumnKey::Location => display_text(study.location.as_deref()),
            ColumnKey::StudyDate => format_datetime(study.study_date.as_ref()),
            ColumnKey::UploadDate => format_datetime(study.upload_date.as_ref()),
            ColumnKey::ReportedDate => format_datetime(study.reported_date.as_ref()),
            ColumnKey::ReportedBy => display_text(study.reported_by.as_deref()),
            ColumnKey::Accession => display_text(study.accession_number.as_deref()),
            ColumnKey::SeenBy => display_text(study.seen_by.as_deref()),
            _ => String::new(),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnKey {
    type Err = PacsError;

    fn from_str(s: &str) -> Result<Self> {
        ColumnKey::parse(s.trim())
            .ok_or_else(|| PacsError::Validation(format!("Unknown column: {}", s)))
    }
}

/// 列可见性配置
///
/// 必要列始终为 `true`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnConfig {
    visibility: BTreeMap<ColumnKey, bool>,
}

impl ColumnConfig {
    /// 默认配置
    pub fn defaults() -> Self {
        Self {
            visibility: ColumnKey::ALL
                .iter()
                .map(|key| (*key, key.default_visibility()))
                .collect(),
        }
    }

    /// 以默认值为基础合并持久化配置
    ///
    /// 未知键被忽略，缺失键保留默认值；顶层不是对象时返回错误。
    pub fn merge_persisted(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let entries = value.as_object().ok_or_else(|| {
            PacsError::Config("persisted column config is not an object".to_string())
        })?;

        let mut config = Self::defaults();
        for (raw_key, raw_value) in entries {
            let (Some(key), Some(visible)) = (ColumnKey::parse(raw_key), raw_value.as_bool())
            else {
                debug!("Ignoring persisted column entry {}={}", raw_key, raw_value);
                continue;
            };

            if key.is_essential() && !visible {
                debug!("Ignoring persisted hide of essential column {}", key);
                continue;
            }
            config.visibility.insert(key, visible);
        }

        Ok(config)
    }

    pub fn is_visible(&self, key: ColumnKey) -> bool {
        self.visibility.get(&key).copied().unwrap_or(true)
    }

    /// 按显示顺序列出可见列
    pub fn visible_columns(&self) -> Vec<ColumnKey> {
        self.visibility
            .iter()
            .filter(|(_, visible)| **visible)
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColumnKey, bool)> + '_ {
        self.visibility.iter().map(|(key, visible)| (*key, *visible))
    }

    /// 持久化格式：扁平的 键→布尔 映射
    pub fn to_persisted(&self) -> Result<String> {
        let flat: BTreeMap<&str, bool> = self
            .visibility
            .iter()
            .map(|(key, visible)| (key.as_str(), *visible))
            .collect();
        Ok(serde_json::to_string(&flat)?)
    }
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

/// 列配置持久化端口
pub trait ColumnPersistence: Send + Sync {
    /// 读取已保存的配置，不存在时返回 `None`
    fn read(&self) -> Result<Option<String>>;

    /// 写入配置
    fn write(&self, payload: &str) -> Result<()>;
}

/// 内存持久化（测试替身）
#[derive(Debug, Default)]
pub struct InMemoryColumnPersistence {
    slot: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl InMemoryColumnPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(payload.into())),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// 模拟存储不可用
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn payload(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ColumnPersistence for InMemoryColumnPersistence {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.payload())
    }

    fn write(&self, payload: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PacsError::Storage("column storage unavailable".to_string()));
        }
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload.to_string());
        Ok(())
    }
}

/// 文件持久化
#[derive(Debug, Clone)]
pub struct FileColumnPersistence {
    path: PathBuf,
}

impl FileColumnPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ColumnPersistence for FileColumnPersistence {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, payload: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, payload)?;
        Ok(())
    }
}

/// 列设置结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    Applied(ColumnConfig),
    /// 试图隐藏必要列，配置未改变
    Rejected { key: ColumnKey },
}

impl ColumnChange {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ColumnChange::Rejected { .. })
    }

    /// 面向用户的警告文本
    pub fn warning(&self) -> Option<String> {
        match self {
            ColumnChange::Rejected { key } => {
                Some(format!("Cannot hide essential column: {}", key.title()))
            }
            ColumnChange::Applied(_) => None,
        }
    }
}

/// 列可见性存储
pub struct ColumnVisibilityStore {
    config: ColumnConfig,
    persistence: Box<dyn ColumnPersistence>,
}

impl ColumnVisibilityStore {
    /// 创建存储，配置为默认值（尚未加载）
    pub fn new(persistence: Box<dyn ColumnPersistence>) -> Self {
        Self {
            config: ColumnConfig::defaults(),
            persistence,
        }
    }

    /// 创建并立即加载已保存的配置
    pub fn open(persistence: Box<dyn ColumnPersistence>) -> Self {
        let mut store = Self::new(persistence);
        store.load();
        store
    }

    /// 加载配置；读取或解析失败时回退到默认值
    pub fn load(&mut self) -> ColumnConfig {
        self.config = match self.persistence.read() {
            Ok(Some(raw)) => match ColumnConfig::merge_persisted(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Discarding corrupt column config, using defaults: {}", e);
                    ColumnConfig::defaults()
                }
            },
            Ok(None) => ColumnConfig::defaults(),
            Err(e) => {
                warn!("Failed to read column config, using defaults: {}", e);
                ColumnConfig::defaults()
            }
        };
        self.config.clone()
    }

    pub fn config(&self) -> &ColumnConfig {
        &self.config
    }

    /// 设置列可见性；隐藏必要列会被拒绝
    pub fn set(&mut self, key: ColumnKey, visible: bool) -> ColumnChange {
        if key.is_essential() && !visible {
            warn!("Cannot hide essential column: {}", key);
            return ColumnChange::Rejected { key };
        }

        self.config.visibility.insert(key, visible);
        self.persist();
        ColumnChange::Applied(self.config.clone())
    }

    pub fn toggle(&mut self, key: ColumnKey) -> ColumnChange {
        let visible = !self.config.is_visible(key);
        self.set(key, visible)
    }

    pub fn reset_to_default(&mut self) -> ColumnConfig {
        self.config = ColumnConfig::defaults();
        self.persist();
        info!("Column visibility reset to defaults");
        self.config.clone()
    }

    /// 持久化失败只记录日志，本会话内的配置仍然生效
    fn persist(&self) {
        let result = self
            .config
            .to_persisted()
            .and_then(|payload| self.persistence.write(&payload));

        if let Err(e) = result {
            warn!("Failed to persist column config: {}", e);
        }
    }
}

impl fmt::Debug for ColumnVisibilityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnVisibilityStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// 共享同一内存槽，便于检查写入内容
    struct SharedPersistence(Arc<InMemoryColumnPersistence>);

    impl ColumnPersistence for SharedPersistence {
        fn read(&self) -> Result<Option<String>> {
            self.0.read()
        }

        fn write(&self, payload: &str) -> Result<()> {
            self.0.write(payload)
        }
    }

    #[test]
    fn test_essential_hide_rejected() {
        let mut store = ColumnVisibilityStore::open(Box::new(InMemoryColumnPersistence::new()));

        for key in ColumnKey::ESSENTIAL {
            let before = store.config().clone();
            let change = store.set(key, false);
            assert!(change.is_rejected());
            assert!(change.warning().is_some());
            assert_eq!(store.config(), &before);
            assert!(store.config().is_visible(key));
        }

        assert!(store.toggle(ColumnKey::Status).is_rejected());
    }

    #[test]
    fn test_forward_compatible_merge() {
        let persisted = r#"{"modality": false, "uploadDate": true, "legacyColumn": true, "series": "yes", "patientName": false}"#;
        let store =
            ColumnVisibilityStore::open(Box::new(InMemoryColumnPersistence::with_payload(persisted)));
        let config = store.config();

        assert!(!config.is_visible(ColumnKey::Modality));
        assert!(config.is_visible(ColumnKey::UploadDate));
        // 缺失或非法的键保留默认值
        assert!(config.is_visible(ColumnKey::Series));
        assert!(!config.is_visible(ColumnKey::SeenBy));
        assert!(config.is_visible(ColumnKey::PatientName));
        assert_eq!(config.iter().count(), ColumnKey::ALL.len());
    }

    #[test]
    fn test_corrupt_config_falls_back() {
        for payload in ["not json", "[1, 2]", "true"] {
            let store =
                ColumnVisibilityStore::open(Box::new(InMemoryColumnPersistence::with_payload(payload)));
            assert_eq!(store.config(), &ColumnConfig::defaults());
        }
    }

    #[test]
    fn test_set_persists_immediately() {
        let backing = Arc::new(InMemoryColumnPersistence::new());
        let mut store = ColumnVisibilityStore::open(Box::new(SharedPersistence(backing.clone())));

        store.set(ColumnKey::Location, false);
        let reloaded = ColumnConfig::merge_persisted(&backing.payload().unwrap()).unwrap();
        assert!(!reloaded.is_visible(ColumnKey::Location));

        store.reset_to_default();
        let reloaded = ColumnConfig::merge_persisted(&backing.payload().unwrap()).unwrap();
        assert_eq!(reloaded, ColumnConfig::defaults());
    }

    #[test]
    fn test_persist_failure_is_swallowed() {
        let backing = Arc::new(InMemoryColumnPersistence::new());
        backing.set_fail_writes(true);
        let mut store = ColumnVisibilityStore::open(Box::new(SharedPersistence(backing.clone())));

        let change = store.set(ColumnKey::Modality, false);
        assert!(!change.is_rejected());
        assert!(!store.config().is_visible(ColumnKey::Modality));
        assert!(backing.payload().is_none());
    }

    #[test]
    fn test_file_persistence_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prefs").join("columns.json");
        let persistence = FileColumnPersistence::new(&path);
        assert!(persistence.read().unwrap().is_none());

        let mut store = ColumnVisibilityStore::open(Box::new(persistence.clone()));
        store.set(ColumnKey::Accession, true);

        let store = ColumnVisibilityStore::open(Box::new(persistence));
        assert!(store.config().is_visible(ColumnKey::Accession));
    }

    #[test]
    fn test_visible_columns_order() {
        let config = ColumnConfig::defaults();
        let visible = config.visible_columns();
        assert_eq!(visible.first(), Some(&ColumnKey::Checkbox));
        assert!(!visible.contains(&ColumnKey::UploadDate));
        let position = |key| visible.iter().position(|k| *k == key).unwrap();
        assert!(position(ColumnKey::PatientId) < position(ColumnKey::PatientName));
    }
}
