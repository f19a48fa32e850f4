//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML文件（可选）→ 环境变量 `PACS_WORKLIST__SECTION__KEY`。
//! 加载后的配置经过规则校验，并可以写回TOML文件。

use anyhow::{Context, Result};
use chrono::Duration;
use config::{Config, Environment, File};
use pacs_workflow::{CategoryMapping, DisplayMode, LayoutHeights, WorklistOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "PACS_WORKLIST";

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: Arc<RwLock<DashboardConfig>>,
    /// 配置文件路径，未指定时只使用默认值和环境变量
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// 工作列表面板完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub worklist: WorklistConfig,
    pub assignment: AssignmentConfig,
    pub columns: ColumnsConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

/// 列表与虚拟滚动配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorklistConfig {
    /// 行高（像素）
    pub row_height: f64,
    /// 可视区域上下额外渲染的行数
    pub overscan: usize,
    pub default_viewport_height: f64,
    pub min_viewport_height: f64,
    /// 页面固定区域高度
    pub layout: LayoutConfig,
    pub display_mode: DisplayModeConfig,
    /// 分页模式下每页行数
    pub page_size: usize,
    /// 状态 → 分类 的覆盖项，例如 `doctor_opened_report = "pending"`
    pub category_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub header: f64,
    pub footer: f64,
    pub action_bar: f64,
    pub tab_navigation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayModeConfig {
    Virtualized,
    Paginated,
}

/// 分配配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// 乐观覆盖层的存活时间（秒）
    pub overlay_ttl_secs: u64,
    /// 分配请求携带的优先级
    pub default_priority: String,
}

/// 列可见性持久化配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub storage_path: PathBuf,
}

/// 后端接口配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub token: Option<String>,
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 优先
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    Full,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: String,
    validator: fn(&DashboardConfig) -> Result<()>,
    error_message: String,
}

impl ConfigManager {
    /// 加载并验证配置
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        Self::with_config(config, config_path.map(Path::to_path_buf))
    }

    /// 使用已有配置创建管理器
    pub fn with_config(config: DashboardConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let validator = ConfigValidator::new();
        validator.validate(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
            validator,
        })
    }

    fn load_config(config_path: Option<&Path>) -> Result<DashboardConfig> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: DashboardConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 获取配置
    pub async fn get_config(&self) -> DashboardConfig {
        let config = self.config.read().await;
        config.clone()
    }

    /// 更新配置，有配置文件时同时写回
    pub async fn update_config(&self, new_config: DashboardConfig) -> Result<()> {
        self.validator.validate(&new_config)?;

        {
            let mut config = self.config.write().await;
            *config = new_config;
        }

        if self.config_path.is_some() {
            self.save_config().await?;
        }

        info!("Configuration updated successfully");
        Ok(())
    }

    /// 保存配置到文件
    pub async fn save_config(&self) -> Result<()> {
        let path = self
            .config_path
            .as_deref()
            .context("No configuration file to save to")?;
        self.save_to(path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let config = self.config.read().await;
        let config_str =
            toml::to_string_pretty(&*config).context("Failed to serialize configuration")?;

        tokio::fs::write(path, config_str)
            .await
            .context("Failed to write configuration file")?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// 重新加载配置
    pub async fn reload_config(&self) -> Result<()> {
        let new_config = Self::load_config(self.config_path.as_deref())?;
        self.validator.validate(&new_config)?;

        let mut config = self.config.write().await;
        *config = new_config;
        debug!("Configuration reloaded");
        Ok(())
    }

    /// 验证配置
    pub async fn validate_config(&self) -> Result<()> {
        let config = self.config.read().await;
        self.validator.validate(&config)
    }
}

impl DashboardConfig {
    /// 转换为工作列表会话参数
    pub fn worklist_options(&self) -> Result<WorklistOptions> {
        let overrides = self
            .worklist
            .category_overrides
            .iter()
            .map(|(status, category)| (status.as_str(), category.as_str()));
        let category_mapping = CategoryMapping::default()
            .with_overrides(overrides)
            .context("Invalid category override")?;

        let overlay_ttl = i64::try_from(self.assignment.overlay_ttl_secs)
            .map(Duration::seconds)
            .context("Overlay TTL out of range")?;

        Ok(WorklistOptions {
            row_height: self.worklist.row_height,
            overscan: self.worklist.overscan,
            viewport_height: self.worklist.default_viewport_height,
            display_mode: self.worklist.display_mode(),
            overlay_ttl,
            category_mapping,
        })
    }
}

impl WorklistConfig {
    pub fn display_mode(&self) -> DisplayMode {
        match self.display_mode {
            DisplayModeConfig::Virtualized => DisplayMode::Virtualized,
            DisplayModeConfig::Paginated => DisplayMode::Paginated {
                page_size: self.page_size,
            },
        }
    }

    pub fn layout_heights(&self) -> LayoutHeights {
        LayoutHeights {
            header: self.layout.header,
            footer: self.layout.footer,
            action_bar: self.layout.action_bar,
            tab_navigation: self.layout.tab_navigation,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "worklist.row_height".to_string(),
                validator: |config| {
                    if config.worklist.row_height > 0.0 {
                        Ok(())
                    } else {
                        Err(anyhow::anyhow!("Row height must be positive"))
                    }
                },
                error_message: "Invalid row height".to_string(),
            },
            ValidationRule {
                field_path: "worklist.page_size".to_string(),
                validator: |config| {
                    if config.worklist.page_size == 0 {
                        Err(anyhow::anyhow!("Page size cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid page size".to_string(),
            },
            ValidationRule {
                field_path: "worklist.min_viewport_height".to_string(),
                validator: |config| {
                    let worklist = &config.worklist;
                    if worklist.min_viewport_height > worklist.default_viewport_height {
                        Err(anyhow::anyhow!(
                            "Minimum viewport height {} exceeds default {}",
                            worklist.min_viewport_height,
                            worklist.default_viewport_height
                        ))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid viewport heights".to_string(),
            },
            ValidationRule {
                field_path: "assignment.overlay_ttl_secs".to_string(),
                validator: |config| {
                    if config.assignment.overlay_ttl_secs == 0 {
                        Err(anyhow::anyhow!("Overlay TTL cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
                error_message: "Invalid overlay TTL".to_string(),
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &DashboardConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(anyhow::anyhow!("{}: {}", rule.error_message, e));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for WorklistConfig {
    fn default() -> Self {
        Self {
            row_height: 44.0,
            overscan: 10,
            default_viewport_height: 600.0,
            min_viewport_height: 400.0,
            layout: LayoutConfig::default(),
            display_mode: DisplayModeConfig::Virtualized,
            page_size: 50,
            category_overrides: BTreeMap::new(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let heights = LayoutHeights::default();
        Self {
            header: heights.header,
            footer: heights.footer,
            action_bar: heights.action_bar,
            tab_navigation: heights.tab_navigation,
        }
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            overlay_ttl_secs: 15,
            default_priority: "NORMAL".to_string(),
        }
    }
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data/worklist-columns.json"),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            request_timeout_secs: 30,
            token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacs_core::WorkflowStatus;
    use pacs_workflow::Category;

    #[test]
    fn test_defaults_pass_validation() {
        let config = DashboardConfig::default();
        assert!(ConfigValidator::new().validate(&config).is_ok());

        let options = config.worklist_options().unwrap();
        assert_eq!(options.row_height, 44.0);
        assert_eq!(options.overscan, 10);
        assert_eq!(options.overlay_ttl, Duration::seconds(15));
        assert_eq!(options.display_mode, DisplayMode::Virtualized);
        assert_eq!(config.worklist.layout_heights().total(), 370.0);
    }

    #[test]
    fn test_validation_rules() {
        let validator = ConfigValidator::new();

        let mut config = DashboardConfig::default();
        config.worklist.row_height = 0.0;
        assert!(validator.validate(&config).is_err());

        let mut config = DashboardConfig::default();
        config.worklist.page_size = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = DashboardConfig::default();
        config.assignment.overlay_ttl_secs = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = DashboardConfig::default();
        config.worklist.min_viewport_height = 800.0;
        let err = validator.validate(&config).unwrap_err();
        assert!(err.to_string().starts_with("Invalid viewport heights"));
    }

    #[test]
    fn test_worklist_options_overrides() {
        let mut config = DashboardConfig::default();
        config.worklist.display_mode = DisplayModeConfig::Paginated;
        config.worklist.page_size = 25;
        config
            .worklist
            .category_overrides
            .insert("doctor_opened_report".to_string(), "pending".to_string());

        let options = config.worklist_options().unwrap();
        assert_eq!(options.display_mode, DisplayMode::Paginated { page_size: 25 });
        assert_eq!(
            options
                .category_mapping
                .category_of(&WorkflowStatus::DoctorOpenedReport),
            Some(Category::Pending)
        );

        config
            .worklist
            .category_overrides
            .insert("new".to_string(), "nowhere".to_string());
        assert!(config.worklist_options().is_err());
    }

    #[tokio::test]
    async fn test_load_file_and_save() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("worklist.toml");
        std::fs::write(
            &path,
            r#"
[worklist]
row_height = 36.0
display_mode = "paginated"

[worklist.category_overrides]
qc_hold = "archived"

[api]
base_url = "https://pacs.example.com/api"
token = "secret"
"#,
        )
        .unwrap();

        let manager = ConfigManager::load(Some(path.as_path())).unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.worklist.row_height, 36.0);
        assert_eq!(config.worklist.display_mode, DisplayModeConfig::Paginated);
        assert_eq!(config.worklist.overscan, 10);
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.assignment.default_priority, "NORMAL");

        let mut updated = config.clone();
        updated.assignment.overlay_ttl_secs = 30;
        manager.update_config(updated).await.unwrap();

        let reloaded = ConfigManager::load(Some(path.as_path())).unwrap().get_config().await;
        assert_eq!(reloaded.assignment.overlay_ttl_secs, 30);
        assert_eq!(reloaded.worklist.category_overrides["qc_hold"], "archived");

        let mut invalid = reloaded.clone();
        invalid.worklist.row_height = -1.0;
        assert!(manager.update_config(invalid).await.is_err());
        assert_eq!(manager.get_config().await.worklist.row_height, 36.0);

        std::fs::write(&path, "[worklist]\nrow_height = 52.0\n").unwrap();
        manager.reload_config().await.unwrap();
        let config = manager.get_config().await;
        assert_eq!(config.worklist.row_height, 52.0);
        assert_eq!(config.assignment.overlay_ttl_secs, 15);
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let manager = ConfigManager::load(Some(path.as_path())).unwrap();
        assert_eq!(manager.get_config().await.worklist, WorklistConfig::default());
        assert!(manager.validate_config().await.is_ok());
    }
}
