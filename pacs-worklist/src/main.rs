//! PACS工作列表命令行工具

mod tsv;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use pacs_admin::{init_tracing, ConfigManager, DashboardConfig};
use pacs_core::{DoctorId, StudyId, StudySnapshot};
use pacs_integration::{ApiClientConfig, HttpWorklistClient};
use pacs_workflow::{
    AssignmentWorkflow, Category, ColumnChange, ColumnKey, Exporter, FileColumnPersistence,
    MessageLevel, RenderFrame, SortField, WorklistSession,
};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tsv::TsvExporter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-worklist")]
#[command(about = "PACS 工作列表：分类查看、列配置、医生分配与导出")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 检查列表JSON文件
    #[arg(short, long, default_value = "./data/studies.json")]
    studies: PathBuf,

    /// 分类标签页
    #[arg(long, default_value = "all")]
    category: Category,

    /// 搜索关键字
    #[arg(long)]
    search: Option<String>,

    /// 排序字段，重复指定同一字段切换方向
    #[arg(long)]
    sort: Vec<SortField>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 显示当前窗口内的行
    Show {
        /// 滚动偏移（像素）
        #[arg(long, default_value_t = 0.0)]
        offset: f64,

        /// 页码（分页模式）
        #[arg(long)]
        page: Option<usize>,

        /// 浏览器窗口高度，扣除页面布局后作为视口
        #[arg(long)]
        window_height: Option<f64>,

        /// 以JSON输出整帧
        #[arg(long)]
        json: bool,
    },
    /// 各分类数量
    Counts,
    /// 列可见性配置
    Columns {
        #[command(subcommand)]
        action: ColumnsCommand,
    },
    /// 将检查的医生集合调整为给定列表
    Assign {
        study: String,

        /// 目标医生；为空时取消全部分配
        doctors: Vec<String>,

        /// 仅取消给定医生的分配
        #[arg(long)]
        remove: bool,
    },
    /// 导出过滤后的行
    Export {
        /// 输出文件，默认标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 只导出这些检查
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,

        #[arg(long)]
        no_header: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ColumnsCommand {
    Show,
    Set {
        key: ColumnKey,
        #[arg(action = ArgAction::Set)]
        visible: bool,
    },
    Toggle {
        key: ColumnKey,
    },
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::load(args.config.as_deref())?;
    let config = manager.get_config().await;
    init_tracing(&config.logging)?;

    info!("启动工作列表...");

    let mut session = WorklistSession::new(
        config.worklist_options()?,
        Box::new(FileColumnPersistence::new(&config.columns.storage_path)),
    )
    .context("Failed to create worklist session")?;

    load_studies(&mut session, &args)?;
    session.set_category(args.category);
    session.set_search(args.search.clone());
    for field in &args.sort {
        session.sort_by(*field);
    }

    match args.command {
        Command::Show {
            offset,
            page,
            window_height,
            json,
        } => {
            if let Some(height) = window_height {
                session.resize_window(
                    height,
                    &config.worklist.layout_heights(),
                    config.worklist.min_viewport_height,
                );
            }
            // 滚动和翻页按过滤后的行数截断，先生成一帧确定行数
            let now = Utc::now();
            session.frame(now);
            if let Some(page) = page {
                session.set_page(page);
            }
            session.scroll_to(offset);

            let frame = session.frame(now);
            if json {
                println!("{}", serde_json::to_string_pretty(&frame)?);
            } else {
                print_frame(&frame);
            }
        }
        Command::Counts => {
            let counts = session.counts(Utc::now());
            for category in Category::ALL {
                println!("{:<12} {}", category.label(), counts.get(category));
            }
        }
        Command::Columns { action } => run_columns(&mut session, action),
        Command::Assign {
            study,
            doctors,
            remove,
        } => run_assign(&mut session, &config, study, doctors, remove).await?,
        Command::Export {
            output,
            select,
            no_header,
        } => {
            for id in &select {
                session.toggle_selection(&StudyId::from(id.as_str()));
            }
            let request = session.export_request(!select.is_empty(), Utc::now());
            let exporter = TsvExporter {
                skip_header: no_header,
            };

            let written = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    exporter.export(&request, &mut BufWriter::new(file))?
                }
                None => exporter.export(&request, &mut io::stdout().lock())?,
            };
            info!("Exported {} rows", written);
        }
    }

    Ok(())
}

fn load_studies(session: &mut WorklistSession, args: &Args) -> Result<()> {
    let json = std::fs::read_to_string(&args.studies)
        .with_context(|| format!("Failed to read studies from {}", args.studies.display()))?;
    let snapshot = StudySnapshot::from_json_str(&json)?;

    let rejected = session.load_snapshot(snapshot);
    for error in &rejected {
        warn!("{}", error);
    }
    info!(
        "Loaded {} studies ({} rejected)",
        session.studies().len(),
        rejected.len()
    );
    Ok(())
}

fn run_columns(session: &mut WorklistSession, action: ColumnsCommand) {
    let change = match action {
        ColumnsCommand::Show => None,
        ColumnsCommand::Set { key, visible } => Some(session.set_column(key, visible)),
        ColumnsCommand::Toggle { key } => Some(session.toggle_column(key)),
        ColumnsCommand::Reset => {
            session.reset_columns();
            None
        }
    };

    if let Some(message) = change.as_ref().and_then(ColumnChange::warning) {
        eprintln!("warning: {}", message);
    }

    for (key, visible) in session.columns().iter() {
        let marker = if visible { "x" } else { " " };
        let essential = if key.is_essential() { " (required)" } else { "" };
        println!("[{}] {}{}", marker, key, essential);
    }
}

async fn run_assign(
    session: &mut WorklistSession,
    config: &DashboardConfig,
    study: String,
    doctors: Vec<String>,
    remove: bool,
) -> Result<()> {
    let study_id = StudyId::from(study.as_str());
    let study = session
        .study(&study_id)
        .cloned()
        .with_context(|| format!("Study not found: {}", study_id))?;
    let doctors: Vec<DoctorId> = doctors
        .iter()
        .map(|id| DoctorId::from(id.as_str()))
        .collect();

    let client = HttpWorklistClient::new(ApiClientConfig {
        base_url: config.api.base_url.clone(),
        timeout: config.api.request_timeout(),
        token: config.api.token.clone(),
        priority: config.assignment.default_priority.clone(),
    })?;

    match client.list_doctors().await {
        Ok(list) => session.set_doctors(list),
        Err(e) => warn!("Doctor list unavailable, messages will use ids: {}", e),
    }

    let workflow = Arc::new(AssignmentWorkflow::new(
        Arc::new(client),
        session.overlays(),
    ));
    let outcome = if remove {
        workflow.unassign_selected(&study, &doctors).await
    } else {
        workflow
            .spawn(study, doctors)
            .await
            .context("Assignment task failed")?
    };

    for message in outcome.messages(session.doctors()) {
        let level = match message.level {
            MessageLevel::Success => "ok",
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        println!("[{}] {}", level, message.text);
    }
    if let Some(report) = outcome.report() {
        println!("{}", report.summary());
    }

    if let Some(effective) = session.effective_study(&study_id, Utc::now()) {
        let assigned: Vec<&str> = effective
            .assigned_doctor_ids
            .iter()
            .map(DoctorId::as_str)
            .collect();
        println!(
            "{}: {} [{}]",
            effective.id,
            effective.workflow_status.label(),
            assigned.join(", ")
        );
    }
    Ok(())
}

fn print_frame(frame: &RenderFrame) {
    for line in frame_lines(frame) {
        println!("{}", line);
    }
}

/// 将一帧渲染为终端文本行
fn frame_lines(frame: &RenderFrame) -> Vec<String> {
    let columns: Vec<ColumnKey> = frame
        .columns
        .iter()
        .copied()
        .filter(ColumnKey::is_data)
        .collect();

    let mut lines = Vec::with_capacity(frame.rows.len() + 3);
    lines.push(format!(
        "{} ({} of {} studies)",
        frame.category.label(),
        frame.total_rows,
        frame.counts.all
    ));

    let header: Vec<&str> = columns.iter().map(ColumnKey::title).collect();
    lines.push(format!("    {:<10} {}", "Assign", header.join(" | ")));

    for row in &frame.rows {
        let cells: Vec<String> = row
            .cells(&columns)
            .into_iter()
            .map(|(_, text)| text)
            .collect();
        let flags = format!(
            "{}{}{}",
            if row.selected { '*' } else { ' ' },
            if row.emergency { '!' } else { ' ' },
            if row.optimistic { '~' } else { ' ' },
        );
        lines.push(format!(
            "{} {:<10} {}",
            flags,
            row.button.label.as_str(),
            cells.join(" | ")
        ));
    }

    lines.push(match frame.window {
        Some(window) if frame.page_count > 1 => format!(
            "rows {}-{} of {}, page {}/{}",
            window.start_index + 1,
            window.end_index + 1,
            frame.total_rows,
            frame.page + 1,
            frame.page_count
        ),
        Some(window) => format!(
            "rows {}-{} of {}",
            window.start_index + 1,
            window.end_index + 1,
            frame.total_rows
        ),
        None => "No studies".to_string(),
    });
    lines
}
