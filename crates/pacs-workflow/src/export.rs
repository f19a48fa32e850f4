//! 导出请求
//!
//! 核心只提供过滤后的行和列顺序，具体的序列化由 [`Exporter`] 实现。

use crate::columns::ColumnKey;
use crate::worklist::Category;
use chrono::{DateTime, Utc};
use pacs_core::{Result, Study};
use std::io::Write;

/// 导出请求
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub category: Category,
    /// 可见的数据列，按显示顺序
    pub columns: Vec<ColumnKey>,
    /// 有效值（已合并乐观覆盖层）
    pub rows: Vec<Study>,
    pub requested_at: DateTime<Utc>,
}

impl ExportRequest {
    pub fn header(&self) -> Vec<&'static str> {
        self.columns.iter().map(ColumnKey::title).collect()
    }

    /// 每行的单元格文本
    pub fn records(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.rows.iter().map(move |study| {
            self.columns
                .iter()
                .map(|column| column.cell_text(study))
                .collect()
        })
    }

    pub fn suggested_file_name(&self, extension: &str) -> String {
        format!(
            "worklist_{}_{}.{}",
            self.category.as_str(),
            self.requested_at.format("%Y%m%d_%H%M%S"),
            extension
        )
    }
}

/// 导出实现
pub trait Exporter: Send + Sync {
    /// 写出请求中的所有行，返回写出的数据行数
    fn export(&self, request: &ExportRequest, out: &mut dyn Write) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pacs_core::WorkflowStatus;

    #[test]
    fn test_records_follow_column_order() {
        let mut study = Study::new("s1", WorkflowStatus::ReportFinalized);
        study.patient_id = Some("P001".to_string());
        study.modality = Some("CT".to_string());

        let request = ExportRequest {
            category: Category::Completed,
            columns: vec![ColumnKey::Modality, ColumnKey::PatientId, ColumnKey::Location],
            rows: vec![study],
            requested_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
        };

        assert_eq!(request.header(), vec!["Modality", "Patient ID", "Location"]);
        let records: Vec<Vec<String>> = request.records().collect();
        assert_eq!(records, vec![vec!["CT".to_string(), "P001".to_string(), "-".to_string()]]);
        assert_eq!(
            request.suggested_file_name("tsv"),
            "worklist_completed_20240301_083000.tsv"
        );
    }
}
