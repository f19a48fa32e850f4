//! 制表符分隔导出

use pacs_core::Result;
use pacs_workflow::{ExportRequest, Exporter};
use std::io::{self, Write};

/// TSV导出器
#[derive(Debug, Clone, Copy, Default)]
pub struct TsvExporter {
    /// 是否写出表头行
    pub skip_header: bool,
}

impl TsvExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Exporter for TsvExporter {
    fn export(&self, request: &ExportRequest, out: &mut dyn Write) -> Result<usize> {
        // 单元格内含分隔符或换行时加引号，内容原样保留
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(out);

        if !self.skip_header {
            writer.write_record(request.header()).map_err(io::Error::from)?;
        }

        let mut written = 0;
        for record in request.records() {
            writer.write_record(&record).map_err(io::Error::from)?;
            written += 1;
        }

        writer.flush()?;
        tracing::debug!("Exported {} rows as TSV", written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pacs_core::{Study, WorkflowStatus};
    use pacs_workflow::{Category, ColumnKey};

    fn request() -> ExportRequest {
        let mut first = Study::new("s1", WorkflowStatus::PendingAssignment);
        first.patient_name = Some("DOE^JANE".to_string());
        first.description = Some("CT HEAD\tW/O CONTRAST".to_string());

        let mut second = Study::new("s2", WorkflowStatus::ReportFinalized);
        second.patient_name = Some("ROE^RICHARD".to_string());

        ExportRequest {
            category: Category::All,
            columns: vec![ColumnKey::PatientName, ColumnKey::Description],
            rows: vec![first, second],
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn test_tsv_export() {
        let mut out = Vec::new();
        let written = TsvExporter::new().export(&request(), &mut out).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Patient Name\tDescription");
        assert_eq!(lines[1], "DOE^JANE\t\"CT HEAD\tW/O CONTRAST\"");
        assert_eq!(lines[2], "ROE^RICHARD\t-");
    }

    #[test]
    fn test_tsv_without_header() {
        let mut out = Vec::new();
        let exporter = TsvExporter { skip_header: true };
        exporter.export(&request(), &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_tsv_cells_read_back_intact() {
        let mut out = Vec::new();
        TsvExporter::new().export(&request(), &mut out).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(out.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "CT HEAD\tW/O CONTRAST");
    }
}
