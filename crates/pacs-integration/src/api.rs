//! 工作列表后端HTTP客户端
//!
//! 实现分配/取消分配接口和医生列表接口

use async_trait::async_trait;
use pacs_core::{Doctor, DoctorId, PacsError, Result, StudyId};
use pacs_workflow::{AssignResponse, AssignmentService, UnassignResponse};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Bearer令牌
    pub token: Option<String>,
    /// 分配请求携带的优先级
    pub priority: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout: Duration::from_secs(30),
            token: None,
            priority: "NORMAL".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignRequest<'a> {
    doctor_id: &'a DoctorId,
    priority: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnassignRequest<'a> {
    doctor_id: &'a DoctorId,
}

#[derive(Debug, Deserialize)]
struct DoctorListResponse {
    #[serde(default)]
    doctors: Vec<Doctor>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// 工作列表后端客户端
#[derive(Debug, Clone)]
pub struct HttpWorklistClient {
    client: reqwest::Client,
    config: ApiClientConfig,
}

impl HttpWorklistClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("PACS-Worklist/1.0")
            .build()
            .map_err(|e| PacsError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub fn assign_url(&self, study_id: &StudyId) -> String {
        self.url(&format!("admin/studies/{}/assign", study_id))
    }

    pub fn unassign_url(&self, study_id: &StudyId) -> String {
        self.url(&format!("admin/studies/{}/unassign", study_id))
    }

    pub fn doctors_url(&self) -> String {
        self.url("admin/doctors/list")
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// 发送请求并读取状态码和响应体
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| PacsError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PacsError::Network(e.to_string()))?;
        Ok((status, body))
    }

    /// 获取医生列表
    pub async fn list_doctors(&self) -> Result<Vec<Doctor>> {
        let url = self.doctors_url();
        debug!("Fetching doctor list from {}", url);

        let (status, body) = self.send(self.client.get(&url)).await?;
        if !status.is_success() {
            error!("Doctor list request failed with status {}", status);
            return Err(PacsError::Network(failure_message(status, &body)));
        }

        let doctors = parse_doctor_list(&body)?;
        info!("Loaded {} doctors", doctors.len());
        Ok(doctors)
    }
}

#[async_trait]
impl AssignmentService for HttpWorklistClient {
    async fn assign(&self, study_id: &StudyId, doctor_id: &DoctorId) -> Result<AssignResponse> {
        let request = self.client.post(self.assign_url(study_id)).json(&AssignRequest {
            doctor_id,
            priority: &self.config.priority,
        });
        let (status, body) = self.send(request).await?;
        interpret_assign(status, &body)
    }

    async fn unassign(&self, study_id: &StudyId, doctor_id: &DoctorId) -> Result<UnassignResponse> {
        let request = self
            .client
            .post(self.unassign_url(study_id))
            .json(&UnassignRequest { doctor_id });
        let (status, body) = self.send(request).await?;
        interpret_unassign(status, &body)
    }
}

fn failure_message(status: StatusCode, body: &str) -> String {
    let body: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    match body.message {
        Some(message) => format!("HTTP {}: {}", status.as_u16(), message),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// 409 表示已处于目标状态，按成功处理
fn interpret_assign(status: StatusCode, body: &str) -> Result<AssignResponse> {
    if status == StatusCode::CONFLICT {
        warn!("Assignment already in place, treating 409 as success");
        return Ok(AssignResponse {
            success: true,
            assigned_doctors: None,
            message: Some("already assigned".to_string()),
        });
    }

    if !status.is_success() {
        return Ok(AssignResponse {
            success: false,
            assigned_doctors: None,
            message: Some(failure_message(status, body)),
        });
    }

    if body.trim().is_empty() {
        return Ok(AssignResponse {
            success: true,
            ..Default::default()
        });
    }
    Ok(serde_json::from_str(body)?)
}

fn interpret_unassign(status: StatusCode, body: &str) -> Result<UnassignResponse> {
    if status == StatusCode::CONFLICT {
        warn!("Doctor already unassigned, treating 409 as success");
        return Ok(UnassignResponse {
            success: true,
            message: Some("already unassigned".to_string()),
        });
    }

    if !status.is_success() {
        return Ok(UnassignResponse {
            success: false,
            message: Some(failure_message(status, body)),
        });
    }

    if body.trim().is_empty() {
        return Ok(UnassignResponse {
            success: true,
            message: None,
        });
    }
    Ok(serde_json::from_str(body)?)
}

/// 解析医生列表，支持 `{"doctors": [...]}` 或顶层数组
fn parse_doctor_list(body: &str) -> Result<Vec<Doctor>> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if value.is_array() {
        return Ok(serde_json::from_value(value)?);
    }
    let response: DoctorListResponse = serde_json::from_value(value)?;
    Ok(response.doctors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpWorklistClient {
        HttpWorklistClient::new(ApiClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client("https://pacs.example.com/api/");
        let study_id = StudyId::from("65f0c1");

        assert_eq!(
            client.assign_url(&study_id),
            "https://pacs.example.com/api/admin/studies/65f0c1/assign"
        );
        assert_eq!(
            client.unassign_url(&study_id),
            "https://pacs.example.com/api/admin/studies/65f0c1/unassign"
        );
        assert_eq!(client.doctors_url(), "https://pacs.example.com/api/admin/doctors/list");
    }

    #[test]
    fn test_assign_request_body() {
        let doctor_id = DoctorId::from("d1");
        let body = serde_json::to_value(AssignRequest {
            doctor_id: &doctor_id,
            priority: "NORMAL",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"doctorId": "d1", "priority": "NORMAL"}));
    }

    #[test]
    fn test_interpret_assign() {
        let ok = interpret_assign(
            StatusCode::OK,
            r#"{"success": true, "message": "processed", "data": {"doctorName": "X"}}"#,
        )
        .unwrap();
        assert!(ok.success);

        let conflict = interpret_assign(StatusCode::CONFLICT, "").unwrap();
        assert!(conflict.success);

        let failed = interpret_assign(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"success": false, "message": "Study not found"}"#,
        )
        .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.message.as_deref(), Some("HTTP 500: Study not found"));

        assert!(interpret_assign(StatusCode::OK, "<html>").is_err());
    }

    #[test]
    fn test_interpret_unassign() {
        assert!(interpret_unassign(StatusCode::OK, r#"{"success": true}"#).unwrap().success);
        assert!(interpret_unassign(StatusCode::CONFLICT, "").unwrap().success);

        let missing = interpret_unassign(StatusCode::NOT_FOUND, "not json").unwrap();
        assert!(!missing.success);
        assert_eq!(missing.message.as_deref(), Some("HTTP 404"));
    }

    #[test]
    fn test_parse_doctor_list() {
        let doctors = parse_doctor_list(
            r#"{"success": true, "count": 2, "doctors": [
                {"_id": "d1", "fullName": "Alice Chen", "isActive": true, "isLoggedIn": true},
                {"_id": "d2", "fullName": "Bob Li", "isActive": false}
            ]}"#,
        )
        .unwrap();

        assert_eq!(doctors.len(), 2);
        assert_eq!(doctors[0].display_name(), "Dr. Alice Chen");
        assert!(doctors[0].online);
        assert!(!doctors[1].active);

        let bare = parse_doctor_list(r#"[{"id": "d3", "name": "Carol"}]"#).unwrap();
        assert_eq!(bare[0].id, DoctorId::from("d3"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = HttpWorklistClient::new(ApiClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let result = client.assign(&StudyId::from("s1"), &DoctorId::from("d1")).await;
        assert!(matches!(result, Err(PacsError::Network(_))));
    }
}
