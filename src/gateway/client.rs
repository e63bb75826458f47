//! Hosted remote store client.
//!
//! Talks to a PostgREST-style API:
//! - `profiles`, `user_tasks` and `partner_invites` tables
//! - `rpc/match_partner` and `rpc/unlink_partner` procedures, which run
//!   their check-and-mutate in a single transaction server-side
//!
//! `ureq` is blocking, so each call runs on the blocking pool.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{
    GatewayError, GatewayResult, MatchOutcome, MatchRejection, NewInvite, RemoteGateway,
};
use crate::types::{Identity, Profile, ProfileUpdate, TaskKind, TaskRecord, TaskUpsert, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl HttpGateway {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// Bearer is the caller's access token, or the project key when the
    /// identity carries none.
    fn bearer<'a>(&'a self, auth: &'a Identity) -> Option<&'a str> {
        auth.access_token.as_deref().or(self.api_key.as_deref())
    }

    fn authorize(&self, request: ureq::Request, auth: &Identity) -> ureq::Request {
        let mut request = request.set("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.set("apikey", api_key);
        }
        if let Some(token) = self.bearer(auth) {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        request
    }

    async fn blocking<T, F>(&self, call: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> GatewayResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(call)
            .await
            .map_err(|e| GatewayError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Helper to create a gateway from a connection string like
/// `localhost:54321` or `https://project.example.co`.
pub fn create_gateway(connection_string: &str, api_key: Option<String>) -> HttpGateway {
    let base_url = if connection_string.starts_with("http") {
        connection_string.to_string()
    } else {
        format!("http://{}", connection_string)
    };
    HttpGateway::new(RemoteConfig { base_url, api_key })
}

fn send(request: ureq::Request, body: Option<Value>) -> GatewayResult<ureq::Response> {
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    result.map_err(map_ureq_error)
}

fn read_json<T: DeserializeOwned>(response: ureq::Response) -> GatewayResult<T> {
    response
        .into_json::<T>()
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

fn map_ureq_error(err: ureq::Error) -> GatewayError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            classify_status(status, body)
        }
        ureq::Error::Transport(transport) => GatewayError::Unavailable(transport.to_string()),
    }
}

/// A 404 from `rpc/` means the procedure itself could not be resolved,
/// not that the row it looks up is missing.
pub(crate) fn rpc_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::NotFound(message) => {
            GatewayError::Unavailable(format!("remote procedure not available: {message}"))
        }
        other => other,
    }
}

/// Body of `rpc/match_partner`. The procedure takes only the code and
/// applies its own expiry.
pub(crate) fn match_body(code: &str) -> Value {
    json!({ "invite_code": code })
}

pub(crate) fn classify_status(status: u16, body: String) -> GatewayError {
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    match status {
        401 | 403 => GatewayError::Unauthorized(message),
        404 => GatewayError::NotFound(message),
        409 => GatewayError::Conflict(message),
        s if s >= 500 => GatewayError::Unavailable(format!("HTTP {s}: {message}")),
        s => GatewayError::Rejected { status: s, message },
    }
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    partner_id: Option<UserId>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Result of `rpc/match_partner` before the partner id is known for sure.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParsedMatch {
    Linked(Option<UserId>),
    Rejected(MatchRejection),
}

pub(crate) fn parse_match_response(value: Value) -> GatewayResult<ParsedMatch> {
    let response: MatchResponse =
        serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if let Some(error) = response.error {
        return Ok(ParsedMatch::Rejected(MatchRejection::from_reason(
            response.reason.as_deref(),
            &error,
        )));
    }
    if response.success {
        return Ok(ParsedMatch::Linked(response.partner_id));
    }
    Err(GatewayError::Decode(
        "match_partner returned neither success nor error".into(),
    ))
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn get_profile(&self, auth: &Identity, id: &UserId) -> GatewayResult<Option<Profile>> {
        let request = self
            .authorize(self.agent.get(&self.url("profiles")), auth)
            .query("id", &format!("eq.{}", id))
            .query("select", "id,role,due_date,nickname,partner_id");
        self.blocking(move || {
            let rows: Vec<Profile> = read_json(send(request, None)?)?;
            Ok(rows.into_iter().next())
        })
        .await
    }

    async fn upsert_profile(&self, auth: &Identity, update: &ProfileUpdate) -> GatewayResult<()> {
        let request = self
            .authorize(self.agent.post(&self.url("profiles")), auth)
            .set("Prefer", "resolution=merge-duplicates,return=minimal");
        let body = serde_json::to_value(update).map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.blocking(move || send(request, Some(body)).map(|_| ()))
            .await
    }

    async fn get_tasks(
        &self,
        auth: &Identity,
        owner: &UserId,
        week: u8,
    ) -> GatewayResult<Vec<TaskRecord>> {
        let request = self
            .authorize(self.agent.get(&self.url("user_tasks")), auth)
            .query("user_id", &format!("eq.{}", owner))
            .query("week", &format!("eq.{}", week))
            .query("select", "*");
        self.blocking(move || read_json(send(request, None)?)).await
    }

    async fn upsert_task(&self, auth: &Identity, task: &TaskUpsert) -> GatewayResult<TaskRecord> {
        let (request, body) = match (&task.id, task.kind) {
            (Some(id), _) => {
                let mut patch = json!({ "is_completed": task.is_completed });
                if let Some(content) = &task.content {
                    patch["content"] = json!(content);
                }
                let request = self
                    .authorize(self.agent.patch(&self.url("user_tasks")), auth)
                    .query("id", &format!("eq.{}", id))
                    .query("user_id", &format!("eq.{}", task.owner_id));
                (request, patch)
            }
            (None, TaskKind::System) => {
                let request = self
                    .authorize(self.agent.post(&self.url("user_tasks")), auth)
                    .query("on_conflict", "user_id,week,task_id")
                    .set("Prefer", "resolution=merge-duplicates");
                (request, to_body(task)?)
            }
            (None, TaskKind::Custom) => (
                self.authorize(self.agent.post(&self.url("user_tasks")), auth),
                to_body(task)?,
            ),
        };
        let prefer = prefer_with_representation(&request);
        let request = request.set("Prefer", &prefer);
        let missing = task.id.clone().unwrap_or_default();
        self.blocking(move || {
            let rows: Vec<TaskRecord> = read_json(send(request, Some(body))?)?;
            rows.into_iter()
                .next()
                .ok_or_else(|| GatewayError::NotFound(format!("task {}", missing)))
        })
        .await
    }

    async fn delete_task(&self, auth: &Identity, owner: &UserId, id: &str) -> GatewayResult<()> {
        let request = self
            .authorize(self.agent.delete(&self.url("user_tasks")), auth)
            .query("id", &format!("eq.{}", id))
            .query("user_id", &format!("eq.{}", owner));
        self.blocking(move || send(request, None).map(|_| ())).await
    }

    async fn insert_invite(&self, auth: &Identity, invite: &NewInvite) -> GatewayResult<()> {
        let request = self
            .authorize(self.agent.post(&self.url("partner_invites")), auth)
            .set("Prefer", "return=minimal");
        let body = json!({ "code": invite.code, "created_by": invite.created_by });
        self.blocking(move || send(request, Some(body)).map(|_| ()))
            .await
    }

    async fn match_partner(
        &self,
        auth: &Identity,
        code: &str,
        max_age: Option<Duration>,
    ) -> GatewayResult<MatchOutcome> {
        let request = self.authorize(self.agent.post(&self.url("rpc/match_partner")), auth);
        if let Some(max_age) = max_age {
            tracing::debug!(max_age_secs = max_age.as_secs(), "invite expiry left to the store procedure");
        }
        let body = match_body(code);
        let parsed = self
            .blocking(move || {
                let response = send(request, Some(body)).map_err(rpc_error)?;
                parse_match_response(read_json(response)?)
            })
            .await?;

        match parsed {
            ParsedMatch::Rejected(rejection) => Ok(MatchOutcome::Rejected(rejection)),
            ParsedMatch::Linked(Some(partner_id)) => Ok(MatchOutcome::Linked { partner_id }),
            // older procedure versions only report success; read the link back
            ParsedMatch::Linked(None) => {
                let profile = self.get_profile(auth, &auth.user_id).await?;
                profile
                    .and_then(|p| p.partner_id)
                    .map(|partner_id| MatchOutcome::Linked { partner_id })
                    .ok_or_else(|| {
                        GatewayError::Decode("match_partner succeeded but no link is visible".into())
                    })
            }
        }
    }

    async fn unlink_partner(&self, auth: &Identity) -> GatewayResult<()> {
        let request = self.authorize(self.agent.post(&self.url("rpc/unlink_partner")), auth);
        self.blocking(move || send(request, Some(json!({}))).map(|_| ()).map_err(rpc_error))
            .await
    }
}

fn to_body(task: &TaskUpsert) -> GatewayResult<Value> {
    serde_json::to_value(task).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn prefer_with_representation(request: &ureq::Request) -> String {
    match request.header("Prefer") {
        Some(existing) => format!("{existing},return=representation"),
        None => "return=representation".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gateway_creation() {
        let gateway = HttpGateway::new(RemoteConfig {
            base_url: "http://localhost:54321/".to_string(),
            api_key: Some("anon-key".to_string()),
        });
        assert_eq!(gateway.base_url(), "http://localhost:54321");
        assert_eq!(gateway.url("profiles"), "http://localhost:54321/rest/v1/profiles");
    }

    #[test]
    fn test_connection_string_parsing() {
        let gateway = create_gateway("localhost:54321", None);
        assert_eq!(gateway.base_url(), "http://localhost:54321");

        let gateway = create_gateway("https://project.example.co", Some("key".to_string()));
        assert_eq!(gateway.base_url(), "https://project.example.co");
    }

    #[test]
    fn bearer_prefers_the_access_token() {
        let gateway = create_gateway("localhost:54321", Some("anon".into()));
        let with_token = Identity::new(UserId::new("u1"), Some("jwt".into()));
        let without = Identity::new(UserId::new("u1"), None);
        assert_eq!(gateway.bearer(&with_token), Some("jwt"));
        assert_eq!(gateway.bearer(&without), Some("anon"));
    }

    #[test]
    fn status_codes_classify() {
        assert!(matches!(
            classify_status(409, r#"{"code":"23505","message":"duplicate key"}"#.into()),
            GatewayError::Conflict(ref m) if m == "duplicate key"
        ));
        assert!(matches!(classify_status(401, String::new()), GatewayError::Unauthorized(_)));
        assert!(matches!(classify_status(503, "down".into()), GatewayError::Unavailable(_)));
        assert!(matches!(
            classify_status(400, "bad".into()),
            GatewayError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn missing_procedure_is_not_a_missing_invite() {
        let body = r#"{"code":"PGRST202","message":"Could not find the function public.match_partner"}"#;
        let err = rpc_error(classify_status(404, body.into()));
        assert!(matches!(err, GatewayError::Unavailable(ref m) if m.contains("match_partner")));
        assert!(matches!(
            rpc_error(classify_status(409, "taken".into())),
            GatewayError::Conflict(_)
        ));
    }

    #[test]
    fn match_body_carries_only_the_code() {
        assert_eq!(match_body("ABC234"), json!({ "invite_code": "ABC234" }));
    }

    #[test]
    fn profile_update_body_never_touches_the_partner_link() {
        let config = crate::types::UserConfig::new(
            crate::types::Role::Mom,
            chrono::NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            Some("Ana".into()),
        );
        let body = serde_json::to_value(ProfileUpdate::from_config(UserId::new("u1"), &config)).unwrap();
        assert_eq!(
            body,
            json!({ "id": "u1", "role": "mom", "due_date": "2026-05-01", "nickname": "Ana" })
        );
        assert!(body.get("partner_id").is_none());
    }

    #[test]
    fn task_upsert_bodies_use_row_column_names() {
        let system = TaskUpsert {
            id: None,
            owner_id: UserId::new("u1"),
            week: 8,
            kind: TaskKind::System,
            task_key: Some("w8-dad-1".into()),
            content: None,
            is_completed: true,
        };
        assert_eq!(
            to_body(&system).unwrap(),
            json!({
                "user_id": "u1",
                "week": 8,
                "task_type": "system",
                "task_id": "w8-dad-1",
                "is_completed": true,
            })
        );

        let custom = TaskUpsert {
            kind: TaskKind::Custom,
            task_key: None,
            content: Some("pack bag".into()),
            is_completed: false,
            ..system
        };
        let body = to_body(&custom).unwrap();
        assert_eq!(body["task_type"], "custom");
        assert_eq!(body["content"], "pack bag");
        assert!(body.get("id").is_none());
        assert!(body.get("task_id").is_none());
    }

    #[test]
    fn match_responses_parse() {
        assert_eq!(
            parse_match_response(json!({"success": true, "partner_id": "u2"})).unwrap(),
            ParsedMatch::Linked(Some(UserId::new("u2")))
        );
        assert_eq!(
            parse_match_response(json!({"success": true})).unwrap(),
            ParsedMatch::Linked(None)
        );
        assert_eq!(
            parse_match_response(json!({"error": "You are already paired", "reason": "already_paired"}))
                .unwrap(),
            ParsedMatch::Rejected(MatchRejection::AlreadyPaired)
        );
        assert!(parse_match_response(json!({})).is_err());
    }

    #[test]
    fn representation_is_appended_to_prefer() {
        let gateway = create_gateway("localhost:54321", None);
        let request = gateway
            .agent
            .post(&gateway.url("user_tasks"))
            .set("Prefer", "resolution=merge-duplicates");
        assert_eq!(
            prefer_with_representation(&request),
            "resolution=merge-duplicates,return=representation"
        );
    }
}
