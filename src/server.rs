use std::time::Instant;

use rmcp::RoleServer;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::companion::Companion;
use crate::error::{CompanionError, CompanionResult};
use crate::tools::health::{HealthParams, HealthReport, health_summary};
use crate::types::{Role, parse_date};
use crate::week;

pub const CONFIG_RESOURCE: &str = "companion://config";
pub const PARTNER_RESOURCE: &str = "companion://partner";

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct OnboardArgs {
    /// "dad" or "mom"
    #[serde(default)]
    pub role: Option<String>,
    /// YYYY-MM-DD
    #[serde(rename = "dueDate", default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct WeekArgs {
    #[serde(rename = "dueDate")]
    pub due_date: String,
    /// Evaluate as of this date instead of today
    #[serde(default)]
    pub on: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct CodeArgs {
    pub code: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct WeekRoleArgs {
    #[serde(default)]
    pub week: Option<u8>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ToggleSystemArgs {
    #[serde(default)]
    pub week: Option<u8>,
    #[serde(default)]
    pub role: Option<String>,
    pub index: usize,
    pub completed: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct AddCustomArgs {
    #[serde(default)]
    pub week: Option<u8>,
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ToggleCustomArgs {
    #[serde(default)]
    pub week: Option<u8>,
    pub id: String,
    pub completed: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct IdArgs {
    pub id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct WeekOnlyArgs {
    #[serde(default)]
    pub week: Option<u8>,
}

/// Body of every failed tool call.
fn error_body(err: &CompanionError) -> serde_json::Value {
    json!({
        "kind": err.kind(),
        "reason": err.reason().map(|r| r.code()),
        "message": err.to_string(),
    })
}

fn to_result<T: Serialize>(result: CompanionResult<T>) -> Result<CallToolResult, ErrorData> {
    match result {
        Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        Err(err) => {
            tracing::debug!(kind = err.kind(), "tool call failed: {err}");
            Ok(CallToolResult::error(vec![Content::json(error_body(&err))?]))
        }
    }
}

fn parse_role(raw: Option<&str>) -> Result<Option<Role>, ErrorData> {
    raw.map(|r| r.parse::<Role>())
        .transpose()
        .map_err(|e| ErrorData::invalid_params(e, None))
}

fn parse_optional_date(raw: Option<&str>) -> Result<Option<chrono::NaiveDate>, ErrorData> {
    raw.map(parse_date)
        .transpose()
        .map_err(|e| ErrorData::invalid_params(e, None))
}

#[derive(Clone)]
pub struct CompanionServer {
    companion: Companion,
    started: Instant,
    identity_mode: &'static str,
    remote: Option<String>,
    pub tool_router: ToolRouter<CompanionServer>,
}

#[tool_router]
impl CompanionServer {
    pub fn new(companion: Companion, identity_mode: &'static str, remote: Option<String>) -> Self {
        Self {
            companion,
            started: Instant::now(),
            identity_mode,
            remote,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Report server status, version, identity mode and remote endpoint")]
    async fn health(
        &self,
        Parameters(args): Parameters<HealthParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let report = HealthReport::new(self.started, self.identity_mode, self.remote.clone());
        if args.verbose {
            Ok(CallToolResult::success(vec![Content::json(report)?]))
        } else {
            Ok(CallToolResult::success(vec![Content::text(health_summary(&report))]))
        }
    }

    #[tool(description = "Resolve the effective configuration (remote, local or migrated)")]
    async fn resolve_config(&self) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.resolve().await)
    }

    #[tool(description = "Save onboarding answers: role, due date and optional nickname")]
    async fn complete_onboarding(
        &self,
        Parameters(args): Parameters<OnboardArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let role = parse_role(args.role.as_deref())?;
        let due_date = parse_optional_date(args.due_date.as_deref())?;
        to_result(
            self.companion
                .complete_onboarding(role, due_date, args.nickname)
                .await,
        )
    }

    #[tool(description = "Compute the pregnancy week (1..=40) for a due date")]
    async fn current_week(
        &self,
        Parameters(args): Parameters<WeekArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let due = parse_date(&args.due_date).map_err(|e| ErrorData::invalid_params(e, None))?;
        let today = parse_optional_date(args.on.as_deref())?.unwrap_or_else(week::today);
        let current = week::current_week(due, today);
        Ok(CallToolResult::success(vec![Content::json(json!({
            "currentWeek": current,
            "weeksRemaining": week::weeks_remaining(current),
        }))?]))
    }

    #[tool(description = "Create a single-use partner invite code")]
    async fn generate_invite(&self) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.generate_invite().await)
    }

    #[tool(description = "Redeem a partner invite code")]
    async fn accept_invite(
        &self,
        Parameters(args): Parameters<CodeArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.accept_invite(&args.code).await)
    }

    #[tool(description = "Remove the partner link on both sides")]
    async fn unlink_partner(&self) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.unlink_partner().await.map(|()| json!({"unlinked": true})))
    }

    #[tool(description = "Show the linked partner, if any")]
    async fn partner_status(&self) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.partner_status().await)
    }

    #[tool(description = "List system and custom tasks for a week")]
    async fn list_tasks(
        &self,
        Parameters(args): Parameters<WeekRoleArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let (week, role) = match self.context(args.week, args.role.as_deref()).await? {
            Ok(ctx) => ctx,
            Err(err) => return to_result::<()>(Err(err)),
        };
        to_result(
            self.companion
                .tasks
                .list_tasks(&self.companion.session(), week, role)
                .await,
        )
    }

    #[tool(description = "Mark a system task done or not done")]
    async fn toggle_system_task(
        &self,
        Parameters(args): Parameters<ToggleSystemArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let (week, role) = match self.context(args.week, args.role.as_deref()).await? {
            Ok(ctx) => ctx,
            Err(err) => return to_result::<()>(Err(err)),
        };
        to_result(
            self.companion
                .tasks
                .toggle_system_task(&self.companion.session(), week, role, args.index, args.completed)
                .await,
        )
    }

    #[tool(description = "Add a custom task to a week")]
    async fn add_custom_task(
        &self,
        Parameters(args): Parameters<AddCustomArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let (week, role) = match self.context(args.week, args.role.as_deref()).await? {
            Ok(ctx) => ctx,
            Err(err) => return to_result::<()>(Err(err)),
        };
        to_result(
            self.companion
                .tasks
                .add_custom_task(&self.companion.session(), week, role, &args.content)
                .await,
        )
    }

    #[tool(description = "Mark a custom task done or not done")]
    async fn toggle_custom_task(
        &self,
        Parameters(args): Parameters<ToggleCustomArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let week = match self.companion.week_context(args.week).await {
            Ok(week) => week,
            Err(err) => return to_result::<()>(Err(err)),
        };
        to_result(
            self.companion
                .tasks
                .toggle_custom_task(&self.companion.session(), week, &args.id, args.completed)
                .await,
        )
    }

    #[tool(description = "Delete a custom task")]
    async fn delete_custom_task(
        &self,
        Parameters(args): Parameters<IdArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        to_result(
            self.companion
                .tasks
                .delete_custom_task(&self.companion.session(), &args.id)
                .await
                .map(|()| json!({"deleted": args.id})),
        )
    }

    #[tool(description = "Read the linked partner's task records for a week")]
    async fn partner_tasks(
        &self,
        Parameters(args): Parameters<WeekOnlyArgs>,
    ) -> Result<CallToolResult, ErrorData> {
        let week = match self.companion.week_context(args.week).await {
            Ok(week) => week,
            Err(err) => return to_result::<()>(Err(err)),
        };
        to_result(
            self.companion
                .tasks
                .partner_tasks(&self.companion.session(), week)
                .await,
        )
    }

    #[tool(description = "Forget the current identity; later calls run as guest")]
    async fn sign_out(&self) -> Result<CallToolResult, ErrorData> {
        to_result(self.companion.sign_out().await.map(|()| json!({"signedOut": true})))
    }
}

impl CompanionServer {
    async fn context(
        &self,
        week: Option<u8>,
        role: Option<&str>,
    ) -> Result<CompanionResult<(u8, Role)>, ErrorData> {
        let role = parse_role(role)?;
        Ok(self.companion.task_context(week, role).await)
    }

    async fn resource_body(&self, uri: &str) -> Option<serde_json::Value> {
        let value = match uri {
            CONFIG_RESOURCE => self.companion.resolve().await.map(|r| json!(r)),
            PARTNER_RESOURCE => self.companion.partner_status().await.map(|p| json!(p)),
            _ => return None,
        };
        Some(value.unwrap_or_else(|err| error_body(&err)))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for CompanionServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Pregnancy companion: resolve the config, manage partner pairing and weekly tasks"
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult {
            resources: vec![
                RawResource::new(CONFIG_RESOURCE, "Resolved configuration").no_annotation(),
                RawResource::new(PARTNER_RESOURCE, "Partner status").no_annotation(),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let Some(body) = self.resource_body(uri.as_str()).await else {
            return Err(ErrorData::resource_not_found(
                "Unknown resource URI",
                Some(json!({ "uri": uri })),
            ));
        };
        let text = serde_json::to_string(&body)
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _ctx: rmcp::service::RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: Vec::new(),
        })
    }
}
