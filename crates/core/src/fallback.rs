//! Deterministic stand-ins for remote results.
//!
//! When a live call cannot complete, the runtime asks this module for a
//! payload with the same schema as the live response. Read tools get labeled
//! simulated records; mutations get an explicit `success: false`
//! acknowledgment and are never reported as done.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::ToolDefinition;
use crate::domain::invocation::{InvocationResult, ToolInvocationRequest};

const SIMULATED: &str = "(Simulated)";
const WEATHER_SUMMARIES: [&str; 10] = [
    "Freezing",
    "Bracing",
    "Chilly",
    "Cool",
    "Mild",
    "Warm",
    "Balmy",
    "Hot",
    "Sweltering",
    "Scorching",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(rename = "dispalyName")]
    pub display_name: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub app_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRole {
    pub id: String,
    pub name: String,
    pub app_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleInfo {
    pub user_id: String,
    pub user_display_name: String,
    pub user_email: String,
    pub application_id: String,
    pub application_name: String,
    pub role_id: String,
    pub role_name: String,
    pub assigned_date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    pub date: NaiveDate,
    pub temperature_c: i32,
    pub temperature_f: i32,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationAcknowledgment {
    pub success: bool,
    pub message: String,
    pub action: String,
    pub username: Option<String>,
    pub app_name: Option<String>,
    pub role_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRejection {
    pub success: bool,
    pub message: String,
    pub valid_actions: Vec<String>,
}

/// Why the live result was replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    Unauthenticated { reason: String },
    Unauthorized,
    RemoteError { status: u16 },
    TransportError { cause: String },
    InvalidAction { action: String },
}

impl FallbackReason {
    /// Every non-success result maps to a reason; success maps to none.
    pub fn from_result(result: &InvocationResult) -> Option<Self> {
        match result {
            InvocationResult::Success { .. } => None,
            InvocationResult::RemoteError { status, .. } => {
                Some(Self::RemoteError { status: *status })
            }
            InvocationResult::TransportError { cause } => {
                Some(Self::TransportError { cause: cause.clone() })
            }
            InvocationResult::Unauthenticated { reason } => {
                Some(Self::Unauthenticated { reason: reason.clone() })
            }
            InvocationResult::Unauthorized => Some(Self::Unauthorized),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Unauthenticated { reason } => format!("not signed in ({reason})"),
            Self::Unauthorized => "the remote service rejected the credential".to_string(),
            Self::RemoteError { status } => format!("the remote service returned status {status}"),
            Self::TransportError { cause } => {
                format!("the remote service was unreachable ({cause})")
            }
            Self::InvalidAction { action } => format!("`{action}` is not a valid action"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FallbackPayload {
    pub tool_name: String,
    pub reason: FallbackReason,
    pub body: Value,
}

impl FallbackPayload {
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| self.body.to_string())
    }
}

pub fn simulate(
    tool: &ToolDefinition,
    request: &ToolInvocationRequest,
    reason: FallbackReason,
) -> FallbackPayload {
    simulate_on(tool, request, reason, Utc::now().date_naive())
}

/// Same as [`simulate`], with the first forecast day anchored on `today`.
pub fn simulate_on(
    tool: &ToolDefinition,
    request: &ToolInvocationRequest,
    reason: FallbackReason,
    today: NaiveDate,
) -> FallbackPayload {
    let slot = |name: &str| request.parameter(name).unwrap_or_default().to_string();
    let action = request.parameter("action").map(str::to_ascii_lowercase).unwrap_or_default();

    let body = match (tool.name, action.as_str()) {
        (_, action) if matches!(reason, FallbackReason::InvalidAction { .. }) => {
            to_value(&invalid_action(action, tool.action_names()))
        }
        ("GetB2CUsers", "all") => to_value(&all_users()),
        ("GetB2CUsers", "by-role") => to_value(&users_in_role(&slot("roleName"), &slot("appName"))),
        ("GetB2CUsers", other) | ("ManageRoles", other)
            if tool.action(other).is_none() =>
        {
            to_value(&invalid_action(other, tool.action_names()))
        }
        ("GetUsersByAppRole", _) => to_value(&users_in_role(&slot("appRole"), &slot("appName"))),
        ("GetB2CApplications", _) => to_value(&applications(owned_only(request))),
        ("ManageRoles", "get-roles") | ("GetApplicationRoles", _) => {
            to_value(&app_roles(&slot("appName")))
        }
        ("ManageRoles", "get-user-roles") | ("GetUserRolesFromAllApplications", _) => {
            to_value(&user_roles(&slot("username")))
        }
        ("ManageRoles", "assign-role") | ("AssignRoleToUser", _) => {
            to_value(&acknowledge(request, "assign-role"))
        }
        ("ManageRoles", "revoke-role") | ("RevokeUserRole", _) => {
            to_value(&acknowledge(request, "revoke-role"))
        }
        ("ManageRoles", "create-role") | ("CreateAppRole", _) => {
            to_value(&acknowledge(request, "create-role"))
        }
        ("GetWeatherAuthAPI", _) => to_value(&forecast(today)),
        (other, _) => {
            Value::String(format!("Fallback: no simulated data is available for `{other}`"))
        }
    };

    FallbackPayload { tool_name: tool.name.to_string(), reason, body }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn owned_only(request: &ToolInvocationRequest) -> bool {
    request.parameter("ownedOnly").is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

fn stable_id(parts: &[&str]) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, parts.join("\u{1f}").as_bytes()).to_string()
}

fn fixed_assignment_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).single().unwrap_or_default()
}

fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    local
        .split(['.', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn all_users() -> Vec<DirectoryUser> {
    [
        ("John Doe", "john.doe@contoso.com"),
        ("Jane Smith", "jane.smith@contoso.com"),
        ("Mike Johnson", "mike.johnson@contoso.com"),
    ]
    .into_iter()
    .map(|(name, email)| DirectoryUser {
        id: stable_id(&["user", email]),
        display_name: format!("{name} {SIMULATED}"),
        email: email.to_string(),
        kind: "User".to_string(),
    })
    .collect()
}

fn users_in_role(role_name: &str, app_name: &str) -> Vec<DirectoryUser> {
    (1..=2)
        .map(|index| {
            let email = format!("appuser{index}@contoso.com");
            DirectoryUser {
                id: stable_id(&["role-user", app_name, role_name, &email]),
                display_name: format!("App User {index} ({role_name} in {app_name}) {SIMULATED}"),
                email,
                kind: "User".to_string(),
            }
        })
        .collect()
}

fn applications(owned_only: bool) -> Vec<Application> {
    let names: &[&str] = if owned_only { &["My App 1"] } else { &["Sample App 1", "Sample App 2"] };
    names
        .iter()
        .map(|name| Application {
            id: stable_id(&["application", name]),
            name: format!("{name} {SIMULATED}"),
            app_id: stable_id(&["app-id", name]),
        })
        .collect()
}

fn app_roles(app_name: &str) -> Vec<AppRole> {
    let app_id = stable_id(&["app-id", app_name]);
    ["Admin", "User"]
        .into_iter()
        .map(|role| AppRole {
            id: stable_id(&["role", app_name, role]),
            name: format!("{role} {SIMULATED}"),
            app_id: app_id.clone(),
        })
        .collect()
}

fn user_roles(username: &str) -> Vec<UserRoleInfo> {
    let display = display_name_from_email(username);
    [("Sample App 1", "Admin"), ("Sample App 2", "User")]
        .into_iter()
        .map(|(application, role)| UserRoleInfo {
            user_id: stable_id(&["user", username]),
            user_display_name: format!("{display} {SIMULATED}"),
            user_email: username.to_string(),
            application_id: stable_id(&["app-id", application]),
            application_name: format!("{application} {SIMULATED}"),
            role_id: stable_id(&["role", application, role]),
            role_name: role.to_string(),
            assigned_date: fixed_assignment_date(),
        })
        .collect()
}

fn forecast(today: NaiveDate) -> Vec<WeatherForecast> {
    (1..=5i32)
        .map(|day| {
            let temperature_c = -5 + day * 7;
            let summary = WEATHER_SUMMARIES[(day as usize * 2) % WEATHER_SUMMARIES.len()];
            WeatherForecast {
                date: today + Duration::days(i64::from(day)),
                temperature_c,
                temperature_f: 32 + temperature_c * 9 / 5,
                summary: format!("{summary} {SIMULATED}"),
            }
        })
        .collect()
}

fn acknowledge(request: &ToolInvocationRequest, action: &str) -> MutationAcknowledgment {
    let username = request.parameter("username").map(str::to_string);
    let app_name = request.parameter("appName").map(str::to_string);
    let role_name =
        request.parameter("roleName").or_else(|| request.parameter("appRole")).map(str::to_string);

    let user = username.as_deref().unwrap_or("<unspecified>");
    let app = app_name.as_deref().unwrap_or("<unspecified>");
    let role = role_name.as_deref().unwrap_or("<unspecified>");
    let message = match action {
        "assign-role" => format!(
            "Fallback: Unable to assign role '{role}' to user '{user}' for application '{app}'. \
             Please check if the user, role, and application exist."
        ),
        "revoke-role" => format!(
            "Fallback: Unable to revoke role '{role}' from user '{user}' for application '{app}'. \
             Please check if the user, role, and application exist."
        ),
        _ => format!(
            "Fallback: Unable to create role '{role}' for application '{app}'. \
             Please check if the application exists and you have the necessary permissions."
        ),
    };

    MutationAcknowledgment {
        success: false,
        message,
        action: action.to_string(),
        username,
        app_name,
        role_name,
    }
}

fn invalid_action(action: &str, valid: Vec<&'static str>) -> ActionRejection {
    ActionRejection {
        success: false,
        message: format!(
            "Fallback: Invalid action '{action}'. Valid actions are: {}",
            valid.join(", ")
        ),
        valid_actions: valid.into_iter().map(str::to_string).collect(),
    }
}
