//! The fixed catalog of remote directory operations.
//!
//! Definitions are built once and never mutated. The remote surface is an
//! already-deployed HTTP contract, so route paths and parameter names here
//! must match it exactly.

use serde::Serialize;
use thiserror::Error;

use crate::domain::invocation::ToolInvocationRequest;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("tool `{0}` is not in the catalog")]
    NotFound(String),
}

/// Timeout class of a route: 30s for list-heavy reads, 10s otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallClass {
    Read,
    Simple,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Read,
    Mutation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolParameter {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// One value of a multi-action tool's `action` slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolAction {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub effect: Effect,
    pub description: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolRoute {
    pub path: &'static str,
    pub call_class: CallClass,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ToolParameter>,
    pub actions: Vec<ToolAction>,
    pub route: ToolRoute,
    pub effect: Effect,
}

/// Why a request cannot be sent as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParameterIssue {
    Missing(Vec<&'static str>),
    UnknownAction { action: String, valid: Vec<&'static str> },
}

impl ToolDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ToolAction> {
        self.actions.iter().find(|action| action.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|action| action.name).collect()
    }

    pub fn effect_for(&self, request: &ToolInvocationRequest) -> Effect {
        request
            .parameter("action")
            .and_then(|action| self.action(action))
            .map(|action| action.effect)
            .unwrap_or(self.effect)
    }

    pub fn is_mutation(&self, request: &ToolInvocationRequest) -> bool {
        self.effect_for(request) == Effect::Mutation
    }

    /// Checks required slots, including the per-action ones for multi-action
    /// tools. Missing slots are reported in declaration order.
    pub fn validate(&self, request: &ToolInvocationRequest) -> Result<(), ParameterIssue> {
        let mut missing: Vec<&'static str> = self
            .parameters
            .iter()
            .filter(|parameter| parameter.required && request.parameter(parameter.name).is_none())
            .map(|parameter| parameter.name)
            .collect();

        if !missing.is_empty() {
            return Err(ParameterIssue::Missing(missing));
        }

        if self.actions.is_empty() {
            return Ok(());
        }

        let requested = request.parameter("action").unwrap_or_default();
        let Some(action) = self.action(requested) else {
            return Err(ParameterIssue::UnknownAction {
                action: requested.to_string(),
                valid: self.action_names(),
            });
        };

        missing = action
            .required
            .iter()
            .copied()
            .filter(|slot| request.parameter(slot).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ParameterIssue::Missing(missing))
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, CatalogError> {
        self.tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn all(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ToolDefinition {
                name: "GetB2CUsers",
                description: "List directory users, either all of them or those holding a role \
                              in an application",
                parameters: vec![
                    required("action", "One of: all, by-role"),
                    optional("roleName", "Role name, used with by-role"),
                    optional("appName", "Application name, used with by-role"),
                ],
                actions: vec![
                    read("all", &[], "List every user"),
                    read(
                        "by-role",
                        &["roleName", "appName"],
                        "List users holding roleName in appName",
                    ),
                ],
                route: ToolRoute { path: "/User/manage", call_class: CallClass::Read },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "GetB2CApplications",
                description: "List registered applications, optionally only those owned by the \
                              signed-in user",
                parameters: vec![optional(
                    "ownedOnly",
                    "true to list only applications the caller owns",
                )],
                actions: Vec::new(),
                route: ToolRoute { path: "/Application", call_class: CallClass::Read },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "ManageRoles",
                description: "Query or change application roles and role assignments",
                parameters: vec![
                    required(
                        "action",
                        "One of: get-roles, assign-role, revoke-role, get-user-roles, create-role",
                    ),
                    optional("appName", "Application name"),
                    optional("username", "User name or email"),
                    optional("roleName", "Role name"),
                ],
                actions: vec![
                    read("get-roles", &["appName"], "List the roles defined by appName"),
                    mutation(
                        "assign-role",
                        &["username", "appName", "roleName"],
                        "Assign roleName in appName to username",
                    ),
                    mutation(
                        "revoke-role",
                        &["username", "appName", "roleName"],
                        "Revoke roleName in appName from username",
                    ),
                    read("get-user-roles", &["username"], "List every role username holds"),
                    mutation("create-role", &["appName", "roleName"], "Create roleName in appName"),
                ],
                route: ToolRoute { path: "/Roles/manage", call_class: CallClass::Read },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "GetUsersByAppRole",
                description: "List users holding a given role in a given application",
                parameters: vec![
                    required("appRole", "Role name"),
                    required("appName", "Application name"),
                ],
                actions: Vec::new(),
                route: ToolRoute { path: "/User/by-app-role", call_class: CallClass::Read },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "GetApplicationRoles",
                description: "List the roles defined by an application",
                parameters: vec![required("appName", "Application name")],
                actions: Vec::new(),
                route: ToolRoute { path: "/Roles", call_class: CallClass::Simple },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "GetUserRolesFromAllApplications",
                description: "List every role a user holds across all applications",
                parameters: vec![required("username", "User name or email")],
                actions: Vec::new(),
                route: ToolRoute { path: "/Roles/user-roles", call_class: CallClass::Simple },
                effect: Effect::Read,
            },
            ToolDefinition {
                name: "AssignRoleToUser",
                description: "Assign an application role to a user",
                parameters: vec![
                    required("username", "User name or email"),
                    required("appName", "Application name"),
                    required("roleName", "Role name"),
                ],
                actions: Vec::new(),
                route: ToolRoute { path: "/Roles/assign", call_class: CallClass::Simple },
                effect: Effect::Mutation,
            },
            ToolDefinition {
                name: "RevokeUserRole",
                description: "Revoke an application role from a user",
                parameters: vec![
                    required("username", "User name or email"),
                    required("appName", "Application name"),
                    required("roleName", "Role name"),
                ],
                actions: Vec::new(),
                route: ToolRoute { path: "/Roles/revoke", call_class: CallClass::Simple },
                effect: Effect::Mutation,
            },
            ToolDefinition {
                name: "CreateAppRole",
                description: "Create a new role in an application",
                parameters: vec![
                    required("appName", "Application name"),
                    required("appRole", "Role name to create"),
                ],
                actions: Vec::new(),
                route: ToolRoute { path: "/Roles/create", call_class: CallClass::Simple },
                effect: Effect::Mutation,
            },
            ToolDefinition {
                name: "GetWeatherAuthAPI",
                description: "Fetch the weather forecast from the authenticated sample endpoint",
                parameters: Vec::new(),
                actions: Vec::new(),
                route: ToolRoute { path: "/WeatherForecast", call_class: CallClass::Simple },
                effect: Effect::Read,
            },
        ])
    }
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn required(name: &'static str, description: &'static str) -> ToolParameter {
    ToolParameter { name, required: true, description }
}

fn optional(name: &'static str, description: &'static str) -> ToolParameter {
    ToolParameter { name, required: false, description }
}

fn read(
    name: &'static str,
    required: &'static [&'static str],
    description: &'static str,
) -> ToolAction {
    ToolAction { name, required, effect: Effect::Read, description }
}

fn mutation(
    name: &'static str,
    required: &'static [&'static str],
    description: &'static str,
) -> ToolAction {
    ToolAction { name, required, effect: Effect::Mutation, description }
}
