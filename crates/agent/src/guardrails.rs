use dirpilot_core::{
    FallbackReason, ParameterIssue, ResolutionOrigin, ToolDefinition, ToolInvocationRequest,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// What the runtime may do with a resolved request.
#[derive(Clone, Debug, PartialEq)]
pub enum GuardrailDecision {
    Allow,
    /// Treated as no tool call at all.
    Skip { reason_code: &'static str, confidence: f64 },
    /// Ask the user for the missing slots; nothing is sent.
    Clarify { reason_code: &'static str, user_message: String, missing: Vec<&'static str> },
    /// Nothing is sent; the turn continues on simulated data.
    Degrade { reason_code: &'static str, fallback: FallbackReason },
}

#[derive(Clone, Debug, PartialEq)]
pub struct GuardrailPolicy {
    pub confidence_threshold: f64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }
}

impl GuardrailPolicy {
    pub fn new(confidence_threshold: f64) -> Self {
        Self { confidence_threshold }
    }

    pub fn evaluate(
        &self,
        request: &ToolInvocationRequest,
        tool: &ToolDefinition,
    ) -> GuardrailDecision {
        let confidence = request.confidence;
        let classified = request.origin == ResolutionOrigin::Classifier;
        if classified && confidence <= self.confidence_threshold {
            let reason_code = "confidence_below_threshold";
            return GuardrailDecision::Skip { reason_code, confidence };
        }

        match tool.validate(request) {
            Ok(()) => GuardrailDecision::Allow,
            Err(ParameterIssue::Missing(missing)) => GuardrailDecision::Clarify {
                reason_code: "missing_required_parameters",
                user_message: clarification(tool, request, &missing),
                missing,
            },
            Err(ParameterIssue::UnknownAction { action, .. }) => GuardrailDecision::Degrade {
                reason_code: "unknown_action",
                fallback: FallbackReason::InvalidAction { action },
            },
        }
    }
}

fn clarification(
    tool: &ToolDefinition,
    request: &ToolInvocationRequest,
    missing: &[&'static str],
) -> String {
    if missing.contains(&"action") {
        let actions = tool.action_names().join(", ");
        return format!("Please specify the action. Available actions: {actions}");
    }

    let action = request.parameter("action").map(str::to_ascii_lowercase).unwrap_or_default();
    let example = match (tool.name, action.as_str()) {
        ("ManageRoles", "assign-role") | ("AssignRoleToUser", _) => {
            "Please specify username, app name, and role name. \
             Example: 'Assign role Admin to user john@example.com in app MyApp'"
        }
        ("ManageRoles", "revoke-role") | ("RevokeUserRole", _) => {
            "Please specify username, app name, and role name. \
             Example: 'Revoke role Admin from user john@example.com in app MyApp'"
        }
        ("ManageRoles", "get-roles") | ("GetApplicationRoles", _) => {
            "Please specify the application name. Example: 'Show roles for app MyApp'"
        }
        ("ManageRoles", "get-user-roles") | ("GetUserRolesFromAllApplications", _) => {
            "Please specify the user. Example: 'Show roles for user john@example.com'"
        }
        ("ManageRoles", "create-role") | ("CreateAppRole", _) => {
            "Please specify the application and the new role name. \
             Example: 'Create role Auditor in app MyApp'"
        }
        ("GetB2CUsers", "by-role") | ("GetUsersByAppRole", _) => {
            "Please specify both the role name and the application name. \
             Example: 'Show users with role Admin in app MyApp'"
        }
        _ => return format!("Please specify {}.", missing.join(", ")),
    };

    format!("{example} (missing: {})", missing.join(", "))
}
