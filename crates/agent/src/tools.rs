use dirpilot_core::{Parameters, ToolCatalog, ToolInvocationRequest};

/// Deprecated tool names the classifier still produces, with the canonical
/// tool and action they stand for.
const LEGACY_TOOLS: &[(&str, &str, Option<&str>)] = &[
    ("GetADB2CUser", "GetB2CUsers", Some("all")),
    ("GetADB2CUsersByAppRole", "GetB2CUsers", Some("by-role")),
    ("GetADB2CApplicationRole", "ManageRoles", Some("get-roles")),
    ("AssignRoletoUser", "ManageRoles", Some("assign-role")),
];

/// Rewrites a resolved request into the catalog's canonical shape before it
/// is gated: legacy names, tool-name casing, action casing, `appRole` on
/// by-role lookups and boolean flags.
pub fn normalize_request(
    catalog: &ToolCatalog,
    request: ToolInvocationRequest,
) -> ToolInvocationRequest {
    let ToolInvocationRequest { tool_name, mut parameters, confidence, origin } = request;
    let trimmed = tool_name.trim();

    // Exact match: `AssignRoletoUser` differs from the live `AssignRoleToUser` only by case.
    let legacy = LEGACY_TOOLS.iter().find(|(legacy, _, _)| *legacy == trimmed);
    let (tool_name, forced_action) = match legacy {
        Some((_, canonical, action)) => (canonical.to_string(), *action),
        None => (canonical_name(catalog, trimmed), None),
    };

    if let Some(action) = forced_action {
        if tool_name == "GetB2CUsers" && action == "all" {
            parameters.clear();
        }
        parameters.insert("action".to_string(), action.to_string());
    }

    if let Some(action) = parameters.get_mut("action") {
        *action = action.trim().to_ascii_lowercase();
    }

    if tool_name == "GetB2CUsers" {
        default_users_action(&mut parameters);
        rename(&mut parameters, "appRole", "roleName");
    }

    if let Some(flag) = parameters.get_mut("ownedOnly") {
        *flag = parse_flag(flag).to_string();
    }

    ToolInvocationRequest { tool_name, parameters, confidence, origin }
}

fn canonical_name(catalog: &ToolCatalog, name: &str) -> String {
    catalog
        .all()
        .iter()
        .find(|tool| tool.name.eq_ignore_ascii_case(name))
        .map(|tool| tool.name.to_string())
        .unwrap_or_else(|| name.to_string())
}

fn default_users_action(parameters: &mut Parameters) {
    let missing = parameters.get("action").map(|action| action.is_empty()).unwrap_or(true);
    if missing {
        parameters.insert("action".to_string(), "all".to_string());
    }
}

fn rename(parameters: &mut Parameters, from: &str, to: &str) {
    if let Some(value) = parameters.remove(from) {
        parameters.entry(to.to_string()).or_insert(value);
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

#[cfg(test)]
mod tests {
    use dirpilot_core::{Parameters, ResolutionOrigin, ToolCatalog, ToolInvocationRequest};

    use super::normalize_request;

    const ASSIGN_PAIRS: &[(&str, &str)] =
        &[("username", "a@b.c"), ("appName", "X"), ("roleName", "R")];

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    fn normalize(tool: &str, pairs: &[(&str, &str)]) -> ToolInvocationRequest {
        let request = ToolInvocationRequest::from_classifier(tool, params(pairs), 0.9);
        normalize_request(&ToolCatalog::builtin(), request)
    }

    #[test]
    fn legacy_user_lookup_becomes_list_all() {
        let request = normalize("GetADB2CUser", &[("username", "john")]);

        assert_eq!(request.tool_name, "GetB2CUsers");
        assert_eq!(request.parameters, params(&[("action", "all")]));
        assert_eq!(request.origin, ResolutionOrigin::Classifier);
        assert!((request.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn legacy_by_role_moves_app_role_into_role_name() {
        let request =
            normalize("GetADB2CUsersByAppRole", &[("appRole", "Admin"), ("appName", "MyApp")]);

        assert_eq!(request.tool_name, "GetB2CUsers");
        assert_eq!(
            request.parameters,
            params(&[("action", "by-role"), ("appName", "MyApp"), ("roleName", "Admin")])
        );
    }

    #[test]
    fn legacy_role_tools_map_to_manage_roles_actions() {
        let request = normalize("GetADB2CApplicationRole", &[("appName", "MyApp")]);
        assert_eq!(request.tool_name, "ManageRoles");
        assert_eq!(request.parameter("action"), Some("get-roles"));

        let request = normalize("AssignRoletoUser", ASSIGN_PAIRS);
        assert_eq!(request.tool_name, "ManageRoles");
        assert_eq!(request.parameter("action"), Some("assign-role"));
        assert_eq!(request.parameter("username"), Some("a@b.c"));
    }

    #[test]
    fn current_assign_tool_keeps_its_own_route() {
        let catalog = ToolCatalog::builtin();
        let request = normalize("AssignRoleToUser", ASSIGN_PAIRS);

        assert_eq!(request.tool_name, "AssignRoleToUser");
        assert_eq!(request.parameter("action"), None);
        let tool = catalog.lookup(&request.tool_name).expect("tool exists");
        assert_eq!(tool.route.path, "/Roles/assign");
    }

    #[test]
    fn users_without_action_default_to_all() {
        let request = normalize("GetB2CUsers", &[]);
        assert_eq!(request.parameter("action"), Some("all"));
    }

    #[test]
    fn tool_name_and_action_casing_is_canonicalized() {
        let request = normalize("manageroles", &[("action", " Assign-Role ")]);

        assert_eq!(request.tool_name, "ManageRoles");
        assert_eq!(request.parameter("action"), Some("assign-role"));
    }

    #[test]
    fn owned_only_flag_is_normalized() {
        let request = normalize("GetB2CApplications", &[("ownedOnly", "True")]);
        assert_eq!(request.parameter("ownedOnly"), Some("true"));

        let request = normalize("GetB2CApplications", &[("ownedOnly", "nope")]);
        assert_eq!(request.parameter("ownedOnly"), Some("false"));
    }

    #[test]
    fn unknown_tools_pass_through_unchanged() {
        let request = normalize("DeleteEverything", &[("scope", "all")]);

        assert_eq!(request.tool_name, "DeleteEverything");
        assert_eq!(request.parameters, params(&[("scope", "all")]));
    }
}
