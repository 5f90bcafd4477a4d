//! Deterministic keyword routing, used when the classifier is unavailable or
//! returns something unusable.
//!
//! Groups are tried in declaration order and the first one whose keyword
//! appears in the lower-cased utterance wins. Slot values are copied from the
//! original tokens so names keep their casing.

use dirpilot_core::{Parameters, ToolInvocationRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleGroup {
    UserListing,
    UsersByRole,
    RoleAssignment,
    RoleRevocation,
    ApplicationRoles,
    OwnedApplications,
    Applications,
    Weather,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 8] = [
        Self::UserListing,
        Self::UsersByRole,
        Self::RoleAssignment,
        Self::RoleRevocation,
        Self::ApplicationRoles,
        Self::OwnedApplications,
        Self::Applications,
        Self::Weather,
    ];

    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::UserListing => &[
                "all users",
                "list users",
                "get users",
                "show users",
                "user details",
                "user profile",
                "azure ad users",
                "b2c users",
            ],
            Self::UsersByRole => &[
                "users by role",
                "users in role",
                "role users",
                "users assigned to",
                "users with role",
            ],
            Self::RoleAssignment => &[
                "assign role",
                "assign user",
                "give role",
                "add role",
                "role assignment",
            ],
            Self::RoleRevocation => &[
                "revoke role",
                "remove role",
                "unassign role",
                "revoke user",
                "remove user",
                "take away role",
                "role revocation",
                "role removal",
            ],
            Self::ApplicationRoles => &[
                "application roles",
                "app roles",
                "roles for",
                "get roles",
                "list roles",
                "show roles",
                "roles associate",
                "roles associated",
                "roles are associated",
            ],
            Self::OwnedApplications => &[
                "my applications",
                "applications i own",
                "owned applications",
                "apps i own",
                "my apps",
            ],
            Self::Applications => &["applications", "app list"],
            Self::Weather => &["weather", "forecast", "temperature"],
        }
    }

    pub fn matches(&self, lowered: &str) -> bool {
        let keyword_hit = self.keywords().iter().any(|keyword| lowered.contains(keyword));
        match self {
            Self::ApplicationRoles => {
                let paired = lowered.contains("roles") && lowered.contains("app");
                (keyword_hit || paired) && !lowered.contains("users")
            }
            _ => keyword_hit,
        }
    }

    fn build(&self, tokens: &Tokens) -> ToolInvocationRequest {
        let (tool, mut parameters) = match self {
            Self::UserListing => ("GetB2CUsers", slots(&[("action", "all")])),
            Self::UsersByRole => {
                let mut parameters = tokens.role_and_app();
                parameters.insert("action".to_string(), "by-role".to_string());
                ("GetB2CUsers", parameters)
            }
            Self::RoleAssignment | Self::RoleRevocation => ("ManageRoles", tokens.assignment()),
            Self::ApplicationRoles => ("ManageRoles", tokens.app_name()),
            Self::OwnedApplications => ("GetB2CApplications", slots(&[("ownedOnly", "true")])),
            Self::Applications => ("GetB2CApplications", slots(&[("ownedOnly", "false")])),
            Self::Weather => ("GetWeatherAuthAPI", Parameters::new()),
        };

        let action = match self {
            Self::RoleAssignment => Some("assign-role"),
            Self::RoleRevocation => Some("revoke-role"),
            Self::ApplicationRoles => Some("get-roles"),
            _ => None,
        };
        if let Some(action) = action {
            parameters.insert("action".to_string(), action.to_string());
        }

        ToolInvocationRequest::from_rules(tool, parameters)
    }
}

/// First matching group's request, or `None` when no keyword is present.
pub fn match_rules(utterance: &str) -> Option<ToolInvocationRequest> {
    let lowered = normalize_text(utterance);
    if lowered.trim().is_empty() {
        return None;
    }

    let group = RuleGroup::ALL.into_iter().find(|group| group.matches(&lowered))?;
    Some(group.build(&Tokens::new(utterance)))
}

const STOP_WORDS: &[&str] = &[
    "get", "list", "of", "roles", "assigned", "to", "for", "in", "with", "the", "a", "an", "and",
    "or", "but", "show", "display", "find", "all", "application", "applications", "app", "apps",
    "role", "user", "users", "from", "by", "on", "at", "is", "are", "was", "were", "associate",
    "associated", "management", "my", "please",
];

const APP_PREPOSITIONS: &[&str] =
    &["for", "in", "of", "with", "to", "assigned", "associate", "associated"];

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

fn is_app_anchor(word: &str) -> bool {
    matches!(word, "app" | "application")
}

fn clean_token(token: &str) -> &str {
    token.trim_end_matches([',', '.', '!', '?', ';', ':']).trim_matches(['\'', '"'])
}

fn slots(pairs: &[(&str, &str)]) -> Parameters {
    pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
}

/// Whitespace tokens of one utterance, with a lower-cased twin for matching.
struct Tokens {
    original: Vec<String>,
    lowered: Vec<String>,
}

impl Tokens {
    fn new(utterance: &str) -> Self {
        let original: Vec<String> = utterance
            .split_whitespace()
            .map(clean_token)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
        let lowered = original.iter().map(|token| normalize_text(token)).collect();
        Self { original, lowered }
    }

    fn len(&self) -> usize {
        self.original.len()
    }

    fn word(&self, index: usize) -> &str {
        self.lowered.get(index).map(String::as_str).unwrap_or_default()
    }

    /// Original-cased token at `index` if it can be a slot value.
    fn value(&self, index: usize) -> Option<String> {
        let lowered = self.lowered.get(index)?;
        if is_stop_word(lowered) {
            return None;
        }
        self.original.get(index).cloned()
    }

    fn hyphenated(&self, exclude: Option<&String>) -> Option<String> {
        (0..self.len())
            .filter(|&index| {
                let word = self.word(index);
                word.contains('-') && !word.starts_with('-') && !word.ends_with('-')
            })
            .filter_map(|index| self.value(index))
            .find(|value| Some(value) != exclude)
    }

    fn role_and_app(&self) -> Parameters {
        let mut parameters = Parameters::new();

        for index in 0..self.len() {
            let word = self.word(index);

            if matches!(word, "assigned" | "to") && self.word(index + 2) == "role" {
                if let Some(role) = self.value(index + 1) {
                    parameters.insert("roleName".to_string(), role);
                    continue;
                }
            }

            if word == "role" && (index == 0 || self.word(index - 1) != "to") {
                if let Some(role) = self.value(index + 1) {
                    parameters.insert("roleName".to_string(), role);
                    continue;
                }
            }

            if is_app_anchor(word) {
                if let Some(app) = self.value(index + 1) {
                    parameters.insert("appName".to_string(), app);
                }
            }
        }

        if !parameters.contains_key("roleName") {
            if let Some(role) = self.hyphenated(parameters.get("appName")) {
                parameters.insert("roleName".to_string(), role);
            }
        }

        parameters
    }

    fn app_name(&self) -> Parameters {
        let mut parameters = Parameters::new();
        if let Some(app) = self.find_app_name() {
            parameters.insert("appName".to_string(), app);
        }
        parameters
    }

    fn find_app_name(&self) -> Option<String> {
        for index in 0..self.len() {
            if is_app_anchor(self.word(index)) {
                if let Some(app) = self.value(index + 1) {
                    return Some(app);
                }
            }
        }

        for index in 0..self.len() {
            if !APP_PREPOSITIONS.contains(&self.word(index)) {
                continue;
            }
            if is_app_anchor(self.word(index + 1)) {
                if let Some(app) = (0..index).rev().find_map(|back| self.value(back)) {
                    return Some(app);
                }
                continue;
            }
            if let Some(app) = self.value(index + 1) {
                return Some(app);
            }
        }

        for index in 1..self.len() {
            if self.word(index) == "application" {
                if let Some(app) = self.value(index - 1) {
                    return Some(app);
                }
            }
        }

        self.hyphenated(None)
    }

    fn assignment(&self) -> Parameters {
        let mut parameters = Parameters::new();
        let mut explicit_user = false;

        for index in 0..self.len() {
            let word = self.word(index);
            let Some(next) = self.value(index + 1) else {
                continue;
            };

            match word {
                "role" => {
                    parameters.insert("roleName".to_string(), next);
                }
                "user" => {
                    parameters.insert("username".to_string(), next);
                    explicit_user = true;
                }
                "app" | "application" => {
                    parameters.insert("appName".to_string(), next);
                }
                "to" | "from" if !explicit_user => {
                    parameters.insert("username".to_string(), next);
                }
                _ => {}
            }
        }

        parameters
    }
}
