use std::sync::Arc;

use dirpilot_core::{ChatMessage, CompletionClient, Parameters, ToolCatalog, ToolInvocationRequest};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::rules::match_rules;
use crate::tools::normalize_request;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("classification failed: {0}")]
    ClassificationFailure(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Invoke(ToolInvocationRequest),
    NoCall,
}

/// Classifier reply, as the prompt asks for it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifierVerdict {
    should_call_tool: bool,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    parameters: Map<String, Value>,
    confidence: f64,
}

/// Maps an utterance to a catalog request: the language model first, keyword
/// rules whenever the model's answer is unusable.
pub struct IntentResolver {
    catalog: Arc<ToolCatalog>,
    completion: Arc<dyn CompletionClient>,
    prompt: String,
}

impl IntentResolver {
    pub fn new(catalog: Arc<ToolCatalog>, completion: Arc<dyn CompletionClient>) -> Self {
        let prompt = classifier_prompt(&catalog);
        Self { catalog, completion, prompt }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub async fn resolve(&self, utterance: &str) -> Resolution {
        if utterance.trim().is_empty() {
            return Resolution::NoCall;
        }

        match self.classify(utterance).await {
            Ok(resolution) => resolution,
            Err(error) => {
                warn!(
                    event_name = "agent.resolve.classification_failed",
                    error = %error,
                    "falling back to keyword rules"
                );
                match match_rules(utterance) {
                    Some(request) => {
                        debug!(
                            event_name = "agent.resolve.rule_match",
                            tool_name = %request.tool_name,
                            "keyword rule matched"
                        );
                        Resolution::Invoke(request)
                    }
                    None => Resolution::NoCall,
                }
            }
        }
    }

    async fn classify(&self, utterance: &str) -> Result<Resolution, ResolveError> {
        let messages = [
            ChatMessage::system(self.prompt.as_str()),
            ChatMessage::user(format!("Analyze this request: {utterance}")),
        ];
        let raw = self
            .completion
            .complete(&messages)
            .await
            .map_err(|error| ResolveError::ClassificationFailure(error.to_string()))?;

        let verdict = parse_verdict(&raw)?;
        if !verdict.should_call_tool {
            debug!(
                event_name = "agent.resolve.no_call",
                confidence = verdict.confidence,
                "classifier declined a tool call"
            );
            return Ok(Resolution::NoCall);
        }

        let tool_name =
            verdict.tool_name.filter(|name| !name.trim().is_empty()).ok_or_else(|| {
                ResolveError::ClassificationFailure("tool call without a tool name".to_string())
            })?;
        let parameters = stringify_parameters(verdict.parameters)?;

        let request = normalize_request(
            &self.catalog,
            ToolInvocationRequest::from_classifier(tool_name, parameters, verdict.confidence),
        );
        if self.catalog.lookup(&request.tool_name).is_err() {
            let reason = format!("unknown tool `{}`", request.tool_name);
            return Err(ResolveError::ClassificationFailure(reason));
        }

        debug!(
            event_name = "agent.resolve.classified",
            tool_name = %request.tool_name,
            confidence = request.confidence,
            "classifier selected a tool"
        );
        Ok(Resolution::Invoke(request))
    }
}

/// Parses the outermost `{...}` of a reply, tolerating prose or code fences
/// around it.
fn parse_verdict(raw: &str) -> Result<ClassifierVerdict, ResolveError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            let reason = "reply carried no JSON object".to_string();
            return Err(ResolveError::ClassificationFailure(reason));
        }
    };

    let verdict: ClassifierVerdict = serde_json::from_str(json)
        .map_err(|error| ResolveError::ClassificationFailure(error.to_string()))?;

    if !verdict.confidence.is_finite() || !(0.0..=1.0).contains(&verdict.confidence) {
        let reason = format!("confidence {} is outside [0, 1]", verdict.confidence);
        return Err(ResolveError::ClassificationFailure(reason));
    }

    Ok(verdict)
}

fn stringify_parameters(raw: Map<String, Value>) -> Result<Parameters, ResolveError> {
    let mut parameters = Parameters::new();
    for (name, value) in raw {
        let value = match value {
            Value::Null => continue,
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(_) | Value::Object(_) => {
                let reason = format!("parameter `{name}` is not a scalar");
                return Err(ResolveError::ClassificationFailure(reason));
            }
        };
        parameters.insert(name, value);
    }
    Ok(parameters)
}

fn classifier_prompt(catalog: &ToolCatalog) -> String {
    let mut prompt = String::from(
        "You route requests for a directory administration assistant. Decide whether the user's \
         request needs one of the tools below and answer with a single JSON object and nothing \
         else.\n\nAvailable tools:\n",
    );

    for tool in catalog.all() {
        prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for parameter in &tool.parameters {
            let required = if parameter.required { "required" } else { "optional" };
            let line = format!("    {} ({required}): {}\n", parameter.name, parameter.description);
            prompt.push_str(&line);
        }
        for action in &tool.actions {
            let slots = if action.required.is_empty() {
                "none".to_string()
            } else {
                action.required.join(", ")
            };
            let line =
                format!("    action `{}` needs {slots}: {}\n", action.name, action.description);
            prompt.push_str(&line);
        }
    }

    prompt.push_str(
        "\nRules:\n\
         - Only call a tool when the request clearly asks for directory, role, application or \
         weather data.\n\
         - Copy names, emails and roles exactly as the user wrote them.\n\
         - Leave out parameters the user did not give; never invent values.\n\
         - confidence is a number between 0 and 1.\n\
         \nResponse format:\n\
         {\"shouldCallTool\": true, \"toolName\": \"ToolName\", \
         \"parameters\": {\"name\": \"value\"}, \"confidence\": 0.9}\n\
         \nExamples:\n\
         \"Get all users\" -> {\"shouldCallTool\": true, \"toolName\": \"GetB2CUsers\", \
         \"parameters\": {\"action\": \"all\"}, \"confidence\": 0.95}\n\
         \"Show users with role Admin in app MyApp\" -> {\"shouldCallTool\": true, \
         \"toolName\": \"GetB2CUsers\", \"parameters\": {\"action\": \"by-role\", \
         \"roleName\": \"Admin\", \"appName\": \"MyApp\"}, \"confidence\": 0.9}\n\
         \"List roles for app MyApp\" -> {\"shouldCallTool\": true, \"toolName\": \"ManageRoles\", \
         \"parameters\": {\"action\": \"get-roles\", \"appName\": \"MyApp\"}, \
         \"confidence\": 0.9}\n\
         \"Assign role Admin to user john@example.com in app MyApp\" -> \
         {\"shouldCallTool\": true, \"toolName\": \"ManageRoles\", \"parameters\": \
         {\"action\": \"assign-role\", \"username\": \"john@example.com\", \
         \"appName\": \"MyApp\", \"roleName\": \"Admin\"}, \"confidence\": 0.9}\n\
         \"Which applications do I own?\" -> {\"shouldCallTool\": true, \
         \"toolName\": \"GetB2CApplications\", \"parameters\": {\"ownedOnly\": \"true\"}, \
         \"confidence\": 0.85}\n\
         \"What's the weather like?\" -> {\"shouldCallTool\": true, \
         \"toolName\": \"GetWeatherAuthAPI\", \"parameters\": {}, \"confidence\": 0.9}\n\
         \"Hello, how are you?\" -> {\"shouldCallTool\": false, \"toolName\": null, \
         \"parameters\": {}, \"confidence\": 0.95}\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use dirpilot_core::{
        ChatMessage, CompletionClient, CompletionError, ResolutionOrigin, ToolCatalog,
    };
    use serde_json::{json, Value};

    use super::{parse_verdict, IntentResolver, Resolution};

    struct Canned {
        reply: Result<String, CompletionError>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Canned {
        fn verdict(verdict: Value) -> Arc<Self> {
            Self::replying(&verdict.to_string())
        }

        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), seen: Mutex::new(Vec::new()) })
        }

        fn failing(error: CompletionError) -> Arc<Self> {
            Arc::new(Self { reply: Err(error), seen: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> usize {
            self.seen.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
            self.seen.lock().expect("lock").push(messages.to_vec());
            self.reply.clone()
        }
    }

    fn resolver(completion: Arc<Canned>) -> IntentResolver {
        IntentResolver::new(Arc::new(ToolCatalog::builtin()), completion)
    }

    #[tokio::test]
    async fn classifier_reply_inside_code_fence_is_used() {
        let verdict = json!({
            "shouldCallTool": true,
            "toolName": "GetB2CUsers",
            "parameters": {"action": "all"},
            "confidence": 0.92
        });
        let completion = Canned::replying(&format!("```json\n{verdict}\n```"));

        let resolution = resolver(completion.clone()).resolve("who is in the directory").await;
        let Resolution::Invoke(request) = resolution else {
            panic!("expected a tool call");
        };

        assert_eq!(request.tool_name, "GetB2CUsers");
        assert_eq!(request.parameter("action"), Some("all"));
        assert_eq!(request.origin, ResolutionOrigin::Classifier);

        let seen = completion.seen.lock().expect("lock");
        assert_eq!(seen[0][1].text, "Analyze this request: who is in the directory");
        assert!(seen[0][0].text.contains("GetWeatherAuthAPI"));
    }

    #[tokio::test]
    async fn scalar_parameters_are_stringified_and_legacy_names_normalized() {
        let completion = Canned::verdict(json!({
            "shouldCallTool": true,
            "toolName": "GetADB2CUsersByAppRole",
            "parameters": {"appRole": "Admin", "appName": "MyApp", "limit": 5, "note": null},
            "confidence": 0.8
        }));

        let Resolution::Invoke(request) = resolver(completion).resolve("admins of MyApp").await
        else {
            panic!("expected a tool call");
        };

        assert_eq!(request.tool_name, "GetB2CUsers");
        assert_eq!(request.parameter("action"), Some("by-role"));
        assert_eq!(request.parameter("roleName"), Some("Admin"));
        assert_eq!(request.parameter("limit"), Some("5"));
        assert_eq!(request.parameter("note"), None);
    }

    #[tokio::test]
    async fn low_confidence_reply_is_returned_for_gating() {
        let completion = Canned::verdict(json!({
            "shouldCallTool": true,
            "toolName": "GetWeatherAuthAPI",
            "parameters": {},
            "confidence": 0.4
        }));

        let Resolution::Invoke(request) = resolver(completion).resolve("hmm").await else {
            panic!("expected a tool call");
        };
        assert!((request.confidence - 0.4).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn declined_call_does_not_consult_rules() {
        let completion = Canned::verdict(json!({
            "shouldCallTool": false,
            "toolName": null,
            "parameters": {},
            "confidence": 0.9
        }));

        let resolution = resolver(completion).resolve("tell me about the weather in poetry").await;
        assert_eq!(resolution, Resolution::NoCall);
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_to_rules() {
        let completion = Canned::replying("I think you want the users tool");

        let Resolution::Invoke(request) = resolver(completion).resolve("Get all users").await else {
            panic!("expected a rule match");
        };
        assert_eq!(request.origin, ResolutionOrigin::Rules);
        assert_eq!(request.tool_name, "GetB2CUsers");
    }

    #[tokio::test]
    async fn completion_failure_or_unknown_tool_falls_back_to_rules() {
        let failing = Canned::failing(CompletionError::Timeout(30));
        let Resolution::Invoke(request) = resolver(failing).resolve("weather please").await else {
            panic!("expected a rule match");
        };
        assert_eq!(request.tool_name, "GetWeatherAuthAPI");

        let unknown = Canned::verdict(json!({
            "shouldCallTool": true,
            "toolName": "DropTables",
            "parameters": {},
            "confidence": 0.99
        }));
        assert_eq!(resolver(unknown).resolve("good morning").await, Resolution::NoCall);
    }

    #[tokio::test]
    async fn empty_utterance_never_reaches_the_model() {
        let completion = Canned::replying("{}");

        assert_eq!(resolver(completion.clone()).resolve("  \n ").await, Resolution::NoCall);
        assert_eq!(completion.calls(), 0);
    }

    #[test]
    fn verdict_schema_violations_are_rejected() {
        let overconfident =
            r#"{"shouldCallTool": true, "toolName": "X", "parameters": {}, "confidence": 1.5}"#;
        assert!(parse_verdict(overconfident).is_err());
        assert!(parse_verdict(r#"{"toolName": "X", "confidence": 0.5}"#).is_err());
        assert!(parse_verdict(r#"{"shouldCallTool": "yes", "confidence": 0.5}"#).is_err());
        assert!(parse_verdict("} nothing {").is_err());
        assert!(parse_verdict(r#"{"shouldCallTool": false, "confidence": 0.0}"#).is_ok());
    }

    #[tokio::test]
    async fn nested_parameter_value_is_a_classification_failure() {
        let completion = Canned::verdict(json!({
            "shouldCallTool": true,
            "toolName": "GetB2CUsers",
            "parameters": {"action": ["all"]},
            "confidence": 0.9
        }));

        let Resolution::Invoke(request) = resolver(completion).resolve("list users").await else {
            panic!("expected a rule match");
        };
        assert_eq!(request.origin, ResolutionOrigin::Rules);
    }
}
