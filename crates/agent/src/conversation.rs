use dirpilot_core::{ChatMessage, ChatRole};

/// Ordered transcript of one session. Entry 0 is always the system prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationTranscript {
    messages: Vec<ChatMessage>,
}

impl ConversationTranscript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self { messages: vec![ChatMessage::system(system_prompt)] }
    }

    pub fn append(&mut self, role: ChatRole, text: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, text));
    }

    /// Appends every entry of a finished turn at once.
    pub fn commit(&mut self, turn: PendingTurn) {
        self.messages.extend(turn.entries);
    }

    /// Drops everything but the system prompt.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// Entries excluding the system prompt.
    pub fn message_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn system_prompt(&self) -> &str {
        self.messages.first().map(|message| message.text.as_str()).unwrap_or_default()
    }
}

/// Entries staged during a turn; nothing reaches the transcript until the
/// turn commits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingTurn {
    entries: Vec<ChatMessage>,
}

impl PendingTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use dirpilot_core::{ChatMessage, ChatRole};

    use super::{ConversationTranscript, PendingTurn};

    #[test]
    fn new_transcript_holds_only_the_system_prompt() {
        let transcript = ConversationTranscript::new("you are helpful");

        assert_eq!(transcript.message_count(), 0);
        assert_eq!(transcript.messages()[0].role, ChatRole::System);
        assert_eq!(transcript.system_prompt(), "you are helpful");
    }

    #[test]
    fn reset_then_count_is_zero() {
        let mut transcript = ConversationTranscript::new("sys");
        transcript.append(ChatRole::User, "hi");
        transcript.append(ChatRole::ToolContext, "Tool Result (GetWeatherAuthAPI): []");
        transcript.append(ChatRole::Assistant, "hello");
        assert_eq!(transcript.message_count(), 3);

        transcript.reset();

        assert_eq!(transcript.message_count(), 0);
        assert_eq!(transcript.snapshot(), vec![ChatMessage::system("sys")]);

        transcript.reset();
        assert_eq!(transcript.message_count(), 0);
    }

    #[test]
    fn pending_turn_commits_in_order() {
        let mut transcript = ConversationTranscript::new("sys");
        let mut turn = PendingTurn::new();
        turn.push(ChatMessage::user("get all users"));
        turn.push(ChatMessage::tool_context("Tool Result (GetB2CUsers): []"));
        turn.push(ChatMessage::assistant("There are no users."));
        assert_eq!(transcript.message_count(), 0);

        transcript.commit(turn);

        let roles: Vec<ChatRole> =
            transcript.messages().iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::ToolContext, ChatRole::Assistant]
        );
    }
}
