/// Latest quick-reply tokens offered by the agent.
///
/// Tokens are opaque identifiers (`log_meal`, `view_summary`) kept exactly as
/// the agent sent them; turning them into labels is up to the presentation
/// layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuggestionTracker {
    actions: Vec<String>,
}

impl SuggestionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the set delivered with a completed turn.
    pub fn replace(&mut self, actions: Vec<String>) {
        self.actions = actions;
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }
}
