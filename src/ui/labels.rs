/// Human-readable label for an action token: `log_meal` → `Log Meal`.
pub fn display_label(token: &str) -> String {
    token
        .split(['_', '-', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Numbered list shown under a reply, e.g. `[1] Log Meal  [2] View Summary`.
pub fn numbered_actions(actions: &[String]) -> String {
    actions
        .iter()
        .enumerate()
        .map(|(index, token)| format!("[{}] {}", index + 1, display_label(token)))
        .collect::<Vec<_>>()
        .join("  ")
}
