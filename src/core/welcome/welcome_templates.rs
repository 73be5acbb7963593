// Welcome message templates.
//
// Templates come from a JSON object (`{"default": "...", "<guild id>": "..."}`)
// and can be overridden with WELCOME_MESSAGE_DEFAULT / WELCOME_MESSAGE_<guild id>.
// Every template is cleaned once at load time:
//   - only {mention} and {role} survive, other placeholders are removed
//   - {mention} is appended if the template forgot it
//   - unclosed **, __, ~~, * and backtick spans are closed at the end

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub const FALLBACK_TEMPLATE: &str = "Welcome {mention}!";
const DEFAULT_KEY: &str = "default";
const ENV_PREFIX: &str = "WELCOME_MESSAGE_";
const ALLOWED_FIELDS: [&str; 2] = ["mention", "role"];
const BALANCE_TOKENS: [&str; 4] = ["**", "__", "~~", "*"];

#[derive(Debug, Error)]
pub enum WelcomeError {
    #[error("Could not read welcome messages file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Welcome messages file is not a JSON object of strings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct WelcomeTemplates {
    templates: HashMap<String, String>,
}

impl Default for WelcomeTemplates {
    fn default() -> Self {
        Self::from_raw(HashMap::new(), std::iter::empty())
    }
}

impl WelcomeTemplates {
    /// Load from `path` (if it exists) and apply env overrides.
    ///
    /// A missing file is not an error; the fallback template is used. A file
    /// that exists but does not parse is reported so startup can log it.
    pub fn load<I>(path: Option<&Path>, env: I) -> Result<Self, WelcomeError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading welcome messages");
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str::<HashMap<String, serde_json::Value>>(&text)?
                    .into_iter()
                    .map(|(key, value)| {
                        let text = match value {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, text.trim().to_string())
                    })
                    .collect()
            }
            Some(path) => {
                warn!(path = %path.display(), "Welcome messages file not found, using defaults");
                HashMap::new()
            }
            None => HashMap::new(),
        };

        Ok(Self::from_raw(raw, env))
    }

    fn from_raw<I>(mut raw: HashMap<String, String>, env: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if raw.get(DEFAULT_KEY).map_or(true, |t| t.trim().is_empty()) {
            raw.insert(DEFAULT_KEY.to_string(), FALLBACK_TEMPLATE.to_string());
        }

        for (key, value) in env {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if suffix == "DEFAULT" {
                raw.insert(DEFAULT_KEY.to_string(), value);
            } else if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                raw.insert(suffix.to_string(), value);
            }
        }

        let templates = raw
            .into_iter()
            .map(|(key, template)| {
                let (clean, fixes) = sanitize_template(&template);
                for fix in fixes {
                    info!(key = %key, "Welcome template fix: {}", fix);
                }
                (key, clean)
            })
            .collect();

        Self { templates }
    }

    pub fn template_for(&self, guild_id: u64) -> &str {
        self.templates
            .get(&guild_id.to_string())
            .or_else(|| self.templates.get(DEFAULT_KEY))
            .map(String::as_str)
            .unwrap_or(FALLBACK_TEMPLATE)
    }

    /// Fill in the guild's template. `role` is usually a channel mention
    /// pointing new members at role selection.
    pub fn render(&self, guild_id: u64, mention: &str, role: Option<&str>) -> String {
        self.template_for(guild_id)
            .replace("{mention}", mention)
            .replace("{role}", role.unwrap_or(""))
            .trim()
            .to_string()
    }
}

/// Clean a template and report what was changed.
pub fn sanitize_template(template: &str) -> (String, Vec<String>) {
    let mut fixes = Vec::new();
    let mut output = String::with_capacity(template.len());
    let mut has_mention = false;
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                let field = &after[..close];
                if ALLOWED_FIELDS.contains(&field) {
                    has_mention |= field == "mention";
                    output.push('{');
                    output.push_str(field);
                    output.push('}');
                } else {
                    fixes.push(format!("Removed unknown placeholder {{{field}}}"));
                }
                rest = &after[close + 1..];
            }
            _ => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);

    if !has_mention {
        output.push_str(" {mention}");
        fixes.push("Appended missing {mention}".to_string());
    }

    let (balanced, markdown_fixes) = balance_markdown(output.trim());
    fixes.extend(markdown_fixes);

    if balanced.trim().is_empty() {
        return (FALLBACK_TEMPLATE.to_string(), fixes);
    }
    (balanced, fixes)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Close `**`, `__`, `~~` and `*` left open outside code spans, and close an
/// unterminated backtick span.
pub fn balance_markdown(text: &str) -> (String, Vec<String>) {
    let mut fixes = Vec::new();
    let mut result = String::with_capacity(text.len() + 4);
    let mut open_stack: Vec<&str> = Vec::new();
    let mut code_run: Option<usize> = None;
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if rest.starts_with('`') {
            let run = rest.bytes().take_while(|b| *b == b'`').count();
            match code_run {
                Some(open) if open == run => code_run = None,
                None => code_run = Some(run),
                Some(_) => {}
            }
            result.push_str(&rest[..run]);
            i += run;
            continue;
        }

        if code_run.is_none() {
            if let Some(token) = BALANCE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
                if open_stack.last() == Some(token) {
                    open_stack.pop();
                } else {
                    open_stack.push(token);
                }
                result.push_str(token);
                i += token.len();
                continue;
            }
        }

        let ch = rest.chars().next().unwrap_or_default();
        result.push(ch);
        i += ch.len_utf8().max(1);
    }

    if let Some(run) = code_run {
        let closing = "`".repeat(run);
        result.push_str(&closing);
        fixes.push(format!("Closed unbalanced code span with {closing}"));
    } else if !open_stack.is_empty() {
        let closing: String = open_stack.iter().rev().copied().collect();
        result.push_str(&closing);
        fixes.push(format!("Closed unbalanced markdown with {closing}"));
    }

    (result, fixes)
}
