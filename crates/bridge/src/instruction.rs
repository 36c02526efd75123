//! Translation of invalidation commands into peer-side instructions.
//!
//! The peer is only reachable by injecting script into its context, so each
//! [`InvalidationCommand`] becomes a [`PeerInstruction`] that renders to a
//! self-contained script. When a callback id is supplied, the script posts
//! a `storysdk:cache:ack` message back once it has run.

use regex::Regex;
use storysdk_core::{CommandKind, InvalidationCommand};

use crate::envelope::CACHE_ACK;
use crate::error::BridgeError;

/// `*` wildcard pattern over storage keys.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    glob: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(glob: &str) -> Result<Self, BridgeError> {
        let body = glob.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|source| BridgeError::InvalidPattern { pattern: glob.to_string(), source })?;
        Ok(Self { glob: glob.to_string(), regex })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Anchored regex source, valid for a JavaScript `RegExp` without flags.
    pub fn source(&self) -> &str {
        self.regex.as_str()
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

/// What the peer is told to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerInstruction {
    /// Remove local storage keys matching any pattern.
    RemoveMatching { patterns: Vec<GlobPattern> },
    /// Drop cached resources of the given kinds.
    ClearResources { kinds: Vec<String> },
    /// Erase local storage and hard-reload the page.
    EraseAndReload,
}

impl PeerInstruction {
    pub fn from_command(command: &InvalidationCommand) -> Result<Self, BridgeError> {
        Ok(match command.kind {
            CommandKind::Clear | CommandKind::ClearAll => PeerInstruction::RemoveMatching {
                patterns: command
                    .scope_patterns
                    .iter()
                    .map(|p| GlobPattern::new(p))
                    .collect::<Result<_, _>>()?,
            },
            CommandKind::ClearResources => PeerInstruction::ClearResources { kinds: command.scope_patterns.clone() },
            CommandKind::Reload => PeerInstruction::EraseAndReload,
        })
    }

    /// Keys from `keys` this instruction would remove from local storage.
    pub fn affected<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        match self {
            PeerInstruction::RemoveMatching { patterns } => keys
                .into_iter()
                .filter(|key| patterns.iter().any(|p| p.matches(key)))
                .collect(),
            PeerInstruction::ClearResources { kinds } => {
                let prefixes = resource_prefixes(kinds);
                keys.into_iter()
                    .filter(|key| prefixes.iter().any(|prefix| key.starts_with(prefix)))
                    .collect()
            }
            PeerInstruction::EraseAndReload => keys.into_iter().collect(),
        }
    }

    /// Script to inject into the peer's context.
    pub fn render_script(&self, callback_id: Option<&str>) -> String {
        let body = match self {
            PeerInstruction::RemoveMatching { patterns } => {
                let sources: Vec<&str> = patterns.iter().map(GlobPattern::source).collect();
                format!(
                    r#"var patterns = {sources}.map(function (p) {{ return new RegExp(p); }});
    removeWhere(function (key) {{ return patterns.some(function (r) {{ return r.test(key); }}); }});"#,
                    sources = js_literal(&sources),
                )
            }
            PeerInstruction::ClearResources { kinds } => {
                format!(
                    r#"var prefixes = {prefixes};
    removeWhere(function (key) {{ return prefixes.some(function (p) {{ return key.indexOf(p) === 0; }}); }});
    if ({drop_caches} && window.caches && window.caches.keys) {{
      window.caches.keys().then(function (names) {{ names.forEach(function (n) {{ window.caches.delete(n); }}); }});
    }}"#,
                    prefixes = js_literal(&resource_prefixes(kinds)),
                    drop_caches = !kinds.is_empty(),
                )
            }
            PeerInstruction::EraseAndReload => "window.localStorage.clear();
    if (window.sessionStorage) { window.sessionStorage.clear(); }
    setTimeout(function () { window.location.reload(); }, 0);"
                .to_string(),
        };

        format!(
            r#"(function () {{
  {ack}
  function removeWhere(test) {{
    var doomed = [];
    for (var i = 0; i < window.localStorage.length; i++) {{
      var key = window.localStorage.key(i);
      if (key !== null && test(key)) {{ doomed.push(key); }}
    }}
    doomed.forEach(function (key) {{ window.localStorage.removeItem(key); }});
  }}
  try {{
    {body}
    ack(true);
  }} catch (e) {{
    ack(false, String(e));
  }}
  true;
}})();"#,
            ack = ack_function(callback_id),
        )
    }
}

/// Local storage prefixes holding cached resources of `kinds`.
fn resource_prefixes(kinds: &[String]) -> Vec<&'static str> {
    let wants = |kind: &str| kinds.iter().any(|k| k == kind || k == "all");
    let mut prefixes = Vec::new();
    if wants("scripts") {
        prefixes.push("storysdk:script:");
    }
    if wants("styles") {
        prefixes.push("storysdk:css:");
    }
    prefixes
}

fn ack_function(callback_id: Option<&str>) -> String {
    match callback_id {
        Some(id) => format!(
            r#"function ack(ok, error) {{
    if (window.ReactNativeWebView) {{
      window.ReactNativeWebView.postMessage(JSON.stringify({{ type: {ty}, callbackId: {id}, data: {{ success: ok, error: error || null }} }}));
    }}
  }}"#,
            ty = js_literal(&CACHE_ACK),
            id = js_literal(&id),
        ),
        None => "function ack() {}".to_string(),
    }
}

/// JSON encoding doubles as a JavaScript literal.
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
