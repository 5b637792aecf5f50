//! Intent classifier.
//!
//! Rule-based: each tag owns a list of regex patterns and tags are tried
//! in a fixed order, first match wins. No match means `conversation`.
//! The classifier never consults a model, so it works with every provider
//! down.
//!
//! The same module decides which utterances imply a capability call:
//! device commands, code with an explicit "run this" marker, and
//! "fetch <url>" requests.

use regex::Regex;
use serde_json::{json, Map, Value};

use ava_domain::capability::{CapabilityKind, CapabilityRequest, CodeLanguage};
use ava_domain::intent::IntentTag;

/// Timeout given to capability calls implied by an utterance.
const IMPLIED_TIMEOUT_MS: u64 = 10_000;

/// Imperative "open <app>" for applications the local backend knows.
const KNOWN_APP: &str = r"(?i)^\s*(please\s+)?(open|launch)\s+(the\s+)?(calculator|notepad|terminal|browser|calendar|settings|mail|music|camera|maps|chrome|firefox|safari|spotify|finder|explorer)\b";

/// Tags in the order they are tried.
const PRECEDENCE: [IntentTag; 6] = [
    IntentTag::DeviceControl,
    IntentTag::CodeHelp,
    IntentTag::BusinessAnalysis,
    IntentTag::Advice,
    IntentTag::Information,
    IntentTag::TaskAssist,
];

fn patterns_for(tag: IntentTag) -> &'static [&'static str] {
    match tag {
        IntentTag::DeviceControl => &[
            r"(?i)^\s*(please\s+)?(open|launch)\s+(the\s+)?(app|application|website|site)\b",
            r"(?i)^\s*(please\s+)?(open|launch)\s+https?://",
            KNOWN_APP,
            r"(?i)^\s*(please\s+)?search\s+the\s+web\s+for\s+\S",
            r"(?i)^\s*(please\s+)?create\s+(a\s+)?file\b",
            r"(?i)^\s*(please\s+)?(notify|remind)\s+me\b",
            r"(?i)\bsystem\s+(info|information|status)\b",
        ],
        IntentTag::CodeHelp => &[
            r"```",
            r"(?i)\b(code|function|compile|debug|bug|stack\s*trace|syntax)\b",
            r"(?i)\b(python|javascript|bash|rust|typescript)\b",
            r"(?i)\b(run|execute)\s+(this|the|my)\s+(script|code|snippet)\b",
        ],
        IntentTag::BusinessAnalysis => &[
            r"(?i)\b(revenue|profit|margin|kpi|roi|market\s+share|competitors?)\b",
            r"(?i)\b(business|sales|pricing)\s+(plan|strategy|analysis|forecast)\b",
            r"(?i)\banaly[sz]e\s+(my|our|the)\s+(business|market|sales)\b",
        ],
        IntentTag::Advice => &[
            r"(?i)\bwhat\s+should\s+i\b",
            r"(?i)\bhow\s+can\s+i\b",
            r"(?i)\bhelp\s+me\s+with\b",
            r"(?i)\badvice\s+on\b",
            r"(?i)\b(recommend|suggest)",
            r"(?i)\bbest\s+way\b",
        ],
        IntentTag::Information => &[
            r"(?i)\bwhat\s+is\b",
            r"(?i)\btell\s+me\s+about\b",
            r"(?i)\b(explain|define)\b",
            r"(?i)\bhow\s+does\b",
            r"(?i)\bwhy\s+is\b",
            r"(?i)\bwhen\s+was\b",
            r"(?i)\bfetch\s+https?://",
        ],
        IntentTag::TaskAssist => &[
            r"(?i)\bhelp\s+me\b",
            r"(?i)\bassist\s+(me\s+)?with\b",
            r"(?i)\bguide\s+me\b",
            r"(?i)\bwalk\s+(me\s+)?through\b",
            r"(?i)\bshow\s+me\s+how\b",
            r"(?i)\bteach\s+me\b",
        ],
        IntentTag::Conversation => &[],
    }
}

pub struct IntentClassifier {
    rules: Vec<(IntentTag, Vec<Regex>)>,
    fetch_marker: Regex,
    run_marker: Regex,
    code_fence: Regex,
    open_target: Regex,
    search_query: Regex,
    notify_message: Regex,
    create_file: Regex,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let rules = PRECEDENCE
            .iter()
            .map(|tag| (*tag, compile_all(patterns_for(*tag))))
            .collect();
        Self {
            rules,
            fetch_marker: compile(r"(?i)\bfetch\s+(https?://\S+)"),
            run_marker: compile(r"(?i)\b(run|execute|eval)\b"),
            code_fence: compile(r"(?s)```([A-Za-z]*)[ \t]*\r?\n(.*?)```"),
            open_target: compile(
                r"(?i)^\s*(?:please\s+)?(?:open|launch)\s+(?:the\s+)?(?:(?:app|application|website|site)\s+)?(\S+)",
            ),
            search_query: compile(r"(?i)^\s*(?:please\s+)?search\s+the\s+web\s+for\s+(.+)"),
            notify_message: compile(
                r"(?i)^\s*(?:please\s+)?(?:notify|remind)\s+me\s+(?:to\s+|that\s+|about\s+)?(.+)",
            ),
            create_file: compile(
                r"(?i)^\s*(?:please\s+)?create\s+(?:a\s+)?file\s+(?:called\s+|named\s+)?(\S+)",
            ),
        }
    }

    /// Classify an utterance. Pure and deterministic.
    pub fn classify(&self, text: &str) -> IntentTag {
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(text)))
            .map(|(tag, _)| *tag)
            .unwrap_or(IntentTag::Conversation)
    }

    /// The capability call an utterance implies, if any.
    pub fn implied_capability(&self, tag: IntentTag, text: &str) -> Option<CapabilityRequest> {
        let (kind, arguments) = match tag {
            IntentTag::DeviceControl => (CapabilityKind::DeviceCommand, self.device_command(text)?),
            IntentTag::CodeHelp => (CapabilityKind::CodeExec, self.code_exec(text)?),
            IntentTag::Information => {
                let url = self.fetch_marker.captures(text)?.get(1)?.as_str();
                let url = url.trim_end_matches(['.', ',', ')', '!', '?']);
                (
                    CapabilityKind::HttpFetch,
                    json!({ "url": url, "method": "GET", "timeout_ms": IMPLIED_TIMEOUT_MS }),
                )
            }
            _ => return None,
        };
        CapabilityRequest::from_parts(kind.as_str(), arguments).ok()
    }

    fn code_exec(&self, text: &str) -> Option<Value> {
        if !self.run_marker.is_match(text) {
            return None;
        }
        let caps = self.code_fence.captures(text)?;
        let language = CodeLanguage::parse(caps.get(1)?.as_str())?;
        let source = caps.get(2)?.as_str();
        if source.trim().is_empty() {
            return None;
        }
        Some(json!({
            "language": language.as_str(),
            "source": source,
            "timeout_ms": IMPLIED_TIMEOUT_MS,
        }))
    }

    fn device_command(&self, text: &str) -> Option<Value> {
        let lower = text.to_lowercase();
        let mut parameters = Map::new();

        let command = if lower.contains("system info") || lower.contains("system status") {
            "system_info"
        } else if let Some(query) = capture(&self.search_query, text) {
            parameters.insert("query".into(), Value::String(query));
            "search_web"
        } else if let Some(message) = capture(&self.notify_message, text) {
            parameters.insert("message".into(), Value::String(message));
            "send_notification"
        } else if let Some(path) = capture(&self.create_file, text) {
            parameters.insert("path".into(), Value::String(path));
            "create_file"
        } else if let Some(target) = capture(&self.open_target, text) {
            if target.starts_with("http://") || target.starts_with("https://") {
                parameters.insert("url".into(), Value::String(target));
                "open_website"
            } else {
                parameters.insert("app_name".into(), Value::String(target));
                "open_application"
            }
        } else {
            return None;
        };

        Some(json!({
            "device_id": ava_tools::device::LOCAL_DEVICE_ID,
            "command": command,
            "parameters": parameters,
        }))
    }
}

/// Tag recorded on a capability turn requested directly over the API.
pub fn tag_for_capability(kind: CapabilityKind) -> IntentTag {
    match kind {
        CapabilityKind::DeviceCommand | CapabilityKind::NetworkProbe => IntentTag::DeviceControl,
        CapabilityKind::CodeExec => IntentTag::CodeHelp,
        CapabilityKind::HttpFetch | CapabilityKind::TextExtract => IntentTag::Information,
    }
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    let value = re.captures(text)?.get(1)?.as_str().trim();
    let value = value.trim_end_matches(['.', '!', '?']);
    (!value.is_empty()).then(|| value.to_string())
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| compile(p)).collect()
}
