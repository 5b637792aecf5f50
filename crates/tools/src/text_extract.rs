//! `text_extract`: pull readable text out of a payload. Pure, no I/O.
//!
//! HTML is stripped to its visible text, JSON is flattened to its string
//! leaves, and anything else is returned with whitespace normalized.

use serde_json::{json, Value};

pub fn extract(payload: &str, max_chars: usize) -> Value {
    let text = if looks_like_html(payload) {
        html_to_text(payload)
    } else if let Ok(v) = serde_json::from_str::<Value>(payload) {
        let mut leaves = Vec::new();
        collect_strings(&v, &mut leaves);
        leaves.join("\n")
    } else {
        normalize_whitespace(payload)
    };

    let extracted_text: String = text.chars().take(max_chars).collect();
    json!({ "extracted_text": extracted_text })
}

fn looks_like_html(s: &str) -> bool {
    let lower = s.trim_start().to_ascii_lowercase();
    lower.starts_with("<!doctype html")
        || lower.starts_with("<html")
        || ["<body", "<p>", "<div", "<br", "<h1", "<span"]
            .iter()
            .any(|t| lower.contains(t))
}

fn collect_strings(v: &Value, out: &mut Vec<String>) {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_strings(i, out)),
        Value::Object(map) => map.values().for_each(|i| collect_strings(i, out)),
        _ => {}
    }
}

/// Strip tags, drop script/style bodies, decode common entities, and
/// collapse blank runs. Block-level closing tags become line breaks.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    let mut skip_depth = 0usize;
    let mut tag_buf = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag = tag_buf.trim().to_ascii_lowercase();
                let name: String = tag
                    .trim_start_matches('/')
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect();
                let closing = tag.starts_with('/');

                if name == "script" || name == "style" {
                    if closing {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if !tag.ends_with('/') {
                        skip_depth += 1;
                    }
                }

                let block = matches!(
                    name.as_str(),
                    "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "tr"
                        | "article" | "section" | "header" | "footer" | "blockquote"
                );
                if name == "br" || (closing && block) {
                    out.push('\n');
                }
            }
            _ if in_tag => tag_buf.push(ch),
            _ if skip_depth > 0 => {}
            _ => out.push(ch),
        }
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    let mut result = String::new();
    let mut blank = false;
    for line in decoded.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            if !blank && !result.is_empty() {
                result.push('\n');
                blank = true;
            }
        } else {
            result.push_str(&line);
            result.push('\n');
            blank = false;
        }
    }
    result.trim().to_string()
}

fn normalize_whitespace(s: &str) -> String {
    s.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
