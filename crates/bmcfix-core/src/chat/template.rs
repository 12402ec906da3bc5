//! `{{name}}` placeholder substitution for prompt templates.

use std::collections::HashMap;

/// Substitute `{{name}}` placeholders in `template` from `vars`.
///
/// Single scan, so substituted values are never re-scanned for
/// placeholders. Unknown placeholders are kept literally, which lets
/// callers substitute incrementally across turns. `$$` escapes to a
/// literal `$`, so `$$name` renders as `$name`.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix("$$") {
            result.push('$');
            rest = stripped;
            continue;
        }
        if rest.starts_with("{{") {
            if let Some(end) = rest.find("}}") {
                let key = rest[2..end].trim();
                if let Some(value) = vars.get(key) {
                    result.push_str(value);
                } else {
                    result.push_str(&rest[..end + 2]);
                }
                rest = &rest[end + 2..];
                continue;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            result.push(c);
        }
        rest = chars.as_str();
    }
    result
}

/// Build a variable map from string pairs.
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
