use serde_json::Value;

/// Slices out the outermost `[...]` of a model response, tolerating prose or
/// markdown fences around it.
pub fn extract_json_array_from_response(response: &str) -> &str {
    extract_between(response, '[', ']')
}

/// Slices out the outermost `{...}` of a model response.
pub fn extract_json_object_from_response(response: &str) -> &str {
    extract_between(response, '{', '}')
}

fn extract_between(response: &str, open: char, close: char) -> &str {
    if let Some(start) = response.find(open) {
        if let Some(end) = response.rfind(close) {
            if end > start {
                return &response[start..=end];
            }
        }
    }
    response
}

/// Finds the list a model was asked to produce under `field`.
///
/// Accepts `{"<field>": [...]}` or a bare array, each possibly wrapped in
/// surrounding text.
pub fn parse_json_list(response: &str, field: &str) -> Option<Vec<Value>> {
    if let Ok(Value::Object(mut obj)) =
        serde_json::from_str::<Value>(extract_json_object_from_response(response))
    {
        if let Some(Value::Array(items)) = obj.remove(field) {
            return Some(items);
        }
    }
    match serde_json::from_str::<Value>(extract_json_array_from_response(response)) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Replaces `{name}` placeholders in a single pass, so text substituted for
/// one placeholder is never scanned for another.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let placeholder = values.iter().find(|(name, _)| {
            tail.starts_with(name) && tail[name.len()..].starts_with('}')
        });
        match placeholder {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_from_fenced_response() {
        let response = "Sure!\n```json\n{\"queries\": [\"a\", \"b\"]}\n```";
        assert_eq!(
            extract_json_object_from_response(response),
            "{\"queries\": [\"a\", \"b\"]}"
        );
        assert_eq!(extract_json_array_from_response(response), "[\"a\", \"b\"]");
        assert_eq!(extract_json_array_from_response("no json"), "no json");
    }

    #[test]
    fn list_from_object_or_bare_array() {
        assert_eq!(
            parse_json_list("{\"selected_ids\": [2, 0]}", "selected_ids"),
            Some(vec![json!(2), json!(0)])
        );
        assert_eq!(
            parse_json_list("ids: [1, \"3\"]", "selected_ids"),
            Some(vec![json!(1), json!("3")])
        );
        assert_eq!(parse_json_list("{\"other\": 1}", "selected_ids"), None);
        assert_eq!(parse_json_list("not json at all", "selected_ids"), None);
    }

    #[test]
    fn template_values_are_not_rescanned() {
        let filled = fill_template(
            "Q: {question}\nC: {context}\n{\"answer\": \"...\"}",
            &[("question", "what is {context}?"), ("context", "BLEU 28.4")],
        );
        assert_eq!(
            filled,
            "Q: what is {context}?\nC: BLEU 28.4\n{\"answer\": \"...\"}"
        );
    }
}
