use serde_json::Value;
use thiserror::Error;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unable to parse json payload: {0}")]
    Malformed(String),
}

/// Pull a JSON value out of model output.
///
/// A block fenced as ```` ```json ```` wins, then any fenced block, then the
/// raw text. The chosen body is trimmed before parsing.
pub fn extract_json(raw: &str) -> Result<Value, ExtractError> {
    let body = fence_interior(raw, JSON_FENCE)
        .or_else(|| fence_interior(raw, FENCE))
        .unwrap_or(raw);
    serde_json::from_str(body.trim()).map_err(|err| ExtractError::Malformed(err.to_string()))
}

/// Same rules as [`extract_json`], but anything that is not a JSON array
/// (including unparseable text) comes back as an empty list.
pub fn extract_json_array(raw: &str) -> Vec<Value> {
    match extract_json(raw) {
        Ok(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

fn fence_interior<'a>(raw: &'a str, opener: &str) -> Option<&'a str> {
    let start = raw.find(opener)? + opener.len();
    let rest = &raw[start..];
    // an unterminated fence runs to the end of the text
    let end = rest.find(FENCE).unwrap_or(rest.len());
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_fence_plain_fence_and_bare_text_agree() {
        let labelled = extract_json("```json\n{\"a\":1}\n```").expect("labelled");
        let plain = extract_json("```\n{\"a\":1}\n```").expect("plain");
        let bare = extract_json("{\"a\":1}").expect("bare");
        assert_eq!(labelled, json!({"a": 1}));
        assert_eq!(plain, labelled);
        assert_eq!(bare, labelled);
    }

    #[test]
    fn prose_around_fence_is_ignored() {
        let raw = "Here is my appraisal:\n```json\n{\"item_name\": \"Vase\"}\n```\nHope it helps!";
        let value = extract_json(raw).expect("fenced json");
        assert_eq!(value["item_name"], json!("Vase"));
    }

    #[test]
    fn labelled_fence_preferred_over_earlier_plain_fence() {
        let raw = "```\nnot json\n```\n```json\n[1, 2]\n```";
        assert_eq!(extract_json(raw).expect("labelled wins"), json!([1, 2]));
    }

    #[test]
    fn unterminated_fence_reads_to_end() {
        let value = extract_json("```json\n{\"a\": 2}").expect("unterminated");
        assert_eq!(value, json!({"a": 2}));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = extract_json("I could not identify this item.").expect_err("prose");
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn array_extraction_coerces_non_arrays() {
        assert_eq!(extract_json_array("```json\n[{\"x\":1}]\n```").len(), 1);
        assert!(extract_json_array("{\"x\":1}").is_empty());
        assert!(extract_json_array("no items found").is_empty());
        assert!(extract_json_array("[]").is_empty());
    }
}
