//! A small JSONPath subset for the `json` check.
//!
//! Supported: `$`, `.key`, `['key']`, `["key"]`, `[index]`, and a bare
//! leading key (`data.items[0]`).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonSelector {
    source: String,
    segments: Vec<Segment>,
}

impl JsonSelector {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut rest = source.trim();
        if let Some(after) = rest.strip_prefix('$') {
            rest = after;
        }

        let mut segments = Vec::new();
        let mut first = true;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let close = after
                    .find(']')
                    .ok_or_else(|| format!("unclosed '[' in selector '{}'", source))?;
                let inner = after[..close].trim();
                segments.push(parse_bracket(inner, source)?);
                rest = &after[close + 1..];
            } else {
                let body = match rest.strip_prefix('.') {
                    Some(after) => after,
                    None if first => rest,
                    None => return Err(format!("expected '.' or '[' in selector '{}'", source)),
                };
                let end = body.find(['.', '[']).unwrap_or(body.len());
                let key = &body[..end];
                if key.is_empty() {
                    return Err(format!("empty key in selector '{}'", source));
                }
                segments.push(Segment::Key(key.to_string()));
                rest = &body[end..];
            }
            first = false;
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The value at this path, if present.
    pub fn select<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(value, |current, segment| match segment {
            Segment::Key(key) => current.get(key.as_str()),
            Segment::Index(index) => current.get(*index),
        })
    }
}

impl std::fmt::Display for JsonSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_bracket(inner: &str, source: &str) -> Result<Segment, String> {
    let quoted = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
    if let Some(key) = quoted {
        return Ok(Segment::Key(key.to_string()));
    }
    inner
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| format!("invalid index '{}' in selector '{}'", inner, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_selects_whole_document() {
        let doc = json!({"a": 1});
        assert_eq!(JsonSelector::parse("$").unwrap().select(&doc), Some(&doc));
    }

    #[test]
    fn test_nested_keys_and_indices() {
        let doc = json!({"data": {"items": [{"name": "first"}, {"name": "second"}]}});
        let selector = JsonSelector::parse("$.data.items[1].name").unwrap();
        assert_eq!(selector.select(&doc), Some(&json!("second")));

        let bare = JsonSelector::parse("data.items[0]['name']").unwrap();
        assert_eq!(bare.select(&doc), Some(&json!("first")));
    }

    #[test]
    fn test_missing_path_is_none() {
        let doc = json!({"a": [1]});
        assert_eq!(JsonSelector::parse("$.a[3]").unwrap().select(&doc), None);
        assert_eq!(JsonSelector::parse("$.b").unwrap().select(&doc), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(JsonSelector::parse("$.a[").is_err());
        assert!(JsonSelector::parse("$.a[x]").is_err());
        assert!(JsonSelector::parse("$..a").is_err());
        assert!(JsonSelector::parse("$[0]b").is_err());
    }
}
