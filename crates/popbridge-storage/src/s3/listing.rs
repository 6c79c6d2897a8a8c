//! Minimal readers for S3 XML responses

use regex::Regex;
use std::sync::OnceLock;

/// One object entry of a ListObjectsV2 page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// A parsed ListObjectsV2 page
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectEntry>,
    pub next_token: Option<String>,
}

fn contents_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").expect("static pattern"))
}

fn tag_regex(tag: &'static str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>")).expect("static pattern")
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("Key"))
}

fn size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("Size"))
}

fn truncated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("IsTruncated"))
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("NextContinuationToken"))
}

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("Code"))
}

fn message_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_regex("Message"))
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Resolve the predefined XML entities and numeric character references
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(end) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..end];
        let resolved = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match resolved {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse a ListObjectsV2 response body
pub fn parse_list_page(body: &str) -> Result<ListPage, String> {
    if !body.contains("<ListBucketResult") {
        return Err("response is not a ListBucketResult".to_string());
    }

    let mut objects = Vec::new();
    for caps in contents_regex().captures_iter(body) {
        let entry = &caps[1];
        let key = capture(key_regex(), entry).ok_or("object entry without Key")?;
        let size = capture(size_regex(), entry)
            .ok_or("object entry without Size")?
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid object size: {}", e))?;
        objects.push(ObjectEntry {
            key: unescape(key),
            size,
        });
    }

    let truncated = capture(truncated_regex(), body).map(str::trim) == Some("true");
    let next_token = if truncated {
        Some(
            capture(token_regex(), body)
                .map(unescape)
                .ok_or("truncated listing without continuation token")?,
        )
    } else {
        None
    };

    Ok(ListPage {
        objects,
        next_token,
    })
}

/// Extract `Code: Message` from an S3 error body, if it is one
pub fn parse_error(body: &str) -> Option<String> {
    let code = capture(code_regex(), body)?;
    match capture(message_regex(), body) {
        Some(message) => Some(format!("{}: {}", unescape(code), unescape(message))),
        None => Some(unescape(code)),
    }
}
