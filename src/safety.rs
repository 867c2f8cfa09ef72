use regex::Regex;
use tracing::debug;

/// Tags allowed to survive [`sanitize_rich_text`]. Attributes are dropped,
/// except `href` on anchors.
const ALLOWED_TAGS: [&str; 13] = [
    "p", "br", "a", "strong", "em", "b", "i", "ul", "ol", "li", "blockquote", "h2", "h3",
];

/// Defense-in-depth filter applied to LLM output before it is trusted as post
/// content. Not a full HTML sanitizer; accepted content is reduced to the
/// safe-markup subset separately.
pub struct ResponseValidator {
    suspicious: Vec<Regex>,
}

impl ResponseValidator {
    pub fn new() -> Self {
        let patterns = [
            r"(?is)<script[^>]*>.*?</script>",
            r"(?i)javascript:",
            r"(?i)\bon\w+\s*=",
            r"(?is)<iframe[^>]*>.*?</iframe>",
            r"(?is)<object[^>]*>.*?</object>",
            r"(?i)<embed[^>]*>",
        ];
        let suspicious = patterns
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect();
        Self { suspicious }
    }

    /// True iff `text` carries none of the suspicious markup patterns.
    pub fn is_safe(&self, text: &str) -> bool {
        for pattern in &self.suspicious {
            if pattern.is_match(text) {
                debug!("response rejected by pattern {}", pattern.as_str());
                return false;
            }
        }
        true
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trims, strips control characters, and collapses internal whitespace.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduces rich text to the allowed tag subset. Disallowed tags are stripped
/// (their text content is kept); attributes are dropped, except http(s)
/// `href` values on anchors.
pub fn sanitize_rich_text(body: &str) -> String {
    let tag = Regex::new(r"(?is)<\s*(/?)\s*([a-z][a-z0-9]*)\b[^>]*>").expect("static regex");
    let href = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("static regex");

    tag.replace_all(body, |caps: &regex::Captures| {
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            return String::new();
        }
        if closing {
            return format!("</{name}>");
        }
        if name == "a" {
            if let Some(m) = href.captures(&caps[0]) {
                let target = m[1].trim();
                if target.starts_with("http://") || target.starts_with("https://") {
                    return format!("<a href=\"{target}\">");
                }
            }
            // Anchor survives, the unusable target does not.
            return "<a>".to_string();
        }
        format!("<{name}>")
    })
    .into_owned()
}

/// Strips all markup, leaving whitespace-normalized plain text.
pub fn strip_tags(html: &str) -> String {
    html.chars()
        .fold((String::new(), false), |(mut text, in_tag), c| match c {
            '<' => (text, true),
            '>' => {
                text.push(' ');
                (text, false)
            }
            _ if !in_tag => {
                text.push(c);
                (text, in_tag)
            }
            _ => (text, in_tag),
        })
        .0
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_script_blocks() {
        let validator = ResponseValidator::new();
        assert!(!validator.is_safe("before <script>alert(1)</script> after"));
        assert!(!validator.is_safe("<SCRIPT type=\"text/javascript\">x()</SCRIPT>"));
    }

    #[test]
    fn rejects_javascript_uris_and_event_handlers() {
        let validator = ResponseValidator::new();
        assert!(!validator.is_safe("<a href=\"javascript:void(0)\">x</a>"));
        assert!(!validator.is_safe("<img src=x onerror=alert(1)>"));
        assert!(!validator.is_safe("<div onclick = \"evil()\">hi</div>"));
    }

    #[test]
    fn rejects_embedding_tags() {
        let validator = ResponseValidator::new();
        assert!(!validator.is_safe("<iframe src=\"https://x\"></iframe>"));
        assert!(!validator.is_safe("<object data=\"x\">fallback</object>"));
        assert!(!validator.is_safe("<embed src=\"x.swf\">"));
    }

    #[test]
    fn accepts_plain_text_and_safe_markup() {
        let validator = ResponseValidator::new();
        assert!(validator.is_safe("A perfectly ordinary article body."));
        assert!(validator.is_safe("<p>Paragraph with <strong>emphasis</strong>.</p>"));
        // Prose mentioning events is fine; only attribute patterns match.
        assert!(validator.is_safe("The season opener drew a record crowd."));
    }

    #[test]
    fn title_sanitizer_strips_control_characters() {
        assert_eq!(sanitize_title("  Breaking:\tNews\u{0000}now \n"), "Breaking: News now");
    }

    #[test]
    fn rich_text_keeps_allowed_tags_and_drops_the_rest() {
        let input = "<div class=\"x\"><p style=\"color:red\">Hello <strong>world</strong></p></div>";
        assert_eq!(sanitize_rich_text(input), "<p>Hello <strong>world</strong></p>");
    }

    #[test]
    fn anchors_keep_http_targets_only() {
        let keep = "<a href=\"https://example.com/a\" target=\"_blank\">link</a>";
        assert_eq!(
            sanitize_rich_text(keep),
            "<a href=\"https://example.com/a\">link</a>"
        );
        let drop = "<a href=\"ftp://example.com\">link</a>";
        assert_eq!(sanitize_rich_text(drop), "<a>link</a>");
    }

    #[test]
    fn strip_tags_flattens_to_plain_text() {
        assert_eq!(
            strip_tags("<p>One&nbsp;two</p>  <b>three</b>"),
            "One&nbsp;two three"
        );
    }
}
