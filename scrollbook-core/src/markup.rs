use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid script pattern"));

static EVENT_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\son[a-z]+=(?:"[^"]*"|'[^']*')"#).expect("valid event attribute pattern")
});

pub const EMPTY_CHAPTER: &str = r#"<div class="empty">This chapter has no content</div>"#;

/// Strips script blocks and inline event handlers. Applying it twice yields
/// the same markup as applying it once.
pub fn sanitize(html: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(html, "");
    EVENT_ATTRIBUTE
        .replace_all(&without_scripts, "")
        .into_owned()
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Markup of one attached section: a chapter marker followed by the
/// re-sanitized body, or a placeholder when the body is blank.
pub fn render_section(title: &str, body: &str) -> String {
    let body = sanitize(body);
    let body = if body.trim().is_empty() {
        EMPTY_CHAPTER.to_string()
    } else {
        body
    };
    format!(
        r#"<div class="chapter-marker">{}</div>{}"#,
        escape_text(title),
        body
    )
}
