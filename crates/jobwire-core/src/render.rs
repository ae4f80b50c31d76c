//! Rich-text span rendering (source entities → Telegram HTML).

use crate::domain::{SpanKind, TextSpan};

/// Escape `&`, `<`, `>` for Telegram HTML parse mode.
///
/// An ampersand that already starts an `&amp;`/`&lt;`/`&gt;` sequence is
/// left alone so re-rendering never double-escapes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => {
                let rest = &text[i..];
                if rest.starts_with("&amp;")
                    || rest.starts_with("&lt;")
                    || rest.starts_with("&gt;")
                {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape a URL for use inside an `href="..."` attribute.
fn escape_attr(url: &str) -> String {
    escape_html(url).replace('"', "&quot;")
}

/// Render message text with its spans into well-formed Telegram HTML.
///
/// Pure function of (text, spans): spans are validated (offset >= 0,
/// length > 0, in bounds), sorted by offset and applied left to right.
/// Overlapping spans (starting before the last emitted position) are
/// dropped; unrecognized kinds degrade to escaped plain text.
pub fn render_spans(text: &str, spans: &[TextSpan]) -> String {
    let chars: Vec<char> = text.chars().collect();

    let mut valid: Vec<&TextSpan> = spans
        .iter()
        .filter(|s| {
            s.offset >= 0 && s.length > 0 && (s.offset as usize) < chars.len()
        })
        .collect();
    valid.sort_by_key(|s| s.offset);

    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;

    for span in valid {
        let start = span.offset as usize;
        if start < last {
            continue;
        }
        let end = (start + span.length as usize).min(chars.len());

        if start > last {
            let segment: String = chars[last..start].iter().collect();
            out.push_str(&escape_html(&segment));
        }

        let raw: String = chars[start..end].iter().collect();
        out.push_str(&wrap(span, &raw));
        last = end;
    }

    if last < chars.len() {
        let tail: String = chars[last..].iter().collect();
        out.push_str(&escape_html(&tail));
    }

    out
}

fn wrap(span: &TextSpan, raw: &str) -> String {
    let escaped = escape_html(raw);
    match span.kind {
        SpanKind::Bold | SpanKind::Hashtag => format!("<b>{escaped}</b>"),
        SpanKind::Italic => format!("<i>{escaped}</i>"),
        SpanKind::Underline => format!("<u>{escaped}</u>"),
        SpanKind::Strikethrough => format!("<s>{escaped}</s>"),
        SpanKind::Code => format!("<code>{escaped}</code>"),
        SpanKind::Pre => format!("<pre>{escaped}</pre>"),
        SpanKind::TextUrl => match span.url.as_deref() {
            Some(url) => format!(r#"<a href="{}">{escaped}</a>"#, escape_attr(url)),
            None => escaped,
        },
        SpanKind::Url => format!(r#"<a href="{}">{escaped}</a>"#, escape_attr(raw)),
        SpanKind::Mention => format!(
            r#"<a href="https://t.me/{}">{escaped}</a>"#,
            raw.trim_start_matches('@')
        ),
        SpanKind::Other => escaped,
    }
}

/// Assemble the recipient-facing notification from a rendered body.
pub fn format_notification(topic_label: &str, url: &str, body_html: &str) -> String {
    format!(
        "🔔 New lead\n\n📂 {}\n\n📋 {}\n\n🔗 <a href=\"{}\">Open post</a>",
        escape_html(topic_label),
        body_html,
        escape_attr(url),
    )
}
