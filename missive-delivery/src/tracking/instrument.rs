//! HTML rewriting for open pixels and click redirects.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used, reason = "The pattern is a literal")]
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid href pattern")
});

const SKIPPED_SCHEMES: [&str; 4] = ["mailto:", "tel:", "sms:", "javascript:"];
const SUBSCRIPTION_MARKERS: [&str; 4] = [
    "unsubscribe",
    "preferences",
    "manage-subscription",
    "manage_subscription",
];

/// Insert `pixel` right before the last `</body>`, or append it when the
/// body has no closing tag.
#[must_use]
pub fn insert_pixel(body: &str, pixel: &str) -> String {
    let lowered = body.to_ascii_lowercase();
    lowered.rfind("</body>").map_or_else(
        || format!("{body}{pixel}"),
        |at| {
            let mut out = String::with_capacity(body.len() + pixel.len());
            out.push_str(&body[..at]);
            out.push_str(pixel);
            out.push_str(&body[at..]);
            out
        },
    )
}

/// Whether a link target should be wrapped in a click redirect.
///
/// `tracked_prefix` identifies links that already point at the tracking
/// endpoint.
#[must_use]
pub fn is_trackable(url: &str, tracked_prefix: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.starts_with('#') || url.contains("{{") {
        return false;
    }

    let lowered = url.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return false;
    }
    if SUBSCRIPTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return false;
    }

    !(url.starts_with(tracked_prefix) && lowered.contains("track="))
}

/// Replace each `href` value for which `rewrite` returns a new target.
///
/// The original quote style is preserved. `rewrite` receives the target
/// with `&amp;` decoded.
pub fn rewrite_links(body: &str, mut rewrite: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut last = 0;

    for captures in HREF.captures_iter(body) {
        let (Some(whole), Some(target)) = (captures.get(0), captures.get(1).or(captures.get(2)))
        else {
            continue;
        };

        let decoded = target.as_str().replace("&amp;", "&");
        let Some(replacement) = rewrite(&decoded) else {
            continue;
        };

        let quote = if captures.get(1).is_some() { '"' } else { '\'' };
        out.push_str(&body[last..whole.start()]);
        out.push_str("href=");
        out.push(quote);
        out.push_str(&replacement);
        out.push(quote);
        last = whole.end();
    }

    out.push_str(&body[last..]);
    out
}

/// Every `href` target in `body`, `&amp;` decoded, in document order.
#[must_use]
pub fn link_targets(body: &str) -> Vec<String> {
    HREF.captures_iter(body)
        .filter_map(|c| c.get(1).or(c.get(2)))
        .map(|m| m.as_str().replace("&amp;", "&"))
        .collect()
}
