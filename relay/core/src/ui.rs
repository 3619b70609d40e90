//! Panel page
//!
//! The browser side of the panel is a single static page compiled into the
//! binary. It opens a WebSocket back to `/ws` on the same host.

const TEMPLATE: &str = include_str!("../assets/panel.html");

const TITLE_SLOT: &str = "{{TITLE}}";

/// Default page heading
pub const DEFAULT_TITLE: &str = "Deep Code Assistant";

/// Render the panel page with the given title
#[must_use]
pub fn render_panel(title: &str) -> String {
    TEMPLATE.replace(TITLE_SLOT, &escape_html(title))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
