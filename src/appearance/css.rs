//! Configuration to renderer input: style-sheet fragments, renderer
//! attributes and the chrome's resolved colors.

use serde::Serialize;

use super::{LayoutConfig, StyleConfig};

/// Foreground/background for the hosting chrome (`--fg` / `--bg`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromeColors {
    pub fg: String,
    pub bg: String,
    /// Whether the resolved scheme is the dark one.
    pub dark: bool,
}

/// Resolve chrome colors: inversion, then dark mode, then the light theme.
pub fn chrome_colors(style: &StyleConfig) -> ChromeColors {
    let theme = &style.theme;
    if style.invert {
        ChromeColors {
            fg: theme.light.bg.clone(),
            bg: theme.light.fg.clone(),
            dark: true,
        }
    } else if style.is_dark {
        ChromeColors {
            fg: theme.dark.fg.clone(),
            bg: theme.dark.bg.clone(),
            dark: true,
        }
    } else {
        ChromeColors {
            fg: theme.light.fg.clone(),
            bg: theme.light.bg.clone(),
            dark: false,
        }
    }
}

/// The two style-sheet fragments for a configuration.
///
/// The first carries global typography, note suppression and alignment
/// overrides; the second re-applies the text settings to block elements for
/// renderers that layer fragments separately.
pub fn stylesheets(style: &StyleConfig) -> Vec<String> {
    let colors = if style.is_dark {
        &style.theme.dark
    } else {
        &style.theme.light
    };
    let line_height = style.line_height;
    let text_align = if style.justify { "justify" } else { "start" };
    let hyphens = if style.hyphenate { "auto" } else { "manual" };

    let base = format!(
        r#"
    @namespace epub "http://www.idpf.org/2007/ops";
    html {{
        color-scheme: 'only light';
        color: {fg};
    }}
    a:any-link {{
        color: {link};
    }}

    aside[epub|type~="endnote"],
    aside[epub|type~="footnote"],
    aside[epub|type~="note"],
    aside[epub|type~="rearnote"] {{
        display: none;
    }}

    html, body, p, li, blockquote, dd {{
        line-height: {line_height};
        text-align: {text_align};
        -webkit-hyphens: {hyphens};
        -webkit-hyphenate-limit-before: 3;
        -webkit-hyphenate-limit-after: 2;
        -webkit-hyphenate-limit-lines: 2;
        hanging-punctuation: allow-end last;
        orphans: 2;
        widows: 2;
    }}
    /* keep explicit align attributes */
    [align="left"] {{ text-align: left; }}
    [align="right"] {{ text-align: right; }}
    [align="center"] {{ text-align: center; }}
    [align="justify"] {{ text-align: justify; }}

    pre {{
        white-space: pre-wrap !important;
        tab-size: 2;
    }}
"#,
        fg = colors.fg,
        link = colors.link,
    );

    let narrow = format!(
        r#"
    p, li, blockquote, dd {{
        line-height: {line_height};
        text-align: {text_align};
        -webkit-hyphens: {hyphens};
    }}
"#
    );

    vec![base, narrow]
}

/// Renderer attributes for a layout, in the order they are applied.
pub fn renderer_attributes(layout: &LayoutConfig) -> Vec<(&'static str, String)> {
    vec![
        ("flow", layout.flow.to_string()),
        ("gap", format!("{}%", percent(layout.gap))),
        ("max-inline-size", format!("{}px", layout.max_inline_size)),
        ("max-block-size", format!("{}px", layout.max_block_size)),
        ("max-column-count", layout.max_column_count.to_string()),
    ]
}

/// A fraction as a percentage, rounded to drop float noise (0.06 -> 6).
fn percent(fraction: f64) -> f64 {
    (fraction * 100_000.0).round() / 1000.0
}
