//! Style and layout configuration, partial updates, and the flat
//! host-facing [`Appearance`] record.
//!
//! The pure transforms from configuration to renderer input live in
//! [`css`].

pub mod css;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use css::{ChromeColors, chrome_colors, renderer_attributes, stylesheets};

/// Typography and color configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    pub line_height: f64,
    pub justify: bool,
    pub hyphenate: bool,
    pub is_dark: bool,
    /// Swap the light theme's foreground and background for the chrome.
    pub invert: bool,
    pub theme: Theme,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            line_height: 1.4,
            justify: true,
            hyphenate: true,
            is_dark: false,
            invert: false,
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub name: String,
    pub light: ThemeColors,
    pub dark: ThemeColors,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: "default".into(),
            light: ThemeColors::new("#000000", "#ffffff", "#0066cc"),
            dark: ThemeColors::new("#e0e0e0", "#222222", "#88ccee"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeColors {
    pub fg: String,
    pub bg: String,
    pub link: String,
}

impl ThemeColors {
    pub fn new(fg: &str, bg: &str, link: &str) -> Self {
        Self {
            fg: fg.into(),
            bg: bg.into(),
            link: link.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    #[default]
    Paginated,
    Scrolled,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Flow::Paginated => "paginated",
            Flow::Scrolled => "scrolled",
        })
    }
}

/// Pagination geometry handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    /// Column gap as a fraction of the page width.
    pub gap: f64,
    pub max_inline_size: u32,
    pub max_block_size: u32,
    pub max_column_count: u32,
    pub flow: Flow,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            gap: 0.06,
            max_inline_size: 1440,
            max_block_size: 720,
            max_column_count: 2,
            flow: Flow::Paginated,
        }
    }
}

/// A partial [`StyleConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StylePatch {
    pub line_height: Option<f64>,
    pub justify: Option<bool>,
    pub hyphenate: Option<bool>,
    pub is_dark: Option<bool>,
    pub invert: Option<bool>,
    pub theme: Option<ThemePatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemePatch {
    pub name: Option<String>,
    pub light: Option<ColorsPatch>,
    pub dark: Option<ColorsPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsPatch {
    pub fg: Option<String>,
    pub bg: Option<String>,
    pub link: Option<String>,
}

/// A partial [`LayoutConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutPatch {
    pub gap: Option<f64>,
    pub max_inline_size: Option<u32>,
    pub max_block_size: Option<u32>,
    pub max_column_count: Option<u32>,
    pub flow: Option<Flow>,
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl StyleConfig {
    pub fn apply(&mut self, patch: StylePatch) {
        merge(&mut self.line_height, patch.line_height);
        merge(&mut self.justify, patch.justify);
        merge(&mut self.hyphenate, patch.hyphenate);
        merge(&mut self.is_dark, patch.is_dark);
        merge(&mut self.invert, patch.invert);
        if let Some(theme) = patch.theme {
            self.theme.apply(theme);
        }
    }
}

impl Theme {
    pub fn apply(&mut self, patch: ThemePatch) {
        merge(&mut self.name, patch.name);
        if let Some(light) = patch.light {
            self.light.apply(light);
        }
        if let Some(dark) = patch.dark {
            self.dark.apply(dark);
        }
    }
}

impl ThemeColors {
    pub fn apply(&mut self, patch: ColorsPatch) {
        merge(&mut self.fg, patch.fg);
        merge(&mut self.bg, patch.bg);
        merge(&mut self.link, patch.link);
    }
}

impl LayoutConfig {
    pub fn apply(&mut self, patch: LayoutPatch) {
        merge(&mut self.gap, patch.gap);
        merge(&mut self.max_inline_size, patch.max_inline_size);
        merge(&mut self.max_block_size, patch.max_block_size);
        merge(&mut self.max_column_count, patch.max_column_count);
        merge(&mut self.flow, patch.flow);
    }
}

/// Flat appearance record exchanged with the host, covering both style and
/// layout. Absent fields are left unchanged when applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Appearance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justify: Option<bool>,
    /// Older hosts spell this `hypenate`.
    #[serde(alias = "hypenate", skip_serializing_if = "Option::is_none")]
    pub hyphenate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invert: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_fg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_fg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_bg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_dark: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_inline_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_block_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_column_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<Flow>,
}

impl Appearance {
    /// Snapshot of a full configuration; every field is present.
    pub fn from_config(style: &StyleConfig, layout: &LayoutConfig) -> Self {
        let theme = &style.theme;
        Self {
            line_height: Some(style.line_height),
            justify: Some(style.justify),
            hyphenate: Some(style.hyphenate),
            invert: Some(style.invert),
            theme_name: Some(theme.name.clone()),
            light_fg: Some(theme.light.fg.clone()),
            light_bg: Some(theme.light.bg.clone()),
            light_link: Some(theme.light.link.clone()),
            dark_fg: Some(theme.dark.fg.clone()),
            dark_bg: Some(theme.dark.bg.clone()),
            dark_link: Some(theme.dark.link.clone()),
            use_dark: Some(style.is_dark),
            gap: Some(layout.gap),
            max_inline_size: Some(layout.max_inline_size),
            max_block_size: Some(layout.max_block_size),
            max_column_count: Some(layout.max_column_count),
            flow: Some(layout.flow),
        }
    }

    pub fn into_patches(self) -> (StylePatch, LayoutPatch) {
        let colors = |fg, bg, link| {
            let patch = ColorsPatch { fg, bg, link };
            (patch != ColorsPatch::default()).then_some(patch)
        };
        let theme = ThemePatch {
            name: self.theme_name,
            light: colors(self.light_fg, self.light_bg, self.light_link),
            dark: colors(self.dark_fg, self.dark_bg, self.dark_link),
        };

        let style = StylePatch {
            line_height: self.line_height,
            justify: self.justify,
            hyphenate: self.hyphenate,
            is_dark: self.use_dark,
            invert: self.invert,
            theme: (theme != ThemePatch::default()).then_some(theme),
        };
        let layout = LayoutPatch {
            gap: self.gap,
            max_inline_size: self.max_inline_size,
            max_block_size: self.max_block_size,
            max_column_count: self.max_column_count,
            flow: self.flow,
        };
        (style, layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let style = StyleConfig::default();
        assert_eq!(style.line_height, 1.4);
        assert_eq!(style.theme.dark.bg, "#222222");
        let layout = LayoutConfig::default();
        assert_eq!(layout.max_inline_size, 1440);
        assert_eq!(layout.flow.to_string(), "paginated");
    }

    #[test]
    fn test_partial_patch_keeps_other_fields() {
        let mut style = StyleConfig::default();
        style.apply(StylePatch {
            is_dark: Some(true),
            theme: Some(ThemePatch {
                dark: Some(ColorsPatch {
                    fg: Some("#cccccc".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let mut expected = StyleConfig::default();
        expected.is_dark = true;
        expected.theme.dark.fg = "#cccccc".into();
        assert_eq!(style, expected);
    }

    #[test]
    fn test_appearance_accepts_legacy_hyphenate_key() {
        let appearance: Appearance =
            serde_json::from_str(r#"{"hypenate": false, "useDark": true, "flow": "scrolled"}"#)
                .unwrap();
        assert_eq!(appearance.hyphenate, Some(false));

        let (style, layout) = appearance.into_patches();
        assert_eq!(style.hyphenate, Some(false));
        assert_eq!(style.is_dark, Some(true));
        assert_eq!(style.theme, None);
        assert_eq!(layout.flow, Some(Flow::Scrolled));
        assert_eq!(layout.gap, None);
    }

    #[test]
    fn test_appearance_snapshot_round_trips() {
        let mut style = StyleConfig::default();
        style.theme.light.link = "#ff0000".into();
        let layout = LayoutConfig {
            max_column_count: 1,
            ..Default::default()
        };

        let json = serde_json::to_string(&Appearance::from_config(&style, &layout)).unwrap();
        let appearance: Appearance = serde_json::from_str(&json).unwrap();
        let (style_patch, layout_patch) = appearance.into_patches();

        let mut restored_style = StyleConfig::default();
        restored_style.apply(style_patch);
        let mut restored_layout = LayoutConfig::default();
        restored_layout.apply(layout_patch);
        assert_eq!(restored_style, style);
        assert_eq!(restored_layout, layout);
    }

    #[test]
    fn test_style_config_deserializes_partially() {
        let style: StyleConfig = serde_json::from_str(r#"{"lineHeight": 1.8}"#).unwrap();
        assert_eq!(style.line_height, 1.8);
        assert!(style.justify);
    }
}
