//! Color table: `!COLOUR` definitions, direct and blended codes, sRGB to linear.
//!
//! Resolution never fails. A code is looked up in this order:
//!
//! 1. a registered definition
//! 2. a direct hex value (`#RRGGBB[AA]`, `0x2RRGGBB`, `0xRRGGBB`)
//! 3. a blended code in `256..=511`, the integer mean of two palette entries
//! 4. any other integer read as a packed hex value
//! 5. a bright red fallback with a green edge
//!
//! Derived definitions are cached so every later lookup of the same code
//! returns the same `Arc`.

pub mod palette;
mod parse;

pub use parse::{format_hex, parse_color_value, parse_colour};

use crate::types::ColorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

const DERIVED_EDGE: [u8; 3] = [0x33, 0x33, 0x33];
const FALLBACK_RGB: [u8; 3] = [0xFF, 0x00, 0x00];
const FALLBACK_EDGE: [u8; 3] = [0x00, 0xFF, 0x00];

/// Surface finish of a color.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Finish {
    Chrome,
    Pearlescent,
    Rubber,
    MatteMetallic,
    Metal,
    Speckle(GrainMaterial),
    Glitter(GrainMaterial),
    Fabric { kind: String },
}

/// Parameters of a speckle or glitter material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrainMaterial {
    pub rgb: [u8; 3],
    pub alpha: u8,
    pub luminance: f32,
    pub fraction: f32,
    pub vfraction: f32,
    pub min_size: f32,
    pub max_size: f32,
}

/// A resolved color. Stored channels are sRGB.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorDefinition {
    pub code: ColorCode,
    pub name: Option<String>,
    pub rgb: [u8; 3],
    pub alpha: u8,
    pub edge: [u8; 3],
    /// Set when `EDGE` names another code rather than a value.
    pub edge_code: Option<ColorCode>,
    pub luminance: f32,
    pub finish: Option<Finish>,
    /// Palette indices of a blended code.
    pub blend_source: Option<(u32, u32)>,
    pub is_fallback: bool,
}

impl ColorDefinition {
    fn derived(code: &ColorCode, rgb: [u8; 3], alpha: Option<u8>) -> Self {
        Self {
            code: code.clone(),
            name: None,
            rgb,
            alpha: alpha.unwrap_or(255),
            edge: DERIVED_EDGE,
            edge_code: None,
            luminance: 0.0,
            finish: None,
            blend_source: None,
            is_fallback: false,
        }
    }

    fn fallback(code: &ColorCode) -> Self {
        Self {
            name: Some("Bad_Color".to_string()),
            edge: FALLBACK_EDGE,
            is_fallback: true,
            ..Self::derived(code, FALLBACK_RGB, None)
        }
    }

    pub fn hex(&self) -> String {
        format_hex(self.rgb)
    }

    pub fn is_transparent(&self) -> bool {
        self.alpha < 255
    }

    /// Linear-light RGBA.
    pub fn linear_rgba(&self) -> [f32; 4] {
        let [r, g, b] = linear_rgb(self.rgb);
        [r, g, b, self.alpha as f32 / 255.0]
    }

    /// Linear-light edge RGB.
    pub fn linear_edge(&self) -> [f32; 3] {
        linear_rgb(self.edge)
    }
}

/// Decode one sRGB channel in `0..=1` to linear light.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c < 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_rgb(rgb: [u8; 3]) -> [f32; 3] {
    rgb.map(|c| srgb_to_linear(c as f32 / 255.0))
}

/// Which seed file and overrides to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    #[default]
    Ldraw,
    Alternate,
    Realistic,
}

impl ColorScheme {
    /// Name of the configuration document that seeds the table.
    pub fn config_file(self) -> &'static str {
        match self {
            ColorScheme::Alternate => "LDCfgalt.ldr",
            ColorScheme::Ldraw | ColorScheme::Realistic => "LDConfig.ldr",
        }
    }

    pub fn overrides(self) -> Option<&'static [(u32, [u8; 3])]> {
        match self {
            ColorScheme::Realistic => Some(palette::REALISTIC_OVERRIDES),
            _ => None,
        }
    }
}

/// Shared, thread-safe color table.
#[derive(Debug, Default)]
pub struct ColorTable {
    colors: RwLock<HashMap<ColorCode, Arc<ColorDefinition>>>,
}

impl ColorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configuration text.
    pub fn from_config(text: &str) -> Self {
        let table = Self::new();
        table.seed(text);
        table
    }

    /// Register every `0 !COLOUR` line in `text`. Returns how many were added.
    pub fn seed(&self, text: &str) -> usize {
        let mut added = 0;
        for (index, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 || tokens[0] != "0" || !tokens[1].eq_ignore_ascii_case("!colour") {
                continue;
            }
            match parse_colour(&tokens[2..]) {
                Ok(def) => {
                    self.register(def);
                    added += 1;
                }
                Err(reason) => {
                    tracing::warn!(line = index + 1, %reason, "skipping colour definition");
                }
            }
        }
        tracing::debug!(count = added, "seeded color table");
        added
    }

    /// Register a definition, replacing any previous one.
    pub fn register(&self, def: ColorDefinition) -> Arc<ColorDefinition> {
        let def = Arc::new(def);
        self.write().insert(def.code.clone(), def.clone());
        def
    }

    /// Register a definition unless its code is already known.
    ///
    /// A fallback cached by an earlier lookup does not count as known.
    pub fn register_if_absent(&self, def: ColorDefinition) -> bool {
        let mut colors = self.write();
        if colors.get(&def.code).is_some_and(|known| !known.is_fallback) {
            return false;
        }
        colors.insert(def.code.clone(), Arc::new(def));
        true
    }

    pub fn get(&self, code: &ColorCode) -> Option<Arc<ColorDefinition>> {
        self.colors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    pub fn contains(&self, code: &ColorCode) -> bool {
        self.get(code).is_some()
    }

    pub fn len(&self) -> usize {
        self.colors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a code to a definition. Never fails.
    pub fn resolve(&self, code: &ColorCode) -> Arc<ColorDefinition> {
        if let Some(def) = self.get(code) {
            return def;
        }
        let synthesized = Arc::new(synthesize(code));
        self.write()
            .entry(code.clone())
            .or_insert(synthesized)
            .clone()
    }

    /// Edge RGB of a definition, following `EDGE <code>` references.
    pub fn edge_rgb(&self, def: &ColorDefinition) -> [u8; 3] {
        match &def.edge_code {
            Some(code) if code != &def.code => self.resolve(code).rgb,
            _ => def.edge,
        }
    }

    /// Replace base colors of the given codes, keeping alpha, edge and finish.
    pub fn apply_overrides(&self, overrides: &[(u32, [u8; 3])]) {
        for &(code, rgb) in overrides {
            let code = ColorCode::from(code);
            let current = self.resolve(&code);
            let replaced = if current.is_fallback {
                ColorDefinition::derived(&code, rgb, None)
            } else {
                ColorDefinition {
                    rgb,
                    ..(*current).clone()
                }
            };
            self.register(replaced);
        }
    }

    /// Blended code for two palette indices.
    pub fn blended_code(a: usize, b: usize) -> u32 {
        palette::blended_code(a, b)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ColorCode, Arc<ColorDefinition>>> {
        self.colors.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn synthesize(code: &ColorCode) -> ColorDefinition {
    if let Some((rgb, alpha)) = parse_color_value(code.as_str()) {
        return ColorDefinition::derived(code, rgb, alpha);
    }

    let number: Option<u64> = code.as_str().parse().ok();
    if let Some((a, b)) = number
        .and_then(|n| u32::try_from(n).ok())
        .and_then(palette::blend_indices)
    {
        // go through hex so the result matches a direct parse of the mean
        let hex = format!("0x{}", &format_hex(palette::blend(a, b))[1..]);
        if let Some((rgb, alpha)) = parse_color_value(&hex) {
            return ColorDefinition {
                blend_source: Some((a as u32, b as u32)),
                ..ColorDefinition::derived(code, rgb, alpha)
            };
        }
    }

    if let Some(n) = number {
        let hex = format!("0x{:x}", n);
        if let Some((rgb, alpha)) = parse_color_value(&hex) {
            return ColorDefinition::derived(code, rgb, alpha);
        }
    }

    tracing::warn!(code = %code, "unknown color code, using fallback");
    ColorDefinition::fallback(code)
}
