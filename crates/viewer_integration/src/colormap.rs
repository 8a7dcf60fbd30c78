use anyhow::{anyhow, Result};

const PRESETS: &[&str] = &[
    "Greys", "Viridis", "Plasma", "Inferno", "Magma", "Hot", "Cool", "Jet", "Red", "Green",
    "Blue",
];

/// Named lookup table; the renderer owns the actual color stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMap {
    name: &'static str,
}

impl ColorMap {
    pub fn from_preset(name: &str) -> Result<Self> {
        PRESETS
            .iter()
            .find(|preset| preset.eq_ignore_ascii_case(name))
            .map(|preset| Self { name: preset })
            .ok_or_else(|| anyhow!("unknown colormap preset '{name}'"))
    }

    pub fn name(&self) -> &str {
        self.name
    }
}
