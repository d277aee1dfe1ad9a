//! Simulation and display settings.
//!
//! `SandSettings` is the single configuration object passed explicitly to the
//! view. It can be loaded from / saved to a JSON file (native), encoded in the
//! URL hash as `#gui={...}` (browser), and edited live by remote
//! `{uid, value}` control messages.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key of the URL hash entry holding the settings JSON.
pub const URL_HASH_KEY: &str = "gui=";

/// `#gui={...}` or `&gui={...}`; group 2 is the (possibly escaped) JSON object.
fn url_hash_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([#&]gui=)((?:%7[Bb]|\{).*(?:%7[Dd]|\}))").expect("static regex"))
}

/// Upper bound on blur radius; matches the weight array size in the blur shader.
pub const MAX_BLUR_RADIUS: u32 = 15;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownField(String),
    #[error("invalid value for '{uid}': {source}")]
    InvalidValue {
        uid: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("settings i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
}

/// How grains respond to the reconstructed surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsMode {
    /// Reflect velocity off the surface normal (the "3D" mode).
    #[default]
    Reflect,
    /// Damp velocity by surface slope (the cheaper "2D" mode).
    Damp,
}

impl PhysicsMode {
    /// Convert to GPU-compatible u32.
    pub fn to_u32(self) -> u32 {
        match self {
            PhysicsMode::Reflect => 0,
            PhysicsMode::Damp => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PhysicsMode::Reflect => PhysicsMode::Damp,
            PhysicsMode::Damp => PhysicsMode::Reflect,
        }
    }
}

impl FromStr for PhysicsMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reflect" | "3d" => Ok(PhysicsMode::Reflect),
            "damp" | "2d" => Ok(PhysicsMode::Damp),
            _ => Err(SettingsError::UnknownMode(s.to_string())),
        }
    }
}

/// What the display pass shows on the visible target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Reconstructed normals as colour.
    #[default]
    Normals,
    /// Blurred height field.
    Height,
    /// Simple lit sand colour.
    Shaded,
    /// Grains drawn directly through the camera.
    Grains,
}

impl DisplayMode {
    /// Convert to GPU-compatible u32.
    pub fn to_u32(self) -> u32 {
        match self {
            DisplayMode::Normals => 0,
            DisplayMode::Height => 1,
            DisplayMode::Shaded => 2,
            DisplayMode::Grains => 3,
        }
    }

    /// Cycle to the next mode (debug key binding).
    pub fn next(self) -> Self {
        match self {
            DisplayMode::Normals => DisplayMode::Height,
            DisplayMode::Height => DisplayMode::Shaded,
            DisplayMode::Shaded => DisplayMode::Grains,
            DisplayMode::Grains => DisplayMode::Normals,
        }
    }
}

impl FromStr for DisplayMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normals" => Ok(DisplayMode::Normals),
            "height" | "depth" => Ok(DisplayMode::Height),
            "shaded" | "lit" => Ok(DisplayMode::Shaded),
            "grains" | "points" => Ok(DisplayMode::Grains),
            _ => Err(SettingsError::UnknownMode(s.to_string())),
        }
    }
}

/// All tunables of the sand simulation and its processing passes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandSettings {
    /// Number of grains. Applied on (re)seed.
    pub grain_count: u32,
    /// Constant velocity added to every grain each step.
    pub wind: [f32; 3],
    /// Scale of the pointer impulse.
    pub pointer_strength: f32,
    /// Radius (normalised units) of pointer influence.
    pub pointer_radius: f32,
    /// Per-step velocity multiplier.
    pub damping: f32,
    pub physics_mode: PhysicsMode,
    /// Slope damping factor used by `PhysicsMode::Damp`.
    pub friction: f32,
    /// Energy kept on reflection in `PhysicsMode::Reflect`.
    pub restitution: f32,
    /// Speed below which a grain counts as settled.
    pub settle_threshold: f32,
    /// Height added per grain in the height pass.
    pub deposit: f32,
    pub blur_radius: u32,
    pub blur_sigma: f32,
    /// Slope exaggeration for normal reconstruction.
    pub normal_strength: f32,
    /// Grain quad size in pixels.
    pub point_size: f32,
    pub display: DisplayMode,
    pub background: [f32; 3],
    /// Fixed seed for grain placement. Random when absent.
    pub seed: Option<u64>,
}

impl Default for SandSettings {
    fn default() -> Self {
        Self {
            grain_count: 100_000,
            wind: [0.0, 0.0, 0.0],
            pointer_strength: 0.8,
            pointer_radius: 0.3,
            damping: 0.95,
            physics_mode: PhysicsMode::Reflect,
            friction: 0.5,
            restitution: 0.5,
            settle_threshold: 1.0e-4,
            deposit: 0.01,
            blur_radius: 4,
            blur_sigma: 2.0,
            normal_strength: 40.0,
            point_size: 2.0,
            display: DisplayMode::Normals,
            background: [0.0, 0.0, 0.0],
            seed: None,
        }
    }
}

impl SandSettings {
    /// Clamp every field to a usable range.
    pub fn sanitize(&self) -> Self {
        let finite = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        let defaults = Self::default();
        Self {
            grain_count: self.grain_count.clamp(1, 1_000_000),
            wind: self.wind.map(|w| finite(w, 0.0)),
            pointer_strength: finite(self.pointer_strength, defaults.pointer_strength),
            pointer_radius: finite(self.pointer_radius, defaults.pointer_radius).max(0.0),
            damping: finite(self.damping, defaults.damping).clamp(0.0, 1.0),
            physics_mode: self.physics_mode,
            friction: finite(self.friction, defaults.friction).clamp(0.0, 1.0),
            restitution: finite(self.restitution, defaults.restitution).clamp(0.0, 1.0),
            settle_threshold: finite(self.settle_threshold, defaults.settle_threshold).max(0.0),
            deposit: finite(self.deposit, defaults.deposit).max(0.0),
            blur_radius: self.blur_radius.min(MAX_BLUR_RADIUS),
            blur_sigma: finite(self.blur_sigma, defaults.blur_sigma).max(0.01),
            normal_strength: finite(self.normal_strength, defaults.normal_strength).max(0.0),
            point_size: finite(self.point_size, defaults.point_size).clamp(1.0, 16.0),
            display: self.display,
            background: self.background.map(|c| finite(c, 0.0).clamp(0.0, 1.0)),
            seed: self.seed,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: SandSettings = serde_json::from_str(json)?;
        Ok(settings.sanitize())
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode settings from a URL hash such as `#view=2&gui={"damping":0.9}`.
    ///
    /// Returns `None` when the hash carries no `gui=` entry. Other entries are
    /// ignored and missing fields take their defaults.
    pub fn from_url_hash(hash: &str) -> Option<Result<Self, SettingsError>> {
        let encoded = url_hash_entry().captures(hash)?.get(2)?.as_str();
        Some(Self::from_json(&percent_decode(encoded)))
    }

    /// Encode as `#gui={...}`.
    pub fn to_url_hash(&self) -> Result<String, SettingsError> {
        self.splice_url_hash("")
    }

    /// Write these settings into `hash`, keeping its other entries.
    ///
    /// An existing `gui=` object is replaced in place; otherwise the entry is
    /// appended with `&`, or becomes the whole hash when `hash` is empty.
    pub fn splice_url_hash(&self, hash: &str) -> Result<String, SettingsError> {
        let json = serde_json::to_string(self)?;
        if let Some(range) = url_hash_entry().captures(hash).and_then(|c| c.get(2)).map(|m| m.range()) {
            let mut out = String::with_capacity(hash.len() - range.len() + json.len());
            out.push_str(&hash[..range.start]);
            out.push_str(&json);
            out.push_str(&hash[range.end..]);
            return Ok(out);
        }
        let rest = hash.trim_start_matches('#');
        if rest.is_empty() {
            Ok(format!("#{}{}", URL_HASH_KEY, json))
        } else {
            Ok(format!("#{}&{}{}", rest, URL_HASH_KEY, json))
        }
    }

    /// Apply a single remote edit. The settings are unchanged on error.
    pub fn apply(&mut self, message: &ControlMessage) -> Result<(), SettingsError> {
        let mut value = serde_json::to_value(&*self)?;
        let Some(object) = value.as_object_mut() else {
            return Err(SettingsError::UnknownField(message.uid.clone()));
        };
        match object.get_mut(&message.uid) {
            Some(field) => *field = message.value.clone(),
            None => return Err(SettingsError::UnknownField(message.uid.clone())),
        }
        let updated: SandSettings =
            serde_json::from_value(value).map_err(|source| SettingsError::InvalidValue {
                uid: message.uid.clone(),
                source,
            })?;
        *self = updated.sanitize();
        Ok(())
    }
}

/// A remote control-panel edit: `{"uid": "damping", "value": 0.9}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub uid: String,
    pub value: serde_json::Value,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Load/save hooks for persisting settings across runs.
pub trait SettingsStore {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<SandSettings>, SettingsError>;
    fn save(&self, settings: &SandSettings) -> Result<(), SettingsError>;
}

/// Settings persisted as a pretty-printed JSON file.
#[cfg(not(target_arch = "wasm32"))]
pub struct JsonFileStore {
    path: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl JsonFileStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Option<SandSettings>, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => SandSettings::from_json(&contents).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, settings: &SandSettings) -> Result<(), SettingsError> {
        std::fs::write(&self.path, settings.to_json()?)?;
        log::info!("Saved settings to {}", self.path.display());
        Ok(())
    }
}

/// Decode `%XX` escapes. Invalid escapes are kept verbatim.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
