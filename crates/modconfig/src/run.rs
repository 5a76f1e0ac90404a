use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Software backend; needs no display or GPU.
    #[default]
    Headless,
    /// Offscreen `wgpu` backend.
    Gpu,
}

/// GLSL type of an externally bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Bool,
}

impl BindType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            BindType::Float => "float",
            BindType::Int => "int",
            BindType::Vec2 => "vec2",
            BindType::Vec3 => "vec3",
            BindType::Vec4 => "vec4",
            BindType::Bool => "bool",
        }
    }

    /// Number of scalar components.
    pub fn components(self) -> usize {
        match self {
            BindType::Float | BindType::Int | BindType::Bool => 1,
            BindType::Vec2 => 2,
            BindType::Vec3 => 3,
            BindType::Vec4 => 4,
        }
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// Declared external value that `@name` references may bind to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BindDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: BindType,
    /// Initial textual value, decoded like any later update.
    #[serde(default)]
    pub value: Option<String>,
}

/// Run file: which entry to load, where modules live, and what the outer
/// environment binds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    pub version: u32,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub config_dir: Option<String>,
    #[serde(default)]
    pub default_dir: Option<String>,
    #[serde(default)]
    pub backend: BackendKind,
    /// Extra `#request` lines applied before the entry file, without the
    /// `#request` keyword (e.g. `"setframerate 30"`).
    #[serde(default)]
    pub requests: Vec<String>,
    #[serde(default)]
    pub binds: Vec<BindDecl>,
    /// Stop after this long; runs until stopped externally when unset.
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
}

fn default_entry() -> String {
    "rc.glsl".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            version: 1,
            entry: default_entry(),
            config_dir: None,
            default_dir: None,
            backend: BackendKind::default(),
            requests: Vec::new(),
            binds: Vec::new(),
            duration: None,
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RunConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn entry_path(&self) -> PathBuf {
        PathBuf::from(&self.entry)
    }

    pub fn bind(&self, name: &str) -> Option<&BindDecl> {
        self.binds.iter().find(|bind| bind.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.entry.trim().is_empty() {
            return Err(ConfigError::Invalid("entry must not be empty".into()));
        }

        for request in &self.requests {
            if request.trim().is_empty() {
                return Err(ConfigError::Invalid("requests may not be empty".into()));
            }
            if request.contains('\n') {
                return Err(ConfigError::Invalid(format!(
                    "request '{}' must fit on one line",
                    request.escape_debug()
                )));
            }
        }

        for (index, bind) in self.binds.iter().enumerate() {
            let valid_ident = bind
                .name
                .chars()
                .next()
                .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
                && bind
                    .name
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
            if !valid_ident {
                return Err(ConfigError::Invalid(format!(
                    "bind name '{}' is not a valid identifier",
                    bind.name
                )));
            }
            if self.binds[..index].iter().any(|other| other.name == bind.name) {
                return Err(ConfigError::Invalid(format!(
                    "bind '{}' is declared more than once",
                    bind.name
                )));
            }
        }

        if let Some(duration) = self.duration {
            if duration.is_zero() {
                return Err(ConfigError::Invalid("duration must be greater than zero".into()));
            }
        }

        Ok(())
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}
