use std::fmt;

use modconfig::BindType;

use crate::backend::TextureId;

/// Audio channels exposed to shaders (`audio_l`, `audio_r`).
pub const CHANNEL_COUNT: usize = 2;

/// GLSL type a bound uniform must be declared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Sampler2D,
    Sampler1D,
    Int,
    IVec2,
    Float,
    Bool,
    Vec2,
    Vec3,
    Vec4,
}

impl ValueType {
    pub fn glsl_name(self) -> &'static str {
        match self {
            ValueType::Sampler2D => "sampler2D",
            ValueType::Sampler1D => "sampler1D",
            ValueType::Int => "int",
            ValueType::IVec2 => "ivec2",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::Vec2 => "vec2",
            ValueType::Vec3 => "vec3",
            ValueType::Vec4 => "vec4",
        }
    }

    pub fn from_glsl(name: &str) -> Option<Self> {
        Some(match name {
            "sampler2D" => ValueType::Sampler2D,
            "sampler1D" => ValueType::Sampler1D,
            "int" => ValueType::Int,
            "ivec2" => ValueType::IVec2,
            "float" => ValueType::Float,
            "bool" => ValueType::Bool,
            "vec2" => ValueType::Vec2,
            "vec3" => ValueType::Vec3,
            "vec4" => ValueType::Vec4,
            _ => return None,
        })
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, ValueType::Sampler1D | ValueType::Sampler2D)
    }
}

impl From<BindType> for ValueType {
    fn from(ty: BindType) -> Self {
        match ty {
            BindType::Float => ValueType::Float,
            BindType::Int => ValueType::Int,
            BindType::Vec2 => ValueType::Vec2,
            BindType::Vec3 => ValueType::Vec3,
            BindType::Vec4 => ValueType::Vec4,
            BindType::Bool => ValueType::Bool,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glsl_name())
    }
}

/// Where a catalog entry's value comes from each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Output texture of the previous active stage.
    PrevTexture,
    AudioLeft,
    AudioRight,
    /// Audio buffer length in samples.
    AudioLength,
    ScreenSize,
    /// Seconds since the pipeline was created.
    Time,
}

impl SourceKind {
    /// Index of the audio channel this source reads, if any.
    pub fn channel(self) -> Option<usize> {
        match self {
            SourceKind::AudioLeft => Some(0),
            SourceKind::AudioRight => Some(1),
            _ => None,
        }
    }

    pub fn is_audio(self) -> bool {
        self.channel().is_some()
    }
}

/// Catalog entry a `#request uniform` may bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindSource {
    pub name: &'static str,
    pub value_type: ValueType,
    pub kind: SourceKind,
}

pub const BIND_SOURCES: [BindSource; 6] = [
    BindSource {
        name: "prev",
        value_type: ValueType::Sampler2D,
        kind: SourceKind::PrevTexture,
    },
    BindSource {
        name: "audio_l",
        value_type: ValueType::Sampler1D,
        kind: SourceKind::AudioLeft,
    },
    BindSource {
        name: "audio_r",
        value_type: ValueType::Sampler1D,
        kind: SourceKind::AudioRight,
    },
    BindSource {
        name: "audio_sz",
        value_type: ValueType::Int,
        kind: SourceKind::AudioLength,
    },
    BindSource {
        name: "screen",
        value_type: ValueType::IVec2,
        kind: SourceKind::ScreenSize,
    },
    BindSource {
        name: "time",
        value_type: ValueType::Float,
        kind: SourceKind::Time,
    },
];

pub fn lookup_source(name: &str) -> Option<&'static BindSource> {
    BIND_SOURCES.iter().find(|source| source.name == name)
}

/// Value handed to [`crate::GraphicsBackend::set_uniform`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    IVec2([i32; 2]),
    /// Sampler uniform; the backend assigns texture units.
    Texture(TextureId),
}

impl UniformValue {
    /// Zero value for a non-sampler type.
    pub fn zero(ty: ValueType) -> Option<Self> {
        Some(match ty {
            ValueType::Float => UniformValue::Float(0.0),
            ValueType::Int => UniformValue::Int(0),
            ValueType::Bool => UniformValue::Bool(false),
            ValueType::Vec2 => UniformValue::Vec2([0.0; 2]),
            ValueType::Vec3 => UniformValue::Vec3([0.0; 3]),
            ValueType::Vec4 => UniformValue::Vec4([0.0; 4]),
            ValueType::IVec2 => UniformValue::IVec2([0; 2]),
            ValueType::Sampler1D | ValueType::Sampler2D => return None,
        })
    }

    /// Whether the value can be stored in a uniform declared as `ty`.
    pub fn fits(&self, ty: ValueType) -> bool {
        matches!(
            (self, ty),
            (UniformValue::Float(_), ValueType::Float)
                | (UniformValue::Int(_), ValueType::Int)
                | (UniformValue::Bool(_), ValueType::Bool)
                | (UniformValue::Vec2(_), ValueType::Vec2)
                | (UniformValue::Vec3(_), ValueType::Vec3)
                | (UniformValue::Vec4(_), ValueType::Vec4)
                | (UniformValue::IVec2(_), ValueType::IVec2)
                | (UniformValue::Texture(_), ValueType::Sampler1D | ValueType::Sampler2D)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique_and_resolvable() {
        for source in &BIND_SOURCES {
            assert_eq!(lookup_source(source.name), Some(source));
        }
        assert_eq!(lookup_source("audio_l").map(|s| s.kind.channel()), Some(Some(0)));
        assert!(lookup_source("mouse").is_none());
    }

    #[test]
    fn values_fit_their_declared_types() {
        assert!(UniformValue::Texture(TextureId(3)).fits(ValueType::Sampler1D));
        assert!(!UniformValue::Float(1.0).fits(ValueType::Int));
        assert_eq!(UniformValue::zero(ValueType::Vec3), Some(UniformValue::Vec3([0.0; 3])));
        assert_eq!(UniformValue::zero(ValueType::Sampler2D), None);
        assert_eq!(ValueType::from_glsl("ivec2"), Some(ValueType::IVec2));
    }
}
