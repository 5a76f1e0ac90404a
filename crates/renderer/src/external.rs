//! Latest values of externally bound uniforms (`_IN_<name>`).
//!
//! An outside producer pushes textual updates at any time; the render thread
//! copies every value out under the lock once per tick.
use std::sync::{Arc, Mutex};

use modconfig::{BindDecl, BindType};
use preprocess::Color;
use thiserror::Error;

use crate::types::UniformValue;

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("no external bind named '{0}' was declared")]
    UnknownBind(String),
    #[error("cannot decode '{text}' as {ty} for bind '{name}': {reason}")]
    Decode {
        name: String,
        ty: BindType,
        text: String,
        reason: String,
    },
    #[error("external value store has been poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct Slot {
    name: String,
    ty: BindType,
    value: UniformValue,
}

/// Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct ExternalValues {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl ExternalValues {
    /// One slot per declaration, seeded from its initial value or zero.
    pub fn new(binds: &[BindDecl]) -> Result<Self, ExternalError> {
        let slots = binds
            .iter()
            .map(|bind| {
                let value = match &bind.value {
                    Some(text) => decode_value(&bind.name, bind.ty, text)?,
                    None => zero(bind.ty),
                };
                Ok(Slot {
                    name: bind.name.clone(),
                    ty: bind.ty,
                    value,
                })
            })
            .collect::<Result<Vec<_>, ExternalError>>()?;
        Ok(Self {
            slots: Arc::new(Mutex::new(slots)),
        })
    }

    /// Decodes `text` for `name` and stores it; the previous value survives a
    /// failed decode.
    pub fn set(&self, name: &str, text: &str) -> Result<(), ExternalError> {
        let mut slots = self.slots.lock().map_err(|_| ExternalError::Poisoned)?;
        let slot = slots
            .iter_mut()
            .find(|slot| slot.name == name)
            .ok_or_else(|| ExternalError::UnknownBind(name.to_string()))?;
        slot.value = decode_value(name, slot.ty, text)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<UniformValue>, ExternalError> {
        let slots = self.slots.lock().map_err(|_| ExternalError::Poisoned)?;
        Ok(slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.value))
    }

    /// Copies every value, in declaration order, into `out`.
    pub fn snapshot_into(&self, out: &mut Vec<UniformValue>) -> Result<(), ExternalError> {
        let slots = self.slots.lock().map_err(|_| ExternalError::Poisoned)?;
        out.clear();
        out.extend(slots.iter().map(|slot| slot.value));
        Ok(())
    }
}

fn zero(ty: BindType) -> UniformValue {
    match ty {
        BindType::Float => UniformValue::Float(0.0),
        BindType::Int => UniformValue::Int(0),
        BindType::Bool => UniformValue::Bool(false),
        BindType::Vec2 => UniformValue::Vec2([0.0; 2]),
        BindType::Vec3 => UniformValue::Vec3([0.0; 3]),
        BindType::Vec4 => UniformValue::Vec4([0.0; 4]),
    }
}

/// Accepts `#RRGGBB[AA]` (vectors only), plain numbers, `true`/`false`, and
/// tuples such as `(0.5, 1)` or `0.5 1`.
pub fn decode_value(name: &str, ty: BindType, text: &str) -> Result<UniformValue, ExternalError> {
    let fail = |reason: String| ExternalError::Decode {
        name: name.to_string(),
        ty,
        text: text.to_string(),
        reason,
    };
    let trimmed = text.trim();
    match ty {
        BindType::Float => trimmed
            .parse::<f32>()
            .map(UniformValue::Float)
            .map_err(|err| fail(err.to_string())),
        BindType::Int => trimmed
            .parse::<i32>()
            .map(UniformValue::Int)
            .map_err(|err| fail(err.to_string())),
        BindType::Bool => match trimmed {
            "true" | "1" => Ok(UniformValue::Bool(true)),
            "false" | "0" => Ok(UniformValue::Bool(false)),
            _ => Err(fail("expected true or false".into())),
        },
        BindType::Vec2 | BindType::Vec3 | BindType::Vec4 => {
            let components = if trimmed.starts_with('#') {
                Color::from_hex(trimmed)
                    .map_err(|err| fail(err.to_string()))?
                    .rgba
                    .to_vec()
            } else {
                parse_tuple(trimmed).map_err(fail)?
            };
            let want = ty.components();
            let from_color = trimmed.starts_with('#');
            if components.len() != want && !(from_color && components.len() > want) {
                return Err(fail(format!(
                    "expected {want} components, found {}",
                    components.len()
                )));
            }
            Ok(match ty {
                BindType::Vec2 => UniformValue::Vec2([components[0], components[1]]),
                BindType::Vec3 => {
                    UniformValue::Vec3([components[0], components[1], components[2]])
                }
                _ => UniformValue::Vec4([
                    components[0],
                    components[1],
                    components[2],
                    components[3],
                ]),
            })
        }
    }
}

fn parse_tuple(text: &str) -> Result<Vec<f32>, String> {
    let inner = text
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(text);
    inner
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f32>().map_err(|err| format!("'{part}': {err}")))
        .collect()
}
