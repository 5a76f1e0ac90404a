use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::types::ValueType;

/// Where a translated uniform lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotKind {
    /// Byte offset inside the std140 stage block.
    Block { offset: u32 },
    /// Index of the texture/sampler pair in bind group 1.
    Texture { index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub name: String,
    pub ty: ValueType,
    pub kind: SlotKind,
}

/// Vulkan-flavoured GLSL ready for naga, with the uniform layout it uses.
#[derive(Debug, Clone)]
pub(crate) struct TranslatedFragment {
    pub source: String,
    pub slots: Vec<UniformSlot>,
    pub block_size: u64,
}

impl TranslatedFragment {
    pub fn texture_slots(&self) -> impl Iterator<Item = (u32, ValueType)> + '_ {
        self.slots.iter().filter_map(|slot| match slot.kind {
            SlotKind::Texture { index } => Some((index, slot.ty)),
            SlotKind::Block { .. } => None,
        })
    }
}

pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn fragment_module(
    device: &wgpu::Device,
    label: &str,
    translated: &TranslatedFragment,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(translated.source.clone()),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

/// std140 (size, alignment) of a block member.
fn std140_layout(ty: ValueType) -> (u32, u32) {
    match ty {
        ValueType::Float | ValueType::Int | ValueType::Bool => (4, 4),
        ValueType::Vec2 | ValueType::IVec2 => (8, 8),
        ValueType::Vec3 => (12, 16),
        ValueType::Vec4 => (16, 16),
        ValueType::Sampler1D | ValueType::Sampler2D => (0, 1),
    }
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

fn parse_uniform(line: &str) -> Option<(ValueType, &str)> {
    let rest = line.trim().strip_prefix("uniform ")?;
    let mut words = rest
        .split_whitespace()
        .filter(|word| !matches!(*word, "lowp" | "mediump" | "highp"));
    let ty = ValueType::from_glsl(words.next()?)?;
    let name = words.next()?.strip_suffix(';')?;
    let valid = !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    valid.then_some((ty, name))
}

/// Rewrites plain `uniform <type> <name>;` declarations into one std140 block
/// (set 0) and texture/sampler pairs (set 1), bumps the version to 450 and
/// gives the fragment output an explicit location.
///
/// Removed lines are left blank so `#line` numbering stays intact.
pub(crate) fn translate_fragment(source: &str) -> TranslatedFragment {
    let mut body = Vec::new();
    let mut slots = Vec::new();
    let mut offset = 0u32;
    let mut textures = 0u32;
    let mut version_at = None;

    for line in source.lines() {
        let trimmed = line.trim_start();
        if version_at.is_none() && trimmed.starts_with("#version") {
            version_at = Some(body.len());
            body.push("#version 450".to_string());
            continue;
        }
        if let Some((ty, name)) = parse_uniform(line) {
            let kind = if ty.is_sampler() {
                textures += 1;
                SlotKind::Texture { index: textures - 1 }
            } else {
                let (size, align) = std140_layout(ty);
                let start = round_up(offset, align);
                offset = start + size;
                SlotKind::Block { offset: start }
            };
            slots.push(UniformSlot {
                name: name.to_string(),
                ty,
                kind,
            });
            body.push(String::new());
            continue;
        }
        match trimmed.strip_prefix("out ") {
            Some(rest) if !trimmed.contains("layout") => {
                body.push(format!("layout(location = 0) out {rest}"));
            }
            _ => body.push(line.to_string()),
        }
    }

    let declarations = declarations(&slots);
    let mut text = String::with_capacity(source.len() + declarations.len() + 64);
    match version_at {
        Some(index) => {
            for (position, line) in body.iter().enumerate() {
                text.push_str(line);
                text.push('\n');
                if position == index {
                    text.push_str(&declarations);
                }
            }
        }
        None => {
            text.push_str("#version 450\n");
            text.push_str(&declarations);
            for line in &body {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    TranslatedFragment {
        source: text,
        slots,
        block_size: u64::from(round_up(offset, 16).max(16)),
    }
}

fn declarations(slots: &[UniformSlot]) -> String {
    let mut block = String::from("layout(std140, set = 0, binding = 0) uniform StageUniforms {\n");
    let mut defines = String::new();
    let mut members = 0;
    for slot in slots {
        match slot.kind {
            SlotKind::Block { .. } => {
                members += 1;
                // bool is not host-shareable; store it as an int
                let (ty, access) = match slot.ty {
                    ValueType::Bool => ("int", format!("bool(_stage._u_{})", slot.name)),
                    other => (other.glsl_name(), format!("_stage._u_{}", slot.name)),
                };
                block.push_str(&format!("    {ty} _u_{};\n", slot.name));
                defines.push_str(&format!("#define {} {access}\n", slot.name));
            }
            SlotKind::Texture { index } => {
                let (texture, sampler) = match slot.ty {
                    ValueType::Sampler1D => ("texture1D", "sampler1D"),
                    _ => ("texture2D", "sampler2D"),
                };
                defines.push_str(&format!(
                    "layout(set = 1, binding = {}) uniform {texture} _t_{name};\n\
                     layout(set = 1, binding = {}) uniform sampler _s_{name};\n\
                     #define {name} {sampler}(_t_{name}, _s_{name})\n",
                    index * 2,
                    index * 2 + 1,
                    name = slot.name,
                ));
            }
        }
    }
    if members == 0 {
        block.push_str("    vec4 _u_unused;\n");
    }
    block.push_str("} _stage;\n");
    block.push_str(&defines);
    block
}

/// Minimal full-screen triangle vertex shader.
const VERTEX_SHADER_GLSL: &str = r"#version 450
const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    gl_Position = vec4(positions[uint(gl_VertexIndex)], 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const STAGE: &str = "#version 330\n#define _SMOOTH_FACTOR 0.025000\nuniform vec4 _IN_fg;\n#line 1 0\nuniform sampler1D audio_l;\nuniform int audio_sz;\nuniform bool flag;\nout vec4 fragment;\nvoid main() { fragment = _IN_fg * texture(audio_l, 0.5).r; }\n";

    #[test]
    fn uniforms_move_into_block_and_bindings() {
        let translated = translate_fragment(STAGE);
        assert!(translated.source.starts_with("#version 450\nlayout(std140"));
        assert!(translated.source.contains("    vec4 _u__IN_fg;\n"));
        assert!(translated.source.contains("#define flag bool(_stage._u_flag)"));
        assert!(translated
            .source
            .contains("#define audio_l sampler1D(_t_audio_l, _s_audio_l)"));
        assert!(translated
            .source
            .contains("layout(location = 0) out vec4 fragment;"));
        assert!(!translated.source.contains("uniform int audio_sz;"));
        assert_eq!(
            translated.slots.iter().map(|slot| slot.kind).collect::<Vec<_>>(),
            vec![
                SlotKind::Block { offset: 0 },
                SlotKind::Texture { index: 0 },
                SlotKind::Block { offset: 16 },
                SlotKind::Block { offset: 20 },
            ]
        );
        assert_eq!(translated.block_size, 32);
    }

    #[test]
    fn line_count_after_markers_is_preserved() {
        let translated = translate_fragment(STAGE);
        let after_marker = |text: &str| {
            text.lines()
                .skip_while(|line| !line.starts_with("#line"))
                .count()
        };
        assert_eq!(after_marker(&translated.source), after_marker(STAGE));
    }
}
