//! Software [`GraphicsBackend`] used for tests and display-less runs.
//!
//! "Compiling" scans the fragment text the way a driver front end would see
//! it: `#line` markers renumber diagnostics, `#error` lines fail the build,
//! and `uniform <type> <name>;` declarations become locations. Uniforms whose
//! name never appears outside their declaration are inactive, as a real
//! compiler would optimise them away. Draws are recorded instead of
//! rasterised; offload passes run on the CPU through [`OffloadPasses`].
use std::collections::{HashMap, HashSet};

use tracing::debug;
use transform::{OffloadPasses, OffloadTail, TransformParams};

use crate::backend::{
    BackendError, BackendResult, GraphicsBackend, OffloadId, ProgramId, TargetId, TextureId,
    UniformLocation,
};
use crate::types::{UniformValue, ValueType};

/// What one `draw_fullscreen` call saw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub label: String,
    /// `None` for the default target.
    pub target: Option<TargetId>,
    pub uniforms: Vec<(String, UniformValue)>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms
            .iter()
            .find(|(uniform, _)| uniform == name)
            .map(|(_, value)| *value)
    }

    pub fn sampled_textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.uniforms.iter().filter_map(|(_, value)| match value {
            UniformValue::Texture(texture) => Some(*texture),
            _ => None,
        })
    }
}

#[derive(Debug)]
struct Program {
    label: String,
    source: String,
    uniforms: Vec<DeclaredUniform>,
}

#[derive(Debug)]
struct DeclaredUniform {
    name: String,
    ty: ValueType,
    active: bool,
    value: Option<UniformValue>,
}

#[derive(Debug)]
struct Texture {
    width: u32,
    height: u32,
    /// 1 for audio textures, 4 for colour textures.
    channels: u32,
    data: Vec<f32>,
}

#[derive(Debug)]
struct Target {
    texture: TextureId,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    screen: (u32, u32),
    next_handle: u32,
    offload_enabled: bool,
    programs: HashMap<ProgramId, Program>,
    textures: HashMap<TextureId, Texture>,
    targets: HashMap<TargetId, Target>,
    offloads: HashMap<OffloadId, OffloadPasses>,
    bound_target: Option<TargetId>,
    current: Option<ProgramId>,
    screen_clear: Option<[f32; 4]>,
    draws: Vec<DrawRecord>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: (width, height),
            next_handle: 1,
            offload_enabled: true,
            programs: HashMap::new(),
            textures: HashMap::new(),
            targets: HashMap::new(),
            offloads: HashMap::new(),
            bound_target: None,
            current: None,
            screen_clear: None,
            draws: Vec::new(),
        }
    }

    /// Whether the backend reports offload support.
    pub fn with_offload(mut self, enabled: bool) -> Self {
        self.offload_enabled = enabled;
        self
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    pub fn texture_data(&self, texture: TextureId) -> Option<&[f32]> {
        self.textures.get(&texture).map(|texture| texture.data.as_slice())
    }

    pub fn program_source(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(|program| program.source.as_str())
    }

    /// Last colour the default target was cleared to.
    pub fn screen_clear(&self) -> Option<[f32; 4]> {
        self.screen_clear
    }

    /// Programs, textures, targets and offloads still allocated.
    pub fn live_resources(&self) -> usize {
        self.programs.len() + self.textures.len() + self.targets.len() + self.offloads.len()
    }

    fn allocate(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn add_texture(&mut self, width: u32, height: u32, channels: u32) -> TextureId {
        let id = TextureId(self.allocate());
        let len = width as usize * height as usize * channels as usize;
        self.textures.insert(
            id,
            Texture {
                width,
                height,
                channels,
                data: vec![0.0; len],
            },
        );
        id
    }

    fn current_program(&mut self) -> BackendResult<&mut Program> {
        let id = self.current.ok_or(BackendError::NoProgram)?;
        self.programs
            .get_mut(&id)
            .ok_or(BackendError::UnknownHandle {
                kind: "program",
                id: id.0,
            })
    }
}

fn parse_uniform(line: &str) -> Option<(ValueType, String)> {
    let rest = line.strip_prefix("uniform ")?;
    let mut words = rest
        .split_whitespace()
        .filter(|word| !matches!(*word, "lowp" | "mediump" | "highp"));
    let ty = ValueType::from_glsl(words.next()?)?;
    let name = words.next()?.trim_end_matches(';');
    let name = name.split('[').next()?;
    (!name.is_empty()).then(|| (ty, name.to_string()))
}

fn identifiers(line: &str) -> impl Iterator<Item = &str> {
    line.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|word| !word.is_empty())
}

impl GraphicsBackend for HeadlessBackend {
    fn compile_program(&mut self, label: &str, fragment: &str) -> BackendResult<ProgramId> {
        let mut file = 0usize;
        let mut line = 0usize;
        let mut errors = Vec::new();
        let mut uniforms: Vec<DeclaredUniform> = Vec::new();
        let mut used = HashSet::new();

        for raw in fragment.lines() {
            line += 1;
            let trimmed = raw.trim();
            if let Some(rest) = trimmed.strip_prefix("#line") {
                let mut parts = rest.split_whitespace();
                if let Some(Ok(next)) = parts.next().map(str::parse::<usize>) {
                    line = next.saturating_sub(1);
                    if let Some(Ok(source)) = parts.next().map(str::parse::<usize>) {
                        file = source;
                    }
                }
                continue;
            }
            if let Some(message) = trimmed.strip_prefix("#error") {
                errors.push(format!("ERROR: {file}:{line}: '#error' : {}", message.trim()));
                continue;
            }
            match parse_uniform(trimmed) {
                Some((ty, name)) => {
                    if uniforms.iter().any(|uniform| uniform.name == name) {
                        errors.push(format!("ERROR: {file}:{line}: '{name}' : redefinition"));
                    }
                    uniforms.push(DeclaredUniform {
                        name,
                        ty,
                        active: false,
                        value: None,
                    });
                }
                None => used.extend(identifiers(trimmed).map(str::to_string)),
            }
        }

        if !errors.is_empty() {
            return Err(BackendError::Compile {
                log: errors.join("\n"),
            });
        }
        for uniform in &mut uniforms {
            uniform.active = used.contains(&uniform.name);
        }

        let id = ProgramId(self.allocate());
        debug!(program = id.0, label, uniforms = uniforms.len(), "compiled headless program");
        self.programs.insert(
            id,
            Program {
                label: label.to_string(),
                source: fragment.to_string(),
                uniforms,
            },
        );
        Ok(id)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let program = self.programs.get(&program)?;
        program
            .uniforms
            .iter()
            .position(|uniform| uniform.active && uniform.name == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn create_target(&mut self, width: u32, height: u32) -> BackendResult<TargetId> {
        let texture = self.add_texture(width, height, 4);
        let id = TargetId(self.allocate());
        self.targets.insert(id, Target { texture });
        Ok(id)
    }

    fn target_texture(&self, target: TargetId) -> BackendResult<TextureId> {
        self.targets
            .get(&target)
            .map(|target| target.texture)
            .ok_or(BackendError::UnknownHandle {
                kind: "target",
                id: target.0,
            })
    }

    fn create_texture_1d(&mut self, len: usize) -> BackendResult<TextureId> {
        let width = u32::try_from(len)
            .map_err(|_| BackendError::Device(format!("texture length {len} is too large")))?;
        Ok(self.add_texture(width, 1, 1))
    }

    fn create_texture_2d(&mut self, width: u32, height: u32) -> BackendResult<TextureId> {
        Ok(self.add_texture(width, height, 4))
    }

    fn upload_texture_1d(&mut self, texture: TextureId, data: &[f32]) -> BackendResult<()> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })?;
        if entry.height != 1 || entry.channels != 1 || entry.data.len() != data.len() {
            return Err(BackendError::UploadSize {
                expected: entry.width as usize,
                found: data.len(),
            });
        }
        entry.data.copy_from_slice(data);
        Ok(())
    }

    fn bind_target(&mut self, target: Option<TargetId>) -> BackendResult<()> {
        if let Some(id) = target {
            if !self.targets.contains_key(&id) {
                return Err(BackendError::UnknownHandle {
                    kind: "target",
                    id: id.0,
                });
            }
        }
        self.bound_target = target;
        Ok(())
    }

    fn clear(&mut self, rgba: [f32; 4]) -> BackendResult<()> {
        let Some(target) = self.bound_target else {
            self.screen_clear = Some(rgba);
            return Ok(());
        };
        let texture = self.target_texture(target)?;
        if let Some(texture) = self.textures.get_mut(&texture) {
            for texel in texture.data.chunks_exact_mut(4) {
                texel.copy_from_slice(&rgba);
            }
        }
        Ok(())
    }

    fn use_program(&mut self, program: ProgramId) -> BackendResult<()> {
        if !self.programs.contains_key(&program) {
            return Err(BackendError::UnknownHandle {
                kind: "program",
                id: program.0,
            });
        }
        self.current = Some(program);
        Ok(())
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) -> BackendResult<()> {
        if let UniformValue::Texture(texture) = value {
            if !self.textures.contains_key(&texture) {
                return Err(BackendError::UnknownHandle {
                    kind: "texture",
                    id: texture.0,
                });
            }
        }
        let program = self.current_program()?;
        let uniform = program
            .uniforms
            .get_mut(location.0 as usize)
            .filter(|uniform| uniform.active)
            .ok_or(BackendError::UnknownHandle {
                kind: "uniform",
                id: location.0,
            })?;
        if !value.fits(uniform.ty) {
            return Err(BackendError::UniformType {
                location: location.0,
                value,
            });
        }
        uniform.value = Some(value);
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> BackendResult<()> {
        let target = self.bound_target;
        let id = self.current.ok_or(BackendError::NoProgram)?;
        let program = self.current_program()?;
        let record = DrawRecord {
            program: id,
            label: program.label.clone(),
            target,
            uniforms: program
                .uniforms
                .iter()
                .filter_map(|uniform| uniform.value.map(|value| (uniform.name.clone(), value)))
                .collect(),
        };
        self.draws.push(record);
        Ok(())
    }

    fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    fn supports_offload(&self) -> bool {
        self.offload_enabled
    }

    fn create_offload(
        &mut self,
        tail: OffloadTail,
        params: &TransformParams,
    ) -> BackendResult<OffloadId> {
        if !self.offload_enabled {
            return Err(BackendError::Unsupported("chain offload"));
        }
        let id = OffloadId(self.allocate());
        self.offloads.insert(id, OffloadPasses::new(tail, params));
        Ok(id)
    }

    fn run_offload(
        &mut self,
        offload: OffloadId,
        input: &[f32],
        output: TextureId,
    ) -> BackendResult<()> {
        let passes = self
            .offloads
            .get_mut(&offload)
            .ok_or(BackendError::UnknownHandle {
                kind: "offload",
                id: offload.0,
            })?;
        let result = passes.run(input)?;
        self.upload_texture_1d(output, &result)
    }

    fn delete_offload(&mut self, offload: OffloadId) {
        self.offloads.remove(&offload);
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.current == Some(program) {
            self.current = None;
        }
        self.programs.remove(&program);
    }

    fn delete_target(&mut self, target: TargetId) {
        if self.bound_target == Some(target) {
            self.bound_target = None;
        }
        if let Some(target) = self.targets.remove(&target) {
            self.textures.remove(&target.texture);
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = "#version 330\nuniform sampler1D audio;\nuniform float unused;\nout vec4 fragment;\nvoid main() { fragment = vec4(texture(audio, 0.5).r); }\n";

    #[test]
    fn declared_and_used_uniforms_get_locations() {
        let mut backend = HeadlessBackend::new(4, 4);
        let program = backend.compile_program("stage 1", SHADER).unwrap();
        assert!(backend.uniform_location(program, "audio").is_some());
        assert_eq!(backend.uniform_location(program, "unused"), None);
        assert_eq!(backend.uniform_location(program, "missing"), None);
    }

    #[test]
    fn error_directives_report_marker_locations() {
        let mut backend = HeadlessBackend::new(4, 4);
        let source = "#version 330\n#line 1 0\nvoid main() {}\n#line 3 1\n#error __disablestage\n";
        let err = backend.compile_program("stage", source).unwrap_err();
        let BackendError::Compile { log } = err else {
            panic!("expected a compile error");
        };
        assert_eq!(log, "ERROR: 1:3: '#error' : __disablestage");
    }

    #[test]
    fn uploads_clears_and_draws_are_tracked() {
        let mut backend = HeadlessBackend::new(2, 2);
        let program = backend.compile_program("stage", SHADER).unwrap();
        let audio = backend.create_texture_1d(4).unwrap();
        backend.upload_texture_1d(audio, &[0.5; 4]).unwrap();
        assert!(matches!(
            backend.upload_texture_1d(audio, &[0.5; 3]),
            Err(BackendError::UploadSize { .. })
        ));

        let target = backend.create_target(2, 2).unwrap();
        backend.bind_target(Some(target)).unwrap();
        backend.clear([0.0, 0.0, 1.0, 1.0]).unwrap();
        let output = backend.target_texture(target).unwrap();
        assert_eq!(&backend.texture_data(output).unwrap()[..4], &[0.0, 0.0, 1.0, 1.0]);

        backend.use_program(program).unwrap();
        let location = backend.uniform_location(program, "audio").unwrap();
        assert!(matches!(
            backend.set_uniform(location, UniformValue::Float(1.0)),
            Err(BackendError::UniformType { .. })
        ));
        backend
            .set_uniform(location, UniformValue::Texture(audio))
            .unwrap();
        backend.draw_fullscreen().unwrap();

        let draw = &backend.draws()[0];
        assert_eq!(draw.target, Some(target));
        assert_eq!(draw.sampled_textures().collect::<Vec<_>>(), vec![audio]);

        backend.delete_target(target);
        backend.delete_texture(audio);
        backend.delete_program(program);
        assert_eq!(backend.live_resources(), 0);
    }
}
