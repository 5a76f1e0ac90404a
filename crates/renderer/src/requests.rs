//! Stage-local `#request` table: `uniform` and `transform`.
use modconfig::{BindDecl, PipelineSettings};
use preprocess::{Arg, DirectiveContext, Request, RequestError, RequestTable};
use transform::{Chain, TransformKind};

use crate::header::external_uniform_name;
use crate::types::{lookup_source, BindSource, CHANNEL_COUNT};

pub const EXPAND_AVG_FRAMES: &str = "_AVG_FRAMES";
pub const EXPAND_CHANNELS: &str = "_CHANNELS";
pub const EXPAND_UNIFORM_LIMIT: &str = "_UNIFORM_LIMIT";

/// A uniform a stage asked to have bound, with its transform chain.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformRequest {
    pub name: String,
    pub source: &'static BindSource,
    pub chain: Chain,
}

/// Builder state threaded through one stage's preprocessing.
#[derive(Debug)]
pub struct StageContext<'a> {
    settings: &'a PipelineSettings,
    binds: &'a [BindDecl],
    uniforms: Vec<UniformRequest>,
}

impl<'a> StageContext<'a> {
    pub fn new(settings: &'a PipelineSettings, binds: &'a [BindDecl]) -> Self {
        Self {
            settings,
            binds,
            uniforms: Vec::new(),
        }
    }

    pub fn uniforms(&self) -> &[UniformRequest] {
        &self.uniforms
    }

    pub fn into_uniforms(self) -> Vec<UniformRequest> {
        self.uniforms
    }

    fn uniform_mut(&mut self, name: &str) -> Option<&mut UniformRequest> {
        self.uniforms.iter_mut().find(|uniform| uniform.name == name)
    }
}

impl DirectiveContext for StageContext<'_> {
    fn expansion_count(&self, control: &str) -> Option<usize> {
        match control {
            EXPAND_AVG_FRAMES => Some(self.settings.avg_frames),
            EXPAND_CHANNELS => Some(CHANNEL_COUNT),
            EXPAND_UNIFORM_LIMIT => Some(self.settings.uniform_limit as usize),
            _ => None,
        }
    }

    fn bound_name(&self, name: &str) -> Option<String> {
        self.binds
            .iter()
            .any(|bind| bind.name == name)
            .then(|| external_uniform_name(name))
    }
}

fn text<'s>(args: &'s [Arg], index: usize, what: &str) -> Result<&'s str, RequestError> {
    args.get(index)
        .and_then(Arg::as_str)
        .ok_or_else(|| RequestError::new(format!("missing {what}")))
}

/// `#request uniform <source> <name>`
fn bind_uniform(args: &[Arg], ctx: &mut StageContext<'_>) -> Result<(), RequestError> {
    let source_name = text(args, 0, "bind source")?;
    let name = text(args, 1, "uniform name")?;
    let source = lookup_source(source_name)
        .ok_or_else(|| RequestError::new(format!("unknown bind source '{source_name}'")))?;
    if ctx.uniform_mut(name).is_some() {
        return Err(RequestError::new(format!("uniform '{name}' is already bound")));
    }
    ctx.uniforms.push(UniformRequest {
        name: name.to_string(),
        source,
        chain: Chain::new(),
    });
    Ok(())
}

/// `#request transform <uniform> <transform>`
fn add_transform(args: &[Arg], ctx: &mut StageContext<'_>) -> Result<(), RequestError> {
    let name = text(args, 0, "uniform name")?;
    let transform = text(args, 1, "transform name")?;
    let kind: TransformKind = transform
        .parse()
        .map_err(|err: transform::TransformError| RequestError::new(err.to_string()))?;
    let uniform = ctx
        .uniform_mut(name)
        .ok_or_else(|| RequestError::new(format!("no uniform named '{name}' has been bound")))?;
    if !uniform.source.kind.is_audio() {
        return Err(RequestError::new(format!(
            "transform '{kind}' needs an audio source, but '{name}' is bound to '{}'",
            uniform.source.name
        )));
    }
    uniform.chain.push(kind);
    Ok(())
}

pub fn stage_requests<'a>() -> RequestTable<StageContext<'a>> {
    RequestTable::new()
        .with(Request::new("uniform", "ss", bind_uniform))
        .with(Request::new("transform", "ss", add_transform))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modconfig::BindType;
    use preprocess::{process, PreprocessError, SourceUnit};

    use crate::types::SourceKind;

    fn run<'a>(
        text: &str,
        settings: &'a PipelineSettings,
        binds: &'a [BindDecl],
    ) -> Result<(String, Vec<UniformRequest>), PreprocessError> {
        let mut ctx = StageContext::new(settings, binds);
        let processed = process(
            SourceUnit::from_text("1.frag", text),
            &stage_requests(),
            &mut ctx,
        )?;
        Ok((processed.text().to_string(), ctx.into_uniforms()))
    }

    #[test]
    fn binds_uniforms_and_chains_in_order() {
        let settings = PipelineSettings::default();
        let (_, uniforms) = run(
            "#request uniform \"audio_l\" audio_l\n#request transform audio_l \"window\"\n#request transform audio_l \"fft\"\n#request uniform \"prev\" tex\n",
            &settings,
            &[],
        )
        .unwrap();
        assert_eq!(uniforms.len(), 2);
        assert_eq!(uniforms[0].source.kind, SourceKind::AudioLeft);
        assert_eq!(
            uniforms[0].chain.steps(),
            [TransformKind::Window, TransformKind::Fft]
        );
        assert_eq!(uniforms[1].name, "tex");
        assert!(uniforms[1].chain.is_empty());
    }

    #[test]
    fn configuration_mistakes_are_fatal() {
        let settings = PipelineSettings::default();
        for (text, expected) in [
            ("#request uniform \"mouse\" m\n", "unknown bind source"),
            (
                "#request uniform \"time\" t\n#request uniform \"screen\" t\n",
                "already bound",
            ),
            ("#request transform audio_l \"fft\"\n", "no uniform named"),
            (
                "#request uniform \"time\" t\n#request transform t \"fft\"\n",
                "needs an audio source",
            ),
            (
                "#request uniform \"audio_r\" a\n#request transform a \"blur\"\n",
                "unknown transform",
            ),
        ] {
            let err = run(text, &settings, &[]).unwrap_err();
            assert!(matches!(err, PreprocessError::Config { .. }), "{text:?}");
            assert!(err.to_string().contains(expected), "{err}");
        }
    }

    #[test]
    fn expansions_and_binds_resolve_from_context() {
        let settings = PipelineSettings {
            avg_frames: 2,
            ..PipelineSettings::default()
        };
        let binds = [BindDecl {
            name: "fg".into(),
            ty: BindType::Vec4,
            value: None,
        }];
        let ctx = StageContext::new(&settings, &binds);
        assert_eq!(ctx.expansion_count("_AVG_FRAMES"), Some(2));
        assert_eq!(ctx.expansion_count("_CHANNELS"), Some(2));
        assert_eq!(ctx.expansion_count("_OTHER"), None);
        assert_eq!(ctx.bound_name("fg").as_deref(), Some("_IN_fg"));
        assert_eq!(ctx.bound_name("bg"), None);
    }
}
