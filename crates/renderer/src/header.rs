//! Generated text placed ahead of every stage's preprocessed source.
use modconfig::{BindDecl, PipelineSettings};

use crate::requests::{EXPAND_AVG_FRAMES, EXPAND_CHANNELS, EXPAND_UNIFORM_LIMIT};
use crate::types::CHANNEL_COUNT;

/// Prefix for the uniform an external bind is declared as.
pub const EXTERNAL_PREFIX: &str = "_IN_";

pub fn external_uniform_name(bind: &str) -> String {
    format!("{EXTERNAL_PREFIX}{bind}")
}

/// Builds the stage header: version pragma, smoothing define, one uniform per
/// declared external bind, and a define per `#expand` control.
///
/// Bind uniforms are only declared when the run declares binds, so stages
/// never see `_IN_` names nothing will upload.
pub fn stage_header(settings: &PipelineSettings, binds: &[BindDecl]) -> String {
    let mut header = format!("#version {}\n", settings.glsl_version);
    header.push_str(&format!(
        "#define _SMOOTH_FACTOR {:.6}\n",
        settings.smooth_factor
    ));
    for bind in binds {
        header.push_str(&format!(
            "uniform {} {};\n",
            bind.ty.glsl_name(),
            external_uniform_name(&bind.name)
        ));
    }
    for (name, value) in [
        (EXPAND_AVG_FRAMES, settings.avg_frames),
        (EXPAND_CHANNELS, CHANNEL_COUNT),
        (EXPAND_UNIFORM_LIMIT, settings.uniform_limit as usize),
    ] {
        header.push_str(&format!("#define {name} {value}\n"));
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use modconfig::BindType;

    #[test]
    fn header_lists_version_binds_and_controls() {
        let settings = PipelineSettings {
            glsl_version: 430,
            avg_frames: 3,
            ..PipelineSettings::default()
        };
        let binds = [BindDecl {
            name: "fg".into(),
            ty: BindType::Vec4,
            value: None,
        }];
        let header = stage_header(&settings, &binds);
        let lines: Vec<&str> = header.lines().collect();
        assert_eq!(
            lines,
            [
                "#version 430",
                "#define _SMOOTH_FACTOR 0.025000",
                "uniform vec4 _IN_fg;",
                "#define _AVG_FRAMES 3",
                "#define _CHANNELS 2",
                "#define _UNIFORM_LIMIT 256",
            ]
        );
    }

    #[test]
    fn header_without_binds_declares_no_uniforms() {
        let header = stage_header(&PipelineSettings::default(), &[]);
        assert!(header.starts_with("#version 330\n"));
        assert!(!header.contains("uniform"));
    }
}
