//! Global pipeline settings and the `#request` handlers that change them.
use preprocess::{Arg, Color, DirectiveContext, Request, RequestError, RequestTable};
use transform::TransformParams;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Module directory name selected with `#request mod`.
    pub module: String,
    pub frame_rate: u32,
    pub interpolate: bool,
    pub sample_rate: u32,
    /// Samples per audio update.
    pub sample_size: u32,
    /// Audio buffer length handed to transforms.
    pub buffer_size: usize,
    pub gravity_step: f32,
    pub avg_frames: usize,
    pub avg_window: bool,
    pub fft_scale: f32,
    pub fft_cutoff: f32,
    /// Emitted as `_SMOOTH_FACTOR` in every stage header.
    pub smooth_factor: f32,
    /// Window distance for the `smooth` transform.
    pub smooth_distance: f32,
    pub accel_fft: bool,
    pub background: Option<Color>,
    pub glsl_version: u32,
    pub uniform_limit: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let params = TransformParams::default();
        Self {
            module: "bars".to_string(),
            frame_rate: 60,
            interpolate: true,
            sample_rate: 22_050,
            sample_size: 1024,
            buffer_size: params.buffer_len,
            gravity_step: params.gravity_step,
            avg_frames: params.avg_frames,
            avg_window: params.avg_window,
            fft_scale: params.fft_scale,
            fft_cutoff: params.fft_cutoff,
            smooth_factor: 0.025,
            smooth_distance: params.smooth_distance,
            accel_fft: false,
            background: None,
            glsl_version: 330,
            uniform_limit: 256,
        }
    }
}

impl PipelineSettings {
    /// Audio updates per second.
    pub fn update_rate(&self) -> f32 {
        self.sample_rate as f32 / self.sample_size as f32
    }

    pub fn transform_params(&self) -> TransformParams {
        TransformParams {
            buffer_len: self.buffer_size,
            update_rate: self.update_rate(),
            gravity_step: self.gravity_step,
            avg_frames: self.avg_frames,
            avg_window: self.avg_window,
            fft_scale: self.fft_scale,
            fft_cutoff: self.fft_cutoff,
            smooth_distance: self.smooth_distance,
        }
    }
}

/// The entry file only configures; it has nothing to expand or bind.
impl DirectiveContext for PipelineSettings {
    fn expansion_count(&self, _control: &str) -> Option<usize> {
        None
    }

    fn bound_name(&self, _name: &str) -> Option<String> {
        None
    }
}

fn int(args: &[Arg], index: usize) -> Result<i64, RequestError> {
    args.get(index)
        .and_then(Arg::as_int)
        .ok_or_else(|| RequestError::new(format!("argument {} must be an integer", index + 1)))
}

fn float(args: &[Arg], index: usize) -> Result<f32, RequestError> {
    args.get(index)
        .and_then(Arg::as_float)
        .map(|value| value as f32)
        .ok_or_else(|| RequestError::new(format!("argument {} must be a number", index + 1)))
}

fn boolean(args: &[Arg], index: usize) -> Result<bool, RequestError> {
    args.get(index)
        .and_then(Arg::as_bool)
        .ok_or_else(|| RequestError::new(format!("argument {} must be true or false", index + 1)))
}

fn string(args: &[Arg], index: usize) -> Result<&str, RequestError> {
    args.get(index)
        .and_then(Arg::as_str)
        .ok_or_else(|| RequestError::new(format!("argument {} must be a string", index + 1)))
}

fn positive(value: i64, what: &str) -> Result<u32, RequestError> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| RequestError::new(format!("{what} must be a positive integer, got {value}")))
}

fn set_module(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    let name = string(args, 0)?;
    if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
        return Err(RequestError::new(format!("invalid module name '{name}'")));
    }
    s.module = name.to_string();
    Ok(())
}

fn set_frame_rate(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.frame_rate = positive(int(args, 0)?, "frame rate")?;
    Ok(())
}

fn set_interpolate(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.interpolate = boolean(args, 0)?;
    Ok(())
}

fn set_sample_rate(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.sample_rate = positive(int(args, 0)?, "sample rate")?;
    Ok(())
}

fn set_sample_size(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.sample_size = positive(int(args, 0)?, "sample size")?;
    Ok(())
}

fn set_buffer_size(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    let size = positive(int(args, 0)?, "buffer size")? as usize;
    if size < 2 || !size.is_power_of_two() {
        return Err(RequestError::new(format!(
            "buffer size must be a power of two of at least 2, got {size}"
        )));
    }
    s.buffer_size = size;
    Ok(())
}

fn set_gravity_step(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.gravity_step = float(args, 0)?;
    Ok(())
}

fn set_avg_frames(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.avg_frames = positive(int(args, 0)?, "average frame count")? as usize;
    Ok(())
}

fn set_avg_window(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.avg_window = boolean(args, 0)?;
    Ok(())
}

fn set_fft_scale(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.fft_scale = float(args, 0)?;
    Ok(())
}

fn set_fft_cutoff(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.fft_cutoff = float(args, 0)?;
    Ok(())
}

fn set_smooth_factor(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.smooth_factor = float(args, 0)?;
    Ok(())
}

fn set_smooth_distance(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    let distance = float(args, 0)?;
    if distance < 0.0 {
        return Err(RequestError::new("smoothing distance must be non-negative"));
    }
    s.smooth_distance = distance;
    Ok(())
}

fn set_accel_fft(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.accel_fft = boolean(args, 0)?;
    Ok(())
}

fn set_background(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    let raw = string(args, 0)?;
    let color = Color::from_hex(raw).map_err(|err| RequestError::new(err.to_string()))?;
    s.background = Some(color);
    Ok(())
}

fn set_version(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.glsl_version = positive(int(args, 0)?, "GLSL version")?;
    Ok(())
}

fn set_uniform_limit(args: &[Arg], s: &mut PipelineSettings) -> Result<(), RequestError> {
    s.uniform_limit = positive(int(args, 0)?, "uniform limit")?;
    Ok(())
}

pub const SETTINGS_REQUESTS: [Request<PipelineSettings>; 17] = [
    Request::new("mod", "s", set_module),
    Request::new("setframerate", "i", set_frame_rate),
    Request::new("setinterpolate", "b", set_interpolate),
    Request::new("setsamplerate", "i", set_sample_rate),
    Request::new("setsamplesize", "i", set_sample_size),
    Request::new("setbufsize", "i", set_buffer_size),
    Request::new("setgravitystep", "f", set_gravity_step),
    Request::new("setavgframes", "i", set_avg_frames),
    Request::new("setavgwindow", "b", set_avg_window),
    Request::new("setfftscale", "f", set_fft_scale),
    Request::new("setfftcutoff", "f", set_fft_cutoff),
    Request::new("setsmoothfactor", "f", set_smooth_factor),
    Request::new("setsmoothdist", "f", set_smooth_distance),
    Request::new("setaccelfft", "b", set_accel_fft),
    Request::new("setbg", "s", set_background),
    Request::new("setversion", "i", set_version),
    Request::new("setuniformlimit", "i", set_uniform_limit),
];

pub fn settings_requests() -> RequestTable<PipelineSettings> {
    SETTINGS_REQUESTS.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use preprocess::{process, PreprocessError, SourceUnit};

    fn apply(text: &str) -> Result<PipelineSettings, PreprocessError> {
        let mut settings = PipelineSettings::default();
        process(
            SourceUnit::from_text("rc.glsl", text),
            &settings_requests(),
            &mut settings,
        )?;
        Ok(settings)
    }

    #[test]
    fn requests_update_settings() {
        let settings = apply(
            "#request mod radial\n#request setframerate 30\n#request setsamplerate 44100\n#request setsamplesize 441\n#request setaccelfft true\n#request setbg \"#102030\"\n#request setgravitystep 2\n",
        )
        .unwrap();
        assert_eq!(settings.module, "radial");
        assert_eq!(settings.frame_rate, 30);
        assert_eq!(settings.update_rate(), 100.0);
        assert!(settings.accel_fft);
        assert_eq!(settings.gravity_step, 2.0);
        let bg = settings.background.expect("background");
        assert!((bg.rgba[0] - 16.0 / 255.0).abs() < 1e-6);
        assert_eq!(settings.transform_params().update_rate, 100.0);
    }

    #[test]
    fn rejects_invalid_values() {
        for bad in [
            "#request setbufsize 1000\n",
            "#request setavgframes 0\n",
            "#request setframerate -5\n",
            "#request setbg \"#12\"\n",
            "#request mod \"../escape\"\n",
        ] {
            let err = apply(bad).unwrap_err();
            assert!(
                matches!(err, PreprocessError::Config { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn table_covers_every_setting() {
        let table = settings_requests();
        assert_eq!(table.len(), SETTINGS_REQUESTS.len());
        assert_eq!(table.get("setsmoothdist").map(|r| r.signature), Some("f"));
    }
}
