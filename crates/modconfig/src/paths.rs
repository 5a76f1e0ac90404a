//! Directory discovery and user path expansion.
//!
//! Types:
//!
//! - `AppPaths` holds the user configuration directory (`:` includes, module
//!   lookups first) and the installed default directory (`@` includes, module
//!   fallback).
//! - `PathResolver` performs `$VAR` and `~` expansion for paths written in run
//!   files, resolving relative results against its working directory.
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::{BaseDirs, ProjectDirs};
use tracing::debug;

pub const ENV_CONFIG_DIR: &str = "SPECTRASHADE_CONFIG_DIR";
pub const ENV_DEFAULT_DIR: &str = "SPECTRASHADE_DEFAULT_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "Spectrashade";
const APPLICATION: &str = "spectrashade";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_dir: PathBuf,
    default_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir =
            env_override(ENV_CONFIG_DIR).unwrap_or_else(|| project_dirs.config_dir().to_path_buf());
        let default_dir =
            env_override(ENV_DEFAULT_DIR).unwrap_or_else(|| default_share_dir(&project_dirs));
        debug!(
            config = %config_dir.display(),
            defaults = %default_dir.display(),
            "discovered directories"
        );

        Ok(Self {
            config_dir,
            default_dir,
        })
    }

    pub fn from_raw(config_dir: PathBuf, default_dir: PathBuf) -> Self {
        Self {
            config_dir,
            default_dir,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    /// Candidate directories for a module, user configuration first.
    pub fn module_candidates(&self, module: &str) -> [PathBuf; 2] {
        [self.config_dir.join(module), self.default_dir.join(module)]
    }

    /// The entry file, from the user directory when present there.
    pub fn entry_candidates(&self, entry: &Path) -> Vec<PathBuf> {
        if entry.is_absolute() {
            return vec![entry.to_path_buf()];
        }
        vec![self.config_dir.join(entry), self.default_dir.join(entry)]
    }
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(target_family = "unix")]
fn default_share_dir(_: &ProjectDirs) -> PathBuf {
    PathBuf::from("/usr/share/spectrashade")
}

#[cfg(not(target_family = "unix"))]
fn default_share_dir(project_dirs: &ProjectDirs) -> PathBuf {
    project_dirs.data_dir().to_path_buf()
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    cwd: PathBuf,
}

impl PathResolver {
    pub fn new() -> Result<Self> {
        let cwd = env::current_dir().context("failed to resolve current working directory")?;
        Ok(Self { cwd })
    }

    pub fn with_cwd<P: Into<PathBuf>>(cwd: P) -> Self {
        Self { cwd: cwd.into() }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Expands `$VAR`, `${VAR}` and a leading `~`, then anchors relative
    /// results at the working directory.
    pub fn resolve(&self, input: &str) -> Result<PathBuf> {
        if input.trim().is_empty() {
            anyhow::bail!("path must not be empty");
        }
        let expanded = home_relative(&substitute_vars(input)?)?;
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        };
        debug!(original = %input, resolved = %resolved.display(), "resolved path");
        Ok(resolved)
    }
}

/// Joins a leading `~` or `~/` onto the home directory; other paths pass
/// through untouched.
fn home_relative(input: &str) -> Result<PathBuf> {
    let rest = match input.strip_prefix('~') {
        None => return Ok(PathBuf::from(input)),
        Some(rest) => rest,
    };
    let rest = match rest.strip_prefix('/') {
        Some(rest) => rest,
        None if rest.is_empty() => rest,
        None => anyhow::bail!("'~user' paths are not supported: '{input}'"),
    };
    let dirs = BaseDirs::new().context("no home directory to expand '~' against")?;
    Ok(dirs.home_dir().join(rest))
}

/// Replaces every `$NAME` and `${NAME}` with the variable's value. A `$` not
/// followed by a name is kept as written.
fn substitute_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(dollar) = rest.find('$') {
        output.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];
        let (name, remainder) = match after.strip_prefix('{') {
            Some(braced) => {
                let close = braced
                    .find('}')
                    .ok_or_else(|| anyhow!("unterminated '${{' in '{input}'"))?;
                if close == 0 {
                    anyhow::bail!("empty variable name in '{input}'");
                }
                (&braced[..close], &braced[close + 1..])
            }
            None => {
                let end = after
                    .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                    .unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
        };
        if name.is_empty() {
            output.push('$');
        } else {
            let value = env::var(name).with_context(|| format!("variable '{name}' is not set"))?;
            output.push_str(&value);
        }
        rest = remainder;
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::sync::{Mutex, OnceLock};
    use tempfile::TempDir;

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        key: &'static str,
        previous: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &Path) -> Self {
            let previous = env::var_os(key);
            env::set_var(key, value);
            Self { key, previous }
        }

        fn clear(key: &'static str) -> Self {
            let previous = env::var_os(key);
            env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = self.previous.take() {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    #[test]
    fn env_overrides_take_precedence() {
        let _guard = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let config_dir = root.path().join("config");
        let default_dir = root.path().join("share");
        let _config = EnvGuard::set(ENV_CONFIG_DIR, &config_dir);
        let _default = EnvGuard::set(ENV_DEFAULT_DIR, &default_dir);

        let paths = AppPaths::discover().unwrap();
        assert_eq!(paths.config_dir(), config_dir.as_path());
        assert_eq!(paths.default_dir(), default_dir.as_path());
        assert_eq!(
            paths.module_candidates("bars"),
            [config_dir.join("bars"), default_dir.join("bars")]
        );
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn default_dir_on_unix_is_usr_share() {
        let _guard = env_lock().lock().unwrap();
        let _default = EnvGuard::clear(ENV_DEFAULT_DIR);
        let paths = AppPaths::discover().unwrap();
        assert_eq!(paths.default_dir(), Path::new("/usr/share/spectrashade"));
    }

    #[test]
    fn expands_environment_variables() {
        let _guard = env_lock().lock().unwrap();
        env::set_var("SPECTRASHADE_PATH_TEST", "value");
        let resolver = PathResolver::with_cwd("/work");
        assert_eq!(
            resolver.resolve("/tmp/${SPECTRASHADE_PATH_TEST}/x").unwrap(),
            PathBuf::from("/tmp/value/x")
        );
        assert_eq!(
            resolver.resolve("$SPECTRASHADE_PATH_TEST").unwrap(),
            PathBuf::from("/work/value")
        );
        env::remove_var("SPECTRASHADE_PATH_TEST");
    }

    #[test]
    fn missing_variable_is_reported() {
        let resolver = PathResolver::with_cwd("/");
        let err = resolver.resolve("/tmp/$UNSET_SPECTRASHADE_VAR").unwrap_err();
        assert!(err.to_string().contains("UNSET_SPECTRASHADE_VAR"));
    }

    #[test]
    fn expands_home_prefix() {
        let resolver = PathResolver::with_cwd("/");
        assert!(resolver.resolve("~").unwrap().is_absolute());
        assert!(resolver.resolve("~/modules").unwrap().ends_with("modules"));
    }

    #[test]
    fn lone_dollar_is_kept() {
        let resolver = PathResolver::with_cwd("/");
        assert_eq!(
            resolver.resolve("/cost/$/5$").unwrap(),
            PathBuf::from("/cost/$/5$")
        );
    }

    #[test]
    fn braced_reference_must_close() {
        let resolver = PathResolver::with_cwd("/");
        assert!(resolver.resolve("/tmp/${HOME").is_err());
        assert!(resolver.resolve("/tmp/${}").is_err());
        assert!(resolver.resolve("~someone/x").is_err());
    }
}
