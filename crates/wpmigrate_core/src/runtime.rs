use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::entity::EntityKind;

pub const DEFAULT_WORKSPACE_DIR: &str = "data";
pub const CONFIG_FILENAME: &str = "wpmigrate.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub workspace_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

/// Workspace root and config location, known before the locale is.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    pub root_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub root_dir: PathBuf,
    pub locale: String,
    pub base_dir: PathBuf,
    pub dump_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub entries_dir: PathBuf,
    pub export_dir: PathBuf,
    pub export_media_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

#[derive(Debug, Clone)]
pub struct WorkspaceStatus {
    pub base_dir_exists: bool,
    pub assets_exists: bool,
    pub export_media_exists: bool,
    pub missing_entry_dirs: Vec<EntityKind>,
}

impl WorkspaceStatus {
    pub fn is_ready(&self) -> bool {
        self.base_dir_exists
            && self.assets_exists
            && self.export_media_exists
            && self.missing_entry_dirs.is_empty()
    }
}

impl WorkspaceRoot {
    pub fn with_locale(&self, locale: &str) -> ResolvedPaths {
        let base_dir = self.root_dir.join(locale);
        let dump_dir = base_dir.join("dump");
        let export_dir = base_dir.join("export");
        ResolvedPaths {
            root_dir: self.root_dir.clone(),
            locale: locale.to_string(),
            assets_dir: dump_dir.join("assets"),
            entries_dir: dump_dir.join("entries"),
            export_media_dir: export_dir.join("media"),
            dump_dir,
            export_dir,
            base_dir,
            config_path: self.config_path.clone(),
            root_source: self.root_source,
            config_source: self.config_source,
        }
    }
}

impl ResolvedPaths {
    pub fn entity_dir(&self, kind: EntityKind) -> PathBuf {
        self.entries_dir.join(kind.as_str())
    }

    pub fn required_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.base_dir.clone(),
            self.dump_dir.clone(),
            self.assets_dir.clone(),
            self.entries_dir.clone(),
        ];
        for kind in EntityKind::ALL {
            dirs.push(self.entity_dir(kind));
        }
        dirs.push(self.export_dir.clone());
        dirs.push(self.export_media_dir.clone());
        dirs
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "root_dir={} ({})\nlocale={}\nbase_dir={}\nentries_dir={}\nexport_media_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.root_dir),
            self.root_source.as_str(),
            self.locale,
            normalize_for_display(&self.base_dir),
            normalize_for_display(&self.entries_dir),
            normalize_for_display(&self.export_media_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

pub fn resolve_workspace(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<WorkspaceRoot> {
    resolve_workspace_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_workspace_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<WorkspaceRoot>
where
    F: Fn(&str) -> Option<String>,
{
    let (root_dir, root_source) = if let Some(path) = overrides.workspace_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup_env("WPMIGRATE_DIR").filter(|value| !value.trim().is_empty())
    {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (
            context.cwd.join(DEFAULT_WORKSPACE_DIR),
            ValueSource::Default,
        )
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) =
        lookup_env("WPMIGRATE_CONFIG").filter(|value| !value.trim().is_empty())
    {
        (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        )
    } else {
        (root_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    Ok(WorkspaceRoot {
        root_dir,
        config_path,
        root_source,
        config_source,
    })
}

pub fn inspect_workspace(paths: &ResolvedPaths) -> WorkspaceStatus {
    let missing_entry_dirs = EntityKind::ALL
        .into_iter()
        .filter(|kind| !paths.entity_dir(*kind).is_dir())
        .collect();
    WorkspaceStatus {
        base_dir_exists: paths.base_dir.is_dir(),
        assets_exists: paths.assets_dir.is_dir(),
        export_media_exists: paths.export_media_dir.is_dir(),
        missing_entry_dirs,
    }
}

pub fn ensure_workspace_ready(paths: &ResolvedPaths) -> Result<()> {
    let status = inspect_workspace(paths);
    if status.is_ready() {
        return Ok(());
    }

    let missing = paths
        .required_dirs()
        .into_iter()
        .filter(|dir| !dir.is_dir())
        .map(|dir| format!("  - {}", normalize_for_display(&dir)))
        .collect::<Vec<_>>()
        .join("\n");
    bail!(
        "Directory {} is not set up properly.\nMissing required paths:\n{missing}\nRun: wpmigrate init --dir {} --lang {}",
        normalize_for_display(&paths.base_dir),
        normalize_for_display(&paths.root_dir),
        paths.locale
    );
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
    pub materialize_config: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub removed_base_dir: bool,
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let removed_base_dir = if options.force && paths.base_dir.exists() {
        fs::remove_dir_all(&paths.base_dir)
            .with_context(|| format!("failed to remove {}", paths.base_dir.display()))?;
        true
    } else {
        false
    };

    let mut created_dirs = Vec::new();
    for dir in paths.required_dirs() {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir);
        }
    }

    let wrote_config = if options.materialize_config {
        write_text_file(
            &paths.config_path,
            &render_materialized_config(paths),
            false,
        )?
    } else {
        false
    };

    Ok(InitReport {
        removed_base_dir,
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let locale = &paths.locale;
    format!(
        "# wpmigrate configuration (materialized by `wpmigrate init`)\n# Environment variables and CLI flags take precedence over these values.\n# The API password is only read from WP_PASSWORD or --password.\n\n[wordpress]\n# host = \"https://source.example.org\"\n# username = \"migration-bot\"\n# user_agent = \"wpmigrate/0.2\"\n\n[migration]\n# site = \"example\"\nlocale = \"{locale}\"\n# Password assigned to accounts created on the destination.\n# Prefer WP_NEW_USER_PASSWORD over storing it here.\n# new_user_password = \"\"\n\n[http]\n# timeout_ms = 30000\n# page_delay_ms = 5000\n# min_interval_ms = 250\n# retries = 0\n# retry_delay_ms = 500\n",
    )
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
pub(crate) fn test_paths(root: &Path) -> ResolvedPaths {
    WorkspaceRoot {
        root_dir: root.to_path_buf(),
        config_path: root.join(CONFIG_FILENAME),
        root_source: ValueSource::Flag,
        config_source: ValueSource::Default,
    }
    .with_locale("en")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, ensure_workspace_ready,
        init_layout, inspect_workspace, resolve_workspace_with_lookup, test_paths,
    };
    use crate::entity::EntityKind;

    #[test]
    fn resolve_workspace_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");

        let overrides = PathOverrides {
            workspace_dir: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext { cwd };
        let env = HashMap::from([(
            "WPMIGRATE_DIR".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_workspace_with_lookup(&context, &overrides, |key| {
            env.get(key).cloned()
        })
        .expect("resolve");
        assert_eq!(resolved.root_dir, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.config_path, from_flag.join("wpmigrate.toml"));
    }

    #[test]
    fn resolve_workspace_defaults_to_data_dir_under_cwd() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let resolved =
            resolve_workspace_with_lookup(&context, &PathOverrides::default(), |_| None)
                .expect("resolve");
        assert_eq!(resolved.root_dir, temp.path().join("data"));
        assert_eq!(resolved.root_source, ValueSource::Default);
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn locale_segments_the_layout() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        assert_eq!(paths.base_dir, temp.path().join("en"));
        assert_eq!(
            paths.entity_dir(EntityKind::Category),
            temp.path().join("en").join("dump").join("entries").join("category")
        );
        assert_eq!(
            paths.export_media_dir,
            temp.path().join("en").join("export").join("media")
        );
    }

    #[test]
    fn init_layout_creates_every_required_dir() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());

        let report = init_layout(
            &paths,
            &InitOptions {
                force: false,
                materialize_config: true,
            },
        )
        .expect("init");

        assert!(!report.removed_base_dir);
        assert!(report.wrote_config);
        for dir in paths.required_dirs() {
            assert!(dir.is_dir(), "missing {}", dir.display());
        }
        assert!(inspect_workspace(&paths).is_ready());
        ensure_workspace_ready(&paths).expect("ready");
    }

    #[test]
    fn init_layout_is_idempotent_without_force() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("first init");
        let marker = paths.entity_dir(EntityKind::Post).join("site-1.json");
        fs::write(&marker, "{}").expect("write marker");

        let report = init_layout(&paths, &InitOptions::default()).expect("second init");
        assert!(report.created_dirs.is_empty());
        assert!(marker.exists());
    }

    #[test]
    fn init_layout_force_wipes_locale_dir() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("first init");
        let marker = paths.entity_dir(EntityKind::Post).join("site-1.json");
        fs::write(&marker, "{}").expect("write marker");

        let report = init_layout(
            &paths,
            &InitOptions {
                force: true,
                materialize_config: false,
            },
        )
        .expect("forced init");
        assert!(report.removed_base_dir);
        assert!(!marker.exists());
        assert!(paths.entity_dir(EntityKind::Post).is_dir());
    }

    #[test]
    fn readiness_fails_when_an_entry_dir_is_missing() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("init");
        fs::remove_dir(paths.entity_dir(EntityKind::Tag)).expect("remove tag dir");

        let status = inspect_workspace(&paths);
        assert_eq!(status.missing_entry_dirs, vec![EntityKind::Tag]);
        let error = ensure_workspace_ready(&paths).expect_err("must fail");
        let message = error.to_string();
        assert!(message.contains("is not set up properly"));
        assert!(message.contains("entries/tag"));
    }
}
