// SPDX-License-Identifier: CEPL-1.0
//! `vkplay.toml`: every key optional, anything missing or unreadable falls
//! back to the defaults.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use vkplay_render::{PresenterConfig, SuboptimalPolicy};
use vkplay_render_vk::DeviceOptions;

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuboptimalCfg {
    #[default]
    SkipPresent,
    Present,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ShaderPaths {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    #[serde(default = "default_min_images")]
    pub min_image_count: u32,
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default)]
    pub verbose_validation: bool,
    #[serde(default)]
    pub suboptimal: SuboptimalCfg,
    /// External SPIR-V instead of the built-in triangle shaders.
    #[serde(default)]
    pub shaders: Option<ShaderPaths>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: default_vsync(),
            min_image_count: default_min_images(),
            idle_pause_ms: default_idle_pause_ms(),
            validation: default_validation(),
            verbose_validation: false,
            suboptimal: SuboptimalCfg::default(),
            shaders: None,
        }
    }
}

impl RenderCfg {
    pub fn presenter_config(&self) -> PresenterConfig {
        PresenterConfig {
            min_image_count: self.min_image_count,
            idle_pause: Duration::from_millis(self.idle_pause_ms),
            suboptimal: match self.suboptimal {
                SuboptimalCfg::SkipPresent => SuboptimalPolicy::SkipPresent,
                SuboptimalCfg::Present => SuboptimalPolicy::Present,
            },
        }
    }

    pub fn device_options(&self, app_name: &str) -> DeviceOptions {
        DeviceOptions {
            app_name: app_name.to_owned(),
            validation: self.validation,
            verbose: self.verbose_validation,
        }
    }
}

fn default_width() -> u32 {
    1000
}
fn default_height() -> u32 {
    900
}
fn default_title() -> String {
    "Vulkan Playground".to_owned()
}
fn default_clear() -> [f32; 4] {
    [0.45, 0.55, 0.60, 1.0]
}
fn default_vsync() -> bool {
    true
}
fn default_min_images() -> u32 {
    2
}
fn default_idle_pause_ms() -> u64 {
    10
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}

pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cfg(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_cfg(&dir.path().join("absent.toml"));
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 1000);
        assert_eq!(cfg.window.height, 900);
        assert_eq!(cfg.window.title, "Vulkan Playground");
        assert_eq!(cfg.render.presenter_config(), PresenterConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let f = write_cfg(
            r#"
[window]
width = 640

[render]
vsync = false
suboptimal = "present"
"#,
        );
        let cfg = load_cfg(f.path());
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, 900);
        assert!(!cfg.render.vsync);
        assert_eq!(cfg.render.min_image_count, 2);
        assert_eq!(
            cfg.render.presenter_config().suboptimal,
            SuboptimalPolicy::Present
        );
    }

    #[test]
    fn malformed_file_falls_back() {
        let f = write_cfg("[render\nvsync = maybe");
        assert_eq!(load_cfg(f.path()), AppCfg::default());
    }

    #[test]
    fn wrong_types_fall_back() {
        let f = write_cfg("[render]\nmin_image_count = \"three\"\n");
        assert_eq!(load_cfg(f.path()), AppCfg::default());
    }

    #[test]
    fn shader_paths_and_timing() {
        let f = write_cfg(
            r#"
[render]
idle_pause_ms = 25
min_image_count = 3
validation = true
verbose_validation = true
clear_color = [0.0, 0.0, 0.0, 1.0]

[render.shaders]
vertex = "shaders/tri.vert.spv"
fragment = "shaders/tri.frag.spv"
"#,
        );
        let cfg = load_cfg(f.path());
        let pc = cfg.render.presenter_config();
        assert_eq!(pc.idle_pause, Duration::from_millis(25));
        assert_eq!(pc.min_image_count, 3);
        assert_eq!(cfg.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        let shaders = cfg.render.shaders.as_ref().unwrap();
        assert_eq!(shaders.vertex, PathBuf::from("shaders/tri.vert.spv"));

        let opts = cfg.render.device_options("probe");
        assert!(opts.validation && opts.verbose);
        assert_eq!(opts.app_name, "probe");
    }
}
