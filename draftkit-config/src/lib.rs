use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub drawing: DrawingConfig,
    #[serde(default)]
    pub quadtree: QuadtreeConfig,
}

impl AppConfig {
    /// 从显式路径加载配置，并校验数值范围。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `DRAFTKIT_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os("DRAFTKIT_CONFIG") {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.drawing.validate()?;
        self.quadtree.validate()
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 新建图层的默认行为。
#[derive(Debug, Clone, Deserialize)]
pub struct DrawingConfig {
    #[serde(default = "DrawingConfig::default_autosplit")]
    pub autosplit: bool,
    /// 自动分割时点到实体的最大距离。
    #[serde(default = "DrawingConfig::default_split_tolerance")]
    pub split_tolerance: f64,
    /// 交互式捕捉（map_point）的默认容差。
    #[serde(default = "DrawingConfig::default_snap_tolerance")]
    pub snap_tolerance: f64,
    #[serde(default)]
    pub default_style: StyleConfig,
}

impl DrawingConfig {
    fn default_autosplit() -> bool {
        true
    }

    fn default_split_tolerance() -> f64 {
        1e-10
    }

    fn default_snap_tolerance() -> f64 {
        1.0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_negative("drawing.split_tolerance", self.split_tolerance)?;
        non_negative("drawing.snap_tolerance", self.snap_tolerance)?;
        self.default_style.validate()
    }
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            autosplit: Self::default_autosplit(),
            split_tolerance: Self::default_split_tolerance(),
            snap_tolerance: Self::default_snap_tolerance(),
            default_style: StyleConfig::default(),
        }
    }
}

/// 图纸默认样式。`dashes` 为空表示实线。
#[derive(Debug, Clone, Deserialize)]
pub struct StyleConfig {
    #[serde(default = "StyleConfig::default_name")]
    pub name: String,
    #[serde(default = "StyleConfig::default_color")]
    pub color: [u8; 3],
    #[serde(default = "StyleConfig::default_linetype")]
    pub linetype: String,
    #[serde(default)]
    pub dashes: Vec<f64>,
    #[serde(default = "StyleConfig::default_thickness")]
    pub thickness: f64,
}

impl StyleConfig {
    fn default_name() -> String {
        "Default Style".to_string()
    }

    fn default_color() -> [u8; 3] {
        [255, 255, 255]
    }

    fn default_linetype() -> String {
        "Solid".to_string()
    }

    fn default_thickness() -> f64 {
        1.0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_negative("drawing.default_style.thickness", self.thickness)?;
        if self.dashes.len() % 2 != 0 {
            return Err(ConfigError::Invalid {
                field: "drawing.default_style.dashes",
                message: format!("需要偶数个元素，实际为 {}", self.dashes.len()),
            });
        }
        Ok(())
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            color: Self::default_color(),
            linetype: Self::default_linetype(),
            dashes: Vec::new(),
            thickness: Self::default_thickness(),
        }
    }
}

/// 四叉树分裂/合并阈值。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuadtreeConfig {
    #[serde(default = "QuadtreeConfig::default_max_occupancy")]
    pub max_occupancy: usize,
    #[serde(default = "QuadtreeConfig::default_min_occupancy")]
    pub min_occupancy: usize,
    #[serde(default = "QuadtreeConfig::default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "QuadtreeConfig::default_growth_margin")]
    pub growth_margin: f64,
}

impl QuadtreeConfig {
    fn default_max_occupancy() -> usize {
        8
    }

    fn default_min_occupancy() -> usize {
        4
    }

    fn default_max_depth() -> usize {
        16
    }

    fn default_growth_margin() -> f64 {
        0.1
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_occupancy == 0 {
            return Err(ConfigError::Invalid {
                field: "quadtree.max_occupancy",
                message: "必须大于 0".to_string(),
            });
        }
        if self.min_occupancy > self.max_occupancy {
            return Err(ConfigError::Invalid {
                field: "quadtree.min_occupancy",
                message: format!("不能大于 max_occupancy ({})", self.max_occupancy),
            });
        }
        non_negative("quadtree.growth_margin", self.growth_margin)
    }
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            max_occupancy: Self::default_max_occupancy(),
            min_occupancy: Self::default_min_occupancy(),
            max_depth: Self::default_max_depth(),
            growth_margin: Self::default_growth_margin(),
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            message: format!("必须是非负有限数，实际为 {value}"),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置项 {field} 无效: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
