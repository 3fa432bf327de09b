use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat, Map};
use std::path::{Path, PathBuf};

use crate::AppConfig;

/// 环境变量前缀，例如 `SPINDLE__SERVER__PORT=9999`
pub const ENV_PREFIX: &str = "SPINDLE";
pub const ENV_SEPARATOR: &str = "__";

/// 配置加载器
///
/// 优先级从低到高：内置默认值、TOML 文件、环境变量。
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env: Option<Map<String, String>>,
}

impl ConfigLoader {
    /// 创建配置加载器，`path` 为空时只使用默认值和环境变量
    pub fn new<P: AsRef<Path>>(path: Option<P>) -> Self {
        Self {
            path: path.map(|p| p.as_ref().to_path_buf()),
            env: None,
        }
    }

    /// 用给定的变量表代替进程环境
    pub fn with_env(mut self, vars: Map<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// 加载并验证配置
    ///
    /// 显式给出的配置文件不存在时返回错误。
    pub fn load(&self) -> Result<AppConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.path {
            if !path.exists() {
                return Err(anyhow!("Config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(self.env.clone()),
        );

        let config: AppConfig = builder
            .build()?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }
}
