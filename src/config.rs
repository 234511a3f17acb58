use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::records::{guids, is_reserved};

/// 同步配置
/// 控制记录存储位置、忽略的子树以及孤儿书签的去向
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite 记录存储路径
    pub database: PathBuf,

    /// 不参与同步的 GUID（及其子项）
    pub ignored_guids: Vec<String>,

    /// 父文件夹缺失或被删除时，子项移入的文件夹
    pub orphan_folder: String,

    /// 增量导出的状态文件
    pub state_file: PathBuf,

    /// 详细输出
    pub verbose: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("bookmarks.sqlite"),
            ignored_guids: vec![guids::PINNED.to_string(), guids::TAGS.to_string()],
            orphan_folder: guids::UNFILED.to_string(),
            state_file: PathBuf::from(".bookmark-sync-state.json"),
            verbose: false,
        }
    }
}

impl SyncConfig {
    /// 从 JSON 文件加载配置，文件不存在时使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: SyncConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config {:?}", path))?;
        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        // 1. 孤儿文件夹必须是保留文件夹
        if !is_reserved(&self.orphan_folder) || self.orphan_folder == guids::PLACES {
            return Err(anyhow!(
                "❌ Error: orphan folder {:?} must be one of menu, toolbar, unfiled, mobile",
                self.orphan_folder
            ));
        }

        // 2. 孤儿文件夹不能被忽略，根节点也不能
        for guid in &self.ignored_guids {
            if *guid == self.orphan_folder || guid == guids::PLACES {
                return Err(anyhow!("❌ Error: {:?} cannot be ignored", guid));
            }
        }

        // 3. 数据库路径
        if self.database.as_os_str().is_empty() {
            return Err(anyhow!("❌ Error: database path is empty"));
        }

        if self.ignored_guids.is_empty() {
            warn!("⚠️  No ignored folders configured: pinned items will be synced");
        }

        Ok(())
    }

    pub fn description(&self) -> String {
        format!(
            "database {:?}, orphans → {}, ignoring [{}]",
            self.database,
            self.orphan_folder,
            self.ignored_guids.join(", ")
        )
    }
}
