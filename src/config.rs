//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OPSDESK__*` 覆盖（双下划线表示嵌套，如 `OPSDESK__LLM__PROVIDER=mock`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub planning: PlanningSection,
    pub permissions: PermissionsSection,
    pub actions: ActionsSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、记忆上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个 Agent 保留的对话条数
    pub memory_max_messages: usize,
    /// 每个 Agent 保留的学习记录条数
    pub memory_max_learnings: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            memory_max_messages: 50,
            memory_max_learnings: 20,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    /// 单次调用超时（秒），超时走降级路径
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 20,
        }
    }
}

/// [planning] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanningSection {
    /// LLM 失败时是否用模板库补位；关闭后失败步骤直接标记 failed
    pub template_fallback: bool,
    /// 合成交付物时拼接各步骤输出的分隔符
    pub deliverable_separator: String,
    /// 生成最终回复时带入的历史消息条数
    pub history_messages: usize,
    /// 每个 Agent 保留的历史计划数，超出时淘汰最早的
    pub max_plans_per_agent: usize,
}

impl Default for PlanningSection {
    fn default() -> Self {
        Self {
            template_fallback: true,
            deliverable_separator: "\n\n---\n\n".to_string(),
            history_messages: 6,
            max_plans_per_agent: 20,
        }
    }
}

/// [permissions] 段：审批门控
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// financial_transaction 金额超过该值时必须审批
    pub financial_threshold: f64,
    /// 未登记的动作是否需要审批
    pub default_requires_approval: bool,
    /// 覆盖静态表：动作名 -> 是否需要审批
    pub overrides: HashMap<String, bool>,
    /// 保留的已了结审批单数（已拒绝或已成功重放）
    pub max_settled_requests: usize,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            financial_threshold: 1000.0,
            default_requires_approval: true,
            overrides: HashMap::new(),
            max_settled_requests: 500,
        }
    }
}

/// [actions] 段：外部动作网关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionsSection {
    /// 网关地址；未设置时所有动作降级为排队桩
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ActionsSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 15,
        }
    }
}

/// [store] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite 文件路径（需启用 async-sqlite feature），未设置时使用内存存储
    pub sqlite_path: Option<PathBuf>,
}

/// 从 config 目录加载配置，环境变量 OPSDESK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 OPSDESK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OPSDESK")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.permissions.financial_threshold, 1000.0);
        assert!(cfg.planning.template_fallback);
        assert_eq!(cfg.llm.timeout_secs, 20);
        assert!(cfg.actions.base_url.is_none());
        assert_eq!(cfg.planning.max_plans_per_agent, 20);
        assert_eq!(cfg.permissions.max_settled_requests, 500);
    }

    #[test]
    fn test_file_overrides_selected_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[permissions]\nfinancial_threshold = 250.0\n\n[permissions.overrides]\nweb_lookup = true\n\n[llm]\nprovider = \"mock\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.permissions.financial_threshold, 250.0);
        assert_eq!(cfg.permissions.overrides.get("web_lookup"), Some(&true));
        assert_eq!(cfg.llm.provider, "mock");
        // 未出现的键保留默认
        assert_eq!(cfg.llm.timeout_secs, 20);
        assert_eq!(cfg.app.memory_max_messages, 50);
    }
}
