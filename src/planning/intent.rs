//! 意图分析
//!
//! 先请求 LLM 给出固定结构的 JSON 分类；调用失败或结果无法解析时退回确定性规则：
//! 字数决定复杂度，关键词族（按固定顺序）决定类别，工具与协作者取自 Agent 的静态清单。
//! analyze 永不失败。

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::{AgentId, AgentProfile};
use crate::llm::{Generator, LlmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Some(Complexity::Simple),
            "moderate" => Some(Complexity::Moderate),
            "complex" => Some(Complexity::Complex),
            _ => None,
        }
    }

    /// >50 词为 complex，>20 词为 moderate
    pub fn from_word_count(words: usize) -> Self {
        if words > 50 {
            Complexity::Complex
        } else if words > 20 {
            Complexity::Moderate
        } else {
            Complexity::Simple
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Analysis,
    Planning,
    Creation,
    Research,
    Optimization,
    Financial,
    Communication,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Analysis => "analysis",
            Category::Planning => "planning",
            Category::Creation => "creation",
            Category::Research => "research",
            Category::Optimization => "optimization",
            Category::Financial => "financial",
            Category::Communication => "communication",
            Category::General => "general",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase();
        CATEGORY_FAMILIES
            .iter()
            .map(|(c, _)| *c)
            .chain(std::iter::once(Category::General))
            .find(|c| c.as_str() == key)
    }
}

/// 意图的来源：LLM 分类或规则回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Model,
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDescriptor {
    pub intent: String,
    pub complexity: Complexity,
    /// 非空，按清单顺序
    pub tools_needed: Vec<String>,
    pub requires_collaboration: bool,
    pub delegate_to: Vec<AgentId>,
    pub category: Category,
    pub source: IntentSource,
}

/// 关键词族，按检查顺序排列；首个命中的族决定类别
const CATEGORY_FAMILIES: &[(Category, &[&str])] = &[
    (
        Category::Analysis,
        &["analy", "evaluat", "assess", "compar", "review", "breakdown"],
    ),
    (
        Category::Planning,
        &["plan", "schedul", "roadmap", "timeline", "organiz", "prioritiz"],
    ),
    (
        Category::Creation,
        &["creat", "writ", "draft", "design", "build", "generat", "compose"],
    ),
    (
        Category::Research,
        &["research", "investigat", "explor", "find", "look up", "discover", "search"],
    ),
    (
        Category::Optimization,
        &["optimi", "improv", "streamlin", "reduc", "increas", "efficien", "boost"],
    ),
    (
        Category::Financial,
        &["budget", "cost", "revenue", "pric", "forecast", "financ", "profit", "invoice", "expense", "cash"],
    ),
    (
        Category::Communication,
        &["email", "messag", "call", "sms", "text", "contact", "notify", "reach out", "send", "reply"],
    ),
];

/// 需要协作的措辞
const COORDINATION_KEYWORDS: &[&str] = &[
    "collaborat",
    "coordinat",
    "together",
    "team",
    "cross-functional",
    "delegat",
    "involve",
    "loop in",
    "hand off",
];

/// 单个请求最多引入的协作者数
const MAX_DELEGATES: usize = 2;
/// intent 字段的最大字符数
const INTENT_SUMMARY_CHARS: usize = 120;

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9][a-z0-9'\-]*").expect("static regex"))
}

/// 小写分词后的请求文本，支持词前缀与短语两种匹配
struct Tokens {
    words: Vec<String>,
    joined: String,
}

impl Tokens {
    fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let words: Vec<String> = word_regex()
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .collect();
        let joined = format!(" {} ", words.join(" "));
        Self { words, joined }
    }

    fn matches(&self, keyword: &str) -> bool {
        if keyword.contains(' ') {
            self.joined.contains(&format!(" {keyword} "))
        } else {
            self.words.iter().any(|w| w.starts_with(keyword))
        }
    }

    fn matches_any(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.matches(k))
    }
}

fn summarize(request: &str) -> String {
    let trimmed = request.trim();
    if trimmed.chars().count() > INTENT_SUMMARY_CHARS {
        format!("{}...", trimmed.chars().take(INTENT_SUMMARY_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// 确定性规则分类
pub fn fallback_intent(profile: &AgentProfile, request: &str) -> IntentDescriptor {
    let tokens = Tokens::new(request);
    let complexity = Complexity::from_word_count(request.split_whitespace().count());

    let category = CATEGORY_FAMILIES
        .iter()
        .find(|(_, keywords)| tokens.matches_any(keywords))
        .map(|(c, _)| *c)
        .unwrap_or(Category::General);

    let mut tools_needed: Vec<String> = profile
        .tools
        .iter()
        .filter(|t| tokens.matches_any(t.keywords))
        .map(|t| t.name.to_string())
        .collect();
    if tools_needed.is_empty() {
        tools_needed.push(profile.primary_tool().to_string());
    }

    let requires_collaboration =
        complexity == Complexity::Complex || tokens.matches_any(COORDINATION_KEYWORDS);
    let delegate_to = if requires_collaboration {
        profile.delegates.iter().take(MAX_DELEGATES).copied().collect()
    } else {
        Vec::new()
    };

    IntentDescriptor {
        intent: summarize(request),
        complexity,
        tools_needed,
        requires_collaboration,
        delegate_to,
        category,
        source: IntentSource::Rules,
    }
}

/// LLM 返回的结构化分类
#[derive(Debug, Deserialize, JsonSchema)]
struct IntentReply {
    intent: String,
    /// simple | moderate | complex
    complexity: String,
    tools_needed: Vec<String>,
    #[serde(default)]
    requires_collaboration: bool,
    #[serde(default)]
    delegate_to: Vec<String>,
    /// analysis | planning | creation | research | optimization | financial | communication | general
    category: String,
}

#[derive(Debug, Error)]
enum ClassifyError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("unparsable classification: {0}")]
    Parse(String),
}

/// 从回复中取出 JSON 块（```json ... ``` 或首个 { 到最后一个 }）
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

impl IntentReply {
    /// 校验并规整到 Agent 的清单范围内
    fn into_descriptor(self, profile: &AgentProfile, request: &str) -> Result<IntentDescriptor, ClassifyError> {
        let complexity = Complexity::parse(&self.complexity)
            .ok_or_else(|| ClassifyError::Parse(format!("complexity '{}'", self.complexity)))?;
        let category = Category::parse(&self.category)
            .ok_or_else(|| ClassifyError::Parse(format!("category '{}'", self.category)))?;

        // 保持清单顺序，丢弃清单外的工具
        let mut tools_needed: Vec<String> = profile
            .tools
            .iter()
            .filter(|t| self.tools_needed.iter().any(|n| n.trim() == t.name))
            .map(|t| t.name.to_string())
            .collect();
        if tools_needed.is_empty() {
            tools_needed.push(profile.primary_tool().to_string());
        }

        let delegate_to: Vec<AgentId> = if self.requires_collaboration {
            let requested: Vec<AgentId> = self
                .delegate_to
                .iter()
                .filter_map(|d| d.parse::<AgentId>().ok())
                .collect();
            let chosen: Vec<AgentId> = profile
                .delegates
                .iter()
                .filter(|d| requested.contains(d))
                .take(MAX_DELEGATES)
                .copied()
                .collect();
            if chosen.is_empty() {
                profile.delegates.iter().take(MAX_DELEGATES).copied().collect()
            } else {
                chosen
            }
        } else {
            Vec::new()
        };

        let intent = if self.intent.trim().is_empty() {
            summarize(request)
        } else {
            summarize(&self.intent)
        };

        Ok(IntentDescriptor {
            intent,
            complexity,
            tools_needed,
            requires_collaboration: !delegate_to.is_empty(),
            delegate_to,
            category,
            source: IntentSource::Model,
        })
    }
}

pub struct IntentAnalyzer {
    generator: Generator,
}

impl IntentAnalyzer {
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// 分析请求意图；LLM 失败时使用规则回退
    pub async fn analyze(&self, agent: AgentId, request: &str) -> IntentDescriptor {
        let profile = agent.profile();
        match self.classify_with_model(profile, request).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(agent = %agent, error = %e, "Intent classification fell back to rules");
                fallback_intent(profile, request)
            }
        }
    }

    async fn classify_with_model(
        &self,
        profile: &AgentProfile,
        request: &str,
    ) -> Result<IntentDescriptor, ClassifyError> {
        let schema = serde_json::to_string(&schemars::schema_for!(IntentReply))
            .map_err(|e| ClassifyError::Parse(e.to_string()))?;
        let delegates: Vec<&str> = profile.delegates.iter().map(|d| d.as_str()).collect();
        let prompt = format!(
            "Classify the following request for {name}.\n\
             Available tools (choose from these only): {tools}\n\
             Possible collaborators: {delegates}\n\
             Output ONLY one JSON object matching this schema:\n{schema}\n\n\
             Request: {request}",
            name = profile.display_name,
            tools = profile.tool_names().join(", "),
            delegates = delegates.join(", "),
        );

        let reply = self.generator.generate(&profile.system_prompt(), &prompt).await?;
        let json = extract_json(&reply).ok_or_else(|| ClassifyError::Parse("no JSON object".to_string()))?;
        let parsed: IntentReply =
            serde_json::from_str(json).map_err(|e| ClassifyError::Parse(e.to_string()))?;
        parsed.into_descriptor(profile, request)
    }
}
