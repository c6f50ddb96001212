//! Agent 注册表
//!
//! AgentId 为封闭枚举，每个变体对应一份静态 AgentProfile：
//! 工具清单（tools，按优先顺序）、可委派的协作者（delegates，按优先顺序）与专长（expertise）。
//! 规则回退的意图分析依赖清单顺序，因此顺序本身是契约的一部分。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 系统中的全部 Agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    Strategist,
    Finance,
    Marketing,
    Sales,
    Operations,
    Research,
    Support,
    Educator,
}

#[derive(Debug, Error)]
#[error("Unknown agent: {0}")]
pub struct UnknownAgent(pub String);

impl AgentId {
    pub const ALL: [AgentId; 8] = [
        AgentId::Strategist,
        AgentId::Finance,
        AgentId::Marketing,
        AgentId::Sales,
        AgentId::Operations,
        AgentId::Research,
        AgentId::Support,
        AgentId::Educator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Strategist => "strategist",
            AgentId::Finance => "finance",
            AgentId::Marketing => "marketing",
            AgentId::Sales => "sales",
            AgentId::Operations => "operations",
            AgentId::Research => "research",
            AgentId::Support => "support",
            AgentId::Educator => "educator",
        }
    }

    /// 该 Agent 的静态能力档案
    pub fn profile(&self) -> &'static AgentProfile {
        match self {
            AgentId::Strategist => &STRATEGIST,
            AgentId::Finance => &FINANCE,
            AgentId::Marketing => &MARKETING,
            AgentId::Sales => &SALES,
            AgentId::Operations => &OPERATIONS,
            AgentId::Research => &RESEARCH,
            AgentId::Support => &SUPPORT,
            AgentId::Educator => &EDUCATOR,
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        AgentId::ALL
            .into_iter()
            .find(|id| id.as_str() == key)
            .ok_or(UnknownAgent(s.to_string()))
    }
}

/// 工具条目：名称 + 触发关键词（小写词前缀或短语）
#[derive(Debug)]
pub struct ToolSpec {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

/// Agent 能力档案
#[derive(Debug)]
pub struct AgentProfile {
    pub id: AgentId,
    pub display_name: &'static str,
    pub role: &'static str,
    pub tools: &'static [ToolSpec],
    pub delegates: &'static [AgentId],
    pub expertise: &'static [&'static str],
}

impl AgentProfile {
    /// 清单中的第一个工具，意图分析的默认选择
    pub fn primary_tool(&self) -> &'static str {
        self.tools.first().map(|t| t.name).unwrap_or("general_assistance")
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    pub fn can_delegate_to(&self, other: AgentId) -> bool {
        self.delegates.contains(&other)
    }

    /// 作为 LLM system 消息的身份描述
    pub fn system_prompt(&self) -> String {
        format!(
            "You are {}, the {} of a business assistant team. Your expertise: {}. \
             Your tools: {}. Answer concisely and concretely; never mention that you are an AI model.",
            self.display_name,
            self.role,
            self.expertise.join(", "),
            self.tool_names().join(", "),
        )
    }
}

static STRATEGIST: AgentProfile = AgentProfile {
    id: AgentId::Strategist,
    display_name: "Stella",
    role: "chief strategy officer",
    tools: &[
        ToolSpec {
            name: "strategic_planning",
            keywords: &["strateg", "vision", "long-term", "initiative"],
        },
        ToolSpec {
            name: "competitive_analysis",
            keywords: &["competit", "rival", "benchmark"],
        },
        ToolSpec {
            name: "okr_builder",
            keywords: &["okr", "goal", "objective", "kpi"],
        },
    ],
    delegates: &[AgentId::Finance, AgentId::Marketing, AgentId::Operations],
    expertise: &["business strategy", "market positioning", "goal setting"],
};

static FINANCE: AgentProfile = AgentProfile {
    id: AgentId::Finance,
    display_name: "Felix",
    role: "finance lead",
    tools: &[
        ToolSpec {
            name: "financial_model",
            keywords: &["model", "valuation", "scenario"],
        },
        ToolSpec {
            name: "budget_forecast",
            keywords: &["budget", "forecast", "projection"],
        },
        ToolSpec {
            name: "cash_flow_analysis",
            keywords: &["cash", "runway", "burn", "liquidity"],
        },
    ],
    delegates: &[AgentId::Strategist, AgentId::Operations],
    expertise: &["financial modeling", "budgeting", "cash management"],
};

static MARKETING: AgentProfile = AgentProfile {
    id: AgentId::Marketing,
    display_name: "Maya",
    role: "marketing director",
    tools: &[
        ToolSpec {
            name: "campaign_planner",
            keywords: &["campaign", "launch", "promotion"],
        },
        ToolSpec {
            name: "content_creation",
            keywords: &["content", "blog", "post", "copy", "newsletter"],
        },
        ToolSpec {
            name: "market_research",
            keywords: &["market", "audience", "segment", "competitor"],
        },
    ],
    delegates: &[AgentId::Sales, AgentId::Research],
    expertise: &["brand building", "campaign management", "content strategy"],
};

static SALES: AgentProfile = AgentProfile {
    id: AgentId::Sales,
    display_name: "Sam",
    role: "head of sales",
    tools: &[
        ToolSpec {
            name: "pipeline_review",
            keywords: &["pipeline", "deal", "funnel", "quota"],
        },
        ToolSpec {
            name: "lead_outreach",
            keywords: &["lead", "prospect", "outreach", "follow"],
        },
        ToolSpec {
            name: "pricing_proposal",
            keywords: &["pric", "quote", "proposal", "discount"],
        },
    ],
    delegates: &[AgentId::Marketing, AgentId::Finance],
    expertise: &["pipeline management", "negotiation", "pricing"],
};

static OPERATIONS: AgentProfile = AgentProfile {
    id: AgentId::Operations,
    display_name: "Olivia",
    role: "operations manager",
    tools: &[
        ToolSpec {
            name: "process_optimization",
            keywords: &["process", "workflow", "bottleneck", "efficien"],
        },
        ToolSpec {
            name: "schedule_builder",
            keywords: &["schedul", "shift", "calendar", "roster"],
        },
        ToolSpec {
            name: "vendor_coordination",
            keywords: &["vendor", "supplier", "procure", "shipment"],
        },
    ],
    delegates: &[AgentId::Finance, AgentId::Support],
    expertise: &["process design", "scheduling", "vendor management"],
};

static RESEARCH: AgentProfile = AgentProfile {
    id: AgentId::Research,
    display_name: "Riley",
    role: "research analyst",
    tools: &[
        ToolSpec {
            name: "market_research",
            keywords: &["market", "industry", "competitor", "trend"],
        },
        ToolSpec {
            name: "data_analysis",
            keywords: &["dataset", "data", "metric", "statistic", "survey"],
        },
        ToolSpec {
            name: "report_writer",
            keywords: &["report", "summary", "brief", "write-up"],
        },
    ],
    delegates: &[AgentId::Strategist, AgentId::Marketing],
    expertise: &["market research", "data analysis", "reporting"],
};

static SUPPORT: AgentProfile = AgentProfile {
    id: AgentId::Support,
    display_name: "Sky",
    role: "customer support lead",
    tools: &[
        ToolSpec {
            name: "ticket_triage",
            keywords: &["ticket", "issue", "bug", "complaint"],
        },
        ToolSpec {
            name: "customer_reply",
            keywords: &["reply", "respond", "customer", "refund"],
        },
        ToolSpec {
            name: "knowledge_base",
            keywords: &["faq", "article", "documentation", "knowledge"],
        },
    ],
    delegates: &[AgentId::Operations, AgentId::Sales],
    expertise: &["customer care", "issue resolution", "self-service content"],
};

static EDUCATOR: AgentProfile = AgentProfile {
    id: AgentId::Educator,
    display_name: "Eli",
    role: "learning coordinator",
    tools: &[
        ToolSpec {
            name: "lesson_planner",
            keywords: &["lesson", "curriculum", "syllabus", "class"],
        },
        ToolSpec {
            name: "classroom_update",
            keywords: &["classroom", "assignment", "announce"],
        },
        ToolSpec {
            name: "progress_report",
            keywords: &["progress", "grade", "student", "attendance"],
        },
    ],
    delegates: &[AgentId::Research, AgentId::Support],
    expertise: &["instructional design", "classroom management", "student progress tracking"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_profile_matches_its_id() {
        for id in AgentId::ALL {
            let profile = id.profile();
            assert_eq!(profile.id, id);
            assert!(!profile.tools.is_empty(), "{id} has no tools");
            assert!(!profile.expertise.is_empty());
            assert!(!profile.can_delegate_to(id), "{id} delegates to itself");
        }
    }

    #[test]
    fn test_parse_agent_id() {
        assert_eq!("Finance".parse::<AgentId>().unwrap(), AgentId::Finance);
        assert_eq!(" research ".parse::<AgentId>().unwrap(), AgentId::Research);
        assert!("janitor".parse::<AgentId>().is_err());
    }

    #[test]
    fn test_primary_tool_is_first_in_roster() {
        assert_eq!(AgentId::Research.profile().primary_tool(), "market_research");
        assert_eq!(AgentId::Finance.profile().primary_tool(), "financial_model");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&AgentId::Operations).unwrap();
        assert_eq!(json, "\"operations\"");
    }
}
