//! 静态模板库：步骤生成失败时的补位输出
//!
//! 按步骤工具名匹配模板键（任一方向的子串匹配，库内顺序优先）；无命中时使用引用 Agent 专长的通用模板。
//! 占位符：{agent}、{role}、{request}、{description}、{expertise}。一次替换完成，替换进来的文本不再展开。

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::agents::AgentProfile;

const TEMPLATES: &[(&str, &str)] = &[
    (
        "research",
        "## Research notes\n\n{agent} ({role}) gathered background for \"{request}\".\n\n\
         - Key question: {description}\n- Sources to confirm: internal dashboards, recent customer feedback, industry benchmarks\n\
         - Next: validate the top three findings with the owning team",
    ),
    (
        "analysis",
        "## Analysis\n\n{description}.\n\n\
         - Current state: baseline figures pulled from the latest reporting period\n\
         - Drivers: volume, mix and timing effects reviewed\n- Risks: data freshness and one-off items flagged for review",
    ),
    (
        "market",
        "## Market snapshot\n\nFor \"{request}\":\n\n\
         - Segments: core customers, adjacent segments, emerging niches\n\
         - Competitors: positioning and pricing to be benchmarked\n- Opportunity: focus on the segment with the clearest unmet need",
    ),
    (
        "financial",
        "## Financial view\n\n{description}.\n\n\
         | Item | Assumption |\n|---|---|\n| Revenue | trailing run-rate |\n| Costs | current commitments |\n| Margin | held flat pending review |",
    ),
    (
        "budget",
        "## Budget outline\n\n- Fixed costs carried forward\n- Variable costs scaled to forecast volume\n\
         - Contingency reserve of 10%\n- Owner: {agent}",
    ),
    (
        "forecast",
        "## Forecast\n\nBase, upside and downside scenarios prepared for \"{request}\"; \
         assumptions listed for sign-off.",
    ),
    (
        "campaign",
        "## Campaign outline\n\n- Goal: {request}\n- Audience: primary segment\n\
         - Channels: email, social, partner placements\n- Timeline: four-week flight with weekly checkpoints",
    ),
    (
        "content",
        "## Content draft\n\nHeadline, three supporting points and a call to action prepared for \"{request}\".",
    ),
    (
        "outreach",
        "## Outreach plan\n\n- Target list prioritised by fit\n- Two-touch sequence drafted\n\
         - Messages queued for approval before sending",
    ),
    (
        "pricing",
        "## Pricing proposal\n\nTiered options with a recommended middle tier; discount guardrails noted.",
    ),
    (
        "schedule",
        "## Schedule\n\n- Milestones laid out week by week\n- Dependencies and owners listed\n- Buffer held before the final deadline",
    ),
    (
        "process",
        "## Process review\n\n- Current steps mapped\n- Bottlenecks: hand-offs and manual approvals\n\
         - Recommendation: automate the highest-volume hand-off first",
    ),
    (
        "report",
        "## Report\n\nSummary of findings for \"{request}\" with supporting details and recommended next steps.",
    ),
    (
        "lesson",
        "## Lesson plan\n\n- Objective\n- Warm-up activity\n- Core instruction\n- Practice and assessment",
    ),
    (
        "ticket",
        "## Ticket triage\n\nIssues grouped by severity; urgent items routed to the owning team today.",
    ),
    (
        "strategic",
        "## Strategic outline\n\n- Where we play\n- How we win\n- Initiatives ranked by impact and effort",
    ),
];

const GENERIC_TEMPLATE: &str = "## {description}\n\n\
    {agent} ({role}) prepared this step for \"{request}\" drawing on {expertise}. \
    Details will be refined once live data is available.";

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(agent|role|request|description|expertise)\}").expect("static regex"))
}

/// 模板键匹配：键包含工具名或工具名包含键；空工具名不匹配
pub fn find_template(tool: &str) -> Option<&'static str> {
    let tool = tool.trim().to_lowercase();
    if tool.is_empty() {
        return None;
    }
    TEMPLATES
        .iter()
        .find(|(key, _)| tool.contains(key) || key.contains(tool.as_str()))
        .map(|(_, body)| *body)
}

/// 渲染模板输出；该路径不会失败
pub fn render(tool: &str, profile: &AgentProfile, request: &str, description: &str) -> String {
    let expertise = profile.expertise.join(", ");
    let template = find_template(tool).unwrap_or(GENERIC_TEMPLATE);
    placeholder_regex()
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "agent" => profile.display_name.to_string(),
            "role" => profile.role.to_string(),
            "request" => request.trim().to_string(),
            "description" => description.to_string(),
            _ => expertise.clone(),
        })
        .into_owned()
}
