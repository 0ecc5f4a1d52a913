//! Planner role: builds and merges plans

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{RoleError, Roles, extract_json};
use crate::domain::{Plan, Subtask, SubtaskStatus};
use crate::llm::GenRole;
use crate::state::{Message, NovelProfile};

/// Fixed novel setup subtasks, in order (t1..t4)
pub const NOVEL_SETUP_TITLES: [&str; 4] = ["Research", "Character setup", "Plot design", "Chapter allocation"];

const SETUP_KEY: &str = "setup";

/// Header fields of a planner reply
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlanHeader {
    pub title: String,
    pub description: String,
    pub notes: String,
}

/// One subtask as proposed by the planner
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlannedSubtask {
    #[serde(alias = "id")]
    pub subtask_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: Option<String>,
    pub notes: String,
}

/// Structured planner reply
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlannerOutput {
    pub plan: PlanHeader,
    pub subtasks: Vec<PlannedSubtask>,
}

impl PlannerOutput {
    fn from_outline(plan: Plan) -> Self {
        Self {
            plan: PlanHeader {
                title: plan.title,
                description: plan.description,
                notes: String::new(),
            },
            subtasks: plan
                .subtasks
                .into_iter()
                .map(|s| PlannedSubtask {
                    title: s.title,
                    ..Default::default()
                })
                .collect(),
        }
    }
}

/// Parse a planner reply; `None` when it carries no usable subtasks
pub fn parse_planner_output(text: &str) -> Option<PlannerOutput> {
    debug!(text_len = text.len(), "parse_planner_output: called");
    let output = if let Some(obj) = extract_json(text, '{', '}')
        && let Ok(output) = serde_json::from_str::<PlannerOutput>(obj)
        && !output.subtasks.is_empty()
    {
        output
    } else if let Some(arr) = extract_json(text, '[', ']')
        && let Ok(subtasks) = serde_json::from_str::<Vec<PlannedSubtask>>(arr)
    {
        PlannerOutput {
            plan: PlanHeader::default(),
            subtasks,
        }
    } else {
        debug!("parse_planner_output: no JSON found");
        return None;
    };

    let usable = output.subtasks.iter().any(|s| !s.title.trim().is_empty());
    usable.then_some(output)
}

/// Inputs for one planner call
pub struct PlanRequest<'a> {
    pub plan_id: &'a str,
    pub topic: &'a str,
    /// Existing plan to merge into (plan update)
    pub current: Option<&'a Plan>,
    pub transcript: &'a [Message],
    /// Latest user input, if any
    pub input: Option<&'a str>,
    pub novel: Option<&'a NovelProfile>,
}

/// Result of a planner call
#[derive(Debug, Clone)]
pub struct PlannerReply {
    pub plan: Plan,
    pub raw: String,
    /// Whether the reply parsed as structured JSON
    pub structured: bool,
}

impl Roles {
    /// Generate a new plan or merge the planner's proposal into `current`
    pub async fn plan(&self, req: PlanRequest<'_>) -> Result<PlannerReply, RoleError> {
        debug!(topic = %req.topic, merging = req.current.is_some(), "Roles::plan: called");
        let transcript = req
            .transcript
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let current_plan = req.current.and_then(|p| serde_json::to_string_pretty(p).ok());
        let system = self.render(
            "planner",
            &json!({
                "topic": req.topic,
                "novel": req.novel.is_some(),
                "profile": req.novel.map(NovelProfile::describe),
                "current_plan": current_plan,
                "transcript": transcript,
            }),
        )?;
        let raw = self
            .call(GenRole::Planner, &system, req.input.unwrap_or(req.topic))
            .await?;

        let parsed = parse_planner_output(&raw);
        let structured = parsed.is_some();
        let plan = match (req.current, parsed) {
            (Some(current), Some(output)) => merge_plan(current, &output, req.novel),
            (Some(current), None) => {
                warn!("Roles::plan: unstructured planner reply, keeping current plan");
                let mut plan = current.clone();
                if let Some(profile) = req.novel {
                    seed_novel(&mut plan, profile);
                }
                plan
            }
            (None, Some(output)) => build_plan(req.plan_id, req.topic, &output, req.novel),
            (None, None) => {
                debug!("Roles::plan: falling back to outline parsing");
                let outline = PlannerOutput::from_outline(Plan::from_outline(req.plan_id, req.topic, &raw));
                build_plan(req.plan_id, req.topic, &outline, req.novel)
            }
        };
        info!(plan_id = %plan.plan_id, subtasks = plan.subtasks.len(), structured, "Plan generated");
        Ok(PlannerReply { plan, raw, structured })
    }
}

/// Build a fresh plan from a planner reply
pub(crate) fn build_plan(plan_id: &str, topic: &str, output: &PlannerOutput, novel: Option<&NovelProfile>) -> Plan {
    debug!(%plan_id, "build_plan: called");
    let title = non_empty(&output.plan.title).unwrap_or(topic);
    let mut plan = Plan::new(plan_id, title);
    plan.description = non_empty(&output.plan.description)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Plan for: {}", topic));
    plan.notes = output.plan.notes.clone();

    if let Some(profile) = novel {
        seed_novel(&mut plan, profile);
    }
    for planned in &output.subtasks {
        if planned.title.trim().is_empty() || (novel.is_some() && is_setup_title(&planned.title)) {
            continue;
        }
        let id = plan.generate_id();
        plan.subtasks.push(new_subtask(id, planned));
    }
    plan
}

/// Merge a planner reply into an existing plan
///
/// Finished subtasks are kept untouched. Pending ones the planner mentions by
/// id are updated, pending ones it omits are dropped, and new ones are
/// appended with fresh ids. Novel setup subtasks are always kept.
pub fn merge_plan(existing: &Plan, output: &PlannerOutput, novel: Option<&NovelProfile>) -> Plan {
    debug!(plan_id = %existing.plan_id, proposed = output.subtasks.len(), "merge_plan: called");
    let mut plan = existing.clone();
    if let Some(title) = non_empty(&output.plan.title) {
        plan.title = title.to_string();
    }
    if let Some(description) = non_empty(&output.plan.description) {
        plan.description = description.to_string();
    }
    if let Some(notes) = non_empty(&output.plan.notes) {
        plan.notes = notes.to_string();
    }

    let mentioned: BTreeSet<&str> = output
        .subtasks
        .iter()
        .filter_map(|s| s.subtask_id.as_deref())
        .filter(|id| existing.find(id).is_some())
        .collect();

    plan.subtasks.retain(|s| {
        s.status != SubtaskStatus::Pending || is_setup(s) || mentioned.contains(s.id.as_str())
    });

    for planned in &output.subtasks {
        if planned.title.trim().is_empty() {
            continue;
        }
        if let Some(id) = planned.subtask_id.as_deref()
            && let Some(sub) = plan.find_mut(id)
        {
            if sub.status == SubtaskStatus::Pending {
                debug!(%id, "merge_plan: updating pending subtask");
                sub.title = planned.title.trim().to_string();
                if !planned.description.is_empty() {
                    sub.description = planned.description.clone();
                }
                if !planned.notes.is_empty() {
                    sub.notes = planned.notes.clone();
                }
            }
            continue;
        }
        let duplicate = plan
            .subtasks
            .iter()
            .any(|s| s.title.eq_ignore_ascii_case(planned.title.trim()));
        if duplicate || (novel.is_some() && is_setup_title(&planned.title)) {
            debug!(title = %planned.title, "merge_plan: skipping duplicate title");
            continue;
        }
        let id = plan.generate_id();
        debug!(%id, "merge_plan: appending new subtask");
        plan.subtasks.push(new_subtask(id, planned));
    }

    if let Some(profile) = novel {
        seed_novel(&mut plan, profile);
    }
    plan
}

/// Make sure the novel setup subtasks t1..t4 exist, in front
pub(crate) fn seed_novel(plan: &mut Plan, profile: &NovelProfile) {
    debug!(plan_id = %plan.plan_id, "seed_novel: called");
    let profile_text = profile.describe();
    for (idx, title) in NOVEL_SETUP_TITLES.iter().enumerate() {
        let id = format!("t{}", idx + 1);
        if plan.find(&id).is_some() {
            continue;
        }
        let mut sub = Subtask::new(id, *title).with_description(setup_description(title, &profile_text));
        sub.metadata.insert(SETUP_KEY.to_string(), Value::Bool(true));
        let at = idx.min(plan.subtasks.len());
        plan.subtasks.insert(at, sub);
    }
    plan.id_seq = plan.id_seq.max(NOVEL_SETUP_TITLES.len() as u32);
}

fn setup_description(title: &str, profile: &str) -> String {
    let task = match title {
        "Research" => "Research the era, setting and genre conventions the story relies on",
        "Character setup" => "Define every main character with background, motivation and arc",
        "Plot design" => "Design the overall plot from opening to resolution",
        _ => "Allocate the plot to numbered chapters with the events each one covers",
    };
    if profile.is_empty() {
        format!("{}. Cover full content, not an outline.", task)
    } else {
        format!("{}. Profile: {}. Cover full content, not an outline.", task, profile)
    }
}

fn is_setup(sub: &Subtask) -> bool {
    sub.metadata.get(SETUP_KEY).and_then(Value::as_bool).unwrap_or(false)
}

fn is_setup_title(title: &str) -> bool {
    NOVEL_SETUP_TITLES.iter().any(|t| t.eq_ignore_ascii_case(title.trim()))
}

fn new_subtask(id: String, planned: &PlannedSubtask) -> Subtask {
    // A planner cannot mark work done; only skips carry over
    let status = match planned.status.as_deref() {
        Some("skipped") => SubtaskStatus::Skipped,
        _ => SubtaskStatus::Pending,
    };
    let mut sub = Subtask::new(id, planned.title.trim())
        .with_description(planned.description.clone())
        .with_status(status);
    sub.notes = planned.notes.clone();
    sub
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockGenerationClient;
    use crate::prompts::PromptLoader;
    use std::sync::Arc;

    const REPLY: &str = r#"```json
{"plan": {"title": "Dragon Tale", "description": "A short story"},
 "subtasks": [
   {"subtask_id": "t1", "title": "Outline"},
   {"title": "Draft", "description": "Write it", "status": "done"},
   {"title": ""}
 ]}
```"#;

    #[test]
    fn test_parse_tolerates_fences() {
        let output = parse_planner_output(REPLY).unwrap();
        assert_eq!(output.plan.title, "Dragon Tale");
        assert_eq!(output.subtasks.len(), 3);
        assert_eq!(output.subtasks[0].subtask_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_parse_bare_array_and_garbage() {
        let output = parse_planner_output(r#"[{"id": "t9", "title": "Only"}]"#).unwrap();
        assert_eq!(output.subtasks[0].subtask_id.as_deref(), Some("t9"));
        assert!(parse_planner_output("1. first\n2. second").is_none());
        assert!(parse_planner_output(r#"{"subtasks": []}"#).is_none());
    }

    #[test]
    fn test_build_plan_assigns_fresh_ids_and_pending() {
        let output = parse_planner_output(REPLY).unwrap();
        let plan = build_plan("p1", "dragons", &output, None);
        assert_eq!(plan.title, "Dragon Tale");
        let ids: Vec<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        // Planner cannot mark anything done
        assert!(plan.subtasks.iter().all(|s| s.status == SubtaskStatus::Pending));
    }

    #[test]
    fn test_build_novel_plan_seeds_setup() {
        let profile = NovelProfile {
            genre: "fantasy".to_string(),
            ..Default::default()
        };
        let output = parse_planner_output(
            r#"{"subtasks": [{"title": "Research"}, {"title": "Chapter 1: Arrival"}]}"#,
        )
        .unwrap();
        let plan = build_plan("p1", "dragons", &output, Some(&profile));
        let titles: Vec<&str> = plan.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Research", "Character setup", "Plot design", "Chapter allocation", "Chapter 1: Arrival"]
        );
        assert_eq!(plan.subtasks[4].id, "t5");
        for setup in &plan.subtasks[..4] {
            assert!(setup.description.to_lowercase().contains("cover full content"));
            assert!(setup.description.contains("Genre: fantasy"));
        }
    }

    #[test]
    fn test_merge_keeps_done_updates_pending_appends_new() {
        let mut existing = Plan::new("p1", "Old");
        existing
            .append(Subtask::new("t1", "Intro").with_status(SubtaskStatus::Done))
            .unwrap();
        existing.append(Subtask::new("t2", "Middle")).unwrap();
        existing.append(Subtask::new("t3", "Dropped")).unwrap();

        let output = parse_planner_output(
            r#"{"plan": {"title": "New"}, "subtasks": [
                {"subtask_id": "t1", "title": "Intro rewritten"},
                {"subtask_id": "t2", "title": "Middle part", "description": "more"},
                {"title": "intro"},
                {"title": "Ending"}
            ]}"#,
        )
        .unwrap();
        let merged = merge_plan(&existing, &output, None);

        assert_eq!(merged.title, "New");
        assert_eq!(merged.find("t1").unwrap().title, "Intro");
        assert_eq!(merged.find("t2").unwrap().title, "Middle part");
        assert_eq!(merged.find("t2").unwrap().description, "more");
        assert!(merged.find("t3").is_none());
        // Fresh id never reuses the dropped t3
        assert_eq!(merged.subtasks.last().unwrap().id, "t4");
        assert_eq!(merged.subtasks.last().unwrap().title, "Ending");
        assert_eq!(merged.subtasks.len(), 3);
    }

    #[test]
    fn test_merge_keeps_novel_setup() {
        let profile = NovelProfile::default();
        let mut existing = Plan::new("p1", "Novel");
        seed_novel(&mut existing, &profile);
        let output = parse_planner_output(r#"{"subtasks": [{"title": "Chapter 1"}]}"#).unwrap();
        let merged = merge_plan(&existing, &output, Some(&profile));
        assert_eq!(merged.subtasks.len(), 5);
        assert_eq!(merged.subtasks[4].id, "t5");
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_outline() {
        let client = Arc::new(MockGenerationClient::new().with_response(GenRole::Planner, "- Research\n- Write\n"));
        let roles = Roles::new(client.clone(), Arc::new(PromptLoader::embedded_only()));
        let reply = roles
            .plan(PlanRequest {
                plan_id: "p1",
                topic: "sea shanties",
                current: None,
                transcript: &[],
                input: None,
                novel: None,
            })
            .await
            .unwrap();
        assert!(!reply.structured);
        assert_eq!(reply.plan.subtasks.len(), 2);
        assert_eq!(reply.plan.subtasks[1].title, "Write");
        let call = &client.calls(GenRole::Planner)[0];
        assert!(call.system_prompt.contains("Topic: sea shanties"));
        assert_eq!(call.context, "sea shanties");
    }
}
