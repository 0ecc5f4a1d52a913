//! Novel-mode summaries and chapter expansion

use artifactstore::truncate_chars;
use tracing::{debug, info};

use super::runner::Pipeline;
use super::{DIGEST_CHARS, PipelineError};
use crate::domain::{Plan, Subtask, SubtaskStatus};
use crate::state::{NovelMode, SessionData, SessionState};

/// Profile and summaries handed to the worker and reviewer
pub(crate) fn extra_context(state: &SessionState) -> Option<String> {
    let novel = state.side_channel.novel.as_ref()?;
    let mut parts = Vec::new();
    let profile = novel.profile.describe();
    if !profile.is_empty() {
        parts.push(format!("Novel profile: {}", profile));
    }
    if !novel.setup_summary.is_empty() {
        parts.push(format!("Setup summary:\n{}", novel.setup_summary));
    }
    if !novel.rolling_summary.is_empty() {
        parts.push(format!("Story so far:\n{}", novel.rolling_summary));
    }
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Summary given to the batch reviewer
pub(crate) fn context_summary(state: &SessionState) -> String {
    let Some(novel) = state.side_channel.novel.as_ref() else {
        return String::new();
    };
    [novel.setup_summary.as_str(), novel.rolling_summary.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn digest(subtask: &Subtask) -> String {
    let text = truncate_chars(subtask.output.trim(), DIGEST_CHARS).replace('\n', " ");
    format!("{} {}: {}", subtask.id, subtask.title, text)
}

/// Rebuild the setup summary from the finished setup subtasks
pub(crate) fn refresh_setup_summary(plan: &Plan, novel: &mut NovelMode, setup_count: usize) {
    novel.setup_summary = plan
        .subtasks
        .iter()
        .take(setup_count)
        .filter(|s| s.status == SubtaskStatus::Done)
        .map(digest)
        .collect::<Vec<_>>()
        .join("\n");
}

pub(crate) fn append_rolling(novel: &mut NovelMode, subtask: &Subtask) {
    if !novel.rolling_summary.is_empty() {
        novel.rolling_summary.push('\n');
    }
    novel.rolling_summary.push_str(&digest(subtask));
}

/// Fold accepted outputs into the novel summaries
pub(crate) fn record_accepted(data: &mut SessionData, ids: &[String], setup_count: usize) {
    let SessionData { plan, state } = data;
    let Some(novel) = state.side_channel.novel.as_mut() else {
        return;
    };
    for id in ids {
        let (Some(pos), Some(sub)) = (plan.position(id), plan.find(id)) else {
            continue;
        };
        if sub.status != SubtaskStatus::Done {
            continue;
        }
        if pos < setup_count {
            refresh_setup_summary(plan, novel, setup_count);
        } else {
            append_rolling(novel, sub);
        }
    }
}

impl Pipeline {
    /// Append chapter subtasks once the pivot subtask is done
    ///
    /// Runs at most once per session, and only when nothing is left to do
    /// after the pivot.
    pub(crate) async fn maybe_expand(&self, session_id: &str) -> Result<(), PipelineError> {
        let services = self.services();
        let pivot = services.pipeline.pivot_subtask.clone();
        let data = services.state.get(session_id).await?;
        let Some(novel) = data.state.side_channel.novel.as_ref() else {
            return Ok(());
        };
        if novel.expanded {
            return Ok(());
        }
        let Some(pos) = data.plan.position(&pivot) else {
            debug!(%pivot, "maybe_expand: pivot not in plan");
            return Ok(());
        };
        if data.plan.subtasks[pos].status != SubtaskStatus::Done {
            return Ok(());
        }
        if data.plan.subtasks[pos + 1..].iter().any(|s| !s.status.is_terminal()) {
            debug!(%session_id, "maybe_expand: work already planned after pivot");
            services
                .state
                .mutate(session_id, |d| {
                    if let Some(n) = d.state.side_channel.novel.as_mut() {
                        n.expanded = true;
                    }
                })
                .await?;
            return Ok(());
        }

        let result = services
            .roles
            .expand(
                &data.state.topic,
                &data.plan,
                &novel.setup_summary,
                services.pipeline.expansion_count,
            )
            .await;
        let added = result.accepted.len();
        let used_fallback = result.used_fallback;

        services
            .state
            .mutate(session_id, move |d| {
                for (title, reason) in &result.dropped {
                    d.state.add_message(
                        "orchestrator",
                        format!("Dropped expansion candidate \"{}\": {}", title, reason),
                    );
                }
                for candidate in result.accepted {
                    let id = d.plan.generate_id();
                    d.plan
                        .subtasks
                        .push(Subtask::new(id, candidate.title).with_description(candidate.description));
                }
                if result.used_fallback {
                    d.state.add_message(
                        "orchestrator",
                        format!("Expansion produced no valid chapters; added {} fallback chapter subtasks.", added),
                    );
                }
                if let Some(n) = d.state.side_channel.novel.as_mut() {
                    n.expanded = true;
                }
            })
            .await?;
        info!(%session_id, added, used_fallback, "Plan expanded after pivot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NovelProfile;

    fn novel_state() -> SessionState {
        let mut state = SessionState::new("s1", "p1", "Dragons");
        state.side_channel.novel = Some(NovelMode {
            profile: NovelProfile {
                genre: "fantasy".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        state
    }

    #[test]
    fn test_extra_context_only_for_novels() {
        assert!(extra_context(&SessionState::new("s1", "p1", "x")).is_none());
        let context = extra_context(&novel_state()).unwrap();
        assert_eq!(context, "Novel profile: Genre: fantasy");
    }

    #[test]
    fn test_record_accepted_splits_setup_and_rolling() {
        let mut plan = Plan::new("p1", "Dragons");
        for (id, title) in [("t1", "Research"), ("t2", "Chapter 1")] {
            let mut sub = Subtask::new(id, title).with_status(SubtaskStatus::Done);
            sub.output = format!("{} text\nsecond line", title);
            plan.append(sub).unwrap();
        }
        let mut data = SessionData {
            plan,
            state: novel_state(),
        };
        record_accepted(&mut data, &["t1".to_string(), "t2".to_string()], 1);

        let novel = data.state.side_channel.novel.unwrap();
        assert_eq!(novel.setup_summary, "t1 Research: Research text second line");
        assert_eq!(novel.rolling_summary, "t2 Chapter 1: Chapter 1 text second line");
    }

    #[test]
    fn test_digest_is_bounded() {
        let mut sub = Subtask::new("t9", "Long");
        sub.output = "y".repeat(1000);
        let mut novel = NovelMode::default();
        append_rolling(&mut novel, &sub);
        append_rolling(&mut novel, &sub);
        let lines: Vec<&str> = novel.rolling_summary.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), "t9 Long: ".len() + DIGEST_CHARS + 3);
    }
}
