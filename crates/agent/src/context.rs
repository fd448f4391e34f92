//! Opportunity context prepended to every user message.

use consultai_core::domain::opportunity::{Opportunity, PhaseArtifact};

const RECENT_ARTIFACTS: usize = 5;
const INSIGHTS_SHOWN: usize = 5;
const RECENT_PREVIEW_CHARS: usize = 300;
const SNIPPET_CHARS: usize = 400;

/// Prefixes `message` with the context block when an opportunity is active.
pub fn with_opportunity_context(opportunity: Option<&Opportunity>, message: &str) -> String {
    match opportunity {
        Some(opportunity) => format!("{}{message}", context_block(opportunity)),
        None => message.to_string(),
    }
}

pub fn context_block(opportunity: &Opportunity) -> String {
    let phase = opportunity.current_phase.as_str();
    let phase_artifacts = opportunity.phase_artifacts(None);

    let mut block = String::from("\n\n[SYSTEM CONTEXT - Current Opportunity]\n");
    block.push_str(&format!("Opportunity: {}\n", opportunity.name));
    block.push_str(&format!("Client: {}\n", opportunity.client_name));
    block.push_str(&format!("Description: {}\n", opportunity.description));
    block.push_str(&format!("Status: {}\n", opportunity.status.as_str()));
    block.push_str(&format!("Current Phase: {phase}\n"));

    if !opportunity.stakeholders.is_empty() {
        block.push_str(&format!("Stakeholders: {}\n", opportunity.stakeholders.join(", ")));
    }
    if !opportunity.context_summary.is_empty() {
        block.push_str(&format!("Context Summary: {}\n", opportunity.context_summary));
    }

    block.push_str(&format!("Total Artifacts: {}\n", opportunity.artifacts.len()));
    block.push_str(&format!("Phase Artifacts: {}\n", phase_artifacts.len()));

    if !opportunity.key_insights.is_empty() {
        block.push_str("Key Insights:\n");
        for insight in opportunity.key_insights.iter().take(INSIGHTS_SHOWN) {
            block.push_str(&format!("- {insight}\n"));
        }
    }

    if !phase_artifacts.is_empty() {
        block.push_str(&format!("\nRecent Artifacts in {phase}:\n"));
        let skip = phase_artifacts.len().saturating_sub(RECENT_ARTIFACTS);
        for artifact in phase_artifacts.iter().skip(skip) {
            write_recent_artifact(&mut block, artifact);
        }
    }

    if !opportunity.artifacts.is_empty() {
        block.push_str("\n=== ALL CAPTURED ARTIFACTS (Complete Context) ===\n");
        for artifact in &opportunity.artifacts {
            block.push_str(&format!(
                "\n[{}] {} ({})\n",
                artifact.artifact_type,
                artifact.title,
                artifact.phase.as_str()
            ));
            block.push_str(&format!("  {}\n", preview(&artifact.content, SNIPPET_CHARS)));
            if !artifact.tags.is_empty() {
                block.push_str(&format!("  Tags: {}\n", artifact.tags.join(", ")));
            }
        }
    }

    block.push_str("[END CONTEXT]\n\n");
    block
}

fn write_recent_artifact(block: &mut String, artifact: &PhaseArtifact) {
    block.push_str(&format!("- [{}] {}\n", artifact.artifact_type, artifact.title));
    block.push_str(&format!("  ID: {}\n", artifact.id.0));
    if let Some(created_by) = &artifact.created_by {
        block.push_str(&format!("  Created by: {created_by}\n"));
    }
    block.push_str(&format!("  Created: {}\n", artifact.created_at.format("%Y-%m-%d %H:%M")));
    if !artifact.tags.is_empty() {
        block.push_str(&format!("  Tags: {}\n", artifact.tags.join(", ")));
    }
    block.push_str(&format!("  Content: {}\n", preview(&artifact.content, RECENT_PREVIEW_CHARS)));
}

/// First `max` characters, with `...` when something was cut.
fn preview(content: &str, max: usize) -> String {
    match content.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &content[..index]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use consultai_core::domain::opportunity::{NewArtifact, Opportunity, OpportunityPhase};

    use super::{context_block, preview, with_opportunity_context};

    fn note(title: &str, content: &str, phase: Option<OpportunityPhase>) -> NewArtifact {
        NewArtifact {
            title: title.to_string(),
            content: content.to_string(),
            artifact_type: "note".to_string(),
            phase,
            created_by: Some("dana".to_string()),
            tags: vec!["finance".to_string()],
        }
    }

    #[test]
    fn message_passes_through_without_an_active_opportunity() {
        assert_eq!(with_opportunity_context(None, "hello"), "hello");
    }

    #[test]
    fn block_lists_header_fields_and_omits_empty_sections() {
        let opportunity = Opportunity::new("ERP rollout", "Acme", "Replace legacy ERP", Vec::new());
        let block = context_block(&opportunity);

        assert_eq!(
            block,
            "\n\n[SYSTEM CONTEXT - Current Opportunity]\n\
             Opportunity: ERP rollout\n\
             Client: Acme\n\
             Description: Replace legacy ERP\n\
             Status: active\n\
             Current Phase: pre_assessment\n\
             Total Artifacts: 0\n\
             Phase Artifacts: 0\n\
             [END CONTEXT]\n\n"
        );
    }

    #[test]
    fn block_shows_recent_phase_artifacts_and_every_artifact() {
        let mut opportunity =
            Opportunity::new("ERP rollout", "Acme", "", vec!["CFO".to_string(), "CIO".to_string()]);
        opportunity.update_context(Some("Legacy AS/400".to_string()), Some("AP is manual".to_string()));
        for index in 0..6 {
            opportunity.add_artifact(note(&format!("Interview {index}"), "short", None));
        }
        opportunity.add_artifact(note("Target design", &"x".repeat(450), Some(OpportunityPhase::SolutionDesign)));

        let message = with_opportunity_context(Some(&opportunity), "What next?");

        assert!(message.starts_with("\n\n[SYSTEM CONTEXT - Current Opportunity]\n"));
        assert!(message.ends_with("[END CONTEXT]\n\nWhat next?"));
        assert!(message.contains("Stakeholders: CFO, CIO\n"));
        assert!(message.contains("Context Summary: Legacy AS/400\n"));
        assert!(message.contains("Total Artifacts: 7\nPhase Artifacts: 6\n"));
        assert!(message.contains("Key Insights:\n- AP is manual\n"));
        assert!(message.contains("\nRecent Artifacts in pre_assessment:\n"));
        assert!(!message.contains("- [note] Interview 0\n"));
        assert!(message.contains("- [note] Interview 5\n"));
        assert!(message.contains("  Created by: dana\n"));
        assert!(message.contains("\n[note] Interview 0 (pre_assessment)\n  short\n  Tags: finance\n"));
        assert!(message.contains(&format!("  {}...\n", "x".repeat(400))));
    }

    #[test]
    fn recent_artifact_entry_lists_every_field() {
        let mut opportunity = Opportunity::new("ERP rollout", "Acme", "", Vec::new());
        let artifact = opportunity.add_artifact(note("Kickoff", "Scope agreed", None));
        let created = artifact.created_at.format("%Y-%m-%d %H:%M").to_string();
        let id = artifact.id.0.clone();

        let block = context_block(&opportunity);

        assert!(block.contains(&format!(
            "\nRecent Artifacts in pre_assessment:\n\
             - [note] Kickoff\n  ID: {id}\n  Created by: dana\n  Created: {created}\n  \
             Tags: finance\n  Content: Scope agreed\n"
        )));
    }

    #[test]
    fn preview_counts_characters_not_bytes() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("hé", 2), "hé");
    }
}
