//! The consulting tools exposed to the model.
//!
//! Every tool works against the shared stores in [`ToolContext`]. Tools that
//! change something the frontend displays also return a client tool call
//! (`task_created`, `task_updated`, `phase_changed`, `switch_theme`).

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use consultai_core::domain::consulting::{NewMeetingBrief, NewRisk, RiskLevel};
use consultai_core::domain::opportunity::{Opportunity, OpportunityPhase};
use consultai_core::domain::split_list;
use consultai_core::domain::task::{TaskId, TaskStatus};
use consultai_db::repositories::{OpportunityRepository, TaskRepository};
use consultai_db::ConsultingStore;

use crate::llm::{ChatMessage, Completion, CompletionRequest, LlmClient};
use crate::tools::{optional_str, required_str, str_or, Tool, ToolError, ToolOutcome, ToolRegistry};

const RESEARCH_SYSTEM_PROMPT: &str = "You are an expert consulting researcher providing accurate, well-researched insights with citations.";
const ANALYZED_ARTIFACT_LIMIT: usize = 20;
const SEARCH_RESULT_LIMIT: usize = 10;

#[derive(Clone)]
pub struct ToolContext {
    pub opportunities: Arc<dyn OpportunityRepository>,
    pub tasks: Arc<dyn TaskRepository>,
    pub consulting: Arc<ConsultingStore>,
    pub llm: Arc<dyn LlmClient>,
}

impl ToolContext {
    async fn active_opportunity(&self) -> Result<Opportunity, ToolError> {
        self.opportunities.get_active().await?.ok_or(ToolError::NoActiveOpportunity)
    }

    async fn ask(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<String, ToolError> {
        let request = CompletionRequest { messages, max_tokens, temperature, ..Default::default() };
        match self.llm.complete(request).await? {
            Completion::Message(text) => Ok(text),
            Completion::ToolCalls(_) => {
                Err(ToolError::Invalid("model answered with tool calls instead of text".to_string()))
            }
        }
    }
}

/// Builds the registry holding every consulting tool.
pub fn consulting_registry(context: ToolContext) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(SearchWeb(context.clone()));
    registry.register(AnalyzeArtifacts(context.clone()));
    registry.register(SearchArtifacts(context.clone()));
    registry.register(AdvanceToPhase(context.clone()));
    registry.register(GetOpportunityContext(context.clone()));
    registry.register(RecordInsight(context.clone()));
    registry.register(CreateTask(context.clone()));
    registry.register(ListTasks(context.clone()));
    registry.register(UpdateTaskStatus(context.clone()));
    registry.register(PrepareMeetingBrief(context.clone()));
    registry.register(CaptureProcessNote(context.clone()));
    registry.register(LogRisk(context.clone()));
    registry.register(TrackDeliverable(context));
    registry.register(SwitchTheme);
    registry
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn truncate_chars(value: &str, max: usize) -> (&str, bool) {
    match value.char_indices().nth(max) {
        Some((index, _)) => (&value[..index], true),
        None => (value, false),
    }
}

pub struct SearchWeb(ToolContext);

#[async_trait]
impl Tool for SearchWeb {
    fn name(&self) -> &'static str {
        "search_web"
    }

    fn description(&self) -> &'static str {
        "Search the web for industry trends, competitor analysis, market research, or best practices. Use this to get current, accurate information."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "query": string_prop("What to research"),
                "focus": string_prop("industry_trends, competitors, best_practices, market_data, technology or general"),
            }),
            &["query"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let query = required_str(&input, "query")?;
        let focus = str_or(&input, "focus", "general");

        let prompt = format!(
            "You are a consulting research assistant with access to current information.\n\n\
             Research Query: {query}\n\
             Focus Area: {focus}\n\n\
             Provide a comprehensive research summary including:\n\
             1. Current trends and insights\n\
             2. Key statistics and data points\n\
             3. Industry best practices\n\
             4. Relevant case studies or examples\n\
             5. Recommended sources for further reading\n\n\
             Be specific, cite recent developments, and provide actionable insights."
        );
        let result = self
            .0
            .ask(
                vec![ChatMessage::system(RESEARCH_SYSTEM_PROMPT), ChatMessage::user(prompt)],
                Some(1500),
                Some(0.3),
            )
            .await?;

        Ok(ToolOutcome::output(json!({ "result": result, "query": query, "focus": focus })))
    }
}

pub struct AnalyzeArtifacts(ToolContext);

#[async_trait]
impl Tool for AnalyzeArtifacts {
    fn name(&self) -> &'static str {
        "analyze_artifacts"
    }

    fn description(&self) -> &'static str {
        "Analyze artifacts and generate deep insights, patterns, or strategic recommendations using advanced reasoning."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "analysis_type": string_prop("pain_points, requirements, risks, stakeholder_feedback or trends"),
                "phase": string_prop("Only analyze artifacts from this phase"),
            }),
            &["analysis_type"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let analysis_type = required_str(&input, "analysis_type")?;
        let phase = optional_str(&input, "phase").map(OpportunityPhase::from_str).transpose()?;

        let opportunity = self.0.active_opportunity().await?;
        let artifacts = match phase {
            Some(phase) => opportunity.phase_artifacts(Some(phase)),
            None => opportunity.artifacts.iter().collect(),
        };
        if artifacts.is_empty() {
            return Err(ToolError::Invalid("No artifacts to analyze".to_string()));
        }

        let listing = artifacts
            .iter()
            .take(ANALYZED_ARTIFACT_LIMIT)
            .map(|artifact| {
                let (preview, _) = truncate_chars(&artifact.content, 200);
                format!("- [{}] {}: {preview}...", artifact.artifact_type, artifact.title)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Analyze the following artifacts from a consulting engagement:\n\n\
             Opportunity: {}\n\
             Client: {}\n\
             Analysis Type: {analysis_type}\n\
             Total Artifacts: {}\n\n\
             Artifacts:\n{listing}\n\n\
             Provide a deep analysis including:\n\
             1. Key patterns and themes\n\
             2. Critical insights\n\
             3. Potential risks or gaps\n\
             4. Strategic recommendations\n\
             5. Prioritized action items\n\n\
             Be specific and actionable.",
            opportunity.name,
            opportunity.client_name,
            artifacts.len(),
        );
        let analysis = self.0.ask(vec![ChatMessage::user(prompt)], None, None).await?;

        Ok(ToolOutcome::output(json!({
            "analysis_type": analysis_type,
            "total_artifacts": artifacts.len(),
            "analysis": analysis,
        })))
    }
}

pub struct SearchArtifacts(ToolContext);

#[async_trait]
impl Tool for SearchArtifacts {
    fn name(&self) -> &'static str {
        "search_artifacts"
    }

    fn description(&self) -> &'static str {
        "Search captured artifacts by keyword, tag, or type to find relevant information."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "keyword": string_prop("Case-insensitive text matched against titles and content"),
                "artifact_type": string_prop("Exact artifact type to restrict to"),
                "tags": string_prop("Comma separated tags; any match qualifies"),
            }),
            &["keyword"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let keyword = required_str(&input, "keyword")?;
        let artifact_type = optional_str(&input, "artifact_type");
        let tags = optional_str(&input, "tags").map(split_list).unwrap_or_default();

        let opportunity = self.0.active_opportunity().await?;
        let needle = keyword.to_lowercase();

        let results = opportunity
            .artifacts
            .iter()
            .filter(|artifact| artifact_type.map_or(true, |kind| artifact.artifact_type == kind))
            .filter(|artifact| tags.is_empty() || tags.iter().any(|tag| artifact.tags.contains(tag)))
            .filter(|artifact| {
                artifact.title.to_lowercase().contains(&needle)
                    || artifact.content.to_lowercase().contains(&needle)
            })
            .map(|artifact| {
                let (snippet, truncated) = truncate_chars(&artifact.content, 150);
                let snippet =
                    if truncated { format!("{snippet}...") } else { snippet.to_string() };
                json!({
                    "id": artifact.id.0,
                    "type": artifact.artifact_type,
                    "title": artifact.title,
                    "phase": artifact.phase.as_str(),
                    "tags": artifact.tags,
                    "snippet": snippet,
                })
            })
            .collect::<Vec<_>>();

        Ok(ToolOutcome::output(json!({
            "query": keyword,
            "results_count": results.len(),
            "results": results.into_iter().take(SEARCH_RESULT_LIMIT).collect::<Vec<_>>(),
        })))
    }
}

pub struct AdvanceToPhase(ToolContext);

#[async_trait]
impl Tool for AdvanceToPhase {
    fn name(&self) -> &'static str {
        "advance_to_phase"
    }

    fn description(&self) -> &'static str {
        "Move the current opportunity to the next phase (pre_assessment, discovery, solution_design, implementation)."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "phase": {
                    "type": "string",
                    "enum": ["pre_assessment", "discovery", "solution_design", "implementation"],
                },
            }),
            &["phase"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let phase = OpportunityPhase::from_str(required_str(&input, "phase")?)?;
        let opportunity = self.0.active_opportunity().await?;

        let updated = self
            .0
            .opportunities
            .move_to_phase(&opportunity.id, phase)
            .await?
            .ok_or_else(|| ToolError::Invalid("Failed to update phase".to_string()))?;

        Ok(ToolOutcome::output(json!({
            "result": format!("Moved to {phase} phase"),
            "opportunity": updated.name,
            "new_phase": phase.as_str(),
        }))
        .with_client_call(
            "phase_changed",
            json!({ "phase": phase.as_str(), "opportunity_id": updated.id.0 }),
        ))
    }
}

pub struct GetOpportunityContext(ToolContext);

#[async_trait]
impl Tool for GetOpportunityContext {
    fn name(&self) -> &'static str {
        "get_opportunity_context"
    }

    fn description(&self) -> &'static str {
        "Get current opportunity context including phase, artifacts, and insights."
    }

    fn parameters(&self) -> Value {
        schema(json!({}), &[])
    }

    async fn execute(&self, _input: Value) -> Result<ToolOutcome, ToolError> {
        let opportunity = self.0.active_opportunity().await?;

        Ok(ToolOutcome::output(json!({
            "opportunity": opportunity.name,
            "client": opportunity.client_name,
            "current_phase": opportunity.current_phase.as_str(),
            "total_artifacts": opportunity.artifacts.len(),
            "phase_artifacts": opportunity.phase_artifacts(None).len(),
            "key_insights": opportunity.key_insights,
            "stakeholders": opportunity.stakeholders,
        })))
    }
}

pub struct RecordInsight(ToolContext);

#[async_trait]
impl Tool for RecordInsight {
    fn name(&self) -> &'static str {
        "record_insight"
    }

    fn description(&self) -> &'static str {
        "Record a key insight or replace the context summary of the active opportunity."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "insight": string_prop("A new key insight; duplicates are ignored"),
                "context_summary": string_prop("Replacement context summary"),
            }),
            &[],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let insight = optional_str(&input, "insight").map(str::to_string);
        let summary = optional_str(&input, "context_summary").map(str::to_string);
        if insight.is_none() && summary.is_none() {
            return Err(ToolError::Invalid("Provide an insight or a context_summary".to_string()));
        }

        let opportunity = self.0.active_opportunity().await?;
        let updated = self
            .0
            .opportunities
            .update_context(&opportunity.id, summary, insight)
            .await?
            .ok_or(ToolError::NotFound("Opportunity"))?;

        Ok(ToolOutcome::output(json!({
            "result": "Opportunity context updated",
            "key_insights": updated.key_insights,
            "context_summary": updated.context_summary,
        })))
    }
}

pub struct CreateTask(ToolContext);

#[async_trait]
impl Tool for CreateTask {
    fn name(&self) -> &'static str {
        "create_task"
    }

    fn description(&self) -> &'static str {
        "Create a new task for the consulting project."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "title": string_prop("Task title"),
                "description": string_prop("What needs to be done"),
                "phase": string_prop("Phase the task belongs to"),
            }),
            &["title", "description", "phase"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let title = required_str(&input, "title")?;
        let description = str_or(&input, "description", "");
        let phase = required_str(&input, "phase")?;

        let task = self.0.tasks.create(title, description, phase).await?;

        Ok(ToolOutcome::output(json!({
            "result": format!("Task '{title}' created successfully"),
            "task_id": task.id.0,
        }))
        .with_client_call("task_created", json!({ "task_id": task.id.0, "title": task.title })))
    }
}

pub struct ListTasks(ToolContext);

#[async_trait]
impl Tool for ListTasks {
    fn name(&self) -> &'static str {
        "list_tasks"
    }

    fn description(&self) -> &'static str {
        "List all current tasks or tasks for a specific phase."
    }

    fn parameters(&self) -> Value {
        schema(json!({ "phase": string_prop("Only list tasks in this phase") }), &[])
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let tasks = match optional_str(&input, "phase") {
            Some(phase) => self.0.tasks.list_by_phase(phase).await?,
            None => self.0.tasks.list_all().await?,
        };

        let lines = tasks
            .iter()
            .map(|task| format!("- {} ({}, {})", task.title, task.phase, task.status.as_str()))
            .collect::<Vec<_>>();
        let listing = if lines.is_empty() { "No tasks found".to_string() } else { lines.join("\n") };

        Ok(ToolOutcome::output(json!({ "count": tasks.len(), "tasks": listing })))
    }
}

pub struct UpdateTaskStatus(ToolContext);

#[async_trait]
impl Tool for UpdateTaskStatus {
    fn name(&self) -> &'static str {
        "update_task_status"
    }

    fn description(&self) -> &'static str {
        "Update the status of a task (todo, in_progress, completed)."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "task_id": string_prop("Identifier returned by create_task"),
                "status": { "type": "string", "enum": ["todo", "in_progress", "completed"] },
            }),
            &["task_id", "status"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let task_id = required_str(&input, "task_id")?;
        let status = TaskStatus::from_str(required_str(&input, "status")?).map_err(|_| {
            ToolError::Invalid("Invalid status. Use: todo, in_progress, or completed".to_string())
        })?;

        let task = self
            .0
            .tasks
            .update_status(&TaskId(task_id.to_string()), status)
            .await?
            .ok_or(ToolError::NotFound("Task"))?;

        Ok(ToolOutcome::output(json!({
            "result": format!("Task status updated to {}", status.as_str()),
            "task_id": task.id.0,
        }))
        .with_client_call(
            "task_updated",
            json!({ "task_id": task.id.0, "status": task.status.as_str() }),
        ))
    }
}

pub struct PrepareMeetingBrief(ToolContext);

#[async_trait]
impl Tool for PrepareMeetingBrief {
    fn name(&self) -> &'static str {
        "prepare_meeting_brief"
    }

    fn description(&self) -> &'static str {
        "Prepare a structured meeting brief with agenda, objectives, and key questions."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "meeting_title": string_prop("Meeting title"),
                "attendees": string_prop("Comma separated attendees"),
                "objective": string_prop("Meeting objective"),
                "agenda_items": string_prop("Comma separated agenda items"),
                "background": string_prop("Background for the attendees"),
                "key_questions": string_prop("Comma separated questions to answer"),
            }),
            &["meeting_title", "attendees", "objective", "agenda_items", "background", "key_questions"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let meeting_title = required_str(&input, "meeting_title")?;

        let brief = self
            .0
            .consulting
            .create_meeting_brief(NewMeetingBrief {
                meeting_title: meeting_title.to_string(),
                attendees: split_list(str_or(&input, "attendees", "")),
                objective: str_or(&input, "objective", "").to_string(),
                agenda_items: split_list(str_or(&input, "agenda_items", "")),
                background: str_or(&input, "background", "").to_string(),
                key_questions: split_list(str_or(&input, "key_questions", "")),
            })
            .await;

        Ok(ToolOutcome::output(json!({
            "result": format!("Meeting brief created for '{meeting_title}'"),
            "brief_id": brief.id,
            "attendees_count": brief.attendees.len(),
        })))
    }
}

pub struct CaptureProcessNote(ToolContext);

#[async_trait]
impl Tool for CaptureProcessNote {
    fn name(&self) -> &'static str {
        "capture_process_note"
    }

    fn description(&self) -> &'static str {
        "Capture process documentation, pain points, or requirements discovered during due-diligence."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "title": string_prop("Note title"),
                "description": string_prop("What was observed"),
                "category": string_prop("current_state, pain_point, opportunity or requirement"),
                "phase": string_prop("Phase the note was captured in"),
                "stakeholders": string_prop("Comma separated stakeholders involved"),
            }),
            &["title", "description", "category", "phase"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let title = required_str(&input, "title")?;
        let category = required_str(&input, "category")?;

        let note = self
            .0
            .consulting
            .capture_process_note(
                title,
                str_or(&input, "description", ""),
                category,
                str_or(&input, "phase", ""),
                split_list(str_or(&input, "stakeholders", "")),
            )
            .await;

        Ok(ToolOutcome::output(json!({
            "result": format!("Process note '{title}' captured"),
            "note_id": note.id,
            "category": note.category,
        })))
    }
}

pub struct LogRisk(ToolContext);

#[async_trait]
impl Tool for LogRisk {
    fn name(&self) -> &'static str {
        "log_risk"
    }

    fn description(&self) -> &'static str {
        "Log a project risk, blocker, or dependency with severity level and mitigation plan."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "title": string_prop("Risk title"),
                "description": string_prop("What could go wrong"),
                "level": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                "impact": string_prop("Impact if the risk materialises"),
                "mitigation": string_prop("Mitigation plan"),
                "owner": string_prop("Person responsible"),
            }),
            &["title", "description", "level", "impact", "mitigation"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let title = required_str(&input, "title")?;
        let level = RiskLevel::from_str(required_str(&input, "level")?)?;

        let risk = self
            .0
            .consulting
            .log_risk(NewRisk {
                title: title.to_string(),
                description: str_or(&input, "description", "").to_string(),
                level,
                impact: str_or(&input, "impact", "").to_string(),
                mitigation: str_or(&input, "mitigation", "").to_string(),
                owner: optional_str(&input, "owner").map(str::to_string),
            })
            .await;

        Ok(ToolOutcome::output(json!({
            "result": format!("Risk '{title}' logged at {} severity", level.as_str()),
            "risk_id": risk.id,
            "level": level.as_str(),
        })))
    }
}

pub struct TrackDeliverable(ToolContext);

#[async_trait]
impl Tool for TrackDeliverable {
    fn name(&self) -> &'static str {
        "track_deliverable"
    }

    fn description(&self) -> &'static str {
        "Track a project deliverable with phase, due date, and owner."
    }

    fn parameters(&self) -> Value {
        schema(
            json!({
                "name": string_prop("Deliverable name"),
                "description": string_prop("What will be delivered"),
                "phase": string_prop("Phase the deliverable belongs to"),
                "due_date": string_prop("Due date, free text"),
                "owner": string_prop("Person responsible"),
            }),
            &["name", "description", "phase"],
        )
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let name = required_str(&input, "name")?;
        let phase = required_str(&input, "phase")?;

        let deliverable = self
            .0
            .consulting
            .track_deliverable(
                name,
                str_or(&input, "description", ""),
                phase,
                optional_str(&input, "due_date").map(str::to_string),
                optional_str(&input, "owner").map(str::to_string),
            )
            .await;

        Ok(ToolOutcome::output(json!({
            "result": format!("Deliverable '{name}' tracked"),
            "deliverable_id": deliverable.id,
            "phase": deliverable.phase,
        })))
    }
}

pub struct SwitchTheme;

#[async_trait]
impl Tool for SwitchTheme {
    fn name(&self) -> &'static str {
        "switch_theme"
    }

    fn description(&self) -> &'static str {
        "Switch the chat interface between light and dark themes."
    }

    fn parameters(&self) -> Value {
        schema(json!({ "theme": string_prop("light or dark") }), &["theme"])
    }

    async fn execute(&self, input: Value) -> Result<ToolOutcome, ToolError> {
        let theme = normalize_theme(required_str(&input, "theme")?)?;
        Ok(ToolOutcome::output(json!({ "theme": theme }))
            .with_client_call("switch_theme", json!({ "theme": theme })))
    }
}

fn normalize_theme(value: &str) -> Result<&'static str, ToolError> {
    let normalized = value.trim().to_lowercase();
    if normalized.contains("dark") {
        Ok("dark")
    } else if normalized.contains("light") {
        Ok("light")
    } else {
        Err(ToolError::Invalid("Theme must be either 'light' or 'dark'.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use consultai_core::domain::opportunity::{NewArtifact, OpportunityPhase};
    use consultai_db::repositories::{
        InMemoryOpportunityRepository, InMemoryTaskRepository, OpportunityRepository,
        TaskRepository,
    };
    use consultai_db::ConsultingStore;

    use super::{consulting_registry, normalize_theme, ToolContext};
    use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};
    use crate::tools::{ClientToolCall, ToolRegistry};

    #[derive(Default)]
    struct RecordingLlm {
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
            self.prompts.lock().await.push(request);
            Ok(Completion::Message("Synthesised findings".to_string()))
        }
    }

    struct Fixture {
        registry: ToolRegistry,
        opportunities: Arc<InMemoryOpportunityRepository>,
        tasks: Arc<InMemoryTaskRepository>,
        consulting: Arc<ConsultingStore>,
        llm: Arc<RecordingLlm>,
    }

    fn fixture() -> Fixture {
        let opportunities = Arc::new(InMemoryOpportunityRepository::default());
        let tasks = Arc::new(InMemoryTaskRepository::default());
        let consulting = Arc::new(ConsultingStore::default());
        let llm = Arc::new(RecordingLlm::default());
        let registry = consulting_registry(ToolContext {
            opportunities: opportunities.clone(),
            tasks: tasks.clone(),
            consulting: consulting.clone(),
            llm: llm.clone(),
        });
        Fixture { registry, opportunities, tasks, consulting, llm }
    }

    fn artifact(title: &str, content: &str, kind: &str, tags: &[&str]) -> NewArtifact {
        NewArtifact {
            title: title.to_string(),
            content: content.to_string(),
            artifact_type: kind.to_string(),
            phase: None,
            created_by: None,
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn registry_exposes_every_consulting_tool() {
        let fixture = fixture();
        assert_eq!(fixture.registry.len(), 14);
        let names = fixture.registry.specs().into_iter().map(|spec| spec.name).collect::<Vec<_>>();
        assert!(names.iter().any(|name| name == "advance_to_phase"));
        assert!(names.iter().any(|name| name == "record_insight"));
    }

    #[tokio::test]
    async fn opportunity_tools_require_an_active_opportunity() {
        let fixture = fixture();
        for name in ["get_opportunity_context", "search_artifacts", "advance_to_phase"] {
            let outcome = fixture
                .registry
                .execute(name, json!({ "keyword": "x", "phase": "discovery" }))
                .await;
            assert_eq!(outcome.output, json!({ "error": "No active opportunity" }), "{name}");
        }
    }

    #[tokio::test]
    async fn advance_to_phase_moves_and_notifies_client() {
        let fixture = fixture();
        let opportunity =
            fixture.opportunities.create("ERP", "Acme", "", Vec::new()).await.expect("create");

        let outcome =
            fixture.registry.execute("advance_to_phase", json!({ "phase": "discovery" })).await;

        assert_eq!(outcome.output["result"], "Moved to discovery phase");
        assert_eq!(
            outcome.client_call,
            Some(ClientToolCall {
                name: "phase_changed".to_string(),
                arguments: json!({ "phase": "discovery", "opportunity_id": opportunity.id.0 }),
            })
        );
        let stored = fixture.opportunities.get(&opportunity.id).await.expect("get").expect("exists");
        assert_eq!(stored.current_phase, OpportunityPhase::Discovery);

        let invalid = fixture.registry.execute("advance_to_phase", json!({ "phase": "closing" })).await;
        assert_eq!(invalid.output, json!({ "error": "Invalid phase: closing" }));
        assert!(invalid.client_call.is_none());
    }

    #[tokio::test]
    async fn search_artifacts_matches_keyword_type_and_tags() {
        let fixture = fixture();
        let opportunity =
            fixture.opportunities.create("ERP", "Acme", "", Vec::new()).await.expect("create");
        let long_content = "Invoices are keyed by hand. ".repeat(10);
        for new in [
            artifact("Invoice pain", &long_content, "pain_point", &["finance"]),
            artifact("Warehouse tour", "Invoice printing is slow", "observation", &["ops"]),
            artifact("Org chart", "Nothing relevant", "document", &[]),
        ] {
            fixture.opportunities.add_artifact(&opportunity.id, new).await.expect("add");
        }

        let all = fixture.registry.execute("search_artifacts", json!({ "keyword": "INVOICE" })).await;
        assert_eq!(all.output["results_count"], 2);
        let snippet = all.output["results"][0]["snippet"].as_str().expect("snippet");
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 153);

        let tagged = fixture
            .registry
            .execute("search_artifacts", json!({ "keyword": "invoice", "tags": "ops, legal" }))
            .await;
        assert_eq!(tagged.output["results_count"], 1);
        assert_eq!(tagged.output["results"][0]["title"], "Warehouse tour");

        let typed = fixture
            .registry
            .execute(
                "search_artifacts",
                json!({ "keyword": "invoice", "artifact_type": "pain_point" }),
            )
            .await;
        assert_eq!(typed.output["results"][0]["phase"], "pre_assessment");
    }

    #[tokio::test]
    async fn task_tools_create_list_and_update() {
        let fixture = fixture();

        let created = fixture
            .registry
            .execute(
                "create_task",
                json!({ "title": "Draft SOW", "description": "Scope", "phase": "discovery" }),
            )
            .await;
        let task_id = created.output["task_id"].as_str().expect("task id").to_string();
        assert_eq!(created.output["result"], "Task 'Draft SOW' created successfully");
        assert_eq!(created.client_call.as_ref().map(|call| call.name.as_str()), Some("task_created"));

        let listed = fixture.registry.execute("list_tasks", json!({})).await;
        assert_eq!(listed.output, json!({ "count": 1, "tasks": "- Draft SOW (discovery, todo)" }));
        let empty = fixture.registry.execute("list_tasks", json!({ "phase": "implementation" })).await;
        assert_eq!(empty.output, json!({ "count": 0, "tasks": "No tasks found" }));

        let updated = fixture
            .registry
            .execute("update_task_status", json!({ "task_id": task_id, "status": "In_Progress" }))
            .await;
        assert_eq!(
            updated.client_call.map(|call| call.arguments),
            Some(json!({ "task_id": task_id, "status": "in_progress" }))
        );

        let bad_status = fixture
            .registry
            .execute("update_task_status", json!({ "task_id": task_id, "status": "done" }))
            .await;
        assert_eq!(
            bad_status.output,
            json!({ "error": "Invalid status. Use: todo, in_progress, or completed" })
        );
        let missing = fixture
            .registry
            .execute("update_task_status", json!({ "task_id": "task_missing", "status": "todo" }))
            .await;
        assert_eq!(missing.output, json!({ "error": "Task not found" }));

        assert_eq!(fixture.tasks.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn engagement_record_tools_write_to_the_consulting_store() {
        let fixture = fixture();

        let brief = fixture
            .registry
            .execute(
                "prepare_meeting_brief",
                json!({
                    "meeting_title": "Kickoff",
                    "attendees": "CFO, CIO, ",
                    "objective": "Align scope",
                    "agenda_items": "Intro, Scope",
                    "background": "",
                    "key_questions": "Budget?",
                }),
            )
            .await;
        assert_eq!(brief.output["attendees_count"], 2);

        let risk = fixture
            .registry
            .execute(
                "log_risk",
                json!({
                    "title": "Vendor lock-in",
                    "description": "",
                    "level": "HIGH",
                    "impact": "Delay",
                    "mitigation": "Second vendor",
                }),
            )
            .await;
        assert_eq!(risk.output["result"], "Risk 'Vendor lock-in' logged at high severity");

        fixture
            .registry
            .execute(
                "capture_process_note",
                json!({ "title": "Manual AP", "description": "", "category": "pain_point", "phase": "discovery" }),
            )
            .await;
        fixture
            .registry
            .execute(
                "track_deliverable",
                json!({ "name": "Roadmap", "description": "", "phase": "solution_design" }),
            )
            .await;

        assert_eq!(fixture.consulting.list_meeting_briefs().await.len(), 1);
        assert_eq!(fixture.consulting.list_risks(false).await.len(), 1);
        assert_eq!(fixture.consulting.list_process_notes(Some("pain_point")).await.len(), 1);
        assert_eq!(fixture.consulting.list_deliverables(None).await.len(), 1);
    }

    #[tokio::test]
    async fn research_and_analysis_go_through_the_llm() {
        let fixture = fixture();
        let opportunity =
            fixture.opportunities.create("ERP", "Acme", "", Vec::new()).await.expect("create");

        let empty = fixture
            .registry
            .execute("analyze_artifacts", json!({ "analysis_type": "risks" }))
            .await;
        assert_eq!(empty.output, json!({ "error": "No artifacts to analyze" }));

        fixture
            .opportunities
            .add_artifact(&opportunity.id, artifact("Interview", "Approvals take weeks", "note", &[]))
            .await
            .expect("add");
        let analysis = fixture
            .registry
            .execute("analyze_artifacts", json!({ "analysis_type": "risks" }))
            .await;
        assert_eq!(analysis.output["total_artifacts"], 1);
        assert_eq!(analysis.output["analysis"], "Synthesised findings");

        let research = fixture
            .registry
            .execute("search_web", json!({ "query": "ERP trends" }))
            .await;
        assert_eq!(research.output["focus"], "general");

        let prompts = fixture.llm.prompts.lock().await;
        assert_eq!(prompts.len(), 2);
        let analysis_prompt = prompts[0].messages[0].content.clone().unwrap_or_default();
        assert!(analysis_prompt.contains("- [note] Interview: Approvals take weeks..."));
        assert_eq!(prompts[1].max_tokens, Some(1500));
    }

    #[tokio::test]
    async fn record_insight_deduplicates() {
        let fixture = fixture();
        fixture.opportunities.create("ERP", "Acme", "", Vec::new()).await.expect("create");

        for _ in 0..2 {
            fixture.registry.execute("record_insight", json!({ "insight": "AP is manual" })).await;
        }
        let context = fixture.registry.execute("get_opportunity_context", Value::Null).await;
        assert_eq!(context.output["key_insights"], json!(["AP is manual"]));
    }

    #[test]
    fn theme_normalization_accepts_loose_spellings() {
        assert_eq!(normalize_theme("Dark Mode").expect("dark"), "dark");
        assert_eq!(normalize_theme(" LIGHT ").expect("light"), "light");
        assert!(normalize_theme("blue").is_err());
    }
}
