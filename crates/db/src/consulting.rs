//! In-memory store for the engagement records the assistant captures while it
//! works: meeting briefs, process notes, risks and deliverables.

use std::collections::HashMap;

use tokio::sync::Mutex;

use consultai_core::domain::consulting::{
    Deliverable, DeliverableStatus, MeetingBrief, NewMeetingBrief, NewRisk, ProcessNote, Risk,
};

struct Collection<T> {
    by_id: HashMap<String, T>,
    order: Vec<String>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { by_id: HashMap::new(), order: Vec::new() }
    }
}

impl<T: Clone> Collection<T> {
    fn insert(&mut self, id: String, value: T) {
        self.order.push(id.clone());
        self.by_id.insert(id, value);
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.by_id.get_mut(id)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

#[derive(Default)]
struct ConsultingState {
    meeting_briefs: Collection<MeetingBrief>,
    process_notes: Collection<ProcessNote>,
    risks: Collection<Risk>,
    deliverables: Collection<Deliverable>,
}

/// All four collections share one mutex.
#[derive(Default)]
pub struct ConsultingStore {
    state: Mutex<ConsultingState>,
}

impl ConsultingStore {
    pub async fn create_meeting_brief(&self, new: NewMeetingBrief) -> MeetingBrief {
        let brief = MeetingBrief::new(new);
        let mut state = self.state.lock().await;
        state.meeting_briefs.insert(brief.id.clone(), brief.clone());
        brief
    }

    pub async fn list_meeting_briefs(&self) -> Vec<MeetingBrief> {
        let state = self.state.lock().await;
        state.meeting_briefs.iter().cloned().collect()
    }

    pub async fn capture_process_note(
        &self,
        title: &str,
        description: &str,
        category: &str,
        phase: &str,
        stakeholders: Vec<String>,
    ) -> ProcessNote {
        let note = ProcessNote::new(title, description, category, phase, stakeholders);
        let mut state = self.state.lock().await;
        state.process_notes.insert(note.id.clone(), note.clone());
        note
    }

    pub async fn list_process_notes(&self, category: Option<&str>) -> Vec<ProcessNote> {
        let state = self.state.lock().await;
        state
            .process_notes
            .iter()
            .filter(|note| category.map_or(true, |category| note.category == category))
            .cloned()
            .collect()
    }

    pub async fn log_risk(&self, new: NewRisk) -> Risk {
        let risk = Risk::new(new);
        let mut state = self.state.lock().await;
        state.risks.insert(risk.id.clone(), risk.clone());
        risk
    }

    pub async fn list_risks(&self, include_resolved: bool) -> Vec<Risk> {
        let state = self.state.lock().await;
        state.risks.iter().filter(|risk| include_resolved || !risk.resolved).cloned().collect()
    }

    /// Flags the risk as resolved; resolved risks stay in the store.
    pub async fn resolve_risk(&self, id: &str) -> Option<Risk> {
        let mut state = self.state.lock().await;
        state.risks.get_mut(id).map(|risk| {
            risk.resolved = true;
            risk.clone()
        })
    }

    pub async fn track_deliverable(
        &self,
        name: &str,
        description: &str,
        phase: &str,
        due_date: Option<String>,
        owner: Option<String>,
    ) -> Deliverable {
        let deliverable = Deliverable::new(name, description, phase, due_date, owner);
        let mut state = self.state.lock().await;
        state.deliverables.insert(deliverable.id.clone(), deliverable.clone());
        deliverable
    }

    pub async fn update_deliverable_status(
        &self,
        id: &str,
        status: DeliverableStatus,
    ) -> Option<Deliverable> {
        let mut state = self.state.lock().await;
        state.deliverables.get_mut(id).map(|deliverable| {
            deliverable.status = status;
            deliverable.clone()
        })
    }

    pub async fn list_deliverables(&self, phase: Option<&str>) -> Vec<Deliverable> {
        let state = self.state.lock().await;
        state
            .deliverables
            .iter()
            .filter(|deliverable| phase.map_or(true, |phase| deliverable.phase == phase))
            .cloned()
            .collect()
    }
}
