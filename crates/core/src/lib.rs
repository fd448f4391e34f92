pub mod config;
pub mod domain;
pub mod errors;

pub use domain::consulting::{
    Deliverable, DeliverableStatus, MeetingBrief, NewMeetingBrief, NewRisk, ProcessNote, Risk,
    RiskLevel,
};
pub use domain::opportunity::{
    ArtifactId, NewArtifact, Opportunity, OpportunityId, OpportunityPhase, OpportunityStatus,
    OpportunityView, PhaseArtifact, PhaseProgress, PhaseStatus,
};
pub use domain::task::{Task, TaskId, TaskStatus};
pub use domain::thread::{ChatThread, Page, PageRequest, SortOrder, ThreadId, ThreadItem, ThreadItemKind};
pub use errors::DomainError;
