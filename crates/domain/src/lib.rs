//! Shared domain types for the AgentsLeak monitor: hook payloads, events,
//! sessions, alerts, policies, and the activity graph.

pub mod alert;
pub mod config;
pub mod event;
pub mod graph;
pub mod policy;

pub use alert::{Alert, AlertEvidence, AlertStatus};
pub use config::Config;
pub use event::{
    Decision, Event, EventCategory, HookPayload, Session, SessionStatus, Severity,
};
pub use graph::{EdgeRelation, GraphEdge, GraphNode, NodeType};
pub use policy::{ConditionLogic, ConditionOperator, Policy, PolicyAction, RuleCondition};
