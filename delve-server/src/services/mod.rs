//! Business logic services

pub mod agent;
pub mod ledger;
pub mod orchestrator;
pub mod organization;
pub mod payment;
pub mod prompts;
pub mod stream_gateway;
pub mod subscription;

pub use agent::{AgentEvent, AgentError, ProcessAgent, ResearchAgent, ResearchRequest};
pub use ledger::CreditLedger;
pub use orchestrator::{ProgressRegistry, ResearchOrchestrator, SubmittedResearch};
pub use organization::OrganizationService;
pub use payment::PaymentService;
pub use stream_gateway::{session_frames, StreamFrame};
pub use subscription::SubscriptionService;
