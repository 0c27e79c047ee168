pub mod request_orchestrator;

pub use request_orchestrator::RequestOrchestrator;
