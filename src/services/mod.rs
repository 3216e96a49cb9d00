pub mod background;
pub mod badges;
pub mod bridge;
pub mod classifier;
pub mod credentials;
pub mod fetch_gateway;
pub mod orchestrator;
pub mod page_context;
pub mod remote_classifier;
