// Adapters for the outside world: HTTP transport and operator prompts

pub mod decision_prompt;
pub mod http_client;
