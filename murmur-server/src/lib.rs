pub mod config;
pub mod llm;
pub mod provider;
pub mod relay;
pub mod routes;

pub use config::{Config, ConfigError};
pub use llm::OpenAiProvider;
pub use provider::{CompletionProvider, ProviderError, ProviderEvent, ProviderStream};
pub use relay::{relay, RelayState, RelayStream, StreamingRelay};
pub use routes::{router, router_with_body_limit};
