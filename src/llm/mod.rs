pub mod provider;
pub mod queue;

pub use provider::{create_provider, ChatCompletionsProvider, DescriptionProvider};
pub use queue::{EnrichmentQueue, QueueSnapshot};
