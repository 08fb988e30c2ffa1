mod cache;
mod resolver;

pub use cache::{ConversationCache, cache_key};
pub use resolver::ConversationResolver;
