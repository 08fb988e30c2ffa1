mod pumps;
mod registry;

pub use pumps::{
    ALL_MESSAGES_KEY, CONVERSATIONS_KEY, PumpExit, pump, pump_all_messages,
    pump_conversation_messages, pump_conversations,
};
pub use registry::{Subscription, SubscriptionRegistry};
