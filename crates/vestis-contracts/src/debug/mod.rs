mod keys;
mod projector;

pub use keys::{Key, KeyHub, KeySubscription};
pub use projector::{DebugProjector, DebugTab, DebugView, FiltersView, PlanView};
