use std::fmt;

use serde_json::Value;

use super::keys::{Key, KeyHub, KeySubscription};
use crate::search::{Plan, SearchResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugTab {
    #[default]
    Plan,
    Raw,
}

impl DebugTab {
    pub fn label(self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Raw => "Raw Response",
        }
    }
}

/// Inspector over the session's current ready data.
///
/// Owns nothing but its visibility and tab selection. While open it holds an
/// Escape subscription on the host's [`KeyHub`]; closing drops it.
#[derive(Debug, Default)]
pub struct DebugProjector {
    active_tab: DebugTab,
    escape: Option<KeySubscription>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugView {
    Hidden,
    /// Open, but there is no ready response to inspect.
    Placeholder,
    Plan(PlanView),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanView {
    pub intermediate_queries: Vec<(String, f64)>,
    pub text_weight: f64,
    pub image_weight: f64,
    pub top_k: u32,
    pub filters: FiltersView,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FiltersView {
    None,
    Entries(Vec<(String, String)>),
}

impl DebugProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.escape.is_some()
    }

    pub fn active_tab(&self) -> DebugTab {
        self.active_tab
    }

    /// Opens the inspector; a no-op when already open.
    pub fn open(&mut self, keys: &KeyHub) {
        if self.escape.is_none() {
            self.escape = Some(keys.subscribe(Key::Escape));
        }
    }

    pub fn close(&mut self) {
        self.escape = None;
    }

    pub fn toggle(&mut self, keys: &KeyHub) {
        if self.is_open() {
            self.close();
        } else {
            self.open(keys);
        }
    }

    pub fn select_tab(&mut self, tab: DebugTab) {
        self.active_tab = tab;
    }

    /// Drains pending key events. Returns true if an Escape closed the view.
    pub fn pump_keys(&mut self) -> bool {
        let escaped = match self.escape.as_ref() {
            Some(subscription) => {
                let mut escaped = false;
                while let Some(key) = subscription.try_next() {
                    escaped |= key == Key::Escape;
                }
                escaped
            }
            None => false,
        };
        if escaped {
            self.close();
        }
        escaped
    }

    pub fn render(&self, data: Option<&SearchResponse>) -> DebugView {
        if !self.is_open() {
            return DebugView::Hidden;
        }
        let Some(data) = data else {
            return DebugView::Placeholder;
        };
        match self.active_tab {
            DebugTab::Plan => DebugView::Plan(PlanView::from_plan(&data.plan)),
            DebugTab::Raw => DebugView::Raw(pretty_json(&data.raw_payload())),
        }
    }
}

impl PlanView {
    pub fn from_plan(plan: &Plan) -> Self {
        let filters = match plan.filters.as_ref() {
            Some(filters) if !filters.is_empty() => FiltersView::Entries(
                filters
                    .iter()
                    .map(|(key, value)| (key.clone(), filter_value_text(value)))
                    .collect(),
            ),
            _ => FiltersView::None,
        };
        Self {
            intermediate_queries: plan
                .intermediate_queries
                .iter()
                .map(|entry| (entry.query.clone(), entry.weight))
                .collect(),
            text_weight: plan.weights.text,
            image_weight: plan.weights.image,
            top_k: plan.top_k,
            filters,
        }
    }
}

impl fmt::Display for PlanView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Intermediate queries:")?;
        if self.intermediate_queries.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for (query, weight) in &self.intermediate_queries {
            writeln!(f, "  - {query} (weight {weight:.2})")?;
        }
        writeln!(
            f,
            "Weights: text {:.2} / image {:.2}",
            self.text_weight, self.image_weight
        )?;
        writeln!(f, "Top K: {}", self.top_k)?;
        match &self.filters {
            FiltersView::None => write!(f, "Filters: none"),
            FiltersView::Entries(entries) => {
                write!(f, "Filters:")?;
                for (key, value) in entries {
                    write!(f, "\n  {key} = {value}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for DebugView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hidden => Ok(()),
            Self::Placeholder => write!(f, "No search data yet. Run a search to inspect its plan."),
            Self::Plan(plan) => write!(f, "{plan}"),
            Self::Raw(raw) => write!(f, "{raw}"),
        }
    }
}

fn filter_value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| format!("<unprintable: {err}>"))
}
