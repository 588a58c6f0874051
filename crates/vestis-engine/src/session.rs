use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use vestis_contracts::events::{EventPayload, EventWriter};
use vestis_contracts::search::{ImageAttachment, Query, SearchResponse, SessionSummary};

use crate::gateway::{GatewayError, SearchGateway};

/// How long the first-search layout transition stays raised.
pub const FIRST_SEARCH_PULSE: Duration = Duration::from_millis(450);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Submitting,
    Ready(SearchResponse),
    Failed { message: String },
}

impl SessionState {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Ready(_) => "ready",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A search that has been issued but not yet resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSearch {
    pub seq: u64,
    pub query: Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing to search for; no request was issued.
    Blocked,
    Applied,
    /// A newer search was issued (or the session was reset) first.
    Stale,
}

/// A gateway answer tagged with the search that asked for it.
#[derive(Debug)]
pub struct Resolution {
    pub seq: u64,
    pub outcome: Result<SearchResponse, GatewayError>,
}

/// Owns the query draft and the search lifecycle.
///
/// Every issued search carries a strictly increasing sequence number. Only
/// the resolution of the most recently issued search is applied, and only
/// while the session is still waiting on it.
pub struct SearchSession<G> {
    gateway: G,
    draft: Query,
    state: SessionState,
    last_issued: u64,
    first_search_at: Option<Instant>,
    events: Option<EventWriter>,
}

impl<G> SearchSession<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            draft: Query::default(),
            state: SessionState::Idle,
            last_issued: 0,
            first_search_at: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn set_gateway(&mut self, gateway: G) {
        self.gateway = gateway;
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    pub fn draft(&self) -> &Query {
        &self.draft
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, SessionState::Submitting)
    }

    pub fn latest_seq(&self) -> u64 {
        self.last_issued
    }

    pub fn ready_data(&self) -> Option<&SearchResponse> {
        match &self.state {
            SessionState::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        self.ready_data().map(SearchResponse::summary)
    }

    /// Edits the draft. `None` leaves that part untouched.
    pub fn update_draft(&mut self, text: Option<&str>, image: Option<ImageAttachment>) {
        if let Some(text) = text {
            self.draft.set_text(text);
        }
        if let Some(image) = image {
            self.draft.attach_image(image);
        }
    }

    pub fn clear_image(&mut self) {
        self.draft.clear_image();
    }

    pub fn begin_submit(&mut self) -> Option<PendingSearch> {
        self.begin_submit_at(Instant::now())
    }

    /// Validates the draft and, if it is searchable, moves to `Submitting`
    /// and returns the tagged snapshot to send.
    pub fn begin_submit_at(&mut self, now: Instant) -> Option<PendingSearch> {
        if !self.draft.is_submittable() {
            return None;
        }
        self.last_issued += 1;
        let pending = PendingSearch {
            seq: self.last_issued,
            query: self.draft.clone(),
        };
        self.state = SessionState::Submitting;
        if self.first_search_at.is_none() {
            self.first_search_at = Some(now);
        }
        self.emit(
            "search_submitted",
            json!({
                "seq": pending.seq,
                "text": pending.query.trimmed_text(),
                "has_image": pending.query.has_image(),
            }),
        );
        Some(pending)
    }

    /// Applies a gateway resolution if it belongs to the latest issued search.
    pub fn complete(
        &mut self,
        seq: u64,
        outcome: Result<SearchResponse, GatewayError>,
    ) -> SubmitOutcome {
        if seq != self.last_issued || !self.is_submitting() {
            self.emit(
                "search_stale_ignored",
                json!({
                    "seq": seq,
                    "latest_seq": self.last_issued,
                    "state": self.state.kind(),
                }),
            );
            return SubmitOutcome::Stale;
        }
        match outcome {
            Ok(data) => {
                let summary = data.summary();
                self.emit(
                    "search_ready",
                    json!({
                        "seq": seq,
                        "query_used": summary.query_used,
                        "result_count": summary.result_count,
                        "top_score": summary.top_score,
                    }),
                );
                self.state = SessionState::Ready(data);
            }
            Err(err) => {
                let message = err.user_message();
                self.emit(
                    "search_failed",
                    json!({
                        "seq": seq,
                        "kind": err.kind(),
                        "status": err.status(),
                        "error": err.to_string(),
                        "message": message,
                    }),
                );
                self.state = SessionState::Failed { message };
            }
        }
        SubmitOutcome::Applied
    }

    /// Back to `Idle`: drops the stored response or error and the image
    /// attachment. Draft text is kept. Outstanding searches become stale.
    pub fn reset(&mut self) {
        self.emit("session_reset", json!({ "from": self.state.kind() }));
        self.state = SessionState::Idle;
        self.draft.clear_image();
    }

    pub fn first_search_started_at(&self) -> Option<Instant> {
        self.first_search_at
    }

    pub fn first_search_active(&self) -> bool {
        self.first_search_active_at(Instant::now())
    }

    /// True for [`FIRST_SEARCH_PULSE`] after the session's first accepted search.
    pub fn first_search_active_at(&self, now: Instant) -> bool {
        self.first_search_at
            .map(|started| now.saturating_duration_since(started) < FIRST_SEARCH_PULSE)
            .unwrap_or(false)
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        events.emit_lossy(event_type, payload);
    }
}

impl<G: SearchGateway> SearchSession<G> {
    /// Validates, issues and resolves one search on the calling thread.
    pub fn submit(&mut self) -> SubmitOutcome {
        let Some(pending) = self.begin_submit() else {
            return SubmitOutcome::Blocked;
        };
        let outcome = self.gateway.send(&pending.query);
        self.complete(pending.seq, outcome)
    }
}

impl<G> SearchSession<G>
where
    G: SearchGateway + Clone + Send + 'static,
{
    /// Issues the draft from a worker thread and returns its sequence number.
    ///
    /// The [`Resolution`] arrives on `results` and is only applied once the
    /// host hands it to [`SearchSession::complete`]. Nothing is cancelled when
    /// a newer search overtakes it.
    pub fn submit_in_background<T>(&mut self, results: Sender<T>) -> Option<u64>
    where
        T: From<Resolution> + Send + 'static,
    {
        let pending = self.begin_submit()?;
        let gateway = self.gateway.clone();
        let seq = pending.seq;
        thread::spawn(move || {
            let outcome = gateway.send(&pending.query);
            let _ = results.send(Resolution { seq, outcome }.into());
        });
        Some(seq)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};
    use vestis_contracts::events::EventWriter;
    use vestis_contracts::search::{ImageAttachment, Query, SearchResponse};

    use super::{Resolution, SearchSession, SessionState, SubmitOutcome, FIRST_SEARCH_PULSE};
    use crate::gateway::{search_form_fields, FormField, GatewayError, SearchGateway};
    use crate::images::{ResultGrid, NO_RESULTS_LABEL};

    #[derive(Default)]
    struct ScriptedGateway {
        replies: RefCell<VecDeque<Result<SearchResponse, GatewayError>>>,
        calls: RefCell<Vec<Query>>,
    }

    impl ScriptedGateway {
        fn replying(replies: Vec<Result<SearchResponse, GatewayError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl SearchGateway for ScriptedGateway {
        fn send(&self, query: &Query) -> Result<SearchResponse, GatewayError> {
            self.calls.borrow_mut().push(query.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Transport("no scripted reply".to_string())))
        }
    }

    /// Echoes the query text back; texts starting with "slow" answer late.
    #[derive(Debug, Clone)]
    struct EchoGateway {
        slow_delay: Duration,
    }

    impl SearchGateway for EchoGateway {
        fn send(&self, query: &Query) -> Result<SearchResponse, GatewayError> {
            let text = query.trimmed_text();
            if text.starts_with("slow") {
                thread::sleep(self.slow_delay);
            }
            Ok(response(text, json!([{"product_id": text, "score": 0.5}])))
        }
    }

    fn response(query_used: &str, results: Value) -> SearchResponse {
        SearchResponse::from_json_value(json!({
            "plan": {
                "intermediate_queries": [{"query": query_used, "weight": 1.0}],
                "weights": {"text": 1.0, "image": 0.0},
                "top_k": 20,
                "filters": {}
            },
            "query_used": query_used,
            "results": results,
        }))
        .unwrap_or_else(|err| panic!("fixture must parse: {err}"))
    }

    fn rejected(status: u16, body: &str) -> GatewayError {
        GatewayError::BackendRejected {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn empty_draft_is_blocked_without_network_call() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        session.update_draft(Some("   "), None);

        assert_eq!(session.submit(), SubmitOutcome::Blocked);
        assert_eq!(session.gateway().call_count(), 0);
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.latest_seq(), 0);
        assert_eq!(session.first_search_started_at(), None);
    }

    #[test]
    fn blocked_submit_leaves_ready_state_alone() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![Ok(response(
            "coat",
            json!([]),
        ))]));
        session.update_draft(Some("coat"), None);
        assert_eq!(session.submit(), SubmitOutcome::Applied);

        session.update_draft(Some(""), None);
        assert_eq!(session.submit(), SubmitOutcome::Blocked);
        assert_eq!(session.gateway().call_count(), 1);
        assert_eq!(session.state().kind(), "ready");
    }

    #[test]
    fn black_dress_with_no_results() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![Ok(response(
            "black dress",
            json!([]),
        ))]));
        session.update_draft(Some("black dress"), None);

        assert_eq!(session.submit(), SubmitOutcome::Applied);
        let calls = session.gateway().calls.borrow().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            search_form_fields(&calls[0]),
            vec![FormField::Message("black dress".to_string())]
        );

        let summary = session.summary().unwrap_or_else(|| panic!("expected summary"));
        assert_eq!(summary.query_used, "black dress");
        assert_eq!(summary.result_count, 0);
        assert_eq!(summary.top_score, None);

        let data = session.ready_data().unwrap_or_else(|| panic!("expected ready data"));
        let grid = ResultGrid::from_response(data, "http://127.0.0.1:8000");
        assert_eq!(grid.empty_state(), Some(NO_RESULTS_LABEL));
    }

    #[test]
    fn image_only_submission_sends_only_image() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![Ok(response(
            "red coat",
            json!([{"product_id": "p-1", "score": 0.77}]),
        ))]));
        session.update_draft(
            Some(""),
            Some(ImageAttachment::new("look.png", vec![1, 2, 3])),
        );

        assert_eq!(session.submit(), SubmitOutcome::Applied);
        let calls = session.gateway().calls.borrow().clone();
        let names: Vec<&str> = search_form_fields(&calls[0])
            .iter()
            .map(FormField::name)
            .collect();
        assert_eq!(names, vec!["image"]);
        assert_eq!(session.summary().and_then(|s| s.top_score), Some(0.77));
    }

    #[test]
    fn backend_500_fails_with_status_and_body() {
        let mut session =
            SearchSession::new(ScriptedGateway::replying(vec![Err(rejected(500, "boom"))]));
        session.update_draft(Some("black dress"), None);

        assert_eq!(session.submit(), SubmitOutcome::Applied);
        let message = session.error_message().unwrap_or_default();
        assert!(message.contains("500"), "message: {message}");
        assert!(message.contains("boom"), "message: {message}");
        assert_eq!(session.summary(), None);
    }

    #[test]
    fn transport_failure_uses_generic_message() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![Err(
            GatewayError::Transport("connection refused".to_string()),
        )]));
        session.update_draft(Some("scarf"), None);
        session.submit();
        let message = session.error_message().unwrap_or_default();
        assert!(message.starts_with("Search failed"));
        assert!(!message.contains("connection refused"));
    }

    #[test]
    fn new_result_replaces_previous_failure() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![
            Err(rejected(503, "busy")),
            Ok(response("scarf", json!([{"product_id": "s", "score": 0.4}]))),
        ]));
        session.update_draft(Some("scarf"), None);
        session.submit();
        assert_eq!(session.state().kind(), "failed");

        session.submit();
        assert_eq!(session.state().kind(), "ready");
        assert_eq!(session.error_message(), None);
    }

    #[test]
    fn reset_from_ready_and_failed_returns_to_idle() {
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![
            Ok(response("coat", json!([{"product_id": "a", "score": 0.9}]))),
            Err(rejected(500, "boom")),
        ]));
        session.update_draft(
            Some("coat"),
            Some(ImageAttachment::new("ref.jpg", vec![9])),
        );

        session.submit();
        assert_eq!(session.state().kind(), "ready");
        session.reset();
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.summary(), None);
        assert_eq!(session.ready_data(), None);
        assert!(!session.draft().has_image());
        assert_eq!(session.draft().raw_text(), "coat");

        session.submit();
        assert_eq!(session.state().kind(), "failed");
        session.reset();
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.error_message(), None);
        assert_eq!(session.summary(), None);
    }

    #[test]
    fn older_resolution_arriving_last_is_ignored() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        session.update_draft(Some("coat"), None);
        let first = session.begin_submit().unwrap_or_else(|| panic!("submittable"));
        session.update_draft(Some("red coat"), None);
        let second = session.begin_submit().unwrap_or_else(|| panic!("submittable"));
        assert!(second.seq > first.seq);
        assert_eq!(first.query.trimmed_text(), "coat");
        assert!(session.is_submitting());

        let applied = session.complete(second.seq, Ok(response("red coat", json!([]))));
        let stale = session.complete(first.seq, Ok(response("coat", json!([]))));

        assert_eq!(applied, SubmitOutcome::Applied);
        assert_eq!(stale, SubmitOutcome::Stale);
        assert_eq!(session.summary().map(|s| s.query_used).as_deref(), Some("red coat"));
    }

    #[test]
    fn older_resolution_arriving_first_is_ignored() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        session.update_draft(Some("coat"), None);
        let first = session.begin_submit().unwrap_or_else(|| panic!("submittable"));
        let second = session.begin_submit().unwrap_or_else(|| panic!("submittable"));

        assert_eq!(
            session.complete(first.seq, Err(rejected(500, "old"))),
            SubmitOutcome::Stale
        );
        assert!(session.is_submitting());
        assert_eq!(
            session.complete(second.seq, Ok(response("coat", json!([])))),
            SubmitOutcome::Applied
        );
        assert_eq!(
            session.complete(second.seq, Err(rejected(500, "dup"))),
            SubmitOutcome::Stale
        );
        assert_eq!(session.state().kind(), "ready");
    }

    #[test]
    fn background_search_overtaken_by_newer_one_is_ignored() {
        let mut session = SearchSession::new(EchoGateway {
            slow_delay: Duration::from_millis(200),
        });
        let (tx, rx) = mpsc::channel::<Resolution>();

        session.update_draft(Some("slow wool coat"), None);
        let first = session.submit_in_background(tx.clone());
        session.update_draft(Some("linen shirt"), None);
        let second = session.submit_in_background(tx);
        assert!(session.is_submitting());

        let mut outcomes = Vec::new();
        for resolution in rx.iter().take(2) {
            outcomes.push((resolution.seq, session.complete(resolution.seq, resolution.outcome)));
        }

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.contains(&(second.unwrap_or(0), SubmitOutcome::Applied)));
        assert!(outcomes.contains(&(first.unwrap_or(0), SubmitOutcome::Stale)));
        assert_eq!(
            session.summary().map(|s| s.query_used).as_deref(),
            Some("linen shirt")
        );
    }

    #[test]
    fn background_submit_of_empty_draft_is_blocked() {
        let mut session = SearchSession::new(EchoGateway {
            slow_delay: Duration::ZERO,
        });
        let (tx, rx) = mpsc::channel::<Resolution>();
        assert_eq!(session.submit_in_background(tx), None);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn reset_orphans_outstanding_search() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        session.update_draft(Some("coat"), None);
        let pending = session.begin_submit().unwrap_or_else(|| panic!("submittable"));
        session.reset();

        assert_eq!(
            session.complete(pending.seq, Ok(response("coat", json!([])))),
            SubmitOutcome::Stale
        );
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn first_search_pulse_rises_once_then_lowers() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        let start = Instant::now();
        assert!(!session.first_search_active_at(start));

        session.update_draft(Some("coat"), None);
        session.begin_submit_at(start);
        assert!(session.first_search_active_at(start + Duration::from_millis(100)));
        assert!(!session.first_search_active_at(start + FIRST_SEARCH_PULSE));

        session.begin_submit_at(start + Duration::from_secs(5));
        assert_eq!(session.first_search_started_at(), Some(start));
        assert!(!session.first_search_active_at(start + Duration::from_millis(5100)));
    }

    #[test]
    fn draft_edits_do_not_transition() {
        let mut session = SearchSession::new(ScriptedGateway::default());
        session.update_draft(Some("coat"), Some(ImageAttachment::new("a.jpg", vec![1])));
        assert_eq!(session.state(), &SessionState::Idle);
        session.clear_image();
        assert!(!session.draft().has_image());
        assert_eq!(session.draft().trimmed_text(), "coat");
    }

    #[test]
    fn lifecycle_is_logged_as_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let mut session = SearchSession::new(ScriptedGateway::replying(vec![
            Ok(response("coat", json!([{"product_id": "a", "score": 0.9}]))),
            Err(rejected(500, "boom")),
        ]))
        .with_events(EventWriter::new(&path, "session-1"));

        session.update_draft(Some("coat"), None);
        session.submit();
        session.submit();
        session.reset();

        let rows: Vec<Value> = std::fs::read_to_string(&path)?
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec![
                "search_submitted",
                "search_ready",
                "search_submitted",
                "search_failed",
                "session_reset"
            ]
        );
        assert_eq!(rows[1]["result_count"], json!(1));
        assert_eq!(rows[3]["status"], json!(500));
        assert_eq!(rows[3]["kind"], json!("backend_rejected"));
        assert_eq!(rows[4]["from"], json!("failed"));
        Ok(())
    }
}
