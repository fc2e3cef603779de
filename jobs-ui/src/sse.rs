//! Server-Sent Events stream carrying one run per connection.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use jobs::core::event::Event as RunEvent;
use jobs::core::types::RunParams;
use tracing::{debug, info, warn};

use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// GET /run_stream - start a run from the query parameters and stream its events.
///
/// Dropping the connection does not cancel the run; it keeps writing its log.
pub async fn run_stream(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(class = %params.class, "run requested");
    let mut rx = state.orchestrator.start(params);

    let stream = async_stream::stream! {
        while let Some(run_event) = rx.recv().await {
            let terminal = run_event.is_terminal();
            if let Some((name, data)) = frame(&run_event) {
                yield Ok(Event::default().event(name).data(data));
            }
            if terminal {
                debug!("run stream finished");
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

/// SSE event name and JSON data for one run event.
fn frame(event: &RunEvent) -> Option<(&'static str, String)> {
    match event.to_json() {
        Ok(json) => Some((event.name(), json)),
        Err(e) => {
            warn!(event = event.name(), err = %e, "failed to encode run event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::core::event::RunStatus;
    use jobs::test_support::{Script, collect_events, event_names};
    use serde_json::Value;

    use crate::state::testing::scripted_state;

    #[test]
    fn frame_uses_event_name_and_json_payload() {
        let (name, data) = frame(&RunEvent::warning("careful")).expect("frame");
        assert_eq!(name, "warning");
        let json: Value = serde_json::from_str(&data).expect("json");
        assert_eq!(json["text"], "careful");
    }

    #[test]
    fn end_frame_carries_status_and_exit_code() {
        let end = RunEvent::End {
            status: RunStatus::Cancelled,
            exit_code: 130,
            log_name: None,
            log_path: None,
            total_steps: None,
        };
        let (name, data) = frame(&end).expect("frame");
        assert_eq!(name, "end");
        let json: Value = serde_json::from_str(&data).expect("json");
        assert_eq!(json["status"], "cancelled");
        assert_eq!(json["exit_code"], 130);
    }

    #[tokio::test]
    async fn query_params_drive_a_run() {
        let (_project, state) =
            scripted_state(vec![Script::exit(&["RESULT FOR STRATEGY S", "x"], 0)]);
        let params: RunParams =
            params_from_query("action=backtest&strategy=S&start=2024-01-01");
        let events = collect_events(state.orchestrator.start(params)).await;
        let names = event_names(&events);
        assert_eq!(names.first(), Some(&"meta"));
        assert_eq!(names.last(), Some(&"end"));
        assert!(names.contains(&"result"));
    }

    fn params_from_query(query: &str) -> RunParams {
        let uri: axum::http::Uri = format!("/run_stream?{query}").parse().expect("uri");
        let Query(params) = Query::<RunParams>::try_from_uri(&uri).expect("query");
        params
    }
}
