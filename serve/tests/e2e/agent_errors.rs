//! Agent protocol violations are fatal to the agent session: the socket is
//! closed with a reason and the UI is told.

use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn breakpoint_for_unknown_event_closes_agent_session() {
    let server = spawn_server().await;
    let (mut agent, mut ui, _run) = start_run(&server).await;

    send(
        &mut agent,
        &breakpoint_msg("b1", "no-such-event", "begin", text_payload("x")),
    )
    .await;

    let error = recv_json(&mut ui).await;
    assert_eq!(error["event"], "error");
    assert!(error["content"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown event"));

    let reason = recv_close(&mut agent).await;
    assert!(reason.unwrap().contains("unknown event"));
}

#[tokio::test]
async fn second_breakpoint_while_halted_closes_agent_session() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;
    halt_at_first_breakpoint(&mut agent, &mut ui, &run).await;

    send(
        &mut agent,
        &breakpoint_msg("b2", "e2", "end", text_payload("x")),
    )
    .await;

    let error = recv_json(&mut ui).await;
    assert_eq!(error["event"], "error");
    let reason = recv_close(&mut agent).await;
    assert!(reason.unwrap().contains("halted"));
}

#[tokio::test]
async fn event_without_active_run_closes_agent_session() {
    let server = spawn_server().await;
    let mut agent = connect(&server.agent_url).await;
    send(
        &mut agent,
        &event_msg("e1", "LLM_QUERY", text_payload("q")),
    )
    .await;
    let reason = recv_close(&mut agent).await;
    assert!(reason.unwrap().contains("active run"));
}

#[tokio::test]
async fn unknown_agent_tag_closes_agent_session() {
    let server = spawn_server().await;
    let mut agent = connect(&server.agent_url).await;
    send(&mut agent, &json!({"message": "bogus", "data": {}})).await;
    let reason = recv_close(&mut agent).await;
    assert!(reason.unwrap().contains("unknown message tag"));
}

#[tokio::test]
async fn second_program_started_closes_run_and_agent_session() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;

    send(
        &mut agent,
        &event_msg("e8", "PROGRAM_STARTED", text_payload("again")),
    )
    .await;

    // The stale run is sealed with a terminal message, then the session is
    // dropped and the UI informed.
    let message = recv_json(&mut ui).await;
    assert_eq!(message["event"], "new_message");
    assert_eq!(message["content"]["run"], run);
    let update = recv_json(&mut ui).await;
    assert_eq!(update["content"]["state"], "IDLE");
    let error = recv_json(&mut ui).await;
    assert_eq!(error["event"], "error");

    let reason = recv_close(&mut agent).await;
    assert!(reason.unwrap().contains("PROGRAM_STARTED"));
}
