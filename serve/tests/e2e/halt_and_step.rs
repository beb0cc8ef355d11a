//! S1/S2: halting on the first breakpoint and stepping with a rewritten
//! payload.

use serde_json::json;
use std::time::Duration;

use crate::common::*;

#[tokio::test]
async fn halts_on_first_breakpoint_without_resuming_agent() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;

    halt_at_first_breakpoint(&mut agent, &mut ui, &run).await;

    // No outbound breakpoint reaches the agent while halted.
    assert_silent(&mut agent, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn step_delivers_modified_payload() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;
    halt_at_first_breakpoint(&mut agent, &mut ui, &run).await;

    send(
        &mut ui,
        &ui_cmd(
            "update_msg_content",
            json!({"run": &run, "message": "b1", "content": {"kind": "json", "value": {"prompt": "p2"}}}),
        ),
    )
    .await;
    send(&mut ui, &ui_cmd("step", json!({"run": &run}))).await;

    let echoed = recv_json(&mut agent).await;
    assert_eq!(echoed["message"], "breakpoint");
    assert_eq!(echoed["data"]["uuid"], "b1");
    assert_eq!(echoed["data"]["modified_data"]["value"]["prompt"], "p2");
    assert_eq!(echoed["data"]["original_data"]["value"]["prompt"], "p");

    let update = recv_json(&mut ui).await;
    assert_eq!(update["event"], "update_run_state");
    assert_eq!(update["content"]["state"], "STEP");
    assert_eq!(update["content"]["agent_state"], "LLM_THINKING");
    assert!(update["content"]["halted_at"].is_null());
}

#[tokio::test]
async fn step_without_modification_echoes_original() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;
    halt_at_first_breakpoint(&mut agent, &mut ui, &run).await;

    send(&mut ui, &ui_cmd("step", json!({"run": &run}))).await;

    let echoed = recv_json(&mut agent).await;
    assert_eq!(echoed["data"]["uuid"], "b1");
    assert_eq!(echoed["data"]["modified_data"], echoed["data"]["original_data"]);
}

#[tokio::test]
async fn update_of_non_pending_message_is_error_and_noop() {
    let server = spawn_server().await;
    let (mut agent, mut ui, run) = start_run(&server).await;
    halt_at_first_breakpoint(&mut agent, &mut ui, &run).await;

    send(
        &mut ui,
        &ui_cmd(
            "update_msg_content",
            json!({"run": &run, "message": "not-b1", "content": {"kind": "text", "value": "x"}}),
        ),
    )
    .await;
    let error = recv_json(&mut ui).await;
    assert_eq!(error["event"], "error");

    // The pending payload is untouched: stepping echoes the original.
    send(&mut ui, &ui_cmd("step", json!({"run": &run}))).await;
    let echoed = recv_json(&mut agent).await;
    assert_eq!(echoed["data"]["modified_data"]["value"]["prompt"], "p");
}
