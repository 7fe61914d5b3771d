//! Integration tests for missed calls, callback suggestions and agent status

mod common;

use std::time::Duration;

use chrono::Utc;
use common::*;
use softphone_core::client::config::MAX_CALLBACK_DELAY_SECS;
use softphone_core::{
    AgentCredentials, AgentStatus, CallState, CallbackCreate, CallbackOrigin, CallbackStatus, DialRequest,
    EndReason, InMemoryDirectory, QueueAgentAdd, SoftphoneError, SoftphoneEvent, VoiceSettings,
};
use tokio_test::assert_ok;

fn short_ring() -> softphone_core::SoftphoneConfig {
    test_config().with_ring_timeout(Duration::from_millis(100))
}

#[tokio::test]
async fn test_unanswered_call_is_missed_with_one_callback() {
    let (client, provider, _) = registered_client(short_ring()).await;
    let mut events = client.events();

    provider.incoming("CA-in-1", "+250788123456").await;
    let suggested = wait_for_event(&mut events, |e| matches!(e, SoftphoneEvent::CallbackSuggested { .. })).await;
    let SoftphoneEvent::CallbackSuggested { callback } = suggested else {
        unreachable!()
    };
    assert_eq!(callback.related_call_id, Some("CA-in-1".into()));
    assert_eq!(callback.origin, CallbackOrigin::MissedCall);
    assert_eq!(callback.status, CallbackStatus::Pending);
    assert_eq!(callback.remote_address.as_deref(), Some("+250788123456"));
    assert!(callback.scheduled_for > Utc::now());

    let log = client.call_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].final_state, CallState::Missed);
    assert_eq!(log[0].end_reason, EndReason::NoAnswer);
    assert!(client.state().active_call.is_none());

    // the provider is told to stop offering it
    assert_ok!(client.refresh_queues().await);
    assert_eq!(provider.count_op("reject CA-in-1"), 1);

    // late timers or a manual "call back" shortcut never create a second one
    tokio::time::sleep(Duration::from_millis(150)).await;
    let scheduler = client.callbacks();
    assert_eq!(scheduler.len(), 1);
    let manual = scheduler
        .create(CallbackCreate {
            related_call_id: Some("CA-in-1".into()),
            remote_address: None,
            scheduled_for: Utc::now(),
            note: Some("asked for pricing".to_string()),
        })
        .unwrap();
    assert_eq!(manual.id, callback.id);
    assert_eq!(scheduler.len(), 1);

    assert_ok!(scheduler.complete(callback.id));
    assert!(scheduler.pending().is_empty());
}

#[tokio::test]
async fn test_answered_call_is_not_missed() {
    let (client, provider, _) = registered_client(short_ring()).await;

    provider.incoming("CA-in-2", "+250788123456").await;
    wait_for_state(&client, |s| s.active_call.as_ref().map(|c| c.state) == Some(CallState::Ringing)).await;
    assert_ok!(client.answer(&"CA-in-2".into()).await);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let state = client.state();
    assert_eq!(state.active_call.map(|c| c.state), Some(CallState::Connecting));
    assert!(client.call_log().is_empty());
    assert!(client.callbacks().is_empty());
}

#[tokio::test]
async fn test_no_suggestion_when_disabled() {
    let (client, provider, _) = registered_client(short_ring().with_auto_suggest_callbacks(false)).await;
    let mut events = client.events();

    provider.incoming("CA-in-3", "+250788123456").await;
    wait_for_event(&mut events, |e| matches!(e, SoftphoneEvent::CallLogged { .. })).await;
    assert!(client.callbacks().is_empty());
    assert_eq!(client.stats().missed, 1);
}

#[tokio::test]
async fn test_incoming_while_busy_is_missed_and_rejected() {
    let (client, provider, _) = registered_client(test_config()).await;
    let mut events = client.events();

    let call = client.dial(DialRequest::new("+250700000000", ENTITY)).await.unwrap();
    provider.connected(&call.id).await;
    wait_for_state(&client, |s| s.active_call.as_ref().map(|c| c.state) == Some(CallState::Connected)).await;

    provider.incoming("CA-in-4", "+250788999000").await;
    let logged = wait_for_event(&mut events, |e| matches!(e, SoftphoneEvent::CallLogged { .. })).await;
    let SoftphoneEvent::CallLogged { entry } = logged else {
        unreachable!()
    };
    assert_eq!(entry.call_id, "CA-in-4".into());
    assert_eq!(entry.end_reason, EndReason::Busy);

    assert_ok!(client.refresh_queues().await);
    assert_eq!(provider.count_op("reject CA-in-4"), 1);
    assert!(client.callbacks().for_call(&"CA-in-4".into()).is_some());

    let state = client.state();
    assert_eq!(state.active_call.map(|c| c.id), Some(call.id));
    assert_eq!(state.agent_status, AgentStatus::OnCall);
}

#[tokio::test]
async fn test_available_rejected_during_call() {
    let (client, provider, _) = registered_client(test_config()).await;

    let call = client.dial(DialRequest::new("+250700000000", ENTITY)).await.unwrap();
    provider.connected(&call.id).await;
    wait_for_state(&client, |s| s.agent_status == AgentStatus::OnCall).await;

    let err = client.set_status(AgentStatus::Available).await.unwrap_err();
    assert!(matches!(
        err,
        SoftphoneError::InvalidTransition { from: AgentStatus::OnCall, to: AgentStatus::Available, .. }
    ));
    assert_eq!(client.agent_status(), AgentStatus::OnCall);

    let err = client.set_status(AgentStatus::OnCall).await.unwrap_err();
    assert!(matches!(err, SoftphoneError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_offline_requested_mid_call_applies_after_hangup() {
    let (client, provider, _) = registered_client(test_config()).await;
    let mut events = client.events();

    let call = client.dial(DialRequest::new("+250700000000", ENTITY)).await.unwrap();
    provider.connected(&call.id).await;
    wait_for_state(&client, |s| s.agent_status == AgentStatus::OnCall).await;

    let effective = client.set_status(AgentStatus::Offline).await.unwrap();
    assert_eq!(effective.status, AgentStatus::OnCall);

    assert_ok!(client.hangup(&call.id).await);
    assert_eq!(client.agent_status(), AgentStatus::Offline);

    let changed = wait_for_event(&mut events, |e| {
        matches!(e, SoftphoneEvent::StatusChanged { new: AgentStatus::Offline, .. })
    })
    .await;
    assert_eq!(
        changed,
        SoftphoneEvent::StatusChanged { previous: AgentStatus::OnCall, new: AgentStatus::Offline, unassigned: false }
    );
}

#[tokio::test]
async fn test_prior_status_restored_after_call() {
    let (client, provider, _) = registered_client(test_config()).await;
    assert_ok!(client.set_status(AgentStatus::Busy).await);

    let call = client.dial(DialRequest::new("+250700000000", ENTITY)).await.unwrap();
    provider.connected(&call.id).await;
    wait_for_state(&client, |s| s.agent_status == AgentStatus::OnCall).await;

    assert_ok!(client.hangup(&call.id).await);
    assert_eq!(client.agent_status(), AgentStatus::Busy);
}

#[tokio::test]
async fn test_agent_without_queues_is_unassigned() {
    init_tracing();
    let provider = MockProvider::new();
    let directory = std::sync::Arc::new(InMemoryDirectory::new());
    directory.set_voice_settings(ENTITY, VoiceSettings::enabled());
    let client = build_client(provider, directory.clone(), test_config());

    client.initialize(AgentCredentials::new(AGENT, "secret")).await.unwrap();
    let state = client.state();
    assert!(state.unassigned);
    assert_eq!(state.agent_status, AgentStatus::Available);

    let queue = directory.create_queue(softphone_core::CallQueueCreate {
        name: "sales".to_string(),
        entity_id: ENTITY.to_string(),
        description: None,
    });
    directory
        .add_agent(QueueAgentAdd { queue_id: queue.id, agent_id: AGENT.to_string() })
        .unwrap();

    assert_eq!(client.refresh_queues().await.unwrap(), 1);
    assert!(!client.state().unassigned);
}

#[tokio::test]
async fn test_answered_call_that_never_connects_fails() {
    let config = test_config().with_connect_timeout(Duration::from_millis(100));
    let (client, provider, _) = registered_client(config).await;

    provider.incoming("CA-in-5", "+250788123456").await;
    wait_for_state(&client, |s| s.active_call.as_ref().map(|c| c.state) == Some(CallState::Ringing)).await;
    assert_ok!(client.answer(&"CA-in-5".into()).await);
    assert_eq!(client.agent_status(), AgentStatus::OnCall);

    let state = wait_for_state(&client, |s| s.active_call.is_none()).await;
    assert!(state.last_error.is_some());
    assert_eq!(state.agent_status, AgentStatus::Available);

    let entry = &client.call_log()[0];
    assert_eq!(entry.final_state, CallState::Failed);
    assert!(matches!(entry.end_reason, EndReason::ProviderFailure { .. }));

    assert_ok!(client.refresh_queues().await);
    assert_eq!(provider.count_op("hangup CA-in-5"), 1);
    assert!(client.callbacks().is_empty());
}

#[tokio::test]
async fn test_connected_in_time_cancels_connect_timer() {
    let config = test_config().with_connect_timeout(Duration::from_millis(100));
    let (client, provider, _) = registered_client(config).await;

    provider.incoming("CA-in-6", "+250788123456").await;
    wait_for_state(&client, |s| s.active_call.is_some()).await;
    assert_ok!(client.answer(&"CA-in-6".into()).await);
    provider.connected(&"CA-in-6".into()).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.active_call().map(|c| c.state), Some(CallState::Connected));
    assert!(client.call_log().is_empty());
}

#[tokio::test]
async fn test_longest_callback_delay_is_honoured() {
    let config = short_ring().with_callback_delay_secs(MAX_CALLBACK_DELAY_SECS);
    let (client, provider, _) = registered_client(config).await;
    let mut events = client.events();

    provider.incoming("CA-in-7", "+250788123456").await;
    let suggested = wait_for_event(&mut events, |e| matches!(e, SoftphoneEvent::CallbackSuggested { .. })).await;
    let SoftphoneEvent::CallbackSuggested { callback } = suggested else {
        unreachable!()
    };
    assert!(callback.scheduled_for > Utc::now() + chrono::Duration::days(365));

    // the session keeps serving commands afterwards
    assert!(client.is_running());
    assert_ok!(client.set_status(AgentStatus::Busy).await);
}

#[tokio::test]
async fn test_oversized_callback_delay_rejected_at_build() {
    let err = softphone_core::SessionClientBuilder::new()
        .config(test_config().with_callback_delay_secs(u64::MAX / 2))
        .provider(MockProvider::new())
        .directory(staffed_directory())
        .entity_id(ENTITY)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        SoftphoneError::InvalidConfiguration { ref field, .. } if field == "callback_delay_secs"
    ));
}
