mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use combat_core::TurnPhase;
use combat_runtime::world::ChatCardDraft;
use combat_runtime::{
    ChatCardKind, ClientDirectory, DelegatedOp, DelegatedRequest, DelegationReply,
    ReactionRequest, ReactionTrigger, RuntimeConfig,
};

fn stalled_request() -> ReactionRequest {
    ReactionRequest {
        reactor: actor(GOBLIN),
        reactor_name: "Goblin".to_owned(),
        owner: Some(player()),
        trigger: ReactionTrigger::Hit,
        trigger_token: token(FIGHTER_TOKEN),
        attack_total: Some(18),
        candidates: Vec::new(),
        timeout_secs: 30,
    }
}

#[tokio::test(start_paused = true)]
async fn a_call_gives_up_after_its_timeout() {
    let clients = ClientDirectory::new();
    clients.register(player(), Arc::new(NeverAnswers));
    let runtime = start_with(RuntimeConfig::default(), world(), [], clients).await;
    let handle = runtime.handle();

    let started = tokio::time::Instant::now();
    let outcome = handle
        .delegation(player())
        .call(DelegatedRequest::ResolveReaction(stalled_request()))
        .await;
    let elapsed = started.elapsed();

    assert!(outcome.is_timed_out());
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(30));
    assert_eq!(handle.delegation_stats().received_for(DelegatedOp::ResolveReaction), 1);
}

#[tokio::test]
async fn redelivered_requests_run_once() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();
    let client = handle.delegation(player());
    let id = client.next_id();
    let draft = ChatCardDraft::new(ChatCardKind::Attack, actor(FIGHTER), "Longsword");
    let timeout = client.timeout();

    let first = client
        .call_with_id(id.clone(), DelegatedRequest::CreateChatCard(draft.clone()), timeout)
        .await
        .reply();
    let second = client
        .call_with_id(id, DelegatedRequest::CreateChatCard(draft), timeout)
        .await
        .reply();

    let (Some(DelegationReply::ChatCard(first)), Some(DelegationReply::ChatCard(second))) =
        (first, second)
    else {
        panic!("expected chat card replies");
    };
    assert_eq!(first, second);
    assert_eq!(handle.world().chat_len().await, 1);

    let stats = handle.delegation_stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn failures_are_not_cached() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();
    let client = handle.delegation(player());
    let id = client.next_id();
    let request = DelegatedRequest::MoveToken {
        token: token("Token.ghost"),
        x: 3,
        y: 4,
    };

    let first = client
        .call_with_id(id.clone(), request.clone(), client.timeout())
        .await;
    let retry = client.call_with_id(id, request, client.timeout()).await;

    assert!(!first.is_reply());
    assert!(!retry.is_reply());
    let stats = handle.delegation_stats();
    assert_eq!(stats.executed, 2);
    assert_eq!(stats.cache_hits, 0);
}

#[tokio::test]
async fn moving_a_known_token_is_acknowledged() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();

    let outcome = handle
        .delegation(player())
        .call(DelegatedRequest::MoveToken {
            token: token(GOBLIN_TOKEN),
            x: 5,
            y: 7,
        })
        .await;

    assert!(matches!(outcome.reply(), Some(DelegationReply::Ack)));
    assert_eq!(handle.world().position(&token(GOBLIN_TOKEN)).await, Some((5, 7)));
}

#[tokio::test]
async fn players_run_overtime_through_the_coordinator() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();

    let report = handle
        .process_overtime(&player(), &actor(GOBLIN), TurnPhase::Start)
        .await
        .unwrap();
    assert!(report.runs.is_empty());
    assert_eq!(handle.delegation_stats().received_for(DelegatedOp::RunOvertime), 1);

    handle
        .process_overtime(&gm(), &actor(GOBLIN), TurnPhase::Start)
        .await
        .unwrap();
    assert_eq!(handle.delegation_stats().received_for(DelegatedOp::RunOvertime), 1);
}

#[tokio::test]
async fn sent_requests_run_without_a_waiting_caller() {
    let runtime = start(world(), []).await;
    let handle = runtime.handle();
    let client = handle.delegation(gm());
    let draft = ChatCardDraft::new(ChatCardKind::Attack, actor(FIGHTER), "Longsword");

    let id = client.send(DelegatedRequest::CreateChatCard(draft)).await.unwrap();
    assert_eq!(id.user, gm());

    tokio::time::timeout(Duration::from_secs(1), async {
        while handle.world().chat_len().await == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("the card should be created");
    assert_eq!(handle.world().chat_len().await, 1);
    assert_eq!(handle.delegation_stats().received_for(DelegatedOp::CreateChatCard), 1);
}
