// tests/log_streaming.rs

mod common;
use crate::common::*;

use futures::StreamExt;

use kubelaunch::cluster::InMemoryCluster;
use kubelaunch::engine::LogEvent;
use kubelaunch::errors::LaunchError;
use kubelaunch::labels::OwnerScope;
use kubelaunch::types::{PodPhase, UnitPhase};

fn lines(events: &[LogEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            LogEvent::Line(line) => Some(line.to_string()),
            LogEvent::NodeFailed { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn multi_node_lines_are_prefixed_and_ordered_per_node() -> TestResult {
    init_tracing();
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let task = TaskDefinitionBuilder::new("train").num_nodes(2).build();
    let task_id = engine.submit(&task, &alice).await?;
    let pod0 = cluster.pod_for_node(&task_id, 0).expect("pod for node 0");
    let pod1 = cluster.pod_for_node(&task_id, 1).expect("pod for node 1");

    cluster.set_node_phase(&task_id, 0, UnitPhase::Running);
    cluster.set_node_phase(&task_id, 1, UnitPhase::Running);
    cluster.push_log(&pod0, "step 1");
    cluster.push_log(&pod1, "step 1");
    cluster.push_log(&pod0, "step 2");

    let stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;
    assert!(stream.is_multi_node());
    assert_eq!(stream.nodes(), &[0, 1]);

    cluster.push_log(&pod1, "step 2");
    cluster.set_node_phase(&task_id, 0, UnitPhase::Succeeded);
    cluster.set_node_phase(&task_id, 1, UnitPhase::Succeeded);

    let events: Vec<LogEvent> = with_timeout(stream.collect()).await;
    let all = lines(&events);
    assert_eq!(all.len(), 4);

    let node0: Vec<&String> = all.iter().filter(|l| l.starts_with("node-0 | ")).collect();
    let node1: Vec<&String> = all.iter().filter(|l| l.starts_with("node-1 | ")).collect();
    assert_eq!(node0, ["node-0 | step 1", "node-0 | step 2"]);
    assert_eq!(node1, ["node-1 | step 1", "node-1 | step 2"]);
    Ok(())
}

#[tokio::test]
async fn finished_task_is_read_in_one_pass() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let task_id = engine
        .submit(&TaskDefinitionBuilder::new("echo").build(), &alice)
        .await?;
    let pod = cluster.pod_for_node(&task_id, 0).expect("pod");
    cluster.push_log(&pod, "hello");
    cluster.push_log(&pod, "bye");
    cluster.set_node_phase(&task_id, 0, UnitPhase::Succeeded);

    let stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;
    assert!(!stream.is_multi_node());
    let events: Vec<LogEvent> = with_timeout(stream.collect()).await;

    assert_eq!(lines(&events), ["hello", "bye"]);
    eventually(|| cluster.active_log_readers() == 0).await;
    Ok(())
}

#[tokio::test]
async fn unscheduled_node_times_out_without_blocking_others() -> TestResult {
    init_tracing();
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let task_id = engine
        .submit(&TaskDefinitionBuilder::new("train").num_nodes(2).build(), &alice)
        .await?;
    let pod0 = cluster.pod_for_node(&task_id, 0).expect("pod");
    cluster.push_log(&pod0, "only node 0 ran");
    cluster.set_node_phase(&task_id, 0, UnitPhase::Succeeded);
    // Node 1 stays pending past the schedule timeout.

    let stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;
    let events: Vec<LogEvent> = with_timeout(stream.collect()).await;

    assert_eq!(lines(&events), ["node-0 | only node 0 ran"]);
    let failures: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            LogEvent::NodeFailed { node_idx, error } => Some((*node_idx, error)),
            LogEvent::Line(_) => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 1);
    assert!(matches!(
        failures[0].1,
        LaunchError::SchedulingTimeout { node_idx: 1, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn worker_waits_for_pod_to_appear() -> TestResult {
    let (engine, cluster) = engine_on(InMemoryCluster::without_auto_pods());
    let alice = owner("alice");

    let task_id = engine
        .submit(&TaskDefinitionBuilder::new("echo").build(), &alice)
        .await?;
    let stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;

    let pod = format!("late-{task_id}");
    cluster.add_pod(
        &pod,
        labels(&[
            ("type", "task"),
            ("task-id", task_id.as_str()),
            ("owner", "alice"),
            ("node-idx", "0"),
        ]),
        PodPhase::Running,
    );
    cluster.push_log(&pod, "finally");
    cluster.set_pod_phase(&pod, PodPhase::Succeeded);

    let events: Vec<LogEvent> = with_timeout(stream.collect()).await;
    assert_eq!(lines(&events), ["finally"]);
    Ok(())
}

#[tokio::test]
async fn dropping_the_stream_stops_every_reader() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let task_id = engine
        .submit(&TaskDefinitionBuilder::new("serve").num_nodes(3).build(), &alice)
        .await?;
    for idx in 0..3 {
        cluster.set_node_phase(&task_id, idx, UnitPhase::Running);
    }

    let mut stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;
    let pod = cluster.pod_for_node(&task_id, 2).expect("pod");
    cluster.push_log(&pod, "listening");

    match with_timeout(stream.next()).await {
        Some(LogEvent::Line(line)) => assert_eq!(line.to_string(), "node-2 | listening"),
        other => panic!("expected a line, got {other:?}"),
    }
    eventually(|| cluster.active_log_readers() == 3).await;

    drop(stream);
    eventually(|| cluster.active_log_readers() == 0).await;
    Ok(())
}

#[tokio::test]
async fn cancel_ends_the_stream() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let task_id = engine
        .submit(&TaskDefinitionBuilder::new("serve").build(), &alice)
        .await?;
    cluster.set_node_phase(&task_id, 0, UnitPhase::Running);

    let stream = engine.stream_logs(&task_id, &OwnerScope::owner(&alice)).await?;
    eventually(|| cluster.active_log_readers() == 1).await;

    stream.cancel();
    let rest: Vec<LogEvent> = with_timeout(stream.collect()).await;
    assert!(rest.is_empty());
    eventually(|| cluster.active_log_readers() == 0).await;
    Ok(())
}

#[tokio::test]
async fn logs_of_unknown_task_are_not_found() {
    let (engine, _cluster) = engine();
    let err = engine
        .stream_logs("nope0000", &OwnerScope::owner(&owner("alice")))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
