#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use procvisor::{
    BackoffPolicy, Config, Isolation, JitterPolicy, Supervisor, Task, TaskId, TaskRegistry,
    TaskStatus, router,
};
use serde_json::Value;
use tower::ServiceExt;

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn cfg(workers: usize, program: impl Into<PathBuf>) -> Config {
    Config {
        workers,
        isolation: Isolation::Process,
        worker_program: Some(program.into()),
        span: 100,
        progress_poll: Duration::from_millis(2),
        result_poll: Duration::from_millis(2),
        respawn: BackoffPolicy {
            first: Duration::from_millis(1),
            max: Duration::from_millis(10),
            factor: 2.0,
            jitter: JitterPolicy::None,
        },
        grace: Some(Duration::from_secs(10)),
        ..Config::default()
    }
}

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_procvisor"))
}

async fn wait_terminal(registry: &TaskRegistry, id: &TaskId) -> Task {
    for _ in 0..2_000 {
        if let Some(task) = registry.get(id).await {
            if task.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} did not finish in time");
}

#[tokio::test]
async fn child_processes_compute_and_report() {
    let sup = Supervisor::builder(cfg(2, binary())).build().unwrap();
    let gateway = sup.gateway();

    // span 100 → Σ x² for x < 100 per step
    let per_step: u64 = (1..100u64).map(|x| x * x).sum();
    let mut ids = Vec::new();
    for steps in [100, 35, 1] {
        ids.push((steps, gateway.submit(steps).await.unwrap()));
    }

    for (steps, id) in &ids {
        let task = wait_terminal(sup.registry(), id).await;
        assert_eq!(task.status, TaskStatus::Completed, "{task:?}");
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.final_result, Some(per_step * *steps as u64));
    }
    let (_, first) = &ids[0];
    let task = sup.registry().get(first).await.unwrap();
    assert!(task.partial_history.len() <= 10);
    assert!(task.partial_history.iter().all(|p| p.step_index % 10 == 0));

    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn http_round_trip_against_process_pool() {
    let sup = Supervisor::builder(cfg(1, binary())).build().unwrap();
    let app = router(sup.gateway());

    let res = app
        .clone()
        .oneshot(
            Request::post("/task")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"stepsTotal": 20}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    let id = body["taskId"].as_str().unwrap().to_owned();

    wait_terminal(sup.registry(), &TaskId::from(id.as_str())).await;
    let res = app
        .oneshot(Request::get(format!("/task/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(res).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100.0);

    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn crashing_worker_fails_tasks_and_keeps_serving() {
    // `false` exits immediately, so every dispatched unit hits a dead child.
    let sup = Supervisor::builder(cfg(1, "false")).build().unwrap();
    let gateway = sup.gateway();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(gateway.submit(10).await.unwrap());
    }
    for id in &ids {
        let task = wait_terminal(sup.registry(), id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_ref().unwrap().label, "worker_crashed");
    }

    sup.shutdown().await.unwrap();
}

#[tokio::test]
async fn missing_worker_program_fails_startup() {
    let err = Supervisor::builder(cfg(2, "/nonexistent/procvisor"))
        .build()
        .err()
        .unwrap();
    assert_eq!(err.as_label(), "runtime_spawn_failed");
}
