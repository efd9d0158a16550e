#[allow(dead_code)]
mod helpers;

use quarry::engine::EngineStatus;
use quarry::error::ServiceError;
use quarry::events::JobEvent;
use quarry::jobs::JobState;
use quarry::service::{QuerySubmission, ResultPoll};
use std::time::Duration;

fn local(sql: &str) -> QuerySubmission {
    QuerySubmission {
        sql: sql.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn submissions_outside_the_numeric_contract_are_rejected() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let cases = [
        QuerySubmission {
            sql: "   ".to_string(),
            ..Default::default()
        },
        QuerySubmission {
            engine: "warehouse".to_string(),
            ..local("SELECT 1")
        },
        QuerySubmission {
            priority: 0,
            ..local("SELECT 1")
        },
        QuerySubmission {
            priority: 6,
            ..local("SELECT 1")
        },
        QuerySubmission {
            estimated_slots: 0,
            ..local("SELECT 1")
        },
        QuerySubmission {
            estimated_slots: 11,
            ..local("SELECT 1")
        },
        QuerySubmission {
            max_execution_s: 0,
            ..local("SELECT 1")
        },
        QuerySubmission {
            max_execution_s: 3601,
            ..local("SELECT 1")
        },
    ];

    for case in cases {
        let err = service.submit_query(case.clone()).await.unwrap_err();
        assert!(
            matches!(err, ServiceError::InvalidInput(_)),
            "case {case:?} produced {err:?}"
        );
    }
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let (service, _shutdown) = helpers::start_service(4).await;

    assert!(matches!(
        service.get_job("missing").await.unwrap_err(),
        ServiceError::NotFound(_)
    ));
    assert!(matches!(
        service.get_job_result("missing").await.unwrap_err(),
        ServiceError::NotFound(_)
    ));
}

#[tokio::test]
async fn result_of_an_active_job_is_pending() {
    let (service, _shutdown) =
        helpers::start_service_with_delay(2, Duration::from_millis(400)).await;

    let view = service
        .submit_query(QuerySubmission {
            sql: "SELECT 1".to_string(),
            engine: "slow".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let poll = service.get_job_result(&view.job_id).await.unwrap();
    assert!(matches!(poll, ResultPoll::Pending { .. }));

    helpers::wait_terminal(&service, &view.job_id).await;
    let poll = service.get_job_result(&view.job_id).await.unwrap();
    assert!(matches!(poll, ResultPoll::Ready(_)));
}

#[tokio::test]
async fn list_jobs_filters_by_state_and_caps_results() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let view = service
            .submit_query(local(&format!("SELECT {i} AS v")))
            .await
            .unwrap();
        ids.push(view.job_id);
    }
    for id in &ids {
        helpers::wait_terminal(&service, id).await;
    }

    let completed = service.list_jobs(Some(JobState::Completed), 50).await.unwrap();
    assert_eq!(completed.len(), 5);
    assert!(completed.iter().all(|j| j.state == JobState::Completed));

    let capped = service.list_jobs(None, 2).await.unwrap();
    assert_eq!(capped.len(), 2);

    let failed = service.list_jobs(Some(JobState::Failed), 50).await.unwrap();
    assert!(failed.is_empty());
}

#[tokio::test]
async fn batch_submission_reports_per_request_outcomes() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let outcomes = service
        .submit_batch(vec![
            local("SELECT 1 AS a"),
            QuerySubmission {
                priority: 9,
                ..local("SELECT 2")
            },
            local("SELECT 3 AS c"),
        ])
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].job_id.is_some());
    assert!(outcomes[1].job_id.is_none());
    assert!(outcomes[1].error.as_deref().unwrap().contains("priority"));
    assert!(outcomes[2].job_id.is_some());

    for outcome in outcomes.iter().filter_map(|o| o.job_id.as_ref()) {
        helpers::wait_terminal(&service, outcome).await;
    }
}

#[tokio::test]
async fn oversized_batches_are_rejected_outright() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let requests: Vec<_> = (0..21).map(|_| local("SELECT 1")).collect();
    let err = service.submit_batch(requests).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn system_status_reports_engines_and_counts() {
    let (service, _shutdown) = helpers::start_service(6).await;

    let status = service.system_status().await.unwrap();
    assert_eq!(status.total_slots, 6);
    assert_eq!(status.available_slots, 6);
    assert_eq!(status.queued_jobs, 0);
    assert_eq!(status.running_jobs, 0);
    assert_eq!(status.completed_jobs, 0);
    assert_eq!(status.engines.get("local"), Some(&EngineStatus::Available));
    assert!(status.engines.contains_key("slow"));

    let view = service.submit_query(local("SELECT 1")).await.unwrap();
    helpers::wait_terminal(&service, &view.job_id).await;

    let status = service.system_status().await.unwrap();
    assert_eq!(status.completed_jobs, 1);
}

#[tokio::test]
async fn validation_goes_through_the_selected_engine() {
    let (service, _shutdown) = helpers::start_service(4).await;

    let report = service.validate("SELECT 1", "local").await.unwrap();
    assert!(report.valid);
    assert_eq!(report.query_type, "SELECT");

    let report = service.validate("", "local").await.unwrap();
    assert!(!report.valid);
    assert_eq!(report.errors, vec!["Empty query".to_string()]);

    let err = service.validate("SELECT 1", "warehouse").await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn lifecycle_events_are_broadcast_in_order() {
    let (service, _shutdown) = helpers::start_service(4).await;
    let mut events = service.job_events();

    let view = service.submit_query(local("SELECT 1 AS x")).await.unwrap();
    helpers::wait_terminal(&service, &view.job_id).await;

    let mut saw_created = false;
    let mut saw_started = false;
    let mut saw_finished = false;
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        match event.unwrap() {
            JobEvent::Created { job } if job.job_id == view.job_id => saw_created = true,
            JobEvent::Started { job_id, .. } if job_id == view.job_id => {
                assert!(saw_created, "started before created");
                saw_started = true;
            }
            JobEvent::Finished { job_id, state } if job_id == view.job_id => {
                assert!(saw_started, "finished before started");
                assert_eq!(state, JobState::Completed);
                saw_finished = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_created && saw_started && saw_finished);
}
