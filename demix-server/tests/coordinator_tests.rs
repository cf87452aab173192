mod common;

use common::{FakeSeparator, Harness, mp3};
use demix_server::domain::{JobStatus, OutputFormat, ProcessingParams};
use demix_server::jobs::{CancelOutcome, JobEvent, YoutubeAdmission};

async fn upload(harness: &Harness, tag: &str) -> String {
    harness
        .service
        .submit_upload(&format!("{}.mp3", tag), &mp3(tag), ProcessingParams::default())
        .await
        .expect("upload admitted")
        .job
        .id
}

#[tokio::test]
async fn test_jobs_run_one_at_a_time_in_admission_order() {
    let harness = Harness::start().await;
    let a = upload(&harness, "track-a").await;
    let b = upload(&harness, "track-b").await;
    let c = upload(&harness, "track-c").await;

    for id in [&a, &b, &c] {
        harness.wait_for(id, JobStatus::Completed).await;
    }

    assert_eq!(
        harness.separator.executed(),
        vec!["track-a", "track-b", "track-c"]
    );
    assert_eq!(harness.separator.max_concurrency(), 1);
    assert!(harness.coordinator.current_job().is_none());
}

#[tokio::test]
async fn test_concurrent_submissions_never_overlap() {
    let harness = Harness::start().await;
    let submissions = (0..6).map(|i| {
        let service = harness.service.clone();
        tokio::spawn(async move {
            let tag = format!("parallel-{}", i);
            service
                .submit_upload(&format!("{}.mp3", tag), &mp3(&tag), ProcessingParams::default())
                .await
                .expect("upload admitted")
                .job
                .id
        })
    });
    let ids: Vec<String> = futures::future::join_all(submissions)
        .await
        .into_iter()
        .map(|r| r.expect("task joined"))
        .collect();

    for id in &ids {
        let job = harness.wait_for(id, JobStatus::Completed).await;
        assert_eq!(job.progress, 100);
    }
    assert_eq!(harness.separator.executed().len(), 6);
    assert_eq!(harness.separator.max_concurrency(), 1);
}

#[tokio::test]
async fn test_completed_job_reports_full_progress() {
    let harness = Harness::start().await;
    let id = upload(&harness, "progress").await;
    let job = harness.wait_for(&id, JobStatus::Completed).await;

    assert_eq!(job.progress, 100);
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.error.is_none());
    assert!(harness.ctx.layout.artifacts_present(&job).await);
}

#[tokio::test]
async fn test_resubmission_is_served_from_cache() {
    let harness = Harness::start().await;
    let id = upload(&harness, "cached").await;
    harness.wait_for(&id, JobStatus::Completed).await;

    let again = harness
        .service
        .submit_upload("renamed.mp3", &mp3("cached"), ProcessingParams::default())
        .await
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.job.id, id);
    assert_eq!(harness.separator.executed().len(), 1);
}

#[tokio::test]
async fn test_missing_artifacts_force_reexecution() {
    let harness = Harness::start().await;
    let id = upload(&harness, "evicted").await;
    let job = harness.wait_for(&id, JobStatus::Completed).await;
    std::fs::remove_dir_all(harness.ctx.layout.output_dir(&job.id)).unwrap();

    let again = harness
        .service
        .submit_upload("evicted.mp3", &mp3("evicted"), ProcessingParams::default())
        .await
        .unwrap();
    assert!(!again.cached);
    harness.wait_for(&again.job.id, JobStatus::Completed).await;
    assert_eq!(harness.separator.executed(), vec!["evicted", "evicted"]);
}

#[tokio::test]
async fn test_other_output_format_is_a_cache_miss() {
    let harness = Harness::start().await;
    let id = upload(&harness, "formats").await;
    harness.wait_for(&id, JobStatus::Completed).await;

    let wav = ProcessingParams {
        output_format: OutputFormat::Wav,
        ..Default::default()
    };
    let again = harness
        .service
        .submit_upload("formats.mp3", &mp3("formats"), wav)
        .await
        .unwrap();
    assert!(!again.cached);
    assert_ne!(again.job.id, id);

    let job = harness.wait_for(&again.job.id, JobStatus::Completed).await;
    assert_eq!(job.params.output_format, OutputFormat::Wav);
    assert_eq!(harness.separator.executed().len(), 2);
}

#[tokio::test]
async fn test_cancelled_queued_job_never_executes() {
    let harness = Harness::start().await;
    let blocker = upload(&harness, "block-first").await;
    harness.wait_for(&blocker, JobStatus::Processing).await;
    let waiting = upload(&harness, "never-run").await;

    let outcome = harness.service.cancel(&waiting).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(
        harness.service.get(&waiting).unwrap().status,
        JobStatus::Cancelled
    );

    let outcome = harness.service.cancel(&blocker).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Requested);
    harness.wait_for(&blocker, JobStatus::Cancelled).await;

    // Give the loop a chance to pick up anything left in the queue.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(harness.separator.executed(), vec!["block-first"]);
    assert!(harness.service.queue_position(&waiting).is_none());
}

#[tokio::test]
async fn test_cancelling_running_job_lets_next_one_start() {
    let harness = Harness::start().await;
    let running = upload(&harness, "block-running").await;
    let next = upload(&harness, "after-cancel").await;
    harness.wait_for(&running, JobStatus::Processing).await;

    harness.service.cancel(&running).await.unwrap();
    let cancelled = harness.wait_for(&running, JobStatus::Cancelled).await;
    assert!(cancelled.completed_at.is_some());
    assert!(!harness.ctx.layout.output_dir(&running).exists());

    harness.wait_for(&next, JobStatus::Completed).await;
    assert_eq!(
        harness.separator.executed(),
        vec!["block-running", "after-cancel"]
    );
}

#[tokio::test]
async fn test_terminal_job_cannot_be_cancelled() {
    let harness = Harness::start().await;
    let id = upload(&harness, "done").await;
    harness.wait_for(&id, JobStatus::Completed).await;

    let err = harness.service.cancel(&id).await.unwrap_err();
    assert!(err.to_string().contains("Cannot cancel job with status completed"));
    assert_eq!(harness.service.get(&id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_progress_events_never_move_backwards() {
    let separator = FakeSeparator::with_lines(&[
        "Selected model is a bag of 1 models.",
        " 10%|█         | 11.7/117.0",
        " 40%|████      | 46.8/117.0",
        " 20%|██        | 23.4/117.0",
        " 90%|█████████ | 105.3/117.0",
        "100%|██████████| 117.0/117.0",
    ]);
    let harness = Harness::start_with(separator).await;
    let mut events = harness.ctx.events.subscribe();

    let id = upload(&harness, "monotonic").await;
    let mut progress = Vec::new();
    let terminal = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if event.job_id() != id {
                continue;
            }
            if let JobEvent::Progress { progress: p, .. } = &event {
                progress.push(*p);
            }
            if event.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("job finished in time");

    assert!(matches!(terminal, JobEvent::Completed { .. }));
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert!(progress.iter().all(|p| *p <= 100));
}

#[tokio::test]
async fn test_failed_job_does_not_stop_the_pipeline() {
    let harness = Harness::start().await;
    let broken = upload(&harness, "fail-me").await;
    let healthy = upload(&harness, "healthy").await;

    let failed = harness.wait_for(&broken, JobStatus::Failed).await;
    assert!(failed.error.as_deref().unwrap_or_default().contains("exit status"));
    harness.wait_for(&healthy, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_run_without_artifacts_fails() {
    let harness = Harness::start().await;
    let id = upload(&harness, "noartifacts").await;

    let job = harness.wait_for(&id, JobStatus::Failed).await;
    let error = job.error.unwrap_or_default();
    assert!(error.contains("missing"), "{}", error);
    assert!(error.contains("vocals.mp3"), "{}", error);
}

#[tokio::test]
async fn test_long_video_is_rejected_at_submission() {
    let harness = Harness::start().await;
    let err = harness
        .service
        .submit_youtube(
            "https://www.youtube.com/watch?v=LongVideo00",
            ProcessingParams::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Sorry, songs are limited to 10 minutes"));
    assert!(harness.service.list_recent(10).is_empty());
}

#[tokio::test]
async fn test_long_playlist_entry_fails_when_run() {
    let harness = Harness::start().await;
    let admission = harness
        .service
        .submit_youtube(
            "https://www.youtube.com/playlist?list=PLmix",
            ProcessingParams::default(),
        )
        .await
        .unwrap();
    let YoutubeAdmission::Playlist { admissions, .. } = admission else {
        panic!("expected a playlist admission");
    };
    assert_eq!(admissions.len(), 2);

    let short = harness
        .wait_for(&admissions[0].job.id, JobStatus::Completed)
        .await;
    assert_eq!(short.duration_secs, Some(180));

    let long = harness
        .wait_for(&admissions[1].job.id, JobStatus::Failed)
        .await;
    assert!(
        long.error
            .unwrap_or_default()
            .contains("songs are limited to 10 minutes")
    );
    assert_eq!(harness.separator.executed(), vec!["shortvideo1"]);
}

#[tokio::test]
async fn test_restart_keeps_only_finished_jobs() {
    let harness = Harness::start().await;
    let done = upload(&harness, "survivor").await;
    let broken = upload(&harness, "fail-restart").await;
    harness.wait_for(&done, JobStatus::Completed).await;
    harness.wait_for(&broken, JobStatus::Failed).await;

    let running = upload(&harness, "block-restart").await;
    harness.wait_for(&running, JobStatus::Processing).await;
    let queued = upload(&harness, "queued-restart").await;

    let separator = harness.separator.clone();
    let dir = harness.stop().await;
    let reopened = Harness::open(dir, separator).await;
    let loaded = reopened.service.load_persisted().await.unwrap();

    assert_eq!(loaded, 2);
    let mut ids: Vec<String> = reopened
        .service
        .list_recent(10)
        .into_iter()
        .map(|j| j.id)
        .collect();
    ids.sort();
    let mut expected = vec![done.clone(), broken];
    expected.sort();
    assert_eq!(ids, expected);
    assert!(reopened.service.get(&running).is_err());
    assert!(reopened.service.get(&queued).is_err());

    // The completed result is still served from cache after the restart.
    let again = reopened
        .service
        .submit_upload("survivor.mp3", &mp3("survivor"), ProcessingParams::default())
        .await
        .unwrap();
    assert!(again.cached);
    assert_eq!(again.job.id, done);
}

async fn submit_video(harness: &Harness, video_id: &str) -> String {
    let admission = harness
        .service
        .submit_youtube(
            &format!("https://www.youtube.com/watch?v={}", video_id),
            ProcessingParams::default(),
        )
        .await
        .expect("video admitted");
    let YoutubeAdmission::Video(admission) = admission else {
        panic!("expected a single video");
    };
    admission.job.id
}

#[tokio::test]
async fn test_cancel_while_fetching_source() {
    let harness = Harness::start().await;
    let fetching = submit_video(&harness, "blockfetch0").await;
    let next = upload(&harness, "after-fetch").await;

    harness.wait_for_claim(&fetching).await;
    harness
        .wait_until(&fetching, |_| !harness.retriever.downloads().is_empty())
        .await;
    assert_eq!(harness.service.get(&fetching).unwrap().status, JobStatus::Queued);

    let outcome = harness.service.cancel(&fetching).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);

    harness.wait_for(&next, JobStatus::Completed).await;
    let cancelled = harness.service.get(&fetching).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert_eq!(cancelled.progress, 0);
    assert_eq!(harness.retriever.downloads(), vec!["blockfetch0"]);
    assert_eq!(harness.separator.executed(), vec!["after-fetch"]);
}

#[tokio::test]
async fn test_cancel_landing_after_fetch_still_wins() {
    let harness = Harness::start().await;
    let fetching = submit_video(&harness, "holdfetch00").await;
    let next = upload(&harness, "after-hold").await;
    let mut events = harness.ctx.events.subscribe();

    harness.wait_for_claim(&fetching).await;
    harness
        .wait_until(&fetching, |_| !harness.retriever.downloads().is_empty())
        .await;

    // The record turns cancelled while the claim's token stays live, as when
    // a cancel lands between the status change and the stop signal.
    harness
        .ctx
        .store
        .modify(&fetching, &mut |j| j.cancel())
        .unwrap();
    harness.retriever.release();

    harness.wait_for(&next, JobStatus::Completed).await;
    let cancelled = harness.service.get(&fetching).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert_eq!(harness.separator.executed(), vec!["after-hold"]);

    let mut saw_cancel = false;
    while let Ok(event) = events.try_recv() {
        if event.job_id() != fetching {
            continue;
        }
        assert!(
            !matches!(event, JobEvent::Failed { .. } | JobEvent::Completed { .. }),
            "{:?}",
            event
        );
        saw_cancel |= matches!(event, JobEvent::Cancelled { .. });
    }
    assert!(saw_cancel);
}
