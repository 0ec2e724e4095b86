//! Background regeneration jobs driven through the engine.

mod common;

use std::collections::BTreeSet;

use serde_json::json;

use common::{offer, Reply, TestHarness, FUNNEL};
use funnelgen::{BatchMode, JobStatus, SectionId};

#[tokio::test]
async fn test_parallel_job_records_partial_failure() {
    let harness = TestHarness::new();
    harness.generator.on(
        "Write the Bio section",
        Reply::json(json!({"shortBio": "Agency coach", "longBio": "Ten years of agencies"})),
    );
    harness.generator.on(
        "Write the SMS Sequence section",
        Reply::json(json!({"messages": ["Your call is tomorrow"]})),
    );
    // Nothing scripted for the YouTube show, so it is rejected.
    let mut events = harness.engine.subscribe_job_progress();

    let handle = harness
        .engine
        .start_regeneration(
            FUNNEL,
            &[SectionId::Bio, SectionId::Sms, SectionId::YoutubeShow],
            BatchMode::Parallel,
            TestHarness::intake(),
        )
        .unwrap();
    let job_id = handle.job_id.clone();
    let job = handle.wait().await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress_percentage, 100);
    let completed: BTreeSet<_> = job.sections_completed.iter().copied().collect();
    assert_eq!(completed, BTreeSet::from([SectionId::Bio, SectionId::Sms]));
    assert_eq!(job.sections_failed, vec![SectionId::YoutubeShow]);
    assert_eq!(
        job.error.as_deref(),
        Some("1 of 3 sections failed: youtubeShow")
    );
    assert!(job.completed_at.is_some());

    // Successful sections were persisted even though the job failed.
    assert!(harness.section(SectionId::Bio).is_some());
    assert!(harness.section(SectionId::Sms).is_some());
    assert!(harness.section(SectionId::YoutubeShow).is_none());

    let mut statuses = Vec::new();
    let mut finished = 0;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, job_id);
        if event.section.is_some() {
            finished += 1;
        }
        statuses.push(event.status);
    }
    assert_eq!(finished, 3);
    assert_eq!(statuses.first(), Some(&JobStatus::Queued));
    assert_eq!(statuses.last(), Some(&JobStatus::Failed));
}

#[tokio::test]
async fn test_sequential_job_feeds_later_sections() {
    let harness = TestHarness::new();
    harness
        .generator
        .on("Write the Offer section", Reply::json(offer("Bolt", "$1,497")));
    harness.generator.on(
        "Write the SMS Sequence section",
        Reply::json(json!({"messages": ["Bolt doors open"]})),
    );

    let handle = harness
        .engine
        .start_regeneration(
            FUNNEL,
            &[SectionId::Offer, SectionId::Sms],
            BatchMode::Sequential,
            TestHarness::intake(),
        )
        .unwrap();
    let job_id = handle.job_id.clone();
    let job = handle.wait().await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.sections_completed, vec![SectionId::Offer, SectionId::Sms]);
    assert!(job.sections_failed.is_empty());
    assert!(job.error.is_none());

    // The SMS prompt saw the offer generated earlier in the same job.
    let prompts = harness.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("\"offerName\": \"Bolt\""));

    let stored = harness.engine.job(&job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress_percentage, 100);

    let jobs = harness.engine.jobs_for_funnel(FUNNEL, None).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, job_id);
    assert!(harness.engine.jobs_for_funnel("other", None).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_none() {
    let harness = TestHarness::new();
    assert!(harness.engine.job("missing").unwrap().is_none());
}
