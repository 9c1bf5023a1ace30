// Capacity is enforced by the store's atomic conditional increment.
// These tests hammer it from many tasks and assert the cohort never
// overshoots, no matter how the schedulers interleave.

use std::sync::Arc;

use vcf_roundup::{
    CohortManager, CohortStatus, MemoryStore, RoundupError, SubmissionStep, SubmissionWorkflow,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_increments_never_overshoot_capacity() {
    let manager = Arc::new(CohortManager::new(Arc::new(MemoryStore::new())));
    let cohort = manager.get_or_create_active_cohort(10).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..25 {
        let manager = manager.clone();
        let cohort_id = cohort.id.clone();
        handles.push(tokio::spawn(async move {
            manager.increment_membership(&cohort_id).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(RoundupError::CapacityConflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 10);
    assert_eq!(conflicts, 15);

    let cohort = manager.get(&cohort.id).await.unwrap();
    assert_eq!(cohort.member_count, 10);
    assert_eq!(cohort.status, CohortStatus::Full);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_confirms_admit_exactly_capacity_participants() {
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(CohortManager::new(store.clone()));
    let workflow = Arc::new(SubmissionWorkflow::new(manager.clone()));

    let cohort = manager.get_or_create_active_cohort(5).await.unwrap();

    // 12 users race to confirm into a capacity-5 cohort.
    for user_id in 1..=12 {
        workflow.start(user_id).await.unwrap();
        workflow.select_tier(user_id, 5).await.unwrap();
        workflow
            .submit_details(
                user_id,
                &format!("Name: User {user_id}\nNumber: +25678700{user_id:04}"),
            )
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for user_id in 1..=12 {
        let workflow = workflow.clone();
        handles.push(tokio::spawn(
            async move { workflow.confirm(user_id).await },
        ));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(SubmissionStep::Confirmed { .. }) => admitted += 1,
            Ok(other) => panic!("unexpected step: {other:?}"),
            Err(RoundupError::CapacityConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 5);

    // Exactly the admitted users have participant rows.
    let mut participants = 0;
    for user_id in 1..=12 {
        if workflow.my_submission(user_id).await.unwrap().is_some() {
            participants += 1;
        }
    }
    assert_eq!(participants, 5);

    let cohort = manager.get(&cohort.id).await.unwrap();
    assert_eq!(cohort.member_count, 5);
    assert_eq!(cohort.status, CohortStatus::Full);
}
