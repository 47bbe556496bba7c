use std::collections::HashSet;

use chrono::{TimeDelta, Utc};
use langscout_core::models::{ResponseState, Tier};
use langscout_core::traits::{BatchStore, DomainStore};
use langscout_core::work_queue::WorkQueue;
use langscout_db::{BatchRepository, DomainRepository};
use tokio::task::JoinSet;

use crate::integration::common::setup_test_db;

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|h| h.to_string()).collect()
}

#[tokio::test]
async fn upsert_is_idempotent_and_keeps_submission_order() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let first = repo
        .upsert_domains(&hosts(&["b.example", "A.example/"]))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].host, "b.example");
    assert_eq!(first[1].host, "a.example");
    assert_eq!(first[0].response_state, ResponseState::Unvisited);

    let second = repo
        .upsert_domains(&hosts(&["a.example", "c.example", "b.example", "a.example"]))
        .await
        .unwrap();
    let names: Vec<&str> = second.iter().map(|d| d.host.as_str()).collect();
    assert_eq!(names, vec!["a.example", "c.example", "b.example"]);
    assert_eq!(second[0].id, first[1].id);
    assert_eq!(second[2].id, first[0].id);
}

#[tokio::test]
async fn upsert_rejects_empty_host() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let result = repo.upsert_domains(&hosts(&["ok.example", "  "])).await;
    assert!(result.is_err());
    assert!(repo.list_domains(10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn save_domain_normalizes_languages() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let mut domain = repo
        .upsert_domains(&hosts(&["lang.example"]))
        .await
        .unwrap()
        .remove(0);
    domain.response_state = ResponseState::Ok;
    domain.content_language = "EN".into();
    domain.tag_languages = vec!["de-DE".into(), "en".into(), "x-default".into()];
    repo.save_domain(&domain).await.unwrap();

    let stored = repo.get_domain(domain.id).await.unwrap().unwrap();
    assert_eq!(stored.response_state, ResponseState::Ok);
    assert_eq!(stored.content_language, "en");
    assert_eq!(stored.tag_languages, vec!["de", "en"]);
    assert!(stored.updated_at >= domain.updated_at);
}

#[tokio::test]
async fn save_unknown_domain_fails() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let mut domain = repo
        .upsert_domains(&hosts(&["gone.example"]))
        .await
        .unwrap()
        .remove(0);
    assert!(repo.delete_domain(domain.id).await.unwrap());
    assert!(!repo.delete_domain(domain.id).await.unwrap());

    domain.response_state = ResponseState::Ok;
    assert!(repo.save_domain(&domain).await.is_err());
}

#[tokio::test]
async fn get_domains_follows_requested_order() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let domains = repo
        .upsert_domains(&hosts(&["one.example", "two.example", "three.example"]))
        .await
        .unwrap();
    let ids = vec![domains[2].id, 9_999, domains[0].id];

    let fetched = repo.get_domains(&ids).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].host, "three.example");
    assert_eq!(fetched[1].host, "one.example");

    let page = repo.list_domains(2, 1).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, domains[1].id);
}

#[tokio::test]
async fn claims_follow_tier_priority() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool.clone());
    let batches = BatchRepository::new(pool);
    let now = Utc::now();

    let domains = repo
        .upsert_domains(&hosts(&["list.example", "failed.example", "user.example"]))
        .await
        .unwrap();
    let (list, failed, user) = (&domains[0], &domains[1], &domains[2]);

    let mut failed_domain = failed.clone();
    failed_domain.response_state = ResponseState::Error;
    failed_domain.error_count = 1;
    repo.save_domain(&failed_domain).await.unwrap();

    batches
        .create_batch_record("code-1", &[user.id], None, now + TimeDelta::hours(72))
        .await
        .unwrap();

    for d in &domains {
        repo.enqueue(d.id, now - TimeDelta::seconds(1)).await.unwrap();
    }
    assert_eq!(repo.pending_count().await.unwrap(), 3);

    let first = repo.claim_next(true).await.unwrap().unwrap();
    assert_eq!(first.tier, Tier::User);
    assert_eq!(first.domain.id, user.id);
    assert_eq!(first.batch_codes, vec!["code-1".to_string()]);

    let second = repo.claim_next(true).await.unwrap().unwrap();
    assert_eq!(second.tier, Tier::ErrorRetry);
    assert_eq!(second.domain.id, failed.id);
    assert_eq!(second.domain.error_count, 1);

    let third = repo.claim_next(true).await.unwrap().unwrap();
    assert_eq!(third.tier, Tier::ListScan);
    assert_eq!(third.domain.id, list.id);
    assert!(third.batch_codes.is_empty());

    assert!(repo.claim_next(true).await.unwrap().is_none());
    assert_eq!(repo.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn error_tier_respects_due_time_and_permission() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);
    let now = Utc::now();

    let domains = repo
        .upsert_domains(&hosts(&["later.example", "now.example"]))
        .await
        .unwrap();
    for d in &domains {
        let mut failed = d.clone();
        failed.response_state = ResponseState::Error;
        repo.save_domain(&failed).await.unwrap();
    }
    repo.enqueue(domains[0].id, now + TimeDelta::hours(72))
        .await
        .unwrap();
    repo.enqueue(domains[1].id, now - TimeDelta::minutes(1))
        .await
        .unwrap();

    assert!(repo.claim_next(false).await.unwrap().is_none());

    let claimed = repo.claim_error_task().await.unwrap().unwrap();
    assert_eq!(claimed.domain.id, domains[1].id);
    assert!(repo.claim_error_task().await.unwrap().is_none());
    assert_eq!(repo.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn enqueue_keeps_existing_due_time_and_requeue_moves_it() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);
    let now = Utc::now();

    let domain = repo
        .upsert_domains(&hosts(&["due.example"]))
        .await
        .unwrap()
        .remove(0);
    let mut failed = domain.clone();
    failed.response_state = ResponseState::Error;
    repo.save_domain(&failed).await.unwrap();

    repo.enqueue(domain.id, now + TimeDelta::hours(1))
        .await
        .unwrap();
    repo.enqueue(domain.id, now - TimeDelta::hours(1))
        .await
        .unwrap();
    assert!(repo.claim_error_task().await.unwrap().is_none());

    repo.requeue(domain.id, now - TimeDelta::hours(1))
        .await
        .unwrap();
    assert!(repo.claim_error_task().await.unwrap().is_some());

    repo.requeue(domain.id, now).await.unwrap();
    repo.dequeue(domain.id).await.unwrap();
    assert_eq!(repo.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_unknown_domain_fails() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    assert!(repo.enqueue(12_345, Utc::now()).await.is_err());
}

#[tokio::test]
async fn delete_domain_cascades_queue_entry() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);

    let domain = repo
        .upsert_domains(&hosts(&["cascade.example"]))
        .await
        .unwrap()
        .remove(0);
    repo.enqueue(domain.id, Utc::now()).await.unwrap();
    assert_eq!(repo.pending_count().await.unwrap(), 1);

    assert!(repo.delete_domain(domain.id).await.unwrap());
    assert_eq!(repo.pending_count().await.unwrap(), 0);
    assert!(repo.get_domain(domain.id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_domain() {
    let (pool, _container) = setup_test_db().await;
    let repo = DomainRepository::new(pool);
    let past = Utc::now() - TimeDelta::seconds(1);

    let names: Vec<String> = (0..40).map(|i| format!("host-{i}.example")).collect();
    let domains = repo.upsert_domains(&names).await.unwrap();
    for d in &domains {
        repo.enqueue(d.id, past).await.unwrap();
    }

    let mut claimants = JoinSet::new();
    for _ in 0..8 {
        let repo = repo.clone();
        claimants.spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = repo.claim_next(true).await.unwrap() {
                claimed.push(task.domain.id);
            }
            claimed
        });
    }

    let mut all = Vec::new();
    while let Some(result) = claimants.join_next().await {
        all.extend(result.unwrap());
    }

    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
}
