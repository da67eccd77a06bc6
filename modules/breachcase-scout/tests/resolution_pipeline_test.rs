//! End-to-end runs of the resolution pipeline against in-memory mocks.
//!
//! Each test wires a `Pipeline` over a `MockIncidentStore`, a
//! `ScriptedCompletion` and a checkpoint file in a temp dir, then asserts on
//! run stats, store contents and the prompts the classifier saw.

use std::path::Path;
use std::sync::Arc;

use breachcase_common::{
    AttackVector, Classification, IncidentId, IncidentTag, ResolutionPolicy, TagKind,
};
use breachcase_scout::checkpoint::CheckpointStore;
use breachcase_scout::gateway::{ClassifierGateway, RetryPolicy};
use breachcase_scout::index::CandidateIndex;
use breachcase_scout::pipeline::{Pipeline, PipelineOptions};
use breachcase_scout::resolution::ResolutionEngine;
use breachcase_scout::testing::{
    article, detail, extraction_reply, record, resolution_reply, MockArticleSource,
    MockIncidentStore, Scripted, ScriptedCompletion, SourceLink,
};
use breachcase_scout::traits::ArticleSource;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn no_screen() -> PipelineOptions {
    PipelineOptions {
        relevance_screen: false,
        ..PipelineOptions::default()
    }
}

fn build(
    store: &Arc<MockIncidentStore>,
    script: &Arc<ScriptedCompletion>,
    checkpoint_path: &Path,
) -> Pipeline {
    let checkpoint = CheckpointStore::open(checkpoint_path).unwrap();
    let gateway = Arc::new(ClassifierGateway::new(
        script.clone(),
        RetryPolicy::immediate(3),
    ));
    Pipeline::new(
        store.clone(),
        gateway,
        checkpoint,
        ResolutionPolicy::default(),
        no_screen(),
    )
}

fn acme_store() -> MockIncidentStore {
    let mut a1 = detail("A1", "Acme Corp");
    a1.impact_magnitude = Some(100_000);
    a1.method = Some(AttackVector::Ransomware);
    MockIncidentStore::new().with_incident(a1)
}

fn checkpoint_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rerunning_the_same_article_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("processed_ids.txt");
    let store = Arc::new(MockIncidentStore::new());
    let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
        "Acme Corp",
        Some(5_000),
        Some("ransomware"),
    ))]));
    let articles = vec![article("https://news.test/acme", "Acme Corp breached")];

    let first = build(&store, &script, &path)
        .run(articles.clone())
        .await
        .unwrap();
    assert_eq!(first.incidents_created, 1);

    let second = build(&store, &script, &path).run(articles).await.unwrap();
    assert_eq!(second.already_processed, 1);
    assert_eq!(second.articles_new, 0);
    assert_eq!(second.incidents_created, 0);

    assert_eq!(checkpoint_lines(&path), vec!["https://news.test/acme"]);
    assert_eq!(store.incidents().len(), 1);
    assert_eq!(script.calls(), 1);
}

#[tokio::test]
async fn unmatched_organization_is_new_without_resolution_call() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(acme_store());
    let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
        "Globex Inc",
        None,
        None,
    ))]));
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let stats = pipeline
        .run(vec![article("https://news.test/globex", "Globex hit")])
        .await
        .unwrap();

    assert_eq!(stats.incidents_created, 1);
    // Extraction only.
    assert_eq!(script.calls(), 1);
    assert_eq!(store.details_calls(), 0);
}

#[tokio::test]
async fn incident_created_earlier_in_the_run_is_a_candidate_for_later_articles() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(acme_store().with_id_sequence(["A2"]));
    let script = Arc::new(ScriptedCompletion::new([
        Scripted::Reply(extraction_reply("Acme Corp", Some(2_000_000), Some("phishing"))),
        Scripted::Reply(resolution_reply("NEW_BREACH", None, 0.9)),
        Scripted::Reply(extraction_reply("Acme Corp", Some(2_000_000), Some("phishing"))),
        Scripted::Reply(resolution_reply("DUPLICATE_SOURCE", Some("A2"), 0.9)),
    ]));
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let stats = pipeline
        .run(vec![
            article("https://news.test/acme-phish", "Acme Corp phished again"),
            article("https://other.test/acme", "Acme Corp confirms phishing"),
        ])
        .await
        .unwrap();

    assert_eq!(stats.incidents_created, 1);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(store.stub_page_calls(), 1);

    let requests = script.requests();
    assert_eq!(requests.len(), 4);
    assert!(!requests[1].user_text().contains("ID: A2"));
    assert!(requests[3].user_text().contains("ID: A1"));
    assert!(requests[3].user_text().contains("ID: A2"));
}

#[tokio::test]
async fn classifier_outage_during_resolution_falls_back_to_new() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(acme_store());
    let script = Arc::new(
        ScriptedCompletion::new([Scripted::Reply(extraction_reply("Acme Corp", None, None))])
            .with_fallback(Scripted::Transient("connection reset".into())),
    );
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let stats = pipeline
        .run(vec![article("https://news.test/acme-2", "Acme Corp again")])
        .await
        .unwrap();

    assert_eq!(stats.incidents_created, 1);
    assert_eq!(stats.classifier_fallbacks, 1);
    // One extraction plus three resolution attempts.
    assert_eq!(script.calls(), 4);
    assert_eq!(store.incidents().len(), 2);
}

#[tokio::test]
async fn classifier_outage_decision_is_new_at_half_confidence() {
    let store = Arc::new(acme_store());
    let script = Arc::new(ScriptedCompletion::repeating(Scripted::RateLimited));
    let gateway = Arc::new(ClassifierGateway::new(
        script.clone(),
        RetryPolicy::immediate(2),
    ));
    let engine = ResolutionEngine::new(gateway, store.clone(), ResolutionPolicy::default());
    let index = CandidateIndex::load(store.as_ref(), 100).await.unwrap();

    let decision = engine
        .resolve(
            &record("Acme Corp"),
            &article("https://news.test/acme-3", "Acme Corp"),
            &index,
        )
        .await
        .unwrap();

    assert_eq!(decision.classification(), Classification::New);
    assert_eq!(decision.confidence(), 0.5);
    assert!(decision.reasoning().contains("classifier failure"));
    assert_eq!(script.calls(), 2);
}

#[tokio::test]
async fn weak_update_verdict_creates_a_new_incident() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(acme_store());
    let script = Arc::new(ScriptedCompletion::new([
        Scripted::Reply(extraction_reply("Acme Corp", None, None)),
        Scripted::Reply(resolution_reply("GENUINE_UPDATE", Some("A1"), 0.65)),
    ]));
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let stats = pipeline
        .run(vec![article("https://news.test/acme-maybe", "Acme Corp follow-up?")])
        .await
        .unwrap();

    assert_eq!(stats.incidents_created, 1);
    assert_eq!(stats.updates_created, 0);
    assert!(store.updates().is_empty());
}

#[tokio::test]
async fn confident_update_is_recorded_against_the_existing_incident() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(acme_store());
    let script = Arc::new(ScriptedCompletion::new([
        Scripted::Reply(extraction_reply("Acme Corporation", Some(100_000), Some("ransomware"))),
        Scripted::Reply(resolution_reply("GENUINE_UPDATE", Some("A1"), 0.92)),
    ]));
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let stats = pipeline
        .run(vec![article("https://news.test/acme-fine", "Acme fined over breach")])
        .await
        .unwrap();

    assert_eq!(stats.updates_created, 1);
    assert_eq!(stats.incidents_created, 0);

    let updates = store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].incident_id, IncidentId::from("A1"));
    assert_eq!(updates[0].source_url, "https://news.test/acme-fine");
    assert_eq!(updates[0].confidence, 0.92);
    assert_eq!(updates[0].source_title, "Acme fined over breach");

    assert_eq!(
        store.sources(),
        vec![SourceLink {
            incident_id: IncidentId::from("A1"),
            url: "https://news.test/acme-fine".into(),
        }]
    );
    assert_eq!(store.incidents()[0].revisions, 1);
}

#[tokio::test]
async fn new_incident_is_tagged_and_linked_to_its_article() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockIncidentStore::new().with_id_sequence(["N1"]));
    let script = Arc::new(ScriptedCompletion::new([Scripted::Reply(extraction_reply(
        "Initech",
        Some(10),
        Some("ransomware"),
    ))]));
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    pipeline
        .run(vec![article("https://news.test/initech", "Initech encrypted")])
        .await
        .unwrap();

    let incidents = store.incidents();
    assert_eq!(incidents.len(), 1);
    assert_eq!(
        incidents[0].tags,
        vec![IncidentTag {
            kind: TagKind::AttackVector,
            value: "ransomware".into(),
        }]
    );
    assert_eq!(
        store.sources(),
        vec![SourceLink {
            incident_id: IncidentId::from("N1"),
            url: "https://news.test/initech".into(),
        }]
    );
}

#[tokio::test]
async fn duplicate_source_writes_nothing_but_is_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cp.txt");
    let store = Arc::new(acme_store());
    let script = Arc::new(ScriptedCompletion::new([
        Scripted::Reply(extraction_reply("Acme Corp", Some(100_000), Some("ransomware"))),
        Scripted::Reply(resolution_reply("DUPLICATE_SOURCE", Some("A1"), 0.88)),
    ]));
    let mut pipeline = build(&store, &script, &path);

    let stats = pipeline
        .run(vec![article("https://mirror.test/acme", "Acme Corp ransomware")])
        .await
        .unwrap();

    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(store.incidents().len(), 1);
    assert!(store.updates().is_empty());
    assert!(store.sources().is_empty());
    assert_eq!(store.incidents()[0].revisions, 0);
    assert_eq!(checkpoint_lines(&path), vec!["https://mirror.test/acme"]);
}

#[tokio::test]
async fn articles_from_a_source_flow_through_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockIncidentStore::new());
    let script = Arc::new(ScriptedCompletion::new([
        Scripted::Reply(extraction_reply("Initech", Some(10), Some("insider"))),
        Scripted::Reply(extraction_reply("Umbrella Corp", None, Some("malware"))),
    ]));
    let source = MockArticleSource::new(vec![
        article("https://news.test/initech", "Initech insider leak"),
        article("https://news.test/umbrella", "Umbrella Corp malware"),
    ]);
    let mut pipeline = build(&store, &script, &dir.path().join("cp.txt"));

    let articles = source.fetch_articles().await.unwrap();
    let stats = pipeline.run(articles).await.unwrap();

    assert_eq!(stats.articles_in, 2);
    assert_eq!(stats.incidents_created, 2);
    let names: Vec<String> = store
        .incidents()
        .into_iter()
        .map(|i| i.detail.organization_name)
        .collect();
    assert_eq!(names, vec!["Initech", "Umbrella Corp"]);
    assert_eq!(pipeline.checkpoint().len(), 2);
}
