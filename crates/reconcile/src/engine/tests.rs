use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use renec_core::{AttrValue, Entity, EntityKind, EntityRef, JobMode, RawRecord, Scope};

use super::*;
use crate::error::RecordRejected;
use crate::memory::MemoryStore;

fn setup() -> (Arc<MemoryStore>, ReconciliationEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = ReconciliationEngine::new(store.clone());
    (store, engine)
}

fn t(offset_secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z").unwrap().with_timezone(&Utc) + Duration::seconds(offset_secs)
}

fn ec0217() -> RawRecord {
    RawRecord::new(EntityKind::Standard, "EC0217")
        .with_attr("titulo", "Impartición de cursos de formación del capital humano de manera presencial grupal")
        .with_attr("sector", "Educación")
        .with_attr("duracion_horas", "40")
}

fn cert(key: &str) -> RawRecord {
    RawRecord::new(EntityKind::Certifier, key)
        .with_attr("razon_social", format!("Entidad {key}"))
        .with_attr("tipo", "ECE")
}

fn std_ref(key: &str) -> EntityRef {
    EntityRef::new(EntityKind::Standard, key)
}

fn cert_ref(key: &str) -> EntityRef {
    EntityRef::new(EntityKind::Certifier, key)
}

async fn fetch(store: &MemoryStore, entity: &EntityRef) -> Entity {
    store.get(entity).await.unwrap().expect("entity exists")
}

fn probe(at: DateTime<Utc>) -> RunContext {
    RunContext::new(JobMode::Probe, Scope::all(), at)
}

fn full(at: DateTime<Utc>) -> RunContext {
    RunContext::new(JobMode::Full, Scope::all(), at)
}

// ── Entity lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn first_observation_creates_with_equal_timestamps() {
    let (store, engine) = setup();
    let outcome = engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Created);

    let entity = fetch(&store, &std_ref("EC0217")).await;
    assert_eq!(entity.first_seen, entity.last_seen);
    assert!(entity.vigente);
    assert!(!entity.stale);
    assert_eq!(entity.attributes["duracion_horas"], AttrValue::Integer(40));
}

#[tokio::test]
async fn validity_flip_keeps_first_seen_and_advances_last_seen() {
    let (store, engine) = setup();
    engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap();

    let withdrawn = RawRecord::new(EntityKind::Standard, "EC0217").with_attr("vigente", false);
    let outcome = engine.reconcile_at(&withdrawn, &probe(t(86_400)), t(86_400)).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Updated { changed_fields: vec![], validity_changed: true }
    );

    let entity = fetch(&store, &std_ref("EC0217")).await;
    assert!(!entity.vigente);
    assert_eq!(entity.first_seen, t(0));
    assert_eq!(entity.last_seen, t(86_400));
    assert!(entity.text("titulo").is_some(), "unasserted fields are kept");
}

#[tokio::test]
async fn replay_only_moves_last_seen_forward() {
    let (store, engine) = setup();
    engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap();
    let before = fetch(&store, &std_ref("EC0217")).await;

    let outcome = engine.reconcile_at(&ec0217(), &probe(t(60)), t(60)).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Unchanged);
    let after = fetch(&store, &std_ref("EC0217")).await;
    assert_eq!(after.attributes, before.attributes);
    assert_eq!(after.last_seen, t(60));

    // A late redelivery observed "earlier" never rewinds the clock.
    engine.reconcile_at(&ec0217(), &probe(t(30)), t(30)).await.unwrap();
    assert_eq!(fetch(&store, &std_ref("EC0217")).await.last_seen, t(60));
}

#[tokio::test]
async fn attribute_diff_lists_changed_fields() {
    let (_, engine) = setup();
    engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap();

    let revised = ec0217().with_attr("duracion_horas", 48).with_attr("comite", "");
    let outcome = engine.reconcile_at(&revised, &probe(t(10)), t(10)).await.unwrap();
    assert_eq!(
        outcome,
        RecordOutcome::Updated { changed_fields: vec!["duracion_horas".into()], validity_changed: false }
    );
}

#[tokio::test]
async fn new_entity_missing_required_field_is_rejected() {
    let (store, engine) = setup();
    let record = RawRecord::new(EntityKind::Standard, "EC0999").with_attr("sector", "Turismo");
    let err = engine.reconcile_at(&record, &probe(t(0)), t(0)).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Rejected(RecordRejected::MissingRequired { field: "titulo", .. })
    ));
    assert_eq!(store.entity_count(), 0);
}

#[tokio::test]
async fn partial_update_satisfies_required_fields_from_existing_state() {
    let (_, engine) = setup();
    engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap();
    let partial = RawRecord::new(EntityKind::Standard, "EC0217").with_attr("nivel", "3");
    assert!(engine.reconcile_at(&partial, &probe(t(5)), t(5)).await.is_ok());

    let erase_title = RawRecord::new(EntityKind::Standard, "EC0217").with_attr("titulo", serde_json::Value::Null);
    assert!(engine.reconcile_at(&erase_title, &probe(t(6)), t(6)).await.is_err());
}

#[tokio::test]
async fn freshness_check_never_creates() {
    let (store, engine) = setup();
    let ctx = RunContext::new(JobMode::FreshnessCheck, Scope::all(), t(0));
    let outcome = engine.reconcile_at(&ec0217(), &ctx, t(0)).await.unwrap();
    assert_eq!(outcome, RecordOutcome::Skipped { reason: SkipReason::UnknownKey });
    assert_eq!(store.entity_count(), 0);

    engine.reconcile_at(&ec0217(), &probe(t(1)), t(1)).await.unwrap();
    let withdrawn = RawRecord::new(EntityKind::Standard, "EC0217").with_attr("vigente", "NO");
    let outcome = engine.reconcile_at(&withdrawn, &ctx, t(2)).await.unwrap();
    assert!(matches!(outcome, RecordOutcome::Updated { validity_changed: true, .. }));
}

#[tokio::test]
async fn records_outside_scope_are_skipped() {
    let (store, engine) = setup();
    let ctx = RunContext::new(
        JobMode::Probe,
        Scope::kinds([EntityKind::Standard]).with_keys(["EC0301"]),
        t(0),
    );
    assert_eq!(
        engine.reconcile_at(&ec0217(), &ctx, t(0)).await.unwrap(),
        RecordOutcome::Skipped { reason: SkipReason::OutOfScope }
    );
    assert_eq!(
        engine.reconcile_at(&cert("CERT-001"), &ctx, t(0)).await.unwrap(),
        RecordOutcome::Skipped { reason: SkipReason::OutOfScope }
    );
    assert_eq!(store.entity_count(), 0);
}

// ── Accreditation edges ──────────────────────────────────────────────

async fn seed_edges(engine: &ReconciliationEngine) {
    let run = full(t(0));
    engine
        .reconcile_at(&ec0217().with_accreditations(["CERT-001", "CERT-002"]), &run, t(1))
        .await
        .unwrap();
    engine
        .reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(2))
        .await
        .unwrap();
    engine
        .reconcile_at(&cert("CERT-002").with_accreditations(["EC0217"]), &run, t(3))
        .await
        .unwrap();
    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.edges_asserted, 2);
    assert_eq!(summary.edges_retired, 0);
}

fn current_certifiers(edges: &[renec_core::AccreditationEdge]) -> Vec<String> {
    let mut keys: Vec<String> = edges.iter().filter(|e| e.current).map(|e| e.certifier_key.clone()).collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn probe_without_accreditation_list_removes_no_edges() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = probe(t(100));
    engine.reconcile_at(&cert("CERT-001"), &run, t(101)).await.unwrap();
    engine
        .reconcile_at(&ec0217().with_accreditations(Vec::<String>::new()), &run, t(102))
        .await
        .unwrap();
    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary, FullRunSummary::default());

    let edges = store.edges_for(&std_ref("EC0217")).await.unwrap();
    assert_eq!(current_certifiers(&edges), vec!["CERT-001", "CERT-002"]);
}

#[tokio::test]
async fn full_run_retires_edges_not_reasserted() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = full(t(1_000));
    engine
        .reconcile_at(&ec0217().with_accreditations(["CERT-001"]), &run, t(1_001))
        .await
        .unwrap();
    engine
        .reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(1_002))
        .await
        .unwrap();
    engine
        .reconcile_at(&cert("CERT-002").with_accreditations(Vec::<String>::new()), &run, t(1_003))
        .await
        .unwrap();
    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.edges_retired, 1);
    assert!(summary.absence_inferred);

    let edges = store.edges_for(&std_ref("EC0217")).await.unwrap();
    assert_eq!(edges.len(), 2, "retired edges are kept");
    assert_eq!(current_certifiers(&edges), vec!["CERT-001"]);

    // Both endpoints of the retired edge still exist.
    assert!(store.get(&cert_ref("CERT-002")).await.unwrap().is_some());
    assert!(store.get(&std_ref("EC0217")).await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_record_protects_its_edges() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = full(t(1_000));
    engine
        .reconcile_at(&ec0217().with_accreditations(["CERT-001"]), &run, t(1_001))
        .await
        .unwrap();
    let broken = cert("CERT-002").with_attr("tipo", "escuela").with_accreditations(["EC0217"]);
    assert!(engine.reconcile_at(&broken, &run, t(1_002)).await.is_err());
    engine
        .reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(1_003))
        .await
        .unwrap();

    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.edges_retired, 0);
    let edges = store.edges_for(&std_ref("EC0217")).await.unwrap();
    assert_eq!(current_certifiers(&edges), vec!["CERT-001", "CERT-002"]);
}

#[tokio::test]
async fn keyed_full_run_asserts_but_never_retires() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = RunContext::new(JobMode::Full, Scope::all().with_keys(["EC0217"]), t(1_000));
    engine
        .reconcile_at(&ec0217().with_accreditations(["CERT-003"]), &run, t(1_001))
        .await
        .unwrap();
    let summary = engine.finish_full_run(&run).await.unwrap();
    assert!(!summary.absence_inferred);
    assert_eq!(summary.edges_retired, 0);

    let edges = store.edges_for(&std_ref("EC0217")).await.unwrap();
    assert_eq!(current_certifiers(&edges), vec!["CERT-001", "CERT-002", "CERT-003"]);
}

#[tokio::test]
async fn unseen_entities_become_stale_until_observed_again() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = full(t(1_000));
    engine.reconcile_at(&ec0217().with_accreditations(["CERT-001", "CERT-002"]), &run, t(1_001)).await.unwrap();
    engine.reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(1_002)).await.unwrap();
    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.entities_marked_stale, 1);
    assert_eq!(summary.edges_retired, 0, "CERT-002 edge still asserted by the standard page");

    let stale = fetch(&store, &cert_ref("CERT-002")).await;
    assert!(stale.stale);

    engine.reconcile_at(&cert("CERT-002"), &probe(t(2_000)), t(2_000)).await.unwrap();
    assert!(!fetch(&store, &cert_ref("CERT-002")).await.stale);
}

#[tokio::test]
async fn rejected_record_is_not_marked_stale() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = full(t(1_000));
    engine.reconcile_at(&ec0217().with_accreditations(["CERT-001", "CERT-002"]), &run, t(1_001)).await.unwrap();
    engine.reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(1_002)).await.unwrap();
    let broken = cert("CERT-002").with_attr("tipo", "escuela");
    assert!(engine.reconcile_at(&broken, &run, t(1_003)).await.is_err());

    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.entities_marked_stale, 0);
    assert!(!fetch(&store, &cert_ref("CERT-002")).await.stale);
}

#[tokio::test]
async fn undecodable_record_shields_its_entity() {
    let (store, engine) = setup();
    seed_edges(&engine).await;

    let run = full(t(1_000));
    engine.reconcile_at(&ec0217().with_accreditations(["CERT-001"]), &run, t(1_001)).await.unwrap();
    engine.reconcile_at(&cert("CERT-001").with_accreditations(["EC0217"]), &run, t(1_002)).await.unwrap();
    engine.reject_undecodable(Some(&cert_ref("CERT-002")), "expected a string", &run);
    engine.reject_undecodable(None, "no key", &run);

    let summary = engine.finish_full_run(&run).await.unwrap();
    assert_eq!(summary.entities_marked_stale, 0);
    assert_eq!(summary.edges_retired, 0);
    let edges = store.edges_for(&std_ref("EC0217")).await.unwrap();
    assert_eq!(current_certifiers(&edges), vec!["CERT-001", "CERT-002"]);
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_key_lose_no_update() {
    let (store, engine) = setup();
    let engine = Arc::new(engine);
    let fields = [
        ("version", serde_json::json!("2")),
        ("sector", serde_json::json!("Educación")),
        ("comite", serde_json::json!("CONOCER")),
        ("descripcion", serde_json::json!("Instructores")),
        ("nivel", serde_json::json!("3")),
        ("duracion_horas", serde_json::json!("40")),
        ("fecha_publicacion", serde_json::json!("2012-09-25")),
        ("fecha_vigencia", serde_json::json!("01/01/2030")),
        ("competencias", serde_json::json!("Preparar; Conducir; Evaluar")),
    ];

    let mut handles = Vec::new();
    for (i, (field, value)) in fields.iter().cloned().enumerate() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let record = RawRecord::new(EntityKind::Standard, "EC0217")
                .with_attr("titulo", "Impartición de cursos")
                .with_attr(field, value);
            engine.reconcile_at(&record, &probe(t(0)), t(i as i64)).await.unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == RecordOutcome::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1, "first_seen is set exactly once");

    let entity = fetch(&store, &std_ref("EC0217")).await;
    for (field, _) in fields {
        assert!(entity.attr(field).is_some(), "lost update to {field}");
    }
    assert_eq!(entity.last_seen, t(8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_reconcile_in_parallel() {
    let (store, engine) = setup();
    let engine = Arc::new(engine);
    let handles: Vec<_> = (0..32)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let record = RawRecord::new(EntityKind::Center, format!("CE{i:04}")).with_attr("nombre", "Centro");
                engine.reconcile_at(&record, &probe(t(0)), t(0)).await
            })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap(), RecordOutcome::Created);
    }
    assert_eq!(store.entity_count(), 32);
}

#[tokio::test]
async fn store_outage_is_job_fatal_not_a_rejection() {
    let (store, engine) = setup();
    store.set_available(false);
    let err = engine.reconcile_at(&ec0217(), &probe(t(0)), t(0)).await.unwrap_err();
    assert!(err.is_job_fatal());
}
