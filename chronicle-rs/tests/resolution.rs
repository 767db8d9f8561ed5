//! Integration tests for the resolution engine over the in-memory graph.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use chronicle_rs::driver::memory::InMemoryGraph;
use chronicle_rs::resolution::{
    AdjudicationRequest, DuplicateStatement, EntityMerge, ResolutionEngine,
};
use chronicle_rs::types::ResolutionConfig;

use common::{
    contradiction_judgment, conversation_episode, duplicate_judgment, engine, entity,
    entity_reply, statement_reply, triple, write_episode, ScriptedAdjudicator, USER,
};

// ---------------------------------------------------------------------------
// Entity pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_near_duplicate_entity_is_merged() {
    let graph = Arc::new(InMemoryGraph::new());
    let lives_in = entity("lives in", "Predicate");
    let paris = entity("Paris", "Location");
    let likes = entity("likes", "Predicate");
    let tea = entity("tea", "Food");

    let earlier = conversation_episode("chat", "Alice likes tea");
    let alice = entity("Alice", "Person");
    write_episode(&graph, &earlier, &[triple(&earlier, &alice, &likes, &tea, "Alice likes tea")]).await;
    graph.set_entity_embedding(alice.uuid, vec![1.0, 0.0, 0.0]).await;

    let episode = conversation_episode("chat", "Alice Smith lives in Paris");
    let alice_smith = entity("Alice Smith", "Person");
    let t = triple(&episode, &alice_smith, &lives_in, &paris, "Alice Smith lives in Paris");
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;
    graph.set_entity_embedding(alice_smith.uuid, vec![0.98, 0.2, 0.0]).await;

    let adjudicator = ScriptedAdjudicator::new(|request| match request {
        AdjudicationRequest::Entities(ctx) => {
            assert_eq!(ctx.entities.len(), 1);
            assert_eq!(ctx.entities[0].name, "Alice Smith");
            assert_eq!(ctx.entities[0].candidates[0].name, "Alice");
            Ok(entity_reply(&[(0, 0)]))
        }
        AdjudicationRequest::Statements(_) => Ok(statement_reply(serde_json::json!([]))),
    });
    let report = engine(graph.clone(), adjudicator).resolve_episode(&episode, vec![t.clone()]).await;

    assert!(report.success, "{:?}", report.error);
    assert_eq!(
        report.merges,
        vec![EntityMerge {
            source: alice_smith.uuid,
            target: alice.uuid
        }]
    );
    assert_eq!(report.triples[0].subject.uuid, alice.uuid);
    assert_eq!(report.commit.merged_entities, 1);

    assert!(graph.entity(alice_smith.uuid).await.is_none());
    assert!(!graph.has_entity_embedding(alice_smith.uuid).await);
    let (subject, _, _) = graph.statement_entities(t.statement.uuid).await.unwrap();
    assert_eq!(subject, alice.uuid);
}

#[tokio::test]
async fn test_failed_adjudication_keeps_everything() {
    let graph = Arc::new(InMemoryGraph::new());
    let knows = entity("knows", "Predicate");
    let bob = entity("Bob", "Person");

    let earlier = conversation_episode("chat", "Alice knows Bob");
    let alice = entity("Alice", "Person");
    write_episode(&graph, &earlier, &[triple(&earlier, &alice, &knows, &bob, "Alice knows Bob")]).await;
    graph.set_entity_embedding(alice.uuid, vec![1.0, 0.0]).await;

    let episode = conversation_episode("chat", "Alicia knows Bob");
    let alicia = entity("Alicia", "Person");
    let carol = entity("Carol", "Person");
    let triples = vec![
        triple(&episode, &alicia, &knows, &bob, "Alicia knows Bob"),
        triple(&episode, &alicia, &knows, &carol, "Alicia knows Carol"),
    ];
    write_episode(&graph, &episode, &triples).await;
    graph.set_entity_embedding(alicia.uuid, vec![0.95, 0.1]).await;

    for adjudicator in [
        ScriptedAdjudicator::failing(),
        ScriptedAdjudicator::new(|_| Ok("I could not decide.".to_string())),
    ] {
        let calls = adjudicator.counter();
        let report = engine(graph.clone(), adjudicator)
            .resolve_episode(&episode, triples.clone())
            .await;

        assert!(report.success);
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert!(report.merges.is_empty());
        assert!(report.duplicates.is_empty());
        assert!(report.invalidations.is_empty());
        assert_eq!(report.triples.len(), triples.len());
        assert!(graph.entity(alicia.uuid).await.is_some());
        for t in &triples {
            assert!(graph.statement(t.statement.uuid).await.unwrap().is_live());
        }
    }
}

#[tokio::test]
async fn test_unambiguous_episode_makes_no_adjudication_call() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("fresh", "Dana plays chess");
    let t = triple(
        &episode,
        &entity("Dana", "Person"),
        &entity("plays", "Predicate"),
        &entity("chess", "Activity"),
        "Dana plays chess",
    );
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;

    let adjudicator = ScriptedAdjudicator::silent();
    let calls = adjudicator.counter();
    let report = engine(graph.clone(), adjudicator).resolve_episode(&episode, vec![t]).await;

    assert!(report.success);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.usage.adjudication_calls, 0);
    assert_eq!(report.triples.len(), 1);
}

#[tokio::test]
async fn test_unknown_episode_is_reported_not_found() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("chat", "never saved");
    let t = triple(
        &episode,
        &entity("Dana", "Person"),
        &entity("plays", "Predicate"),
        &entity("chess", "Activity"),
        "Dana plays chess",
    );

    let adjudicator = ScriptedAdjudicator::silent();
    let calls = adjudicator.counter();
    let report = engine(graph.clone(), adjudicator).resolve_episode(&episode, vec![t]).await;

    assert!(!report.success);
    let error = report.error.unwrap();
    assert!(error.contains("Episode not found"), "{error}");
    assert!(error.contains(&episode.uuid.to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.commit.deleted_statements, 0);
}

#[tokio::test]
async fn test_zero_fan_out_still_completes() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let earlier = conversation_episode("chat", "Alice likes tea");
    write_episode(
        &graph,
        &earlier,
        &[triple(&earlier, &alice, &entity("likes", "Predicate"), &entity("tea", "Food"), "Alice likes tea")],
    )
    .await;
    graph.set_entity_embedding(alice.uuid, vec![1.0, 0.0]).await;

    let episode = conversation_episode("chat", "Alicia likes tea");
    let alicia = entity("Alicia", "Person");
    let t = triple(&episode, &alicia, &entity("likes", "Predicate"), &entity("tea", "Food"), "Alicia likes tea");
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;
    graph.set_entity_embedding(alicia.uuid, vec![0.99, 0.05]).await;

    let engine = ResolutionEngine::new(
        graph.clone(),
        graph.clone(),
        ScriptedAdjudicator::silent(),
        ResolutionConfig {
            fan_out: 0,
            ..ResolutionConfig::default()
        },
    );
    assert_eq!(engine.config().fan_out, 1);

    let report = tokio::time::timeout(Duration::from_secs(5), engine.resolve_episode(&episode, vec![t]))
        .await
        .expect("resolution finishes");
    assert!(report.success, "{:?}", report.error);
}

// ---------------------------------------------------------------------------
// Statement pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_statement_folds_provenance() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");
    let paris = entity("Paris", "Location");

    let earlier = conversation_episode("chat", "Alice lives in Paris");
    let existing = triple(&earlier, &alice, &lives_in, &paris, "Alice lives in Paris");
    write_episode(&graph, &earlier, std::slice::from_ref(&existing)).await;

    let episode = conversation_episode("chat", "Alice still lives in Paris");
    let repeat = triple(&episode, &alice, &lives_in, &paris, "Alice lives in Paris");
    write_episode(&graph, &episode, std::slice::from_ref(&repeat)).await;

    let (new_id, old_id) = (repeat.statement.uuid, existing.statement.uuid);
    let adjudicator = ScriptedAdjudicator::new(move |request| match request {
        AdjudicationRequest::Statements(ctx) => {
            assert_eq!(ctx.statements.len(), 1);
            assert_eq!(ctx.statements[0].candidates[0].statement_id, old_id.to_string());
            Ok(statement_reply(serde_json::json!([duplicate_judgment(new_id, old_id)])))
        }
        AdjudicationRequest::Entities(_) => Ok(entity_reply(&[])),
    });
    let report = engine(graph.clone(), adjudicator)
        .resolve_episode(&episode, vec![repeat.clone()])
        .await;

    assert!(report.success);
    assert_eq!(
        report.duplicates,
        vec![DuplicateStatement {
            new_statement: new_id,
            existing_statement: old_id,
        }]
    );
    assert!(report.triples.is_empty());
    assert_eq!(report.commit.moved_provenance, 1);
    assert_eq!(report.commit.deleted_statements, 1);

    assert!(graph.statement(new_id).await.is_none());
    assert_eq!(
        graph.provenance_of(old_id).await,
        HashSet::from([earlier.uuid, episode.uuid])
    );
}

#[tokio::test]
async fn test_facts_reach_the_adjudicator_with_collapsed_whitespace() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");
    let paris = entity("Paris", "Location");

    let earlier = conversation_episode("chat", "Alice lives in Paris");
    let existing = triple(&earlier, &alice, &lives_in, &paris, "Alice\tlives in\n\nParis ");
    write_episode(&graph, &earlier, std::slice::from_ref(&existing)).await;

    let episode = conversation_episode("chat", "Alice still lives in Paris");
    let repeat = triple(&episode, &alice, &lives_in, &paris, "  Alice   lives in Paris");
    write_episode(&graph, &episode, std::slice::from_ref(&repeat)).await;

    let adjudicator = ScriptedAdjudicator::new(|request| match request {
        AdjudicationRequest::Statements(ctx) => {
            assert_eq!(ctx.statements[0].fact, "Alice lives in Paris");
            assert_eq!(ctx.statements[0].candidates[0].fact, "Alice lives in Paris");
            Ok(statement_reply(serde_json::json!([])))
        }
        AdjudicationRequest::Entities(_) => Ok(entity_reply(&[])),
    });
    let calls = adjudicator.counter();
    let report = engine(graph.clone(), adjudicator).resolve_episode(&episode, vec![repeat]).await;

    assert!(report.success, "{:?}", report.error);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_contradiction_invalidates_existing_statement() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");

    let earlier = conversation_episode("chat", "Alice lives in Paris");
    let old = triple(&earlier, &alice, &lives_in, &entity("Paris", "Location"), "Alice lives in Paris");
    write_episode(&graph, &earlier, std::slice::from_ref(&old)).await;

    let episode = conversation_episode("chat", "Alice moved to Berlin");
    let new = triple(&episode, &alice, &lives_in, &entity("Berlin", "Location"), "Alice lives in Berlin");
    write_episode(&graph, &episode, std::slice::from_ref(&new)).await;

    let (new_id, old_id) = (new.statement.uuid, old.statement.uuid);
    let adjudicator = ScriptedAdjudicator::new(move |request| match request {
        AdjudicationRequest::Statements(_) => Ok(statement_reply(serde_json::json!([
            contradiction_judgment(new_id, &[old_id])
        ]))),
        AdjudicationRequest::Entities(_) => Ok(entity_reply(&[])),
    });
    let report = engine(graph.clone(), adjudicator).resolve_episode(&episode, vec![new]).await;

    assert!(report.success);
    assert_eq!(report.invalidations, vec![old_id]);
    assert_eq!(report.commit.invalidated_statements, 1);

    let stale = graph.statement(old_id).await.unwrap();
    assert!(!stale.is_live());
    assert_eq!(stale.invalidated_by, Some(episode.uuid));
    assert!(graph.statement(new_id).await.unwrap().is_live());
}

#[tokio::test]
async fn test_duplicate_target_is_never_invalidated() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");
    let paris = entity("Paris", "Location");

    let earlier = conversation_episode("chat", "Alice lives in Paris");
    let existing = triple(&earlier, &alice, &lives_in, &paris, "Alice lives in Paris");
    write_episode(&graph, &earlier, std::slice::from_ref(&existing)).await;

    let episode = conversation_episode("chat", "Alice lives in Paris, or maybe Lyon");
    let repeat = triple(&episode, &alice, &lives_in, &paris, "Alice lives in Paris");
    let lyon = triple(&episode, &alice, &lives_in, &entity("Lyon", "Location"), "Alice lives in Lyon");
    write_episode(&graph, &episode, &[repeat.clone(), lyon.clone()]).await;

    let old_id = existing.statement.uuid;
    let (repeat_id, lyon_id) = (repeat.statement.uuid, lyon.statement.uuid);
    let adjudicator = ScriptedAdjudicator::new(move |request| match request {
        AdjudicationRequest::Statements(_) => Ok(statement_reply(serde_json::json!([
            duplicate_judgment(repeat_id, old_id),
            contradiction_judgment(lyon_id, &[old_id]),
        ]))),
        AdjudicationRequest::Entities(_) => Ok(entity_reply(&[])),
    });
    let report = engine(graph.clone(), adjudicator)
        .resolve_episode(&episode, vec![repeat, lyon])
        .await;

    assert!(report.success);
    assert_eq!(report.duplicates.len(), 1);
    assert!(report.invalidations.is_empty());
    assert!(graph.statement(old_id).await.unwrap().is_live());
    assert!(graph.statement(repeat_id).await.is_none());
    assert!(graph.statement(lyon_id).await.unwrap().is_live());
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_commit_is_idempotent() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");
    let paris = entity("Paris", "Location");

    let earlier = conversation_episode("chat", "Alice lives in Paris");
    let existing = triple(&earlier, &alice, &lives_in, &paris, "Alice lives in Paris");
    let stale = triple(
        &earlier,
        &alice,
        &entity("works at", "Predicate"),
        &entity("Initech", "Organization"),
        "Alice works at Initech",
    );
    write_episode(&graph, &earlier, &[existing.clone(), stale.clone()]).await;

    let episode = conversation_episode("chat", "Alice A. lives in Paris");
    let alice_a = entity("Alice A.", "Person");
    let repeat = triple(&episode, &alice_a, &lives_in, &paris, "Alice lives in Paris");
    write_episode(&graph, &episode, std::slice::from_ref(&repeat)).await;

    let merges = vec![EntityMerge {
        source: alice_a.uuid,
        target: alice.uuid,
    }];
    let duplicates = vec![DuplicateStatement {
        new_statement: repeat.statement.uuid,
        existing_statement: existing.statement.uuid,
    }];
    let invalidations = vec![stale.statement.uuid];
    let engine = engine(graph.clone(), ScriptedAdjudicator::silent());

    let first = engine
        .commit(&episode, &merges, &duplicates, &invalidations)
        .await
        .unwrap();
    assert_eq!(first.merged_entities, 1);
    assert_eq!(first.moved_provenance, 1);
    assert_eq!(first.deleted_statements, 1);
    assert_eq!(first.invalidated_statements, 1);

    let entities_after_first = graph.entities_for_user(USER).await;
    let statements_after_first = graph.statements_for_user(USER).await;

    let second = engine
        .commit(&episode, &merges, &duplicates, &invalidations)
        .await
        .unwrap();
    assert_eq!(second.merged_entities, 0);
    assert_eq!(second.moved_provenance, 0);
    assert_eq!(second.deleted_statements, 0);
    assert_eq!(second.invalidated_statements, 0);
    assert!(second.orphaned_entities.is_empty());

    assert_eq!(graph.entities_for_user(USER).await, entities_after_first);
    assert_eq!(graph.statements_for_user(USER).await, statements_after_first);
}

#[tokio::test]
async fn test_duplicate_of_missing_statement_is_kept() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("chat", "Alice lives in Paris");
    let alice = entity("Alice", "Person");
    let t = triple(
        &episode,
        &alice,
        &entity("lives in", "Predicate"),
        &entity("Paris", "Location"),
        "Alice lives in Paris",
    );
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;

    let duplicates = vec![DuplicateStatement {
        new_statement: t.statement.uuid,
        existing_statement: Uuid::new_v4(),
    }];
    let summary = engine(graph.clone(), ScriptedAdjudicator::silent())
        .commit(&episode, &[], &duplicates, &[])
        .await
        .unwrap();

    assert_eq!(summary.moved_provenance, 0);
    assert_eq!(summary.deleted_statements, 0);
    assert_eq!(summary.kept_duplicates, 1);
    assert!(summary.orphaned_entities.is_empty());
    assert!(graph.statement(t.statement.uuid).await.unwrap().is_live());
    assert_eq!(
        graph.provenance_of(t.statement.uuid).await,
        HashSet::from([episode.uuid])
    );
    assert!(graph.entity(alice.uuid).await.is_some());
}

#[tokio::test]
async fn test_resolving_an_episode_twice_changes_nothing_more() {
    let graph = Arc::new(InMemoryGraph::new());
    let alice = entity("Alice", "Person");
    let lives_in = entity("lives in", "Predicate");
    let works_at = entity("works at", "Predicate");
    let paris = entity("Paris", "Location");

    let earlier = conversation_episode("chat", "Alice lives in Paris and works at Initech");
    let existing = triple(&earlier, &alice, &lives_in, &paris, "Alice lives in Paris");
    let old_job = triple(
        &earlier,
        &alice,
        &works_at,
        &entity("Initech", "Organization"),
        "Alice works at Initech",
    );
    write_episode(&graph, &earlier, &[existing.clone(), old_job.clone()]).await;

    let episode = conversation_episode("chat", "Alice lives in Paris and now works at Acme");
    let repeat = triple(&episode, &alice, &lives_in, &paris, "Alice lives in Paris");
    let new_job = triple(
        &episode,
        &alice,
        &works_at,
        &entity("Acme", "Organization"),
        "Alice works at Acme",
    );
    let triples = vec![repeat.clone(), new_job.clone()];
    write_episode(&graph, &episode, &triples).await;

    let (repeat_id, existing_id) = (repeat.statement.uuid, existing.statement.uuid);
    let (new_job_id, old_job_id) = (new_job.statement.uuid, old_job.statement.uuid);
    let script = move |request: &AdjudicationRequest| match request {
        AdjudicationRequest::Statements(_) => Ok(statement_reply(serde_json::json!([
            duplicate_judgment(repeat_id, existing_id),
            contradiction_judgment(new_job_id, &[old_job_id]),
        ]))),
        AdjudicationRequest::Entities(_) => Ok(entity_reply(&[])),
    };

    let first = engine(graph.clone(), ScriptedAdjudicator::new(script))
        .resolve_episode(&episode, triples.clone())
        .await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.commit.deleted_statements, 1);
    assert_eq!(first.commit.invalidated_statements, 1);

    let statements_after_first = graph.statements_for_user(USER).await;
    let second = engine(graph.clone(), ScriptedAdjudicator::new(script))
        .resolve_episode(&episode, triples)
        .await;

    assert!(second.success, "{:?}", second.error);
    assert_eq!(second.commit.merged_entities, 0);
    assert_eq!(second.commit.moved_provenance, 0);
    assert_eq!(second.commit.deleted_statements, 0);
    assert_eq!(second.commit.invalidated_statements, 0);
    assert_eq!(second.commit.kept_duplicates, 0);
    assert!(second.commit.orphaned_entities.is_empty());
    assert_eq!(graph.statements_for_user(USER).await, statements_after_first);
}

#[tokio::test]
async fn test_merge_chain_collapses_to_final_target() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("chat", "three names for one person");
    let knows = entity("knows", "Predicate");
    let bob = entity("Bob", "Person");
    let (a, b, c) = (entity("Al", "Person"), entity("Alan", "Person"), entity("Alan Turing", "Person"));
    let triples = vec![
        triple(&episode, &a, &knows, &bob, "Al knows Bob"),
        triple(&episode, &b, &knows, &bob, "Alan knows Bob"),
        triple(&episode, &c, &knows, &bob, "Alan Turing knows Bob"),
    ];
    write_episode(&graph, &episode, &triples).await;

    let merges = vec![
        EntityMerge {
            source: a.uuid,
            target: b.uuid,
        },
        EntityMerge {
            source: b.uuid,
            target: c.uuid,
        },
    ];
    let summary = engine(graph.clone(), ScriptedAdjudicator::silent())
        .commit(&episode, &merges, &[], &[])
        .await
        .unwrap();

    assert_eq!(summary.merged_entities, 2);
    assert!(graph.entity(a.uuid).await.is_none());
    assert!(graph.entity(b.uuid).await.is_none());
    for t in &triples {
        let (subject, _, _) = graph.statement_entities(t.statement.uuid).await.unwrap();
        assert_eq!(subject, c.uuid);
    }
}

#[tokio::test]
async fn test_orphans_are_swept_with_their_embeddings() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("chat", "Alice lives in Paris");
    let t = triple(
        &episode,
        &entity("Alice", "Person"),
        &entity("lives in", "Predicate"),
        &entity("Paris", "Location"),
        "Alice lives in Paris",
    );
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;
    let ghost = entity("Ghost", "Person");
    graph.insert_entity(ghost.clone(), Some(vec![0.0, 1.0])).await;

    let report = engine(graph.clone(), ScriptedAdjudicator::silent())
        .resolve_episode(&episode, vec![t.clone()])
        .await;

    assert!(report.success);
    assert_eq!(report.commit.orphaned_entities, vec![ghost.uuid]);
    assert!(graph.entity(ghost.uuid).await.is_none());
    assert!(!graph.has_entity_embedding(ghost.uuid).await);
    assert!(graph.entity(t.subject.uuid).await.is_some());
}

#[tokio::test]
async fn test_vector_cleanup_failure_is_not_fatal() {
    let graph = Arc::new(InMemoryGraph::new());
    let episode = conversation_episode("chat", "Alice lives in Paris");
    let t = triple(
        &episode,
        &entity("Alice", "Person"),
        &entity("lives in", "Predicate"),
        &entity("Paris", "Location"),
        "Alice lives in Paris",
    );
    write_episode(&graph, &episode, std::slice::from_ref(&t)).await;
    let ghost = entity("Ghost", "Person");
    graph.insert_entity(ghost.clone(), Some(vec![0.0, 1.0])).await;
    graph.set_fail_vector_deletes(true);

    let report = engine(graph.clone(), ScriptedAdjudicator::silent())
        .resolve_episode(&episode, vec![t])
        .await;

    assert!(report.success);
    assert!(report.commit.vector_cleanup_failed);
    assert!(graph.entity(ghost.uuid).await.is_none());
    assert!(graph.has_entity_embedding(ghost.uuid).await);
}
