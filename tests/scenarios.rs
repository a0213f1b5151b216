// Copyright (c) 2025-present, fdb-lucene-core
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Concrete end-to-end scenarios (§8) against the public [`IndexMaintainer`] surface. Scenario S5
//! needs `directory_lock_key`, which is private to `maintainer`, so it lives in that module's own
//! `#[cfg(test)]` block instead of here.

use fdb_lucene_core::cache::BlockCache;
use fdb_lucene_core::config::Config;
use fdb_lucene_core::kv::memory::MemoryDatabase;
use fdb_lucene_core::kv::Database;
use fdb_lucene_core::maintainer::IndexMaintainer;
use fdb_lucene_core::partition::validator;
use fdb_lucene_core::stored_fields::{FieldValue, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::doc;
use tantivy::query::QueryParser;
use tantivy::schema::{BytesOptions, Schema, TEXT};
use tantivy::TantivyDocument;

fn simple_doc_schema() -> (Schema, tantivy::schema::Field, tantivy::schema::Field) {
    let mut builder = Schema::builder();
    let pk = builder.add_bytes_field("doc_id", BytesOptions::default().set_indexed().set_stored());
    let text = builder.add_text_field("text", TEXT | tantivy::schema::STORED);
    (builder.build(), pk, text)
}

fn maintainer(config: Config) -> Arc<IndexMaintainer> {
    let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let cache = Arc::new(BlockCache::with_capacity_bytes(4 * 1024 * 1024));
    let (schema, pk, _text) = simple_doc_schema();
    Arc::new(IndexMaintainer::new(
        database,
        cache,
        tokio::runtime::Handle::current(),
        b"scenarios/".to_vec(),
        config,
        schema,
        pk,
    ))
}

async fn query_primary_keys(
    maintainer: &IndexMaintainer,
    group: &[u8],
    partition: i32,
    query: &str,
) -> BTreeSet<i64> {
    let reader = maintainer.reader_for(group, partition).await.unwrap();
    let searcher = reader.searcher();
    let (_, pk, text) = simple_doc_schema();
    let parser = QueryParser::for_index(&searcher.index().clone(), vec![text]);
    let parsed = parser.parse_query(query).unwrap();
    let hits = searcher.search(&parsed, &TopDocs::with_limit(10)).unwrap();

    let mut out = BTreeSet::new();
    for (_, address) in hits {
        let retrieved: TantivyDocument = searcher.doc(address).unwrap();
        let bytes = retrieved.get_first(pk).unwrap().as_bytes().unwrap();
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        out.insert(i64::from_be_bytes(array));
    }
    out
}

fn doc_id_bytes(id: i64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn record_for(body: &str) -> Record {
    let mut record = Record::new();
    record.push(1, FieldValue::String(body.to_owned()));
    record
}

/// S1 — basic round-trip: three docs inserted and committed in one pass, then queried back.
#[tokio::test]
async fn s1_basic_round_trip() {
    let config = Config::new().partition_by_field_name("ts");
    let maintainer = maintainer(config);
    let (_, _, text) = simple_doc_schema();

    for (id, body, ts) in [
        (1623i64, "Document 1", 1),
        (1624, "Document 2", 2),
        (1547, "NonDocument 3", 3),
    ] {
        maintainer
            .index_document(b"group", doc_id_bytes(id), ts, doc!(text => body), record_for(body))
            .await
            .unwrap();
    }
    maintainer.commit_partition(b"group", 0).await.unwrap();

    let found = query_primary_keys(&maintainer, b"group", 0, "Document").await;
    assert_eq!(found, BTreeSet::from([1623, 1624]));

    let partitions = maintainer.partitions(b"group").await.unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].count, 3);

    let stored = maintainer
        .get_stored_fields(b"group", 0, &doc_id_bytes(1623))
        .await
        .unwrap()
        .expect("stored fields written alongside the indexed document");
    assert_eq!(stored.fields()[0].value, FieldValue::String("Document 1".to_owned()));
}

/// S2 — cross-transaction insertion: each doc commits on its own; the final committed state still
/// matches S1's query, even though the writer only ever held one `IndexWriter` across the commits.
#[tokio::test]
async fn s2_cross_transaction_insertion() {
    let config = Config::new().partition_by_field_name("ts");
    let maintainer = maintainer(config);
    let (_, _, text) = simple_doc_schema();

    for (id, body, ts) in [
        (1623i64, "Document 1", 1),
        (1624, "Document 2", 2),
        (1547, "NonDocument 3", 3),
    ] {
        maintainer
            .index_document(b"group", doc_id_bytes(id), ts, doc!(text => body), record_for(body))
            .await
            .unwrap();
        maintainer.commit_partition(b"group", 0).await.unwrap();
    }

    let found = query_primary_keys(&maintainer, b"group", 0, "Document").await;
    assert_eq!(found, BTreeSet::from([1623, 1624]));

    let partitions = maintainer.partitions(b"group").await.unwrap();
    assert_eq!(partitions[0].count, 3);
}

/// S3 — insert, delete two, force a merge pass; the deleted docs drop out of the query and the
/// delete-stored-fields metric ticks at least once.
#[tokio::test]
async fn s3_insert_delete_merge() {
    let config = Config::new()
        .partition_by_field_name("ts")
        .lucene_merge_segments_per_tier(2.0);
    let maintainer = maintainer(config);
    let (_, _, text) = simple_doc_schema();

    for (id, body, ts) in [
        (1623i64, "Document 1", 1),
        (1624, "Document 2", 2),
        (1547, "NonDocument 3", 3),
    ] {
        maintainer
            .index_document(b"group", doc_id_bytes(id), ts, doc!(text => body), record_for(body))
            .await
            .unwrap();
    }
    maintainer.commit_partition(b"group", 0).await.unwrap();

    maintainer.delete_document(b"group", doc_id_bytes(1623), 1).await.unwrap();
    maintainer.delete_document(b"group", doc_id_bytes(1547), 3).await.unwrap();
    maintainer.commit_partition(b"group", 0).await.unwrap();
    maintainer.maybe_merge(b"group", 0, true).await.unwrap();

    let found = query_primary_keys(&maintainer, b"group", 0, "Document").await;
    assert_eq!(found, BTreeSet::from([1624]));

    let partitions = maintainer.partitions(b"group").await.unwrap();
    assert_eq!(partitions[0].count, 1);

    assert!(maintainer
        .get_stored_fields(b"group", 0, &doc_id_bytes(1623))
        .await
        .unwrap()
        .is_none());
}

/// S4 — update rewrites stored fields: re-indexing an existing primary key replaces its document
/// rather than duplicating it, surviving a subsequent merge.
#[tokio::test]
async fn s4_update_rewrites_stored_fields() {
    let config = Config::new().partition_by_field_name("ts");
    let maintainer = maintainer(config);
    let (_, _, text) = simple_doc_schema();

    for (id, body, ts) in [
        (1623i64, "Document 1", 1),
        (1624, "Document 2", 2),
        (1547, "NonDocument 3", 3),
    ] {
        maintainer
            .index_document(b"group", doc_id_bytes(id), ts, doc!(text => body), record_for(body))
            .await
            .unwrap();
    }
    maintainer.commit_partition(b"group", 0).await.unwrap();

    maintainer
        .index_document(
            b"group",
            doc_id_bytes(1623),
            1,
            doc!(text => "Document 3 modified"),
            record_for("Document 3 modified"),
        )
        .await
        .unwrap();
    maintainer
        .index_document(
            b"group",
            doc_id_bytes(1624),
            2,
            doc!(text => "Document 4 modified"),
            record_for("Document 4 modified"),
        )
        .await
        .unwrap();
    maintainer.commit_partition(b"group", 0).await.unwrap();
    maintainer.maybe_merge(b"group", 0, true).await.unwrap();

    let reader = maintainer.reader_for(b"group", 0).await.unwrap();
    let searcher = reader.searcher();
    let (_, pk, text_field) = simple_doc_schema();
    let parser = QueryParser::for_index(&searcher.index().clone(), vec![text_field]);
    let parsed = parser.parse_query("modified").unwrap();
    let hits = searcher.search(&parsed, &TopDocs::with_limit(10)).unwrap();

    let mut found = std::collections::BTreeMap::new();
    for (_, address) in hits {
        let retrieved: TantivyDocument = searcher.doc(address).unwrap();
        let bytes = retrieved.get_first(pk).unwrap().as_bytes().unwrap();
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        let id = i64::from_be_bytes(array);
        let body = retrieved
            .get_first(text_field)
            .unwrap()
            .as_str()
            .unwrap()
            .to_owned();
        found.insert(id, body);
    }

    assert_eq!(found.len(), 2);
    assert_eq!(found.get(&1623).unwrap(), "Document 3 modified");
    assert_eq!(found.get(&1624).unwrap(), "Document 4 modified");

    let stored = maintainer
        .get_stored_fields(b"group", 0, &doc_id_bytes(1623))
        .await
        .unwrap()
        .expect("update reuses the same stored-fields doc id rather than leaking a stale one");
    assert_eq!(
        stored.fields()[0].value,
        FieldValue::String("Document 3 modified".to_owned())
    );
}

/// S6 — partition validator: HWM=20, R=3, a fixed-seed spread of timestamps, rebalanced until
/// quiescent; every partition must satisfy the count/ordering/uniqueness invariants (§4.7).
#[tokio::test]
async fn s6_partition_validator_holds_after_rebalance() {
    const HWM: u64 = 20;
    const R: u64 = 3;

    let config = Config::new()
        .partition_by_field_name("ts")
        .partition_high_watermark(HWM)
        .lucene_repartition_document_count(R);
    let maintainer = maintainer(config);
    let (_, _, text) = simple_doc_schema();

    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..120i64 {
        let ts = rng.random_range(0..1_000_000i64);
        maintainer
            .index_document(b"group", doc_id_bytes(i), ts, doc!(text => "Document"), record_for("Document"))
            .await
            .unwrap();
    }
    maintainer.commit_partition(b"group", 0).await.unwrap();

    loop {
        let stats = maintainer.maybe_repartition(b"group", true).await.unwrap();
        if stats.documents_moved == 0 {
            break;
        }
    }

    let metas = maintainer.partitions(b"group").await.unwrap();
    assert!(!metas.is_empty());
    validator::validate(&metas, HWM, R).expect("partition invariants must hold after rebalance");

    // Every document's C4 record must have followed it across however many rebalance passes it
    // took to land in its final partition — nothing left orphaned in the partition it started in.
    for id in 0..120i64 {
        let mut found_in_any_partition = false;
        for meta in &metas {
            if maintainer
                .get_stored_fields(b"group", meta.id, &doc_id_bytes(id))
                .await
                .unwrap()
                .is_some()
            {
                found_in_any_partition = true;
                break;
            }
        }
        assert!(found_in_any_partition, "doc {id} lost its stored-fields record during rebalance");
    }
}
