//! Command providers over the emulated document service

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use vellum_core::{
    field, BackendAdapter, CancelToken, CommandProvider, FieldTable, ProviderFactory, QueryMode,
    Record, RecordMeta, StoreConfig, TypeConfig, VellumError,
};
use vellum_document::{
    ContainerEncryptionPolicy, DocumentConfig, DocumentProviderFactory, InMemoryDocumentClient,
    KeyWrapProvider, LocalKeyWrapProvider,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    #[serde(flatten)]
    meta: RecordMeta,
    #[serde(rename = "customer", default, skip_serializing_if = "Option::is_none")]
    customer: Option<String>,
    #[serde(rename = "total", default)]
    total: i64,
    #[serde(rename = "note", default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Record for Order {
    const TYPE_NAME: &'static str = "Order";

    fn new(meta: RecordMeta) -> Self {
        Self {
            meta,
            customer: None,
            total: 0,
            note: None,
        }
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn fields() -> &'static FieldTable<Self> {
        static FIELDS: OnceLock<FieldTable<Order>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            FieldTable::new(vec![
                field!(Order, "customer", customer).tracked(),
                field!(Order, "total", total).tracked(),
                field!(Order, "note", note),
            ])
        })
    }
}

struct Harness {
    client: Arc<InMemoryDocumentClient>,
    factory: DocumentProviderFactory,
}

async fn create_test_factory() -> Harness {
    let client = Arc::new(InMemoryDocumentClient::new("local"));
    let key_wrap = Arc::new(LocalKeyWrapProvider::new([3u8; 32]));
    let policy = ContainerEncryptionPolicy::new(["note"], &key_wrap.generate_wrapped_key().unwrap());

    let store_config =
        StoreConfig::new().with_type(TypeConfig::new("Order", "orders").with_event_ttl(600));
    let document = DocumentConfig::new("app")
        .with_page_size(2)
        .with_encryption("orders", policy);
    let factory = DocumentProviderFactory::connect(
        store_config,
        document,
        client.clone(),
        Some(key_wrap as Arc<dyn KeyWrapProvider>),
    )
    .await
    .unwrap();
    factory.initialize().await.unwrap();
    Harness { client, factory }
}

fn orders(harness: &Harness) -> CommandProvider<Order> {
    harness.factory.provider::<Order>(None).unwrap()
}

#[tokio::test]
async fn test_scenarios_on_document_store() {
    let harness = create_test_factory().await;
    let provider = orders(&harness);
    let cancel = CancelToken::new();

    let mut create = provider.create("o-1", "cust-1").unwrap();
    create.record_mut().customer = Some("ada".into());
    create.record_mut().note = Some("leave at door".into());
    provider.save(&mut create, &cancel).await.unwrap();

    let raw = harness.client.raw_item("orders", "cust-1", "o-1").unwrap();
    assert_ne!(raw["note"], "leave at door");
    let event = harness
        .client
        .raw_item("orders", "cust-1", "EVENT^o-1^00000001")
        .unwrap();
    assert_eq!(event["ttl"], 600);

    let mut update = provider.update("o-1", "cust-1", &cancel).await.unwrap().unwrap();
    assert_eq!(update.record().note.as_deref(), Some("leave at door"));
    let mut stale = update.clone();
    update.record_mut().total = 10;
    provider.save(&mut update, &cancel).await.unwrap();
    stale.record_mut().total = 11;
    let err = provider.save(&mut stale, &cancel).await.unwrap_err();
    assert_eq!(err.status().code(), 412);

    let mut delete = provider.delete("o-1", "cust-1", &cancel).await.unwrap().unwrap();
    provider.save(&mut delete, &cancel).await.unwrap();
    assert!(provider.read("o-1", "cust-1", &cancel).await.unwrap().is_none());

    let history = provider.events("o-1", "cust-1", &cancel).await.unwrap();
    let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_native_query_runs_full_description() {
    let harness = create_test_factory().await;
    let provider = orders(&harness);
    let cancel = CancelToken::new();
    assert_eq!(harness.factory.adapter().query_mode(), QueryMode::Native);

    for (id, total) in [("a", 30), ("b", 10), ("c", 50), ("d", 20), ("e", 40)] {
        let mut create = provider.create(id, "cust-1").unwrap();
        create.record_mut().total = total;
        provider.save(&mut create, &cancel).await.unwrap();
    }

    let found = provider
        .query()
        .unwrap()
        .order_by("total")
        .skip(1)
        .filter(vellum_core::field("total").lt(50))
        .take(2)
        .to_vec(&cancel)
        .await
        .unwrap();
    let totals: Vec<i64> = found.iter().map(|o| o.total).collect();
    assert_eq!(totals, vec![20, 30]);
}

#[tokio::test]
async fn test_batch_outcomes_are_independent() {
    let harness = create_test_factory().await;
    let provider = orders(&harness);
    let cancel = CancelToken::new();

    let mut first = provider.create("dup", "cust-1").unwrap();
    provider.save(&mut first, &cancel).await.unwrap();

    let mut batch = vec![
        provider.create("x", "cust-1").unwrap(),
        provider.create("dup", "cust-1").unwrap(),
        provider.create("y", "cust-2").unwrap(),
    ];
    let codes: Vec<u16> = provider
        .save_batch(&mut batch, &cancel)
        .await
        .iter()
        .map(|r| r.status().code())
        .collect();
    assert_eq!(codes, vec![200, 409, 200]);
}

#[tokio::test]
async fn test_throttling_is_retryable() {
    let harness = create_test_factory().await;
    let provider = orders(&harness);
    let cancel = CancelToken::new();

    harness.client.inject_failure(429);
    let mut create = provider.create("t", "cust-1").unwrap();
    let err = provider.save(&mut create, &cancel).await.unwrap_err();
    assert!(err.is_retryable());

    provider.save(&mut create, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_encrypted_container_requires_key_wrap() {
    let wrapped = LocalKeyWrapProvider::new([1u8; 32])
        .generate_wrapped_key()
        .unwrap();
    let result = DocumentProviderFactory::connect(
        StoreConfig::new().with_type(TypeConfig::new("Order", "orders")),
        DocumentConfig::new("app")
            .with_encryption("orders", ContainerEncryptionPolicy::new(["note"], &wrapped)),
        Arc::new(InMemoryDocumentClient::new("local")),
        None,
    )
    .await;
    assert!(matches!(result.err(), Some(VellumError::Config(_))));
}

#[tokio::test]
async fn test_status_reports_account() {
    let harness = create_test_factory().await;
    let status = harness.factory.get_status().await;
    assert!(status.is_healthy);
    assert_eq!(status.diagnostics["account"], "local");
}
