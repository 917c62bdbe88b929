//! Command providers over an on-disk LMDB store

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use vellum_core::{
    field, AesGcmCipher, BackendAdapter, CancelToken, CipherService, CommandProvider, FieldTable,
    ProviderFactory, QueryOp, Record, RecordMeta, StoreConfig, TypeConfig,
};
use vellum_lmdb::{LmdbConfig, LmdbProviderFactory, SyncMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    #[serde(flatten)]
    meta: RecordMeta,
    #[serde(rename = "owner", default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(rename = "balance", default)]
    balance: i64,
    #[serde(rename = "pin", default, skip_serializing_if = "Option::is_none")]
    pin: Option<String>,
}

impl Record for Account {
    const TYPE_NAME: &'static str = "Account";

    fn new(meta: RecordMeta) -> Self {
        Self {
            meta,
            owner: None,
            balance: 0,
            pin: None,
        }
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn fields() -> &'static FieldTable<Self> {
        static FIELDS: OnceLock<FieldTable<Account>> = OnceLock::new();
        FIELDS.get_or_init(|| {
            FieldTable::new(vec![
                field!(Account, "owner", owner).tracked(),
                field!(Account, "balance", balance).tracked(),
                field!(Account, "pin", pin).tracked().encrypted(),
            ])
        })
    }
}

async fn create_test_factory() -> (TempDir, LmdbProviderFactory) {
    let temp_dir = TempDir::new().unwrap();
    let store_config =
        StoreConfig::new().with_type(TypeConfig::new("Account", "accounts").with_event_ttl(3600));
    let lmdb = LmdbConfig::new(temp_dir.path().join("kv"))
        .with_map_size(32 * 1024 * 1024)
        .with_sync_mode(SyncMode::NoSync)
        .with_page_size(2);
    let factory = LmdbProviderFactory::open(store_config, lmdb).unwrap();
    factory.initialize().await.unwrap();
    (temp_dir, factory)
}

fn provider(factory: &LmdbProviderFactory) -> CommandProvider<Account> {
    let cipher: Arc<dyn CipherService> = Arc::new(AesGcmCipher::from_secret("lmdb-tests"));
    factory.provider::<Account>(Some(cipher)).unwrap()
}

#[tokio::test]
async fn test_lifecycle_and_history() {
    let (_dir, factory) = create_test_factory().await;
    let accounts = provider(&factory);
    let cancel = CancelToken::new();

    let mut create = accounts.create("acc-1", "tenant-a").unwrap();
    create.record_mut().owner = Some("ada".into());
    create.record_mut().pin = Some("1234".into());
    accounts.save(&mut create, &cancel).await.unwrap();

    create.record_mut().balance = 50;
    let receipt = accounts.save(&mut create, &cancel).await.unwrap();
    assert_eq!(receipt.sequence, 2);

    let loaded = accounts
        .read("acc-1", "tenant-a", &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.record().pin.as_deref(), Some("1234"));
    assert_eq!(loaded.record().balance, 50);

    let raw = factory
        .store()
        .read("accounts", "tenant-a", "acc-1")
        .await
        .unwrap()
        .unwrap();
    assert_ne!(raw["pin"], "1234");

    let events = accounts.events("acc-1", "tenant-a", &cancel).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.expires_at.is_some()));
    assert_eq!(events[1].changes.as_ref().unwrap()[0].property_path, "balance");
}

#[tokio::test]
async fn test_stale_save_conflicts() {
    let (_dir, factory) = create_test_factory().await;
    let accounts = provider(&factory);
    let cancel = CancelToken::new();

    let mut create = accounts.create("acc-1", "tenant-a").unwrap();
    accounts.save(&mut create, &cancel).await.unwrap();

    let mut first = accounts.update("acc-1", "tenant-a", &cancel).await.unwrap().unwrap();
    let mut second = first.clone();
    first.record_mut().balance = 1;
    second.record_mut().balance = 2;
    accounts.save(&mut first, &cancel).await.unwrap();
    let err = accounts.save(&mut second, &cancel).await.unwrap_err();
    assert_eq!(err.status().code(), 412);
}

#[tokio::test]
async fn test_batch_isolates_failed_command() {
    let (_dir, factory) = create_test_factory().await;
    let accounts = provider(&factory);
    let cancel = CancelToken::new();

    let mut existing = accounts.create("dup", "tenant-a").unwrap();
    accounts.save(&mut existing, &cancel).await.unwrap();

    let mut batch = vec![
        accounts.create("one", "tenant-a").unwrap(),
        accounts.create("dup", "tenant-a").unwrap(),
        accounts.create("two", "tenant-a").unwrap(),
    ];
    let results = accounts.save_batch(&mut batch, &cancel).await;
    let codes: Vec<u16> = results.iter().map(|r| r.status().code()).collect();
    assert_eq!(codes, vec![200, 409, 200]);
    assert!(accounts.read("two", "tenant-a", &cancel).await.unwrap().is_some());
}

#[tokio::test]
async fn test_query_pushdown_across_pages() {
    let (_dir, factory) = create_test_factory().await;
    let accounts = provider(&factory);
    let cancel = CancelToken::new();

    for (id, balance) in [("a", 5), ("b", 20), ("c", 30), ("d", 1), ("e", 40)] {
        let mut create = accounts.create(id, "tenant-a").unwrap();
        create.record_mut().balance = balance;
        accounts.save(&mut create, &cancel).await.unwrap();
    }

    let query = accounts
        .query()
        .unwrap()
        .filter(vellum_core::field("balance").gt(10))
        .order_by_descending("balance");
    let translation = query.translate().unwrap();
    assert!(!translation
        .residual
        .iter()
        .any(|op| matches!(op, QueryOp::Where(_))));

    let rich = query.to_vec(&cancel).await.unwrap();
    let ids: Vec<&str> = rich.iter().map(|a| a.meta().id.as_str()).collect();
    assert_eq!(ids, vec!["e", "c", "b"]);
}
