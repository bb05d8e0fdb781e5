mod support;

use meta_ads_pipeline::config::AccountsConfig;
use meta_ads_pipeline::db::upsert;
use meta_ads_pipeline::facebook::{Numeric, RawAction, RawCampaignItem, RawInsightItem};
use meta_ads_pipeline::transform::transform;
use meta_ads_pipeline::worker::AdWorker;
use serde_json::json;
use std::sync::Arc;
use support::{day, graph_config, MemoryStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_account(server: &MockServer, account_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v20.0/act_{account_id}/insights")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
            "account_id": account_id,
            "account_name": "Shop",
            "ad_id": "ad-1",
            "campaign_id": "c-1",
            "spend": "10.5",
            "clicks": "3",
            "impressions": "250",
            "actions": [{"action_type": "purchase", "value": "2"}],
            "date_start": "2024-01-01",
            "date_stop": "2024-01-01"
        }]})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v20.0/act_{account_id}/campaigns")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
            {"id": "c-1", "name": "Launch", "status": "ACTIVE", "start_time": "2023-12-01T00:00:00+0000"}
        ]})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn single_account_end_to_end() {
    let server = MockServer::start().await;
    mount_account(&server, "101").await;

    let store = Arc::new(MemoryStore::default());
    let worker = AdWorker::new(store.clone(), graph_config(server.uri()), 500);
    let accounts = AccountsConfig::parse("101:meta_shop", "tok").unwrap();
    let account = &accounts.accounts()[0];

    let report = worker
        .process_account(account, accounts.token_for(0), day(2024, 1, 16))
        .await
        .unwrap();

    assert_eq!(report.insights, 1);
    assert_eq!(report.campaigns, 1);

    let ads = store.rows("meta_shop");
    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0]["account_id"], "101");
    assert_eq!(ads[0]["campaign_status"], "ACTIVE");
    assert_eq!(ads[0]["spend"], 10.5);
    assert_eq!(ads[0]["clicks"], 3);
    assert_eq!(ads[0]["date"], "2024-01-01");
    assert_eq!(ads[0]["unique_id"].as_str().unwrap().len(), 64);

    let actions = store.rows("meta_shop_actions");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["account_id"], "101");
    assert_eq!(actions[0]["action_type"], "purchase");
    assert_eq!(actions[0]["value"], 2);
    assert_eq!(actions[0]["date"], "2024-01-01");
}

#[tokio::test]
async fn failing_account_does_not_stop_siblings() {
    let server = MockServer::start().await;
    mount_account(&server, "101").await;
    Mock::given(method("GET"))
        .and(path("/v20.0/act_202/insights"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Invalid OAuth access token", "code": 190}
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::default());
    let worker = AdWorker::new(store.clone(), graph_config(server.uri()), 500);
    let accounts = AccountsConfig::parse("101:shop_a,202:shop_b", "t0,t1").unwrap();

    let summary = worker.run_accounts(&accounts, 2, day(2024, 1, 16)).await;

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.succeeded[0].account_id, "101");
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "202");
    assert_eq!(store.rows("shop_a").len(), 1);
    assert!(store.rows("shop_b").is_empty());
    assert!(store.rows("shop_b_actions").is_empty());
}

#[tokio::test]
async fn store_failure_fails_only_that_account() {
    let server = MockServer::start().await;
    mount_account(&server, "101").await;
    mount_account(&server, "202").await;

    let store = Arc::new(MemoryStore {
        fail_inserts_into: Some("shop_b".to_string()),
        ..Default::default()
    });
    let worker = AdWorker::new(store.clone(), graph_config(server.uri()), 500);
    let accounts = AccountsConfig::parse("101:shop_a,202:shop_b", "t0").unwrap();

    let summary = worker.run_accounts(&accounts, 1, day(2024, 1, 16)).await;

    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.failed[0].0, "202");
    assert!(summary.failed[0].1.contains("refused"));
}

#[tokio::test]
async fn upsert_twice_leaves_one_copy() {
    let insights: Vec<RawInsightItem> = (1..=3)
        .map(|d| RawInsightItem {
            ad_id: Some(format!("ad-{d}")),
            spend: Some(Numeric::Float(1.0)),
            actions: vec![RawAction {
                action_type: Some("link_click".to_string()),
                value: Some(Numeric::Int(d)),
            }],
            date_start: Some(format!("2024-01-0{d}")),
            ..Default::default()
        })
        .collect();
    let campaigns: Vec<RawCampaignItem> = Vec::new();
    let (ads, actions) = transform(&insights, &campaigns, "101");

    let store = MemoryStore::default();
    store.tables.lock().unwrap().insert(
        "shop".to_string(),
        vec![
            json!({"ad_id": "stale", "date": "2024-01-02"}),
            json!({"ad_id": "outside", "date": "2023-12-31"}),
        ],
    );

    upsert(&store, &ads, "shop", "date", 2).await.unwrap();
    let once = store.rows("shop");
    let report = upsert(&store, &ads, "shop", "date", 2).await.unwrap();
    let twice = store.rows("shop");

    assert_eq!(once, twice);
    assert_eq!(report.deleted, 3);
    assert_eq!(twice.len(), 4);
    assert!(twice.iter().any(|r| r["ad_id"] == "outside"));
    assert!(!twice.iter().any(|r| r["ad_id"] == "stale"));

    upsert(&store, &actions, "shop_actions", "date", 2).await.unwrap();
    upsert(&store, &actions, "shop_actions", "date", 2).await.unwrap();
    assert_eq!(store.rows("shop_actions").len(), 3);
}
