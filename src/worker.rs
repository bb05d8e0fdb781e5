use crate::config::{AccountsConfig, Config, GraphApiConfig};
use crate::constants::DEFAULT_DATE_COLUMN;
use crate::db::{upsert, Database, DatabaseError, SourceStore, UpsertReport, WindowedStore};
use crate::facebook::{FacebookAPI, FacebookApiError, TimeRange};
use crate::models::{Account, SyncMapping};
use crate::sync::{SyncEngine, SyncError, SyncReport, SyncSettings};
use crate::transform::transform;
use crate::warehouse::{TargetStore, Warehouse};
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Graph API error for account {account_id}: {source}")]
    Api {
        account_id: String,
        #[source]
        source: FacebookApiError,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountReport {
    pub account_id: String,
    pub insights: usize,
    pub campaigns: usize,
    pub ads: UpsertReport,
    pub actions: UpsertReport,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<AccountReport>,
    /// `(account_id, error)`
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct JobSummary {
    pub accounts: RunSummary,
    pub syncs: Vec<Result<SyncReport, SyncError>>,
}

impl JobSummary {
    pub fn is_success(&self) -> bool {
        self.accounts.failed.is_empty() && self.syncs.iter().all(Result::is_ok)
    }
}

/// Extract-and-load for one account at a time.
pub struct AdWorker<W: ?Sized> {
    store: Arc<W>,
    graph_api: GraphApiConfig,
    chunk_size: usize,
}

impl<W: ?Sized> Clone for AdWorker<W> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            graph_api: self.graph_api.clone(),
            chunk_size: self.chunk_size,
        }
    }
}

impl<W> AdWorker<W>
where
    W: WindowedStore + ?Sized + 'static,
{
    pub fn new(store: Arc<W>, graph_api: GraphApiConfig, chunk_size: usize) -> Self {
        Self {
            store,
            graph_api,
            chunk_size,
        }
    }

    /// insights → campaigns → transform → `<table>` → `<table>_actions`.
    ///
    /// An aborted pagination fails the account before anything is written.
    pub async fn process_account(
        &self,
        account: &Account,
        token: &str,
        today: NaiveDate,
    ) -> Result<AccountReport, PipelineError> {
        let api_error = |source| PipelineError::Api {
            account_id: account.account_id.clone(),
            source,
        };

        info!(account_id = %account.account_id, table = %account.table, "Starting extraction");

        let fb_api = FacebookAPI::new(&self.graph_api, token.to_string(), account.account_id.clone())
            .map_err(api_error)?;

        let range = TimeRange::trailing(today, self.graph_api.retention_days);
        let insights = fb_api.get_insights(range).await.into_result().map_err(api_error)?;
        let campaigns = fb_api.get_campaigns().await.into_result().map_err(api_error)?;

        let (ads, actions) = transform(&insights, &campaigns, &account.account_id);
        info!(
            account_id = %account.account_id,
            ads = ads.len(),
            actions = actions.len(),
            "Processed records"
        );

        let ads_report = upsert(
            self.store.as_ref(),
            &ads,
            &account.table,
            DEFAULT_DATE_COLUMN,
            self.chunk_size,
        )
        .await?;
        let actions_report = upsert(
            self.store.as_ref(),
            &actions,
            &account.actions_table(),
            DEFAULT_DATE_COLUMN,
            self.chunk_size,
        )
        .await?;

        info!(account_id = %account.account_id, "Extraction completed");

        Ok(AccountReport {
            account_id: account.account_id.clone(),
            insights: insights.len(),
            campaigns: campaigns.len(),
            ads: ads_report,
            actions: actions_report,
        })
    }

    /// Groups run one after another; accounts inside a group run concurrently.
    /// A failing account never stops its siblings.
    pub async fn run_accounts(
        &self,
        accounts: &AccountsConfig,
        num_groups: usize,
        today: NaiveDate,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for (group_idx, group) in accounts.split_into_groups(num_groups).into_iter().enumerate() {
            info!(group = group_idx + 1, accounts = group.len(), "Processing account group");

            let mut join_set = JoinSet::new();
            for (_, account, token) in group {
                let worker = self.clone();
                join_set.spawn(async move {
                    let result = worker.process_account(&account, &token, today).await;
                    (account.account_id, result)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((_, Ok(report))) => summary.succeeded.push(report),
                    Ok((account_id, Err(e))) => {
                        error!(account_id = %account_id, error = %e, "Error processing account");
                        summary.failed.push((account_id, e.to_string()));
                    }
                    Err(e) => {
                        error!(error = %e, "Account task panicked");
                        summary.failed.push(("<unknown>".to_string(), e.to_string()));
                    }
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Account extraction finished"
        );
        summary
    }
}

/// Attempts every mapping regardless of how the others or the accounts went.
pub async fn run_sync<S, T>(
    engine: &SyncEngine<S, T>,
    mappings: &[SyncMapping],
    today: NaiveDate,
) -> Vec<Result<SyncReport, SyncError>>
where
    S: SourceStore + ?Sized,
    T: TargetStore + ?Sized + 'static,
{
    let mut results = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let result = engine
            .sync(mapping, today)
            .await
            .and_then(SyncReport::into_result);
        if let Err(e) = &result {
            error!(view = %mapping.view, table = %mapping.table, error = %e, "Sync failed");
        }
        results.push(result);
    }
    results
}

/// Accounts, then sync, against `store` and `target`.
pub async fn run_pipeline<P, T>(
    store: Arc<P>,
    target: Arc<T>,
    config: &Config,
    today: NaiveDate,
) -> JobSummary
where
    P: WindowedStore + SourceStore + ?Sized + 'static,
    T: TargetStore + ?Sized + 'static,
{
    let worker = AdWorker::new(
        Arc::clone(&store),
        config.graph_api.clone(),
        config.postgres.upsert_chunk_size,
    );
    let accounts = worker
        .run_accounts(&config.accounts, config.account_groups, today)
        .await;

    let engine = SyncEngine::new(store, target, SyncSettings::from(&config.sync));
    let syncs = run_sync(&engine, &config.sync.mappings, today).await;

    JobSummary { accounts, syncs }
}

/// One full run with connections opened and disposed here.
pub async fn run_job(config: &Config, today: NaiveDate) -> Result<JobSummary, PipelineError> {
    let database = Arc::new(Database::connect(&config.postgres).await?);
    let warehouse = Arc::new(Warehouse::new(&config.sqlserver));

    let summary = run_pipeline(Arc::clone(&database), Arc::clone(&warehouse), config, today).await;

    match Arc::try_unwrap(database) {
        Ok(database) => database.close().await,
        Err(_) => warn!("Database still shared at shutdown, dropping"),
    }
    match Arc::try_unwrap(warehouse) {
        Ok(warehouse) => warehouse.close().await,
        Err(_) => warn!("Warehouse still shared at shutdown, dropping"),
    }

    Ok(summary)
}
