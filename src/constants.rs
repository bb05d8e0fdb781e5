// API Versions
pub const FACEBOOK_API_VERSION: &str = "v20.0";

// API Base URLs
pub const FACEBOOK_BASE_URL: &str = "https://graph.facebook.com";

// Rate limiting
pub const RATE_LIMIT_SIGNATURE: &str = "too many calls";
pub const DEFAULT_RATE_LIMIT_SLEEP_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX_RETRIES: u32 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Retention / windows
pub const DEFAULT_RETENTION_DAYS: i64 = 15;

// Facebook API Fields
pub const FB_INSIGHT_FIELDS: &str = "ad_name,ad_id,adset_name,adset_id,campaign_name,campaign_id,\
account_id,account_name,spend,clicks,inline_link_clicks,impressions,objective,actions,date_start";
pub const FB_CAMPAIGN_FIELDS: &str = "id,name,status,start_time";
pub const FB_INSIGHT_LEVEL: &str = "ad";
pub const FB_TIME_INCREMENT: &str = "1";

// Stores
pub const DEFAULT_POSTGRES_SCHEMA: &str = "public";
pub const DEFAULT_SQLSERVER_SCHEMA: &str = "dbo";
pub const DEFAULT_SQLSERVER_PORT: u16 = 1433;
pub const DEFAULT_DATE_COLUMN: &str = "date";
pub const ACTIONS_TABLE_SUFFIX: &str = "_actions";
pub const DEFAULT_UPSERT_CHUNK_SIZE: usize = 1000;

// SQL Server statement limits
pub const SQLSERVER_MAX_PARAMS: usize = 2000;
pub const SQLSERVER_MAX_ROWS_PER_INSERT: usize = 1000;

// Sync
pub const DEFAULT_SYNC_MAPPINGS: &str = "vw_graph_ads:graph_ads,vw_graph_ads_actions:graph_ads_actions";
pub const DEFAULT_SYNC_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_SYNC_MAX_WORKERS: usize = 8;

// Worker Settings
pub const DEFAULT_ACCOUNT_GROUPS: usize = 2;
