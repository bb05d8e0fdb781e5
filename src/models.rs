use crate::constants::ACTIONS_TABLE_SUFFIX;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A record that belongs to one calendar day, if known.
pub trait Dated {
    fn date(&self) -> Option<NaiveDate>;
}

/// One Meta ad account and the primary-store table its ads land in.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    pub table: String,
}

impl Account {
    pub fn new(account_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            table: table.into(),
        }
    }

    pub fn actions_table(&self) -> String {
        format!("{}{}", self.table, ACTIONS_TABLE_SUFFIX)
    }
}

/// A primary-store view replicated into a secondary-store table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SyncMapping {
    pub view: String,
    pub table: String,
}

impl SyncMapping {
    pub fn new(view: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            view: view.into(),
            table: table.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_table_gets_suffix() {
        let account = Account::new("123", "meta_ads_shop");
        assert_eq!(account.actions_table(), "meta_ads_shop_actions");
    }
}
