use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// IMAP UID of a message in the selected folder.
pub type Uid = u32;

/// Header-derived record served by the list endpoints.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    #[serde(rename = "email_id")]
    pub id: String,
    pub subject: String,
    pub date: String,
    #[serde(rename = "From")]
    pub from: String,
    pub urgent: bool,
    pub sku: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDetail {
    #[serde(rename = "email_id")]
    pub id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub body: String,
}

/// Output of a list operation. `partial` is set when at least one batch
/// failed or missed the request deadline; `messages` then holds whatever the
/// remaining batches produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryPage {
    pub messages: Vec<MessageSummary>,
    pub partial: bool,
    pub failed_batches: usize,
}

/// A logical list request as the HTTP adapter hands it to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub since: NaiveDate,
    pub keyword: Option<String>,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn since(since: NaiveDate) -> Self {
        Self {
            since,
            keyword: None,
            limit: None,
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
