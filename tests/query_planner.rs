mod common;

use std::sync::atomic::Ordering;

use chrono::NaiveDate;
use common::{harness, ids, since, test_settings};
use maildesk::engine::{select_recent, EngineSettings};
use maildesk::errors::AppError;
use maildesk::imap::imap_date;
use maildesk::types::ListQuery;

#[tokio::test]
async fn no_matches_resolve_to_empty() {
    let h = harness(test_settings(), 1);

    let uids = h.engine.resolve(since(), 10).await.unwrap();

    assert!(uids.is_empty());
    assert_eq!(h.server.searches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn limit_above_match_count_returns_all() {
    let h = harness(test_settings(), 1);
    for uid in [3, 1, 2] {
        h.server.add_subject(uid, "hello");
    }

    let uids = h.engine.resolve(since(), 10).await.unwrap();

    assert_eq!(uids, vec![1, 2, 3]);
}

#[tokio::test]
async fn keeps_the_most_recent_ids() {
    let h = harness(test_settings(), 1);
    for uid in 1..=10 {
        h.server.add_subject(uid, "hello");
    }

    let uids = h.engine.resolve(since(), 3).await.unwrap();

    assert_eq!(uids, vec![8, 9, 10]);
}

#[test]
fn select_recent_sorts_and_dedups() {
    assert_eq!(select_recent(vec![9, 2, 9, 5, 1], 3), vec![2, 5, 9]);
    assert_eq!(select_recent(vec![4, 4], 10), vec![4]);
    assert!(select_recent(Vec::new(), 5).is_empty());
    assert!(select_recent(vec![1, 2], 0).is_empty());
}

#[tokio::test]
async fn rejected_search_is_treated_as_empty() {
    let h = harness(test_settings(), 1);
    h.server.add_subject(1, "hello");
    h.server
        .fail_search(AppError::Protocol("UID SEARCH: BAD invalid date".into()));

    let uids = h.engine.resolve(since(), 10).await.unwrap();

    assert!(uids.is_empty());
}

#[tokio::test]
async fn broken_connection_during_search_is_an_error() {
    let h = harness(test_settings(), 1);
    h.server
        .fail_search(AppError::Connection("connection reset".into()));

    let err = h.engine.resolve(since(), 10).await.unwrap_err();

    assert!(matches!(err, AppError::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn failed_login_during_search_is_an_error() {
    let h = harness(test_settings(), 1);
    h.server
        .refuse_connections(AppError::Authentication("invalid credentials".into()));

    let err = h.engine.resolve(since(), 10).await.unwrap_err();

    assert!(matches!(err, AppError::Authentication(_)), "got {err:?}");
}

#[tokio::test]
async fn list_summaries_filters_the_recent_window() {
    let h = harness(test_settings(), 2);
    h.server.add_subject(1, "Urgent: old restock");
    h.server.add_subject(2, "Newsletter");
    h.server.add_subject(3, "Urgent restock SKU-303030");
    h.server.add_subject(4, "Invoice");

    let query = ListQuery::since(since()).with_keyword("urgent").with_limit(3);
    let page = h.engine.list_summaries(&query).await.unwrap();

    // Message 1 falls outside the three most recent ids.
    assert_eq!(ids(&page.messages), ["3"]);
    assert_eq!(page.messages[0].sku.as_deref(), Some("SKU-303030"));
    assert!(page.messages[0].urgent);
    assert_eq!(h.server.header_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn list_summaries_with_nothing_to_fetch_skips_fetching() {
    let h = harness(test_settings(), 1);

    let page = h.engine.list_summaries(&ListQuery::since(since())).await.unwrap();

    assert!(page.messages.is_empty());
    assert!(!page.partial);
    assert_eq!(h.server.header_fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn effective_limit_applies_default_and_maximum() {
    let settings = EngineSettings {
        default_limit: 50,
        max_limit: 200,
        ..EngineSettings::default()
    };

    assert_eq!(settings.effective_limit(None), 50);
    assert_eq!(settings.effective_limit(Some(0)), 50);
    assert_eq!(settings.effective_limit(Some(7)), 7);
    assert_eq!(settings.effective_limit(Some(10_000)), 200);
}

#[test]
fn default_since_looks_back_the_configured_days() {
    let settings = EngineSettings {
        lookback_days: 40,
        ..EngineSettings::default()
    };
    let today = chrono::Local::now().date_naive();

    assert_eq!((today - settings.default_since()).num_days(), 40);
}

#[tokio::test]
async fn search_uses_the_requested_cutoff() {
    let h = harness(test_settings(), 1);
    h.server.add_subject(1, "hello");
    let cutoff = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();

    h.engine
        .list_summaries(&ListQuery::since(cutoff).with_limit(5))
        .await
        .unwrap();

    assert_eq!(h.server.searched_since(), vec![cutoff]);
}

#[test]
fn search_dates_are_day_month_abbreviation_year() {
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

    assert_eq!(imap_date(date(2025, 2, 1)), "01-Feb-2025");
    assert_eq!(imap_date(date(2024, 12, 9)), "09-Dec-2024");
    assert_eq!(imap_date(date(2025, 9, 30)), "30-Sep-2025");
}
