pub mod agent;
pub mod alert_record;
pub mod alert_rule;
pub mod api_key;
pub mod check_result;
pub mod latest_snapshot;
pub mod monitor;
pub mod monitor_verdict;
pub mod property;
