use std::path::PathBuf;

const MONITOR_CONFIG: &str = "MONITOR_CONFIG";

pub fn get_config_path() -> Option<String> {
    non_empty_env(MONITOR_CONFIG)
}

const MONITOR_DB: &str = "MONITOR_DB";

pub fn get_database_path() -> Option<PathBuf> {
    non_empty_env(MONITOR_DB).map(PathBuf::from)
}

const WECHAT_WEBHOOK: &str = "WECHAT_WEBHOOK";

pub fn get_webhook_url() -> Option<String> {
    non_empty_env(WECHAT_WEBHOOK)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}
