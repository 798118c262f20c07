use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_base_url: String,
    pub session_path: PathBuf,
    pub poll_interval: Duration,
}

impl Config {
    pub fn load() -> Self {
        let debug = cfg!(debug_assertions);
        let api_base_url = env::var("ORGCHAT_API_BASE_URL").unwrap_or_else(|_| {
            if debug {
                "http://localhost:8000/api".to_string()
            } else {
                "https://portal.orgchat.app/api".to_string()
            }
        });
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        let session_path = env::var("ORGCHAT_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir(debug).join("session.json"));

        let poll_interval = env::var("ORGCHAT_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        Self {
            api_base_url,
            session_path,
            poll_interval,
        }
    }
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

fn default_data_dir(debug: bool) -> PathBuf {
    let base = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    let dir_name = if debug { "orgchat-dev" } else { "orgchat" };
    base.join(".local").join("share").join(dir_name)
}
