use serde::{Deserialize, Serialize};

/// 下发引擎运行参数，由嵌入方构造或从其配置反序列化
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// 并发写远端策略的最大任务数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 单次远端调用超时（秒），超时按该服务下发失败处理
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// 告警通知中场景链接使用的站点地址
    #[serde(default = "default_monitor_host")]
    pub monitor_host: String,
    /// 模板和覆盖配置都未指定告警组时使用的默认告警组
    #[serde(default)]
    pub default_user_group_ids: Vec<i64>,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_monitor_host() -> String {
    "http://127.0.0.1".to_string()
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            remote_timeout_secs: default_remote_timeout_secs(),
            monitor_host: default_monitor_host(),
            default_user_group_ids: Vec::new(),
        }
    }
}
