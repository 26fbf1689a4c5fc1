use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

/// 请求体大小的上限。请求体整体保存在内存中，配置值超过它时会被压低。
pub const MAX_BODY_SIZE_LIMIT: u64 = 1024 * 1024;

/// 停机时如何处理队列中尚未执行的任务
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// 等待所有已提交的任务执行完毕后再停止工作线程
    Drain,
    /// 工作线程完成手头的任务后立即退出，队列中剩余的任务被丢弃
    Drop,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_www_root")]
    www_root: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default = "default_worker_threads")]
    worker_threads: usize,
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
    #[serde(default = "default_fallback_page")]
    fallback_page: String,
    #[serde(default = "default_index_page")]
    index_page: String,
    #[serde(default = "default_store_path")]
    store_path: String,
    #[serde(default)]
    legacy_fallback_status: bool,
    #[serde(default = "default_shutdown_mode")]
    shutdown_mode: ShutdownMode,
    #[serde(default = "default_max_body_size")]
    max_body_size: u64,
}

fn default_www_root() -> String {
    "www".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_local() -> bool {
    true
}

fn default_worker_threads() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100
}

fn default_fallback_page() -> String {
    "404.html".to_string()
}

fn default_index_page() -> String {
    "index.html".to_string()
}

fn default_store_path() -> String {
    "post.db".to_string()
}

fn default_shutdown_mode() -> ShutdownMode {
    ShutdownMode::Drain
}

fn default_max_body_size() -> u64 {
    8192
}

impl Config {
    pub fn new() -> Self {
        Self {
            www_root: default_www_root(),
            port: default_port(),
            local: default_local(),
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
            fallback_page: default_fallback_page(),
            index_page: default_index_page(),
            store_path: default_store_path(),
            legacy_fallback_status: false,
            shutdown_mode: default_shutdown_mode(),
            max_body_size: default_max_body_size(),
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                error!("无法打开配置文件{}：{}，使用默认配置", filename, e);
                return Config::new().normalized();
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            error!("读取配置文件{}失败：{}，使用默认配置", filename, e);
            return Config::new().normalized();
        }
        Self::parse(&str_val)
    }

    /// 从 TOML 文本构建配置，解析失败时回退到默认配置。
    pub fn parse(text: &str) -> Self {
        let raw_config: Config = match toml::from_str(text) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        raw_config.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.queue_capacity < 2 {
            warn!(
                "queue_capacity被设置为{}，环形队列至少需要2个槽位，因此该值将被改为2。",
                self.queue_capacity
            );
            self.queue_capacity = 2;
        }
        if self.max_body_size > MAX_BODY_SIZE_LIMIT {
            warn!(
                "max_body_size被设置为{}，超过了上限{}，因此该值将被改为{}。",
                self.max_body_size, MAX_BODY_SIZE_LIMIT, MAX_BODY_SIZE_LIMIT
            );
            self.max_body_size = MAX_BODY_SIZE_LIMIT;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn fallback_page(&self) -> &str {
        &self.fallback_page
    }

    pub fn index_page(&self) -> &str {
        &self.index_page
    }

    pub fn store_path(&self) -> &str {
        &self.store_path
    }

    pub fn legacy_fallback_status(&self) -> bool {
        self.legacy_fallback_status
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.shutdown_mode
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }
}

// 测试与嵌入场景下使用的构建方法
impl Config {
    pub fn with_www_root(mut self, root: &str) -> Self {
        self.www_root = root.to_string();
        self
    }

    pub fn with_store_path(mut self, path: &str) -> Self {
        self.store_path = path.to_string();
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self.normalized()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self.normalized()
    }

    pub fn with_legacy_fallback_status(mut self, legacy: bool) -> Self {
        self.legacy_fallback_status = legacy;
        self
    }

    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    pub fn with_max_body_size(mut self, size: u64) -> Self {
        self.max_body_size = size;
        self.normalized()
    }
}
