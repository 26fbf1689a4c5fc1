//! 集成测试共用的测试服务器：在 `127.0.0.1:0` 上启动，网页目录和存储都放在临时目录中。

#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use simplehttpd::{Config, Context, Server};

pub const INDEX_HTML: &str = "<html>\n<body>index</body>\n</html>\n";
pub const NOT_FOUND_HTML: &str = "<html>\n<body>not found</body>\n</html>\n";

pub struct TestServer {
    dir: tempfile::TempDir,
    server: Arc<Server>,
    accept_thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// 带有 index.html 和 404.html 的默认站点
    pub fn start() -> Self {
        Self::start_with(|config| config, true)
    }

    pub fn start_with<F>(customize: F, with_fallback: bool) -> Self
    where
        F: FnOnce(Config) -> Config,
    {
        let dir = tempfile::tempdir().unwrap();
        let www = dir.path().join("www");
        fs::create_dir(&www).unwrap();
        fs::write(www.join("index.html"), INDEX_HTML).unwrap();
        if with_fallback {
            fs::write(www.join("404.html"), NOT_FOUND_HTML).unwrap();
        }

        let config = Config::new()
            .with_www_root(www.to_str().unwrap())
            .with_store_path(dir.path().join("post.db").to_str().unwrap())
            .with_worker_threads(4)
            .with_queue_capacity(16);
        let config = customize(config);

        let server = Arc::new(Server::bind("127.0.0.1:0", Context::new(config)).unwrap());
        let accept_thread = {
            let server = Arc::clone(&server);
            thread::spawn(move || server.serve().unwrap())
        };
        Self {
            dir,
            server,
            accept_thread: Some(accept_thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn www(&self) -> PathBuf {
        self.dir.path().join("www")
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("post.db")
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// 发送原始请求并读取整个响应（服务端在响应后关闭连接）
    pub fn send(&self, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr()).unwrap();
        stream.write_all(request).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    }

    pub fn send_str(&self, request: &str) -> String {
        String::from_utf8(self.send(request.as_bytes())).unwrap()
    }

    /// 停止监听循环并关闭线程池，可以重复调用
    pub fn shutdown(&mut self) {
        self.server.stop_handle().stop();
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        self.server.shutdown();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 把响应拆分成状态码、响应头和响应体
pub fn parse_response(response: &str) -> (u16, Vec<(String, String)>, String) {
    let (head, body) = response.split_once("\r\n\r\n").unwrap_or((response, ""));
    let mut lines = head.split("\r\n");
    let status_code = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(": "))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (status_code, headers, body.to_string())
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

pub fn read_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}
