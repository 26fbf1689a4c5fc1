// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接处理与监听循环
//!
//! [`Server::serve`] 运行在单独的控制线程上，只负责 accept 并把连接包装成任务提交给
//! [`WorkerPool`]。解析请求、读写文件、访问存储全部在工作线程的 [`handle_connection`] 中完成。
//!
//! 所有错误都在单个连接的边界内被消化：要么发送一个正常响应，要么发送错误响应，
//! 不会影响其他连接或线程池本身。

use std::io::{self, BufReader, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::{
    config::Config,
    exception::Exception,
    param::{content_type, HttpRequestMethod},
    pool::WorkerPool,
    request::Request,
    response::Response,
    store::{record_submission, SledStoreBackend, StoreBackend},
};

/// 关闭连接前等待客户端发完剩余数据的总时长
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);
/// 关闭连接前最多读掉的字节数
const LINGER_MAX_BYTES: usize = 64 * 1024;

/// 所有连接共享的只读服务端状态
pub struct Context {
    config: Config,
    root: PathBuf,
    backend: Arc<dyn StoreBackend>,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(SledStoreBackend::new(config.store_path()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Arc<dyn StoreBackend>) -> Self {
        let root = PathBuf::from(config.www_root());
        Self {
            config,
            root,
            backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// 处理一个连接上的一次请求。函数返回时连接随 `stream` 一起被关闭。
pub fn handle_connection<S: Read + Write>(mut stream: S, id: u64, ctx: &Context) {
    let start_time = Instant::now();

    let parsed = {
        let mut reader = BufReader::new(&mut stream);
        Request::parse(&mut reader, id, ctx.config.max_body_size())
    };
    let request = match parsed {
        Ok(request) => request,
        Err(e) => {
            match Response::from_exception(e, id) {
                Some(response) => {
                    warn!("[ID{}]请求解析失败：{}，返回{}", id, e, response.status_code());
                    info!("[ID{}] - - {}", id, response.status_code());
                    send(response, &mut stream, id);
                }
                None => debug!("[ID{}]连接在请求到达之前被关闭", id),
            }
            return;
        }
    };

    let response = match build_response(&request, id, ctx) {
        Ok(response) => response,
        Err(e) => match Response::from_exception(e, id) {
            Some(response) => {
                warn!("[ID{}]处理请求失败：{}，返回{}", id, e, response.status_code());
                response
            }
            None => return,
        },
    };
    let response = match request.method() {
        HttpRequestMethod::Head => response.head_only(),
        _ => response,
    };

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    info!(
        "[ID{}] {} /{} {} {}",
        id,
        request.method(),
        request.path(),
        response.status_code(),
        response.information()
    );
    send(response, &mut stream, id);
}

fn send<W: Write>(response: Response, stream: &mut W, id: u64) {
    if let Err(e) = response.write_to(stream, id) {
        warn!("[ID{}]发送响应失败：{}", id, e);
    }
}

/// POST 先写入存储，然后和 GET、HEAD 一样提供文件。
fn build_response(request: &Request, id: u64, ctx: &Context) -> Result<Response, Exception> {
    if request.method() == HttpRequestMethod::Post {
        match request.body() {
            Some(body) => {
                record_submission(ctx.backend.as_ref(), body, id)?;
            }
            None => debug!("[ID{}]POST请求没有请求体，跳过存储", id),
        }
    }
    serve_resource(request.path(), id, ctx)
}

/// 打开请求的文件；不存在时换成回退页面，回退页面也不存在时返回 `FileNotFound`。
fn serve_resource(path: &str, id: u64, ctx: &Context) -> Result<Response, Exception> {
    let relative = match path.is_empty() {
        true => ctx.config.index_page(),
        false => path,
    };
    if let Some(target) = route(relative, &ctx.root) {
        debug!("[ID{}]映射物理路径：{}", id, target.display());
        match Response::from_file(&target, content_type(relative), 200, id) {
            Ok(response) => return Ok(response),
            Err(Exception::FileNotFound) => {}
            Err(e) => return Err(e),
        }
    }

    let fallback = ctx.config.fallback_page();
    let status = match ctx.config.legacy_fallback_status() {
        true => 200,
        false => 404,
    };
    warn!(
        "[ID{}]请求的路径：{} 不存在，返回{}（{}）",
        id, relative, fallback, status
    );
    match Response::from_file(&ctx.root.join(fallback), content_type(fallback), status, id) {
        Err(Exception::FileNotFound) => {
            error!("[ID{}]回退页面{}也不存在", id, fallback);
            Err(Exception::FileNotFound)
        }
        other => other,
    }
}

/// 把相对路径拼接到根目录下。含有 `..` 的路径不会被解析。
fn route(relative: &str, root: &Path) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    match escapes {
        true => None,
        false => Some(root.join(relative)),
    }
}

/// 先关闭写端，再读掉客户端尚未被读取的数据，避免内核以 RST 关闭连接导致响应丢失。
///
/// 整个过程不超过 [`LINGER_TIMEOUT`]，最多读掉 [`LINGER_MAX_BYTES`] 字节，
/// 持续缓慢发送数据的客户端也无法长期占住工作线程。
fn linger_close(mut stream: TcpStream, id: u64) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let deadline = Instant::now() + LINGER_TIMEOUT;
    let mut buffer = [0u8; 1024];
    let mut drained = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("[ID{}]等待客户端关闭超时", id);
            break;
        }
        if stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        match stream.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
        if drained >= LINGER_MAX_BYTES {
            debug!("[ID{}]关闭前已读掉{}字节，不再等待", id, drained);
            break;
        }
    }
    debug!("[ID{}]TCP连接已关闭", id);
}

/// 监听循环的停机开关，可以跨线程克隆。
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl StopHandle {
    /// 设置停机标志，并用一个本地连接唤醒阻塞在 accept 上的监听循环。
    pub fn stop(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut wake_addr = self.addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        if let Err(e) = TcpStream::connect(wake_addr) {
            warn!("无法唤醒监听循环：{}", e);
        }
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: WorkerPool,
    context: Arc<Context>,
    stop: Arc<AtomicBool>,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A, context: Context) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Self::new(listener, context)
    }

    /// 在已绑定的监听器上创建服务端，并启动线程池。
    pub fn new(listener: TcpListener, context: Context) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let config = context.config();
        let pool = WorkerPool::start(
            config.worker_threads(),
            config.queue_capacity(),
            config.shutdown_mode(),
        )?;
        info!("服务端已在{}上监听Socket连接", local_addr);
        Ok(Self {
            listener,
            local_addr,
            pool,
            context: Arc::new(context),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
            addr: self.local_addr,
        }
    }

    /// 接受连接并提交给线程池，直到停机开关被触发。不会关闭线程池。
    pub fn serve(&self) -> io::Result<()> {
        let mut id: u64 = 0;
        for stream in self.listener.incoming() {
            if self.stop.load(Ordering::SeqCst) {
                info!("监听循环接收到停机指令，正在退出...");
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("接受连接失败：{}", e);
                    continue;
                }
            };
            let conn_id = id;
            id += 1;
            match stream.peer_addr() {
                Ok(addr) => debug!("[ID{}]TCP连接已建立：{}", conn_id, addr),
                Err(_) => debug!("[ID{}]TCP连接已建立", conn_id),
            }

            let context = Arc::clone(&self.context);
            let submitted = self.pool.submit(move || {
                handle_connection(&stream, conn_id, &context);
                linger_close(stream, conn_id);
            });
            if let Err(e) = submitted {
                warn!("[ID{}]无法提交连接：{}，监听循环退出", conn_id, e);
                break;
            }
        }
        Ok(())
    }

    /// 按配置的停机模式关闭线程池。
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
