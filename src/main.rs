// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 简易 HTTP/1.0 服务器
//!
//! 监听线程只负责 accept，连接交给固定大小的工作线程池处理。
//! Tokio 运行时只用于控制面：交互式管理控制台和 Ctrl-C 信号。

use simplehttpd::{Config, Context, Server};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
};

use std::{
    env,
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
    thread,
    time::Duration,
};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const DEFAULT_CONFIG: &str = "config/development.toml";

fn main() {
    // 1. 日志：优先使用 YAML 配置，找不到时退回到只输出到控制台的配置
    init_logging();

    // 2. 配置：第一个命令行参数可以指定配置文件
    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::from_toml(&config_path);
    info!("配置文件{}已载入", config_path);
    info!("www root: {}", config.www_root());

    // 3. 绑定端口并启动线程池
    let address = match config.local() {
        true => Ipv4Addr::LOCALHOST,
        false => Ipv4Addr::UNSPECIFIED,
    };
    let socket = SocketAddrV4::new(address, config.port());
    let server = match Server::bind(socket, Context::new(config)) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("无法绑定{}，错误：{}", socket, e);
            process::exit(1);
        }
    };
    info!("端口{}绑定完成", socket.port());

    // 4. 监听循环运行在独立的控制线程上
    let accept_thread = {
        let server = Arc::clone(&server);
        thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                if let Err(e) = server.serve() {
                    error!("监听循环异常退出：{}", e);
                }
            })
    };
    let accept_thread = match accept_thread {
        Ok(handle) => handle,
        Err(e) => {
            error!("无法创建监听线程：{}", e);
            process::exit(1);
        }
    };

    // 5. 控制面：等待 stop 指令或 Ctrl-C
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            process::exit(1);
        }
    };
    runtime.block_on(wait_for_stop(Arc::clone(&server)));
    // 标准输入的读取任务可能仍然阻塞，不等待它
    runtime.shutdown_timeout(Duration::from_millis(100));

    // 6. 优雅停机
    server.stop_handle().stop();
    if accept_thread.join().is_err() {
        warn!("监听线程异常退出");
    }
    server.shutdown();
    info!("服务器已关闭");
}

fn init_logging() {
    if log4rs::init_file(LOG_CONFIG, Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}",
        )))
        .build();
    let fallback = log4rs::config::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match fallback {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("无法初始化日志系统：{}", e);
            } else {
                warn!("找不到{}，日志只输出到控制台", LOG_CONFIG);
            }
        }
        Err(e) => eprintln!("无法构建日志配置：{}", e),
    }
}

/// 交互式管理控制台。收到 `stop`、标准输入关闭或 Ctrl-C 时返回。
async fn wait_for_stop(server: Arc<Server>) {
    let console = async {
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut input = String::new();
        loop {
            input.clear();
            match reader.read_line(&mut input).await {
                Ok(0) | Err(_) => {
                    // 没有可用的标准输入时（例如作为后台服务运行）只响应信号
                    std::future::pending::<()>().await;
                }
                Ok(_) => {}
            }
            match input.trim() {
                "stop" => {
                    println!("停机指令已激活，服务器将在处理完剩余请求后关闭...");
                    break;
                }
                "help" => {
                    println!("== Webserver Help ==");
                    println!("stop   - 发出停机信号");
                    println!("status - 查看当前服务器运行状态");
                    println!("help   - 显示此帮助信息");
                    println!("====================");
                }
                "status" => {
                    let pool = server.pool();
                    println!("== Webserver 状态 ===");
                    println!("工作线程数: {}", pool.worker_count());
                    println!("活跃任务数: {}", pool.active_tasks());
                    println!("排队任务数: {}", pool.queued());
                    println!("已完成任务数: {}", pool.completed_tasks());
                    println!("====================");
                }
                "" => {}
                cmd => println!("无效的命令：{}", cmd),
            }
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号：{}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = console => info!("控制台收到停机指令"),
        _ = interrupt => info!("收到Ctrl-C，正在停机..."),
    }
}
