// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在处理单个连接的过程中可能出现的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：协议错误、资源缺失、存储错误以及线程池状态错误。
//! - **语义映射**：每个变体都可以通过 [`Exception::status_code`] 转换为响应状态码。
//! - **就地记录**：底层的 I/O 细节在出错位置写入日志，变体本身只携带分类信息。

use std::fmt;

/// 服务器处理请求过程中发生的异常类型。
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    /// 客户端在发送请求行之前就关闭了连接，此时不需要任何响应。
    ConnectionClosed,
    /// 请求行或表单内容无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行中没有 `HTTP/` 标记。
    MissingHttpVersion,
    /// 方法不是 GET、HEAD、POST 之一。
    UnSupportedRequestMethod,
    /// 请求行或请求头超过了长度上限。
    LineTooLong,
    /// 资源路径超过了长度上限。
    PathTooLong,
    /// 请求头行数超过了上限。
    TooManyHeaders,
    /// POST 请求的 `Content-Length` 不是合法的十进制整数。
    InvalidContentLength,
    /// POST 请求体超过了配置允许的大小。
    BodyTooLarge,
    /// 连接上可读的字节数少于 `Content-Length` 声明的长度。
    TruncatedBody,
    /// POST 请求体不是 `key=value` 形式。
    MalformedForm,
    /// 请求的文件以及后备文件都不存在。
    FileNotFound,
    /// 键值存储无法打开或读取。
    StoreUnavailable,
    /// 键值存储写入失败。
    StoreWriteFailed,
    /// 线程池已关闭，不再接受任务。
    PoolShutDown,
}

use Exception::*;

impl Exception {
    /// 该异常对应的响应状态码。`None` 表示不发送任何响应。
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ConnectionClosed => None,
            RequestIsNotUtf8 | MissingHttpVersion | UnSupportedRequestMethod | LineTooLong
            | PathTooLong | TooManyHeaders | InvalidContentLength | BodyTooLarge
            | TruncatedBody | MalformedForm | FileNotFound => Some(400),
            StoreUnavailable | StoreWriteFailed | PoolShutDown => Some(500),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionClosed => write!(f, "Connection closed before a request was received"),
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MissingHttpVersion => write!(f, "Request line has no HTTP version"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            LineTooLong => write!(f, "Request line or header too long"),
            PathTooLong => write!(f, "Request path too long"),
            TooManyHeaders => write!(f, "Too many request headers"),
            InvalidContentLength => write!(f, "Invalid Content-Length"),
            BodyTooLarge => write!(f, "Request body too large"),
            TruncatedBody => write!(f, "Request body shorter than Content-Length"),
            MalformedForm => write!(f, "Request body is not a key=value form"),
            FileNotFound => write!(f, "Neither the file nor the fallback page exists"),
            StoreUnavailable => write!(f, "Couldn't open the key/value store"),
            StoreWriteFailed => write!(f, "Couldn't write to the key/value store"),
            PoolShutDown => write!(f, "Worker pool is shut down"),
        }
    }
}

impl std::error::Error for Exception {}
