// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! 该模块定义了 `simplehttpd` 遵循的 HTTP/1.0 子集相关常量和数据结构，包括：
//! - 响应中用到的状态码及其原因短语（Reason Phrase）。
//! - 按文件后缀决定的 MIME 类型映射表。
//! - HTTP 方法、版本的强类型枚举。
//! - 请求解析阶段的长度上限。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "Simple HTTP Server";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 请求行中必须出现的协议标记
pub const HTTP_VERSION_MARKER: &str = "HTTP/";

/// 唯一被解释的请求头（大小写敏感的前缀匹配）
pub const CONTENT_LENGTH_HEADER: &str = "Content-Length:";

/// 无法识别后缀时使用的 MIME 类型
pub const FALLBACK_MIME: &str = "text/plain";

/// 请求行与每一行请求头的最大字节数（含行尾）
pub const MAX_LINE_LENGTH: usize = 1024;

/// 资源路径的最大字节数
pub const MAX_PATH_LENGTH: usize = 255;

/// 请求头的最大行数
pub const MAX_HEADER_LINES: usize = 100;

lazy_static! {
    /// 本服务器会发出的状态码与原因短语映射表。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(200, "OK");
        map.insert(400, "Bad Request");
        map.insert(404, "Not Found");
        map.insert(500, "Internal Server Error");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表。匹配区分大小写。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("html", "text/html");
        map.insert("htm", "text/html");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("gif", "image/gif");
        map.insert("ico", "image/x-icon");
        map
    };
}

/// 根据路径中最后一个 `.` 之后的内容决定 `Content-Type`。
///
/// 没有后缀或后缀未知时返回 [`FALLBACK_MIME`]。
pub fn content_type(path: &str) -> &'static str {
    match path.rsplit_once('.') {
        Some((_, extension)) => MIME_TYPES.get(extension).copied().unwrap_or(FALLBACK_MIME),
        None => FALLBACK_MIME,
    }
}

/// 响应使用的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    /// HTTP/1.0 版本
    V1_0,
}

/// 支持的 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 只获取资源的响应头
    Head,
    /// 提交 `key=value` 表单，随后同样返回资源
    Post,
}

impl HttpRequestMethod {
    /// 精确匹配（区分大小写）方法名，其余一律视为不支持。
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(HttpRequestMethod::Get),
            "HEAD" => Some(HttpRequestMethod::Head),
            "POST" => Some(HttpRequestMethod::Post),
            _ => None,
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}
