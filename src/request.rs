// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求解析模块
//!
//! 该模块直接在连接的输入流上逐行解析请求，状态转换如下：
//!
//! ```text
//! Start -> ReadRequestLine -> ReadHeaders -> (BodyExpected | NoBody) -> Done
//! ```
//!
//! 任何一步失败都会以 `Err(Exception)` 结束，由连接处理层决定返回的响应。
//! 1. 请求行必须包含 `HTTP/`，方法必须是 GET、HEAD、POST 之一。
//! 2. 路径由方法之后、`HTTP` 版本标记之前的所有片段以 `/` 重新拼接而成，因此总是相对路径。
//! 3. 请求头中只解释 `Content-Length`，重复出现时以最后一次为准。
//! 4. 只有 POST 且 `Content-Length > 0` 时才读取请求体，读取的字节数必须与声明一致。

use std::io::{BufRead, Read};

use bytes::Bytes;
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;

use crate::{exception::Exception, param::*};

/// 按声明长度预先分配的缓冲区上限，更长的请求体边读边增长
const BODY_PREALLOCATION: u64 = 64 * 1024;

lazy_static! {
    /// 请求行按空格和 `/` 切分
    static ref TOKEN_SEPARATOR: Regex = Regex::new(r"[ /]+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Start,
    ReadRequestLine,
    ReadHeaders,
    BodyExpected,
    NoBody,
    Done,
}

/// 解析完成的请求。只在单个连接的生命周期内存在。
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpRequestMethod,
    /// 去掉了前导分隔符的相对路径，可能为空
    path: String,
    /// 最后一个 `Content-Length` 头的原始值（已去除首尾空白）
    content_length_raw: Option<String>,
    /// POST 请求体
    body: Option<Bytes>,
}

impl Request {
    /// 从连接的输入流解析一个请求。
    ///
    /// # 参数
    /// * `reader` - 连接读端（带缓冲）。
    /// * `id` - 连接 ID，用于日志追踪。
    /// * `max_body_size` - 允许的最大请求体字节数。
    pub fn parse<R: BufRead>(
        reader: &mut R,
        id: u64,
        max_body_size: u64,
    ) -> Result<Self, Exception> {
        let mut state = ParseState::Start;
        let mut method = HttpRequestMethod::Get;
        let mut path = String::new();
        let mut content_length_raw = None;
        let mut body = None;

        while state != ParseState::Done {
            debug!("[ID{}]请求解析状态：{:?}", id, state);
            state = match state {
                ParseState::Start => ParseState::ReadRequestLine,
                ParseState::ReadRequestLine => {
                    let line = match read_line(reader, id)? {
                        Some(line) => line,
                        None => return Err(Exception::ConnectionClosed),
                    };
                    let (m, p) = parse_request_line(&line, id)?;
                    method = m;
                    path = p;
                    ParseState::ReadHeaders
                }
                ParseState::ReadHeaders => {
                    content_length_raw = read_headers(reader, id)?;
                    let expects_body = method == HttpRequestMethod::Post
                        && parse_content_length(content_length_raw.as_deref(), id)?
                            .map_or(false, |len| len > 0);
                    match expects_body {
                        true => ParseState::BodyExpected,
                        false => ParseState::NoBody,
                    }
                }
                ParseState::BodyExpected => {
                    let declared = parse_content_length(content_length_raw.as_deref(), id)?
                        .unwrap_or(0);
                    body = Some(read_body(reader, declared, max_body_size, id)?);
                    ParseState::Done
                }
                ParseState::NoBody => ParseState::Done,
                ParseState::Done => ParseState::Done,
            };
        }

        Ok(Self {
            method,
            path,
            content_length_raw,
            body,
        })
    }
}

impl Request {
    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取相对资源路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 解析后的 `Content-Length`，值不是合法整数时返回 `InvalidContentLength`
    pub fn content_length(&self) -> Result<Option<u64>, Exception> {
        match self.content_length_raw.as_deref() {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Exception::InvalidContentLength),
        }
    }

    /// 获取 POST 请求体
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// 读取一行（含行尾），超过 [`MAX_LINE_LENGTH`] 时报错。流结束时返回 `None`。
fn read_line<R: BufRead>(reader: &mut R, id: u64) -> Result<Option<Vec<u8>>, Exception> {
    let mut line = Vec::new();
    let limit = MAX_LINE_LENGTH as u64 + 1;
    match reader.by_ref().take(limit).read_until(b'\n', &mut line) {
        Ok(0) => Ok(None),
        Ok(_) => {
            if line.len() > MAX_LINE_LENGTH {
                error!("[ID{}]请求行或请求头超过{}字节", id, MAX_LINE_LENGTH);
                return Err(Exception::LineTooLong);
            }
            Ok(Some(line))
        }
        Err(e) => {
            error!("[ID{}]读取请求时遇到错误：{}", id, e);
            Err(Exception::ConnectionClosed)
        }
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(line: &[u8], id: u64) -> Result<(HttpRequestMethod, String), Exception> {
    let line = match std::str::from_utf8(trim_line_ending(line)) {
        Ok(s) => s,
        Err(_) => {
            error!("[ID{}]请求行不是合法的UTF-8", id);
            return Err(Exception::RequestIsNotUtf8);
        }
    };

    if !line.contains(HTTP_VERSION_MARKER) {
        error!("[ID{}]请求行缺少HTTP版本：{}", id, line);
        return Err(Exception::MissingHttpVersion);
    }

    let mut tokens = TOKEN_SEPARATOR.split(line).filter(|t| !t.is_empty());

    let method = match tokens.next().and_then(HttpRequestMethod::from_token) {
        Some(m) => m,
        None => {
            error!("[ID{}]不支持的HTTP请求方法：{}", id, line);
            return Err(Exception::UnSupportedRequestMethod);
        }
    };

    let path = tokens
        .take_while(|t| *t != "HTTP")
        .collect::<Vec<&str>>()
        .join("/");
    if path.len() > MAX_PATH_LENGTH {
        error!("[ID{}]请求路径超过{}字节", id, MAX_PATH_LENGTH);
        return Err(Exception::PathTooLong);
    }

    debug!("[ID{}]请求行解析完成：{} /{}", id, method, path);
    Ok((method, path))
}

/// 读取请求头直到空行或流结束，返回最后一个 `Content-Length` 的原始值。
fn read_headers<R: BufRead>(reader: &mut R, id: u64) -> Result<Option<String>, Exception> {
    let mut content_length = None;
    let mut count = 0;
    while let Some(line) = read_line(reader, id)? {
        let line = trim_line_ending(&line);
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > MAX_HEADER_LINES {
            error!("[ID{}]请求头超过{}行", id, MAX_HEADER_LINES);
            return Err(Exception::TooManyHeaders);
        }
        if let Some(value) = line.strip_prefix(CONTENT_LENGTH_HEADER.as_bytes()) {
            let value = String::from_utf8_lossy(value).trim().to_string();
            debug!("[ID{}]Content-Length: {}", id, value);
            content_length = Some(value);
        }
    }
    Ok(content_length)
}

fn parse_content_length(raw: Option<&str>, id: u64) -> Result<Option<u64>, Exception> {
    match raw {
        None => Ok(None),
        Some(raw) => match raw.parse::<u64>() {
            Ok(len) => Ok(Some(len)),
            Err(_) => {
                error!("[ID{}]非法的Content-Length：{}", id, raw);
                Err(Exception::InvalidContentLength)
            }
        },
    }
}

fn read_body<R: BufRead>(
    reader: &mut R,
    declared: u64,
    max_body_size: u64,
    id: u64,
) -> Result<Bytes, Exception> {
    if declared > max_body_size {
        error!(
            "[ID{}]请求体声明为{}字节，超过上限{}字节",
            id, declared, max_body_size
        );
        return Err(Exception::BodyTooLarge);
    }
    let mut body = Vec::with_capacity(declared.min(BODY_PREALLOCATION) as usize);
    if let Err(e) = reader.by_ref().take(declared).read_to_end(&mut body) {
        error!("[ID{}]读取请求体时遇到错误：{}", id, e);
        return Err(Exception::TruncatedBody);
    }
    if (body.len() as u64) < declared {
        error!(
            "[ID{}]请求体只有{}字节，少于声明的{}字节",
            id,
            body.len(),
            declared
        );
        return Err(Exception::TruncatedBody);
    }
    debug!("[ID{}]请求体读取完成，共{}字节", id, body.len());
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> Result<Request, Exception> {
        Request::parse(&mut Cursor::new(raw.to_vec()), 0, 8192)
    }

    #[test]
    fn test_parse_get_request() {
        let request = parse(b"GET /index.html HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Get);
        assert_eq!(request.path(), "index.html");
        assert!(request.body().is_none());
    }

    #[test]
    fn test_parse_head_request() {
        let request = parse(b"HEAD /anim.gif HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Head);
        assert_eq!(request.path(), "anim.gif");
    }

    #[test]
    fn test_nested_path_is_rejoined() {
        let request = parse(b"GET /docs/img/logo.gif HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.path(), "docs/img/logo.gif");
    }

    #[test]
    fn test_repeated_slashes_are_collapsed() {
        let request = parse(b"GET //docs///a.html HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.path(), "docs/a.html");
    }

    #[test]
    fn test_root_path_is_empty() {
        let request = parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(request.path(), "");
    }

    #[test]
    fn test_lf_only_line_endings() {
        let request = parse(b"GET /a.html HTTP/1.0\nHost: x\n\n").unwrap();
        assert_eq!(request.path(), "a.html");
    }

    #[test]
    fn test_parse_post_request_with_body() {
        let request =
            parse(b"POST /store HTTP/1.0\r\nContent-Length: 10\r\n\r\nname=alice").unwrap();
        assert_eq!(request.method(), HttpRequestMethod::Post);
        assert_eq!(request.path(), "store");
        assert_eq!(request.content_length(), Ok(Some(10)));
        assert_eq!(request.body().unwrap().as_ref(), b"name=alice");
    }

    #[test]
    fn test_body_stops_at_content_length() {
        let request =
            parse(b"POST /store HTTP/1.0\r\nContent-Length: 5\r\n\r\nname=alice").unwrap();
        assert_eq!(request.body().unwrap().as_ref(), b"name=");
    }

    #[test]
    fn test_last_content_length_wins() {
        let request = parse(
            b"POST /s HTTP/1.0\r\nContent-Length: 100\r\nContent-Length: 3\r\n\r\na=b",
        )
        .unwrap();
        assert_eq!(request.content_length(), Ok(Some(3)));
        assert_eq!(request.body().unwrap().as_ref(), b"a=b");
    }

    #[test]
    fn test_content_length_header_is_case_sensitive() {
        let request = parse(b"POST /s HTTP/1.0\r\ncontent-length: 3\r\n\r\na=b").unwrap();
        assert_eq!(request.content_length(), Ok(None));
        assert!(request.body().is_none());
    }

    #[test]
    fn test_get_ignores_body_and_bad_length() {
        let request = parse(b"GET /a.html HTTP/1.0\r\nContent-Length: abc\r\n\r\n").unwrap();
        assert_eq!(request.content_length(), Err(Exception::InvalidContentLength));
        assert!(request.body().is_none());
    }

    #[test]
    fn test_post_with_bad_length_fails() {
        let result = parse(b"POST /s HTTP/1.0\r\nContent-Length: 12abc\r\n\r\na=b");
        assert_eq!(result.unwrap_err(), Exception::InvalidContentLength);
    }

    #[test]
    fn test_post_without_length_has_no_body() {
        let request = parse(b"POST /s HTTP/1.0\r\n\r\n").unwrap();
        assert!(request.body().is_none());
    }

    #[test]
    fn test_truncated_body() {
        let result = parse(b"POST /store HTTP/1.0\r\nContent-Length: 15\r\n\r\nname=alice");
        assert_eq!(result.unwrap_err(), Exception::TruncatedBody);
    }

    #[test]
    fn test_body_too_large() {
        let result = Request::parse(
            &mut Cursor::new(b"POST /s HTTP/1.0\r\nContent-Length: 100\r\n\r\n".to_vec()),
            0,
            10,
        );
        assert_eq!(result.unwrap_err(), Exception::BodyTooLarge);
    }

    #[test]
    fn test_huge_content_length_without_limit() {
        let raw = format!(
            "POST /s HTTP/1.0\r\nContent-Length: {}\r\n\r\nname=alice",
            u64::MAX
        );
        let result = Request::parse(&mut Cursor::new(raw.into_bytes()), 0, u64::MAX);
        assert_eq!(result.unwrap_err(), Exception::TruncatedBody);
    }

    #[test]
    fn test_large_body_is_read_past_preallocation() {
        let body = vec![b'a'; BODY_PREALLOCATION as usize + 100];
        let mut raw = format!(
            "POST /s HTTP/1.0\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        raw.extend_from_slice(&body);
        let request = Request::parse(&mut Cursor::new(raw), 0, u64::MAX).unwrap();
        assert_eq!(request.body().unwrap().len(), body.len());
    }

    #[test]
    fn test_missing_http_version() {
        let result = parse(b"GET /index.html\r\n\r\n");
        assert_eq!(result.unwrap_err(), Exception::MissingHttpVersion);
    }

    #[test]
    fn test_unsupported_method() {
        let result = parse(b"DELETE /resource HTTP/1.0\r\n\r\n");
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    #[test]
    fn test_lowercase_method_is_rejected() {
        let result = parse(b"get / HTTP/1.0\r\n\r\n");
        assert_eq!(result.unwrap_err(), Exception::UnSupportedRequestMethod);
    }

    #[test]
    fn test_empty_stream_is_closed_connection() {
        assert_eq!(parse(b"").unwrap_err(), Exception::ConnectionClosed);
    }

    #[test]
    fn test_invalid_utf8() {
        let result = parse(&[0xFF, 0xFE, b' ', b'H', b'T', b'T', b'P', b'/', b'\n']);
        assert_eq!(result.unwrap_err(), Exception::RequestIsNotUtf8);
    }

    #[test]
    fn test_request_line_too_long() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LENGTH + 10));
        raw.extend_from_slice(b" HTTP/1.0\r\n\r\n");
        assert_eq!(parse(&raw).unwrap_err(), Exception::LineTooLong);
    }

    #[test]
    fn test_path_too_long() {
        let raw = format!("GET /{} HTTP/1.0\r\n\r\n", "a".repeat(MAX_PATH_LENGTH + 1));
        assert_eq!(parse(raw.as_bytes()).unwrap_err(), Exception::PathTooLong);
    }

    #[test]
    fn test_too_many_headers() {
        let mut raw = String::from("GET / HTTP/1.0\r\n");
        for i in 0..=MAX_HEADER_LINES {
            raw.push_str(&format!("X-Header-{}: v\r\n", i));
        }
        raw.push_str("\r\n");
        assert_eq!(parse(raw.as_bytes()).unwrap_err(), Exception::TooManyHeaders);
    }

    #[test]
    fn test_headers_end_at_stream_end() {
        let request = parse(b"GET /a.html HTTP/1.0\r\nHost: x\r\n").unwrap();
        assert_eq!(request.path(), "a.html");
    }

    proptest! {
        /// 合法请求行的方法永远不会被误判
        #[test]
        fn prop_method_is_never_misclassified(
            method in prop::sample::select(vec!["GET", "HEAD", "POST"]),
            segments in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 0..5),
        ) {
            prop_assume!(segments.iter().all(|s| s != "HTTP"));
            let raw = format!("{} /{} HTTP/1.0\r\n\r\n", method, segments.join("/"));
            let request = parse(raw.as_bytes()).unwrap();
            prop_assert_eq!(request.method().to_string(), method);
            prop_assert_eq!(request.path(), segments.join("/"));
        }

        /// 没有 `HTTP/` 的请求行一律被拒绝
        #[test]
        fn prop_missing_version_is_rejected(
            method in prop::sample::select(vec!["GET", "HEAD", "POST", "PUT"]),
            path in "[a-z0-9/.]{0,30}",
        ) {
            let raw = format!("{} /{}\r\n\r\n", method, path);
            prop_assert_eq!(parse(raw.as_bytes()).unwrap_err(), Exception::MissingHttpVersion);
        }
    }
}
