use crate::{exception::Exception, param::*, util::HtmlBuilder};

use bytes::Bytes;
use chrono::prelude::*;
use log::{debug, error};

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

/// 响应体的来源
#[derive(Debug)]
enum Body {
    /// 没有响应体（HEAD）
    Empty,
    /// 内存中生成的小段内容（错误页面）
    Static(Bytes),
    /// 已打开的文件，在写出时逐行发送
    File(File),
}

#[derive(Debug)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: Option<u64>,
    date: DateTime<Utc>,
    server_name: String,
    body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_0,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: None,
            date: Utc::now(),
            server_name: SERVER_NAME.to_string(),
            body: Body::Empty,
        }
    }

    /// 以已存在的文件构建响应。文件在这里打开，写出时再逐行读取。
    pub fn from_file(path: &Path, mime: &str, code: u16, id: u64) -> Result<Self, Exception> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!("[ID{}]无法打开{}：{}", id, path.display(), e);
                return Err(Exception::FileNotFound);
            }
        };
        let content_length = match file.metadata() {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            Ok(_) => {
                debug!("[ID{}]{}不是普通文件", id, path.display());
                return Err(Exception::FileNotFound);
            }
            Err(e) => {
                error!("[ID{}]无法获取文件{}的元数据: {}", id, path.display(), e);
                None
            }
        };
        debug!(
            "[ID{}]文件{}，Content-Type: {}，Content-Length: {:?}",
            id,
            path.display(),
            mime,
            content_length
        );

        let mut response = Self::new();
        response.set_code(code).set_date();
        response.content_type = Some(mime.to_string());
        response.content_length = content_length;
        response.body = Body::File(file);
        Ok(response)
    }

    fn from_html(html: String, code: u16) -> Self {
        let bytes = Bytes::from(html);
        let mut response = Self::new();
        response.set_code(code).set_date();
        response.content_type = Some("text/html".to_string());
        response.content_length = Some(bytes.len() as u64);
        response.body = Body::Static(bytes);
        response
    }

    /// 固定的 400 错误响应
    pub fn response_400(id: u64) -> Self {
        debug!("[ID{}]构建400响应", id);
        Self::from_html(HtmlBuilder::bad_request().build(), 400)
    }

    /// 存储等内部错误时返回的 500 响应
    pub fn response_500(id: u64) -> Self {
        debug!("[ID{}]构建500响应", id);
        Self::from_html(HtmlBuilder::from_status_code(500).build(), 500)
    }

    /// 把异常转换为响应；`ConnectionClosed` 没有对应的响应。
    pub fn from_exception(e: Exception, id: u64) -> Option<Self> {
        match e.status_code() {
            Some(500) => Some(Self::response_500(id)),
            Some(_) => Some(Self::response_400(id)),
            None => None,
        }
    }

    /// 去掉响应体，只保留响应头（HEAD）。`Content-Length` 依然描述原本的响应体。
    pub fn head_only(mut self) -> Self {
        self.body = Body::Empty;
        self
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 序列化状态行和响应头（以空行结尾）
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        header.push_str(&["Date: ", &format_date(&self.date), CRLF].concat());
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        if let Some(len) = self.content_length {
            header.push_str(&["Content-Length: ", &len.to_string(), CRLF].concat());
        }
        header.push_str(CRLF);
        header.into_bytes()
    }

    /// 把响应写入连接。文件内容逐行读取后立即写出，不会整体读入内存。
    ///
    /// 返回写出的响应体字节数。
    pub fn write_to<W: Write>(self, writer: &mut W, id: u64) -> io::Result<u64> {
        writer.write_all(&self.header_bytes())?;
        let sent = match self.body {
            Body::Empty => 0,
            Body::Static(bytes) => {
                writer.write_all(&bytes)?;
                bytes.len() as u64
            }
            Body::File(file) => {
                let mut reader = BufReader::new(file);
                let mut line = Vec::new();
                let mut total = 0u64;
                loop {
                    line.clear();
                    let n = reader.read_until(b'\n', &mut line)?;
                    if n == 0 {
                        break;
                    }
                    writer.write_all(&line)?;
                    total += n as u64;
                }
                total
            }
        };
        writer.flush()?;
        debug!("[ID{}]响应发送完毕，响应体{}字节", id, sent);
        Ok(sent)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::File(_))
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn render(response: Response) -> String {
        let mut out = Vec::new();
        response.write_to(&mut out, 0).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_date() {
        let date = Utc::now();
        let formatted = format_date(&date);
        assert!(formatted.contains("+0000") || formatted.contains("GMT"));
    }

    #[test]
    fn test_response_new() {
        let response = Response::new();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.information(), "OK");
        assert!(!response.is_streaming());
    }

    #[test]
    fn test_header_layout() {
        let response = Response::response_400(0);
        let header = String::from_utf8(response.header_bytes()).unwrap();
        let lines: Vec<&str> = header.split(CRLF).collect();
        assert_eq!(lines[0], "HTTP/1.0 400 Bad Request");
        assert_eq!(lines[1], "Server: Simple HTTP Server");
        assert!(lines[2].starts_with("Date: "));
        assert_eq!(lines[3], "Content-Type: text/html");
        assert!(lines[4].starts_with("Content-Length: "));
        assert!(header.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_bad_request_body() {
        let text = render(Response::response_400(0));
        let body = HtmlBuilder::bad_request().build();
        assert!(text.ends_with(&body));
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn test_internal_error_response() {
        let text = render(Response::response_500(0));
        assert!(text.starts_with("HTTP/1.0 500 Internal Server Error\r\n"));
        assert!(text.contains("<h1>500</h1>"));
    }

    #[test]
    fn test_from_exception() {
        let bad = Response::from_exception(Exception::MissingHttpVersion, 0).unwrap();
        assert_eq!(bad.status_code(), 400);
        let internal = Response::from_exception(Exception::StoreUnavailable, 0).unwrap();
        assert_eq!(internal.status_code(), 500);
        assert!(Response::from_exception(Exception::ConnectionClosed, 0).is_none());
    }

    #[test]
    fn test_file_is_streamed_verbatim() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content = b"<html>\r\n<body>line two\n</body>\nno trailing newline";
        file.write_all(content).unwrap();

        let response = Response::from_file(file.path(), "text/html", 200, 0).unwrap();
        assert!(response.is_streaming());
        assert_eq!(response.content_length(), Some(content.len() as u64));

        let mut out = Vec::new();
        let sent = response.write_to(&mut out, 0).unwrap();
        assert_eq!(sent, content.len() as u64);
        assert!(out.ends_with(content));
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/html\r\n"));
    }

    #[test]
    fn test_binary_file_survives() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        file.write_all(&content).unwrap();

        let response = Response::from_file(file.path(), "image/gif", 200, 0).unwrap();
        let mut out = Vec::new();
        response.write_to(&mut out, 0).unwrap();
        assert!(out.ends_with(&content));
    }

    #[test]
    fn test_head_only_keeps_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let response = Response::from_file(file.path(), "text/plain", 200, 0)
            .unwrap()
            .head_only();
        assert!(!response.is_streaming());
        let text = render(response);
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Response::from_file(&dir.path().join("nope.html"), "text/html", 200, 0);
        assert_eq!(result.unwrap_err(), Exception::FileNotFound);
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Response::from_file(dir.path(), "text/plain", 200, 0);
        assert_eq!(result.unwrap_err(), Exception::FileNotFound);
    }

    #[test]
    fn test_not_found_status_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"gone").unwrap();
        let text = render(Response::from_file(file.path(), "text/html", 404, 0).unwrap());
        assert!(text.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert!(text.ends_with("gone"));
    }
}
