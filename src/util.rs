use crate::param::STATUS_CODES;

/// 生成错误页面的简易 HTML 构建器
pub struct HtmlBuilder {
    title: String,
    body: String,
}

impl HtmlBuilder {
    /// 400 响应固定使用的页面
    pub fn bad_request() -> Self {
        Self {
            title: "NETWORK".to_string(),
            body: "<font size=+5><br>Whoops, something went wrong!</font>".to_string(),
        }
    }

    pub fn from_status_code(code: u16) -> Self {
        let description = STATUS_CODES.get(&code).copied().unwrap_or("Unknown Status");
        Self {
            title: code.to_string(),
            body: format!("<h1>{}</h1><p>{}</p>", code, description),
        }
    }

    pub fn build(&self) -> String {
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            self.title, self.body
        )
    }
}
