use std::time::{Duration, Instant};

use derivative::Derivative;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    client::create_client,
    config::{ConfigCrawl, ConfigFrontend},
    menu::MenuLink,
    report::{Report, Table},
    utils::{join_route, truncate},
    Result,
};

/// Visible text that marks a not-found page.
pub const NOT_FOUND_TEXT: [&str; 11] = [
    "Page Not Found",
    "页面未找到",
    "404",
    "Not Found",
    "找不到页面",
    "page-not-found",
    "error-404",
    "该页面不存在",
    "页面不存在",
    "NotFound",
    "抱歉，你访问的页面不存在",
];

/// Script patterns that redirect to a not-found page.
pub const NOT_FOUND_REDIRECT: [&str; 5] = [
    r"router\.replace.*404",
    r"router\.push.*404",
    r"\$route\.name.*404",
    "NotFoundComponent",
    "PageNotFound",
];

/// Bounded retry with capped exponential backoff.
#[derive(Derivative, Debug, Clone, Copy, PartialEq, Eq)]
#[derivative(Default)]
pub struct Retry {
    #[derivative(Default(value = "2"))]
    pub retries: u32,
    #[derivative(Default(value = "Duration::from_millis(500)"))]
    pub backoff: Duration,
    #[derivative(Default(value = "Duration::from_secs(8)"))]
    pub backoff_max: Duration,
}

impl Retry {
    #[must_use]
    pub fn from_config(cfg: &ConfigCrawl) -> Self {
        Self {
            retries: cfg.retries,
            backoff: Duration::from_millis(cfg.backoff),
            backoff_max: Duration::from_millis(cfg.backoff_max),
        }
    }

    /// Wait before retry number `attempt + 1`: `backoff * 2^attempt`, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|x| self.backoff.checked_mul(x))
            .map_or(self.backoff_max, |x| x.min(self.backoff_max))
    }
}

/// Matches not-found markers in a page body.
pub struct NotFoundDetector {
    strip: Regex,
    tags: Regex,
    redirect: Vec<Regex>,
}

impl NotFoundDetector {
    /// # Errors
    ///
    /// Will return `Err` when a pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            strip: Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>")?,
            tags: Regex::new(r"(?s)<[^>]*>")?,
            redirect: NOT_FOUND_REDIRECT
                .iter()
                .map(|x| Regex::new(x))
                .collect::<std::result::Result<_, _>>()?,
        })
    }

    /// Return the first marker found in `body`.
    ///
    /// Text markers are matched case-insensitively against visible text only,
    /// redirect patterns against the raw body.
    #[must_use]
    pub fn detect(&self, body: &str) -> Option<String> {
        let visible = self.strip.replace_all(body, " ");
        let visible = self.tags.replace_all(&visible, " ").to_lowercase();
        if let Some(x) = NOT_FOUND_TEXT
            .iter()
            .find(|x| visible.contains(&x.to_lowercase()))
        {
            return Some(format!("text `{x}`"));
        }
        // class and id markers live in attributes
        let lower = body.to_lowercase();
        for x in ["page-not-found", "error-404"] {
            if lower.contains(x) {
                return Some(format!("marker `{x}`"));
            }
        }
        self.redirect
            .iter()
            .find(|x| x.is_match(body))
            .map(|x| format!("redirect `{}`", x.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Ok,
    NotFound,
    HttpError,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub code: String,
    pub name: String,
    pub path: String,
    pub url: String,
    pub outcome: PageOutcome,
    pub status: Option<u16>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sequential sidebar crawler.
pub struct Crawler {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry: Retry,
    delay: Duration,
    detector: NotFoundDetector,
}

impl Crawler {
    /// # Errors
    ///
    /// Will return `Err` when the http client or detector cannot be built.
    pub fn new(frontend: &ConfigFrontend, cfg: &ConfigCrawl) -> Result<Self> {
        Ok(Self {
            client: create_client(cfg.timeout)?,
            base_url: frontend.base_url.trim_end_matches('/').to_owned(),
            token: None,
            retry: Retry::from_config(cfg),
            delay: Duration::from_millis(cfg.delay),
            detector: NotFoundDetector::new()?,
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, join_route("", path))
    }

    /// Fetch one page.
    ///
    /// Transport errors and 5xx responses are retried, other responses are final.
    pub async fn fetch(&self, link: &MenuLink) -> PageResult {
        let url = self.url(&link.path);
        let start = Instant::now();
        let mut attempts = 0;
        let (outcome, status, reason) = loop {
            attempts += 1;
            let mut req = self.client.get(&url);
            if let Some(x) = &self.token {
                req = req.bearer_auth(x);
            }
            let retryable = attempts <= self.retry.retries;
            match req.send().await {
                Ok(rsp) if rsp.status().is_server_error() && retryable => {
                    debug!(url = %url, status = %rsp.status(), attempts, "Server error, retrying");
                }
                Ok(rsp) => {
                    let status = rsp.status();
                    match rsp.text().await {
                        Ok(body) => break self.evaluate(status, &body),
                        Err(e) if retryable => {
                            debug!(url = %url, %e, attempts, "Body read failed, retrying");
                        }
                        Err(e) => {
                            break (
                                PageOutcome::Failed,
                                Some(status.as_u16()),
                                Some(format!("body read failed: {e}")),
                            );
                        }
                    }
                }
                Err(e) if retryable => {
                    debug!(url = %url, %e, attempts, "Request failed, retrying");
                }
                Err(e) => break (PageOutcome::Failed, None, Some(e.to_string())),
            }
            tokio::time::sleep(self.retry.delay(attempts - 1)).await;
        };
        PageResult {
            code: link.code.clone(),
            name: link.name.clone(),
            path: link.path.clone(),
            url,
            outcome,
            status,
            attempts,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            reason,
        }
    }

    fn evaluate(&self, status: StatusCode, body: &str) -> (PageOutcome, Option<u16>, Option<String>) {
        let code = Some(status.as_u16());
        if status == StatusCode::NOT_FOUND {
            return (PageOutcome::NotFound, code, Some("status 404".to_owned()));
        }
        if !status.is_success() {
            return (
                PageOutcome::HttpError,
                code,
                Some(format!("status {status}, body {}", truncate(body.trim(), 80))),
            );
        }
        match self.detector.detect(body) {
            Some(x) => (PageOutcome::NotFound, code, Some(x)),
            None => (PageOutcome::Ok, code, None),
        }
    }

    /// Visit every link in order, a failing page never stops the crawl.
    pub async fn crawl(&self, links: &[MenuLink]) -> CrawlReport {
        let mut pages = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            if i != 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let page = self.fetch(link).await;
            match page.outcome {
                PageOutcome::Ok => debug!(path = %page.path, ms = page.elapsed_ms, "Page ok"),
                _ => warn!(
                    path = %page.path,
                    outcome = ?page.outcome,
                    reason = page.reason.as_deref().unwrap_or_default(),
                    "Page check failed"
                ),
            }
            pages.push(page);
        }
        let report = CrawlReport::new(&self.base_url, pages);
        info!(
            total = report.total,
            ok = report.ok,
            not_found = report.not_found,
            failed = report.failed,
            "Crawl finished"
        );
        report
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub base_url: String,
    pub total: usize,
    pub ok: usize,
    pub not_found: usize,
    pub failed: usize,
    pub pages: Vec<PageResult>,
}

impl CrawlReport {
    #[must_use]
    pub fn new(base_url: &str, pages: Vec<PageResult>) -> Self {
        let count = |o: PageOutcome| pages.iter().filter(|x| x.outcome == o).count();
        Self {
            base_url: base_url.to_owned(),
            total: pages.len(),
            ok: count(PageOutcome::Ok),
            not_found: count(PageOutcome::NotFound),
            failed: count(PageOutcome::Failed) + count(PageOutcome::HttpError),
            pages,
        }
    }

    fn problem_table(&self) -> Table {
        let mut t = Table::new(["path", "name", "outcome", "status", "reason"]);
        for i in self.pages.iter().filter(|x| x.outcome != PageOutcome::Ok) {
            t.push([
                i.path.clone(),
                i.name.clone(),
                format!("{:?}", i.outcome),
                i.status.map(|x| x.to_string()).unwrap_or_default(),
                i.reason.clone().unwrap_or_default(),
            ]);
        }
        t
    }
}

impl Report for CrawlReport {
    fn kind(&self) -> &'static str {
        "crawl"
    }

    fn findings(&self) -> usize {
        self.not_found + self.failed
    }

    fn console(&self) -> String {
        let mut ret = format!(
            "Crawled {} pages on {}: {} ok, {} not found, {} failed\n",
            self.total, self.base_url, self.ok, self.not_found, self.failed
        );
        let t = self.problem_table();
        if !t.is_empty() {
            ret.push_str(&format!("{}\n", t.render()));
        }
        ret
    }

    fn markdown(&self) -> String {
        let mut ret = format!(
            "# Sidebar crawl\n\n`{}`: {} pages, {} ok, **{}** not found, **{}** failed\n\n",
            self.base_url, self.total, self.ok, self.not_found, self.failed
        );
        let t = self.problem_table();
        if !t.is_empty() {
            ret.push_str(&t.markdown());
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let r = Retry::default();
        assert_eq!(r.retries, 2);
        assert_eq!(r.delay(0), Duration::from_millis(500));
        assert_eq!(r.delay(1), Duration::from_millis(1000));
        assert_eq!(r.delay(3), Duration::from_millis(4000));
        assert_eq!(r.delay(4), Duration::from_secs(8));
        assert_eq!(r.delay(5), Duration::from_secs(8));
        assert_eq!(r.delay(40), Duration::from_secs(8));
    }

    #[test]
    fn detector_text_and_redirect() {
        let d = NotFoundDetector::new().unwrap();
        assert!(d.detect("<div class=\"app\"><h1>仪表盘</h1></div>").is_none());
        assert_eq!(
            d.detect("<main><p>抱歉，你访问的页面不存在</p></main>").as_deref(),
            Some("text `页面不存在`")
        );
        assert!(d.detect("<h2>Page Not Found</h2>").unwrap().contains("Page Not Found"));
        assert!(d.detect("<div class=\"error-404\"></div>").unwrap().contains("error-404"));
        // text inside scripts is not visible
        assert!(
            d.detect("<script>const x = 'Not Found';</script><p>ok</p>")
                .is_none()
        );
        assert!(
            d.detect("<script>if (!ok) router.replace('/404')</script>")
                .unwrap()
                .starts_with("redirect")
        );
    }

    #[test]
    fn detector_ignores_case() {
        let d = NotFoundDetector::new().unwrap();
        assert_eq!(
            d.detect("<h1>page not found</h1>").as_deref(),
            Some("text `Page Not Found`")
        );
        assert!(d.detect("<p>NOT FOUND</p>").is_some());
        assert!(d.detect("<div id=\"Error-404\"></div>").is_some());
        assert_eq!(
            d.detect("<script>if ($route.name === '404') show()</script>")
                .as_deref(),
            Some(r"redirect `\$route\.name.*404`")
        );
    }

    #[test]
    fn report_counts() {
        let page = |path: &str, outcome| PageResult {
            code: path.to_uppercase(),
            name: path.to_owned(),
            path: path.to_owned(),
            url: format!("http://x{path}"),
            outcome,
            status: Some(200),
            attempts: 1,
            elapsed_ms: 3,
            reason: None,
        };
        let r = CrawlReport::new(
            "http://x",
            vec![
                page("/a", PageOutcome::Ok),
                page("/b", PageOutcome::NotFound),
                page("/c", PageOutcome::HttpError),
                page("/d", PageOutcome::Failed),
            ],
        );
        assert_eq!((r.ok, r.not_found, r.failed), (1, 1, 2));
        assert_eq!(r.findings(), 3);
        assert!(r.console().contains("1 ok, 1 not found, 2 failed"));
    }

    async fn serve(listener: TcpListener, count: usize) {
        for _ in 0..count {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap_or_default();
            let req = String::from_utf8_lossy(&buf[..n]).into_owned();
            let (status, body) = if req.starts_with("GET /ok ") {
                ("200 OK", "<h1>班级管理</h1>")
            } else if req.starts_with("GET /soft ") {
                ("200 OK", "<h1>页面未找到</h1>")
            } else {
                ("404 Not Found", "")
            };
            let rsp = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(rsp.as_bytes()).await;
            let _ = sock.shutdown().await;
        }
    }

    fn link(path: &str) -> MenuLink {
        MenuLink {
            code: path.to_uppercase(),
            name: path.to_owned(),
            path: path.to_owned(),
        }
    }

    #[tokio::test]
    async fn crawl_continues_after_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, 3));

        let frontend = ConfigFrontend {
            base_url: format!("http://{addr}/"),
        };
        let cfg = ConfigCrawl {
            retries: 0,
            backoff: 1,
            backoff_max: 1,
            timeout: 2,
            delay: 0,
        };
        let crawler = Crawler::new(&frontend, &cfg).unwrap();
        let report = crawler
            .crawl(&[link("/ok"), link("/soft"), link("/gone")])
            .await;
        server.await.unwrap();

        let outcomes: Vec<_> = report.pages.iter().map(|x| x.outcome).collect();
        assert_eq!(
            outcomes,
            vec![PageOutcome::Ok, PageOutcome::NotFound, PageOutcome::NotFound]
        );
        assert_eq!(report.pages[1].reason.as_deref(), Some("text `页面未找到`"));
        assert_eq!(report.pages[2].status, Some(404));
    }

    #[tokio::test]
    async fn unreachable_page_is_retried_then_failed() {
        // bind then drop to get a closed port
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let frontend = ConfigFrontend {
            base_url: format!("http://{addr}"),
        };
        let cfg = ConfigCrawl {
            retries: 2,
            backoff: 1,
            backoff_max: 2,
            timeout: 1,
            delay: 0,
        };
        let crawler = Crawler::new(&frontend, &cfg).unwrap();
        let page = crawler.fetch(&link("/x")).await;
        assert_eq!(page.outcome, PageOutcome::Failed);
        assert_eq!(page.attempts, 3);
        assert!(page.reason.is_some());
    }

    #[tokio::test]
    async fn truncated_body_is_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let rsp = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 100\r\n\r\n<h1>short";
            let _ = sock.write_all(rsp.as_bytes()).await;
            let _ = sock.shutdown().await;
        });

        let frontend = ConfigFrontend {
            base_url: format!("http://{addr}"),
        };
        let cfg = ConfigCrawl {
            retries: 0,
            backoff: 1,
            backoff_max: 1,
            timeout: 2,
            delay: 0,
        };
        let crawler = Crawler::new(&frontend, &cfg).unwrap();
        let page = crawler.fetch(&link("/cut")).await;
        server.await.unwrap();

        assert_eq!(page.outcome, PageOutcome::Failed);
        assert_eq!(page.status, Some(200));
        assert!(page.reason.unwrap().starts_with("body read failed"));
    }
}
