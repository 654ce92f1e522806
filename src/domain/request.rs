use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use tracing::warn;

use crate::domain::{Failure, Response};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Hook observing a successful response, bound to the owning module's state.
pub type ResponseHook<M> = Box<dyn Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync>;

/// Hook observing an HTTP or transport failure.
pub type FailureHook<M> = Box<dyn Fn(&mut M, &Failure) -> anyhow::Result<()> + Send + Sync>;

/// Hook observing an error raised while processing a response.
pub type ErrorHook<M> = Box<dyn Fn(&mut M, &anyhow::Error) -> anyhow::Result<()> + Send + Sync>;

/// Lifecycle of a single request within one fetch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Configured,
    Dispatched,
    Succeeded,
    Failed,
    Errored,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Errored)
    }

    pub fn can_transition_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Configured)
                | (Self::Configured, Self::Dispatched)
                | (Self::Dispatched, Self::Succeeded | Self::Failed | Self::Errored)
        )
    }
}

/// Values used when a request leaves a setting unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDefaults {
    pub timeout: Duration,
    pub user_agent: String,
    pub follow_redirects: bool,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: true,
        }
    }
}

/// A fully resolved request, ready to hand to a transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub timeout: Duration,
    pub follow_redirects: bool,
}

pub(crate) struct RequestHooks<M> {
    pub(crate) before_process: Option<ResponseHook<M>>,
    pub(crate) process: Option<ResponseHook<M>>,
    pub(crate) after_process: Option<ResponseHook<M>>,
    pub(crate) on_failure: Option<FailureHook<M>>,
    pub(crate) on_error: Option<ErrorHook<M>>,
}

impl<M> Default for RequestHooks<M> {
    fn default() -> Self {
        Self {
            before_process: None,
            process: None,
            after_process: None,
            on_failure: None,
            on_error: None,
        }
    }
}

/// Configuration and lifecycle hooks for one outbound call.
///
/// A request without a URL is skipped: it never reaches the execution plan.
///
/// ```
/// use harvest::domain::Request;
///
/// struct Catalog {
///     titles: Vec<String>,
/// }
///
/// let request = Request::<Catalog>::post("https://example.com/search")
///     .form("q", "rust")
///     .header("Accept", "text/html")
///     .process(|catalog, response| {
///         catalog.titles.push(response.text().into_owned());
///         Ok(())
///     });
/// assert_eq!(request.url(), Some("https://example.com/search"));
/// ```
pub struct Request<M> {
    url: Option<String>,
    method: Method,
    body: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    follow_redirects: Option<bool>,
    state: RequestState,
    pub(crate) hooks: RequestHooks<M>,
}

impl<M> Request<M> {
    pub fn new() -> Self {
        Self {
            url: None,
            method: Method::GET,
            body: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            follow_redirects: None,
            state: RequestState::Created,
            hooks: RequestHooks::default(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new().with_url(url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new().with_url(url).with_method(Method::POST)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a body field. Fields are form-encoded in insertion order.
    pub fn form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn before_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.before_process = Some(Box::new(hook));
        self
    }

    /// Register the hook that consumes a successful response body.
    pub fn process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.process = Some(Box::new(hook));
        self
    }

    pub fn after_process<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &Response) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.after_process = Some(Box::new(hook));
        self
    }

    /// Replaces any module-scope failure hooks for this request.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &Failure) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_failure = Some(Box::new(hook));
        self
    }

    /// Replaces any module-scope error hooks for this request.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut M, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Resolve against defaults. Returns `None` when no URL is set.
    pub(crate) fn prepare(&mut self, defaults: &RequestDefaults) -> Option<PreparedRequest> {
        let url = self.url.clone()?;

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&defaults.user_agent) {
            headers.insert(USER_AGENT, value);
        }

        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, url = %url, "Skipping invalid header"),
            }
        }

        let body = if self.method != Method::GET && !self.body.is_empty() {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(FORM_CONTENT_TYPE));
            Some(encode_form(&self.body))
        } else {
            None
        };

        self.transition(RequestState::Configured);

        Some(PreparedRequest {
            url,
            method: self.method.clone(),
            headers,
            body,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            follow_redirects: self.follow_redirects.unwrap_or(defaults.follow_redirects),
        })
    }

    pub(crate) fn transition(&mut self, next: RequestState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            warn!(
                from = ?self.state,
                to = ?next,
                url = ?self.url,
                "Ignoring invalid request state transition"
            );
            false
        }
    }
}

impl<M> Default for Request<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for Request<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("follow_redirects", &self.follow_redirects)
            .field("state", &self.state)
            .field("has_process", &self.hooks.process.is_some())
            .finish()
    }
}

pub fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_get_without_url() {
        let request: Request<()> = Request::new();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.url(), None);
        assert_eq!(request.state(), RequestState::Created);
    }

    #[test]
    fn test_prepare_without_url_is_skipped() {
        let mut request: Request<()> = Request::new().form("a", "b");
        assert!(request.prepare(&RequestDefaults::default()).is_none());
        assert_eq!(request.state(), RequestState::Created);
    }

    #[test]
    fn test_prepare_seeds_user_agent_and_defaults() {
        let defaults = RequestDefaults {
            timeout: Duration::from_secs(7),
            user_agent: "custom-agent/1.0".into(),
            follow_redirects: false,
        };
        let mut request: Request<()> = Request::get("https://example.com/a");
        let prepared = request.prepare(&defaults).unwrap();

        assert_eq!(prepared.headers.get(USER_AGENT).unwrap(), "custom-agent/1.0");
        assert_eq!(prepared.timeout, Duration::from_secs(7));
        assert!(!prepared.follow_redirects);
        assert!(prepared.body.is_none());
        assert_eq!(request.state(), RequestState::Configured);
    }

    #[test]
    fn test_request_values_override_defaults() {
        let mut request: Request<()> = Request::get("https://example.com/a")
            .header("User-Agent", "mine")
            .timeout(Duration::from_millis(250))
            .follow_redirects(false);
        let prepared = request.prepare(&RequestDefaults::default()).unwrap();

        assert_eq!(prepared.headers.get(USER_AGENT).unwrap(), "mine");
        assert_eq!(prepared.timeout, Duration::from_millis(250));
        assert!(!prepared.follow_redirects);
    }

    #[test]
    fn test_post_body_is_form_encoded_in_order() {
        let mut request: Request<()> = Request::post("https://example.com/search")
            .form("q", "rust lang")
            .form("page", "2")
            .form("sort", "a&b");
        let prepared = request.prepare(&RequestDefaults::default()).unwrap();

        assert_eq!(prepared.method, Method::POST);
        assert_eq!(
            prepared.body.as_deref(),
            Some("q=rust+lang&page=2&sort=a%26b")
        );
        assert_eq!(
            prepared.headers.get(CONTENT_TYPE).unwrap(),
            FORM_CONTENT_TYPE
        );
    }

    #[test]
    fn test_get_body_is_not_sent() {
        let mut request: Request<()> = Request::get("https://example.com/").form("q", "x");
        let prepared = request.prepare(&RequestDefaults::default()).unwrap();
        assert!(prepared.body.is_none());
        assert!(prepared.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let mut request: Request<()> =
            Request::get("https://example.com/").header("bad header", "v");
        let prepared = request.prepare(&RequestDefaults::default()).unwrap();
        assert_eq!(prepared.headers.len(), 1);
    }

    #[test]
    fn test_state_transitions() {
        use RequestState::*;

        assert!(Created.can_transition_to(Configured));
        assert!(Configured.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Succeeded));
        assert!(Dispatched.can_transition_to(Failed));
        assert!(Dispatched.can_transition_to(Errored));

        assert!(!Created.can_transition_to(Dispatched));
        assert!(!Succeeded.can_transition_to(Errored));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(Errored.is_terminal());
        assert!(!Dispatched.is_terminal());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut request: Request<()> = Request::get("https://example.com/");
        request.prepare(&RequestDefaults::default());
        assert!(request.transition(RequestState::Dispatched));
        assert!(request.transition(RequestState::Failed));
        assert!(!request.transition(RequestState::Succeeded));
        assert_eq!(request.state(), RequestState::Failed);
    }
}
