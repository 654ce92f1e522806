//! TOML source manifests.
//!
//! A manifest describes one fetchable source and the modules that harvest it:
//!
//! ```toml
//! name = "rust-blog"
//!
//! [vars]
//! base = "https://blog.rust-lang.org"
//! archive = "yes"
//!
//! [[modules]]
//! name = "feeds"
//! mode = "concurrent"
//!
//! [[modules.requests]]
//! url = "{base}/feed.xml"
//!
//! [[modules.requests]]
//! url = "{base}/inside-rust/feed.xml"
//! headers = { Accept = "application/atom+xml" }
//!
//! [[modules]]
//! name = "archive"
//! fetch_if = "archive"
//!
//! [[modules.requests]]
//! url = "{base}/search"
//! method = "POST"
//! form = { q = "release" }
//! expect_contains = "<html"
//! ```
//!
//! `{name}` placeholders in URLs, form values and header values are filled
//! from `[vars]`; `{{` and `}}` produce literal braces. A module with
//! `fetch_if` only runs when that variable is set to something truthy.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use reqwest::Method;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::app::{AppContext, HarvestError, Result};
use crate::domain::request::encode_form;
use crate::domain::{Request, Response};
use crate::engine::{FetchMode, Fetcher, ModuleClass, ModuleDefinition};

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    #[serde(default)]
    pub mode: FetchMode,
    /// Variable that must be present and truthy for the module to run.
    pub fetch_if: Option<String>,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    /// Entries without a URL are kept but never sent.
    pub url: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub form: Fields,
    #[serde(default)]
    pub headers: Fields,
    pub timeout_secs: Option<u64>,
    pub follow_redirects: Option<bool>,
    /// Treat a response whose body lacks this text as a processing error.
    pub expect_contains: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// `name = value` pairs in the order the manifest lists them.
///
/// Numbers and booleans are accepted and kept as their TOML text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Fields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let table = toml::Table::deserialize(deserializer)?;
        table
            .into_iter()
            .map(|(name, value)| match value {
                toml::Value::String(value) => Ok((name, value)),
                toml::Value::Integer(_) | toml::Value::Float(_) | toml::Value::Boolean(_) => {
                    Ok((name, value.to_string()))
                }
                other => Err(D::Error::custom(format!(
                    "field {name:?} must be a string, got {}",
                    other.type_str()
                ))),
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Fields)
    }
}

/// Options chosen at run time rather than in the manifest.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Store response bodies here instead of only logging them.
    pub out_dir: Option<PathBuf>,
    /// Abort on the first processing error instead of logging it.
    pub strict: bool,
}

/// Counts accumulated by every module of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub errored: usize,
    pub bytes: u64,
}

/// The fetchable a manifest fetcher runs over.
#[derive(Debug)]
pub struct SourceContext {
    pub name: String,
    pub vars: BTreeMap<String, String>,
    pub out_dir: Option<PathBuf>,
    summary: Arc<Mutex<RunSummary>>,
}

impl SourceContext {
    pub fn summary(&self) -> RunSummary {
        self.summary.lock().map(|s| *s).unwrap_or_default()
    }
}

/// Per-module state, built fresh from the source on every run.
struct ModuleState {
    module: String,
    vars: BTreeMap<String, String>,
    out_dir: Option<PathBuf>,
    summary: Arc<Mutex<RunSummary>>,
}

impl ModuleState {
    fn new(module: &str, source: &SourceContext) -> Self {
        Self {
            module: module.to_string(),
            vars: source.vars.clone(),
            out_dir: source.out_dir.clone(),
            summary: Arc::clone(&source.summary),
        }
    }

    fn record(&self, update: impl FnOnce(&mut RunSummary)) {
        if let Ok(mut summary) = self.summary.lock() {
            update(&mut summary);
        }
    }

    fn store(
        &mut self,
        file_name: &str,
        url: &str,
        response: &Response,
        expect: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(needle) = expect {
            if !response.text().contains(needle) {
                anyhow::bail!("response from {url} does not contain {needle:?}");
            }
        }

        let bytes = response.body.len() as u64;
        match &self.out_dir {
            Some(dir) => {
                let dir = dir.join(&self.module);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
                let path = dir.join(file_name);
                fs::write(&path, &response.body)
                    .with_context(|| format!("writing {}", path.display()))?;
                debug!(module = %self.module, url, path = %path.display(), bytes, "Stored response");
            }
            None => {
                info!(module = %self.module, url, status = %response.status, bytes, "Fetched");
            }
        }

        self.record(|s| {
            s.succeeded += 1;
            s.bytes += bytes;
        });
        Ok(())
    }
}

/// File name a response body is stored under: the SHA256 of the method, the
/// URL and the encoded request body, if one is sent.
pub fn body_file_name(method: &Method, url: &str, body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    if let Some(body) = body {
        hasher.update(b"\n");
        hasher.update(body.as_bytes());
    }
    format!("{}.body", hex::encode(hasher.finalize()))
}

/// Whether a variable value enables a `fetch_if` module.
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Fill `{name}` placeholders from `vars`.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            return Err(HarvestError::Manifest(format!(
                "unmatched '}}' in {template:?}"
            )));
        }

        let end = tail.find('}').ok_or_else(|| {
            HarvestError::Manifest(format!("unclosed placeholder in {template:?}"))
        })?;
        let name = &tail[1..end];
        let value = vars.get(name).ok_or_else(|| {
            HarvestError::Manifest(format!("undefined variable {name:?} in {template:?}"))
        })?;
        out.push_str(value);
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// A request entry with every template filled in.
struct Rendered {
    url: String,
    form: Vec<(String, String)>,
    headers: Vec<(String, String)>,
}

impl RequestSpec {
    fn parse_method(&self) -> Result<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| HarvestError::Manifest(format!("invalid method {:?}", self.method)))
    }

    fn render(&self, vars: &BTreeMap<String, String>) -> Result<Option<Rendered>> {
        let Some(url) = &self.url else {
            return Ok(None);
        };

        let url = render(url, vars)?;
        url::Url::parse(&url)?;

        let form = self
            .form
            .iter()
            .map(|(k, v)| Ok((k.clone(), render(v, vars)?)))
            .collect::<Result<Vec<_>>>()?;
        let headers = self
            .headers
            .iter()
            .map(|(k, v)| Ok((k.clone(), render(v, vars)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Rendered { url, form, headers }))
    }

    fn build(&self, method: &Method, state: &ModuleState) -> Request<ModuleState> {
        let rendered = match self.render(&state.vars) {
            Ok(Some(rendered)) => rendered,
            Ok(None) => return Request::new(),
            Err(e) => {
                warn!(module = %state.module, error = %e, "Skipping request that failed to render");
                return Request::new();
            }
        };

        let mut request = Request::new()
            .with_url(rendered.url.clone())
            .with_method(method.clone());
        for (name, value) in &rendered.form {
            request = request.form(name.clone(), value.clone());
        }
        for (name, value) in rendered.headers {
            request = request.header(name, value);
        }
        if let Some(secs) = self.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }
        if let Some(follow) = self.follow_redirects {
            request = request.follow_redirects(follow);
        }

        // GET requests never send their form fields.
        let body = (*method != Method::GET && !rendered.form.is_empty())
            .then(|| encode_form(&rendered.form));
        let file_name = body_file_name(method, &rendered.url, body.as_deref());

        let url = rendered.url;
        let expect = self.expect_contains.clone();
        request.process(move |state: &mut ModuleState, response| {
            state.store(&file_name, &url, response, expect.as_deref())
        })
    }
}

impl ModuleSpec {
    fn participates(&self, vars: &BTreeMap<String, String>) -> bool {
        match &self.fetch_if {
            Some(var) => vars.get(var).is_some_and(|v| is_truthy(v)),
            None => true,
        }
    }

    fn validate(&self, vars: &BTreeMap<String, String>) -> Result<()> {
        if self.name.is_empty()
            || self.name.contains(|c: char| c == '/' || c == '\\')
            || self.name == "."
            || self.name == ".."
        {
            return Err(HarvestError::Manifest(format!(
                "invalid module name {:?}",
                self.name
            )));
        }

        for request in &self.requests {
            request.parse_method()?;
        }

        // Excluded modules may reference variables that are not set.
        if self.participates(vars) {
            for request in &self.requests {
                request.render(vars).map_err(|e| {
                    HarvestError::Manifest(format!("module {}: {e}", self.name))
                })?;
            }
        }
        Ok(())
    }

    fn into_definition(self, strict: bool) -> Result<Arc<dyn ModuleDefinition<SourceContext>>> {
        let name = self.name.clone();
        let mut class = ModuleClass::new(self.name.clone(), move |source: &SourceContext| {
            ModuleState::new(&name, source)
        })
        .mode(self.mode);

        if let Some(var) = self.fetch_if {
            class = class.fetch_if(move |state: &ModuleState| {
                state.vars.get(&var).map(|v| is_truthy(v))
            });
        }

        for spec in self.requests {
            let method = spec.parse_method()?;
            class = class.request(move |state: &ModuleState| spec.build(&method, state));
        }

        class = class.on_failure(|state, failure| {
            warn!(module = %state.module, failure = %failure, "Request failed");
            state.record(|s| s.failed += 1);
            Ok(())
        });

        if !strict {
            class = class.on_error(|state, error| {
                let error = format!("{error:#}");
                warn!(module = %state.module, error = %error, "Processing failed");
                state.record(|s| s.errored += 1);
                Ok(())
            });
        }

        Ok(class
            .after_fetch(|state| {
                debug!(module = %state.module, "Module finished");
                Ok(())
            })
            .build())
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| HarvestError::Manifest(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override or add a variable, e.g. from `--var name=value`.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Check names, methods, and every template of the modules that will run.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarvestError::Manifest("source name is empty".into()));
        }
        for module in &self.modules {
            module.validate(&self.vars)?;
        }
        Ok(())
    }

    /// Build a fetcher over this source, using the context's transport and
    /// HTTP defaults.
    pub fn into_fetcher(self, ctx: &AppContext, options: RunOptions) -> Result<Fetcher<SourceContext>> {
        self.validate()?;

        let modules = self
            .modules
            .into_iter()
            .map(|module| module.into_definition(options.strict))
            .collect::<Result<Vec<_>>>()?;

        let source = SourceContext {
            name: self.name,
            vars: self.vars,
            out_dir: options.out_dir,
            summary: Arc::default(),
        };

        Ok(Fetcher::new(source, Arc::clone(&ctx.transport))
            .defaults(ctx.request_defaults())
            .workers(ctx.workers())
            .modules(modules)
            .before_fetch(|source| {
                info!(source = %source.name, "Fetching source");
                Ok(())
            })
            .on_progress(|source, percent| {
                debug!(source = %source.name, percent, "Progress");
                Ok(())
            })
            .after_fetch(|source| {
                let summary = source.summary();
                info!(
                    source = %source.name,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    errored = summary.errored,
                    bytes = summary.bytes,
                    "Source complete"
                );
                Ok(())
            }))
    }
}
