use async_trait::async_trait;
use reqwest::{redirect, Client};

use crate::app::Result;
use crate::domain::{PreparedRequest, RequestDefaults, Response};
use crate::transport::{Transport, TransportError};

pub struct HttpTransport {
    client: Client,
    no_redirect_client: Client,
}

impl HttpTransport {
    pub fn new(defaults: &RequestDefaults) -> Result<Self> {
        let client = Self::builder(defaults).build()?;
        let no_redirect_client = Self::builder(defaults)
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
        })
    }

    fn builder(defaults: &RequestDefaults) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(defaults.timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(defaults.user_agent.clone())
    }

    fn client_for(&self, request: &PreparedRequest) -> &Client {
        if request.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, request: &PreparedRequest) -> std::result::Result<Response, TransportError> {
        let mut builder = self
            .client_for(request)
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(request.timeout);

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        tracing::debug!(url = %request.url, status = %status, bytes = body.len(), "Request completed");

        let mut result = Response::new(request.url.clone(), status, body);
        result.headers = headers;
        Ok(result)
    }
}
