//! Passive check results for the Icinga 2 REST API.
//!
//! A report becomes a `process-check-result` action filtered on this
//! host and the message's service. When Icinga does not know the service
//! yet (404), the channel creates it as a passive `dummy` service and
//! submits the result once more.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::IcingaConfig;
use crate::message::{hostname, Message};
use crate::report::{Channel, ChannelError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct IcingaChannel {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    host: String,
    service_display_name: Option<String>,
}

impl IcingaChannel {
    /// Build the HTTP client. Certificates are read from disk here, so a
    /// broken path fails at startup rather than on the first report.
    pub fn new(
        config: IcingaConfig,
        service_display_name: Option<&str>,
    ) -> Result<Self, ChannelError> {
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);

        if let Some(ref ca) = config.ca_certificate {
            let pem = std::fs::read(ca)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ChannelError::Config(format!("{}: {e}", ca.display())))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&config.client_certificate, &config.client_private_key) {
            let mut pem = std::fs::read(cert)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ChannelError::Config(format!("{}: {e}", cert.display())))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ChannelError::Config(e.to_string()))?;

        let base_url = Url::parse(&format!(
            "https://{}:{}/v1/",
            config.api_endpoint_host, config.api_endpoint_port
        ))
        .map_err(|e| ChannelError::Config(format!("api endpoint: {e}")))?;

        Ok(Self {
            client,
            base_url,
            username: config.http_basic_username,
            password: config.http_basic_password,
            host: hostname().to_string(),
            service_display_name: service_display_name.map(String::from),
        })
    }

    /// Override the host name check results are filed under.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn display_name<'a>(&'a self, message: &'a Message) -> Option<&'a str> {
        message
            .service_display_name()
            .or(self.service_display_name.as_deref())
    }

    pub fn check_result_url(&self) -> Result<Url, ChannelError> {
        self.base_url
            .join("actions/process-check-result")
            .map_err(|e| ChannelError::Build(e.to_string()))
    }

    /// `objects/services/{host}!{service}`, percent-encoded.
    pub fn service_url(&self, service: &str) -> Result<Url, ChannelError> {
        let object = format!("{}!{service}", self.host);
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Build("api endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["objects", "services", object.as_str()]);
        Ok(url)
    }

    pub fn check_result_payload(&self, message: &Message) -> Value {
        json!({
            "type": "Service",
            "filter": "host.name==host_name && service.name==service_name",
            "filter_vars": {
                "host_name": self.host,
                "service_name": message.service_name(),
            },
            "exit_status": message.status().code(),
            "plugin_output": message.message(),
            "performance_data": message.performance_data(),
            "check_source": self.host,
        })
    }

    pub fn create_service_payload(&self, message: &Message) -> Value {
        let mut attrs = json!({
            "check_command": "dummy",
            "enable_active_checks": false,
        });
        if let Some(display_name) = self.display_name(message) {
            attrs["display_name"] = json!(display_name);
        }
        json!({ "attrs": attrs })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        match self.username {
            Some(ref user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    async fn post_check_result(&self, message: &Message) -> Result<reqwest::Response, ChannelError> {
        self.request(reqwest::Method::POST, self.check_result_url()?)
            .json(&self.check_result_payload(message))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn create_service(&self, message: &Message) -> Result<(), ChannelError> {
        let response = self
            .request(reqwest::Method::PUT, self.service_url(message.service_name())?)
            .json(&self.create_service_payload(message))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        ensure_success(response).await
    }
}

#[async_trait]
impl Channel for IcingaChannel {
    fn name(&self) -> &str {
        "icinga"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let mut response = self.post_check_result(message).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(
                host = %self.host,
                service = message.service_name(),
                "service unknown to icinga, creating it"
            );
            self.create_service(message).await?;
            response = self.post_check_result(message).await?;
        }
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<(), ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Http {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageParams, PerformanceData};

    fn config() -> IcingaConfig {
        IcingaConfig {
            api_endpoint_host: "icinga.example.com".to_string(),
            api_endpoint_port: 5665,
            http_basic_username: Some("user".to_string()),
            http_basic_password: Some("secret".to_string()),
            client_certificate: None,
            client_private_key: None,
            ca_certificate: None,
        }
    }

    fn message() -> Message {
        let mut perf = PerformanceData::new();
        perf.insert("perf_1".to_string(), 1.into());
        perf.insert("perf_2".to_string(), "test".into());
        Message::new(MessageParams {
            status: Some(0),
            service_name: Some("my_service".to_string()),
            custom_message: Some("My message".to_string()),
            prefix: Some(String::new()),
            performance_data: perf,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_check_result_payload() {
        let channel = IcingaChannel::new(config(), None).unwrap().with_host("web01");
        let payload = channel.check_result_payload(&message());
        assert_eq!(payload["type"], "Service");
        assert_eq!(payload["filter_vars"]["host_name"], "web01");
        assert_eq!(payload["filter_vars"]["service_name"], "my_service");
        assert_eq!(payload["exit_status"], 0);
        assert_eq!(payload["plugin_output"], "MY_SERVICE OK - My message");
        assert_eq!(payload["performance_data"], "perf_1=1 perf_2=test");
        assert_eq!(payload["check_source"], "web01");
    }

    #[test]
    fn test_urls() {
        let channel = IcingaChannel::new(config(), None).unwrap().with_host("web01");
        assert_eq!(
            channel.check_result_url().unwrap().as_str(),
            "https://icinga.example.com:5665/v1/actions/process-check-result"
        );
        assert_eq!(
            channel.service_url("backup job").unwrap().as_str(),
            "https://icinga.example.com:5665/v1/objects/services/web01!backup%20job"
        );
    }

    #[test]
    fn test_create_service_payload_display_name_fallback() {
        let channel = IcingaChannel::new(config(), Some("Nightly backup")).unwrap();
        let payload = channel.create_service_payload(&message());
        assert_eq!(payload["attrs"]["check_command"], "dummy");
        assert_eq!(payload["attrs"]["enable_active_checks"], false);
        assert_eq!(payload["attrs"]["display_name"], "Nightly backup");

        let channel = IcingaChannel::new(config(), None).unwrap();
        let payload = channel.create_service_payload(&message());
        assert!(payload["attrs"].get("display_name").is_none());
    }

    #[test]
    fn test_missing_ca_certificate_fails_construction() {
        let mut cfg = config();
        cfg.ca_certificate = Some("/nonexistent/ca.pem".into());
        let err = IcingaChannel::new(cfg, None).err().unwrap();
        assert!(matches!(err, ChannelError::Io(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let mut cfg = config();
        cfg.api_endpoint_host = "127.0.0.1".to_string();
        cfg.api_endpoint_port = 1;
        let channel = IcingaChannel::new(cfg, None).unwrap();
        let err = channel.send(&message()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}
