use anyhow::{Context, Result};
use chatmeme_contracts::config::ImgflipConfig;
use chatmeme_contracts::MemeCaption;
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use crate::error::StageError;
use crate::http::response_json_or_error;

/// Delegates text placement to a remote service that returns a hosted URL.
pub trait RemoteCaptioner {
    fn name(&self) -> &str;
    fn caption(&self, template_id: &str, caption: &MemeCaption) -> Result<String>;
}

pub struct ImgflipCaptioner {
    api_base: String,
    username: String,
    password: String,
    http: HttpClient,
}

impl ImgflipCaptioner {
    pub fn new(config: &ImgflipConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: &ImgflipConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            http,
        }
    }
}

impl RemoteCaptioner for ImgflipCaptioner {
    fn name(&self) -> &str {
        "imgflip"
    }

    fn caption(&self, template_id: &str, caption: &MemeCaption) -> Result<String> {
        let endpoint = format!("{}/caption_image", self.api_base);
        // text1 is the bottom caption box; only the top one is used.
        let params = [
            ("template_id", template_id),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("text0", caption.as_str()),
            ("text1", ""),
        ];
        let response = self
            .http
            .post(&endpoint)
            .form(&params)
            .send()
            .with_context(|| format!("imgflip caption request failed ({endpoint})"))?;
        let payload = response_json_or_error("imgflip", response)?;
        hosted_url(&payload)
    }
}

fn hosted_url(payload: &Value) -> Result<String> {
    if !payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let message = payload
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or("success flag not set")
            .to_string();
        return Err(StageError::Rejected {
            service: "imgflip",
            message,
        }
        .into());
    }
    payload
        .get("data")
        .and_then(|data| data.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            StageError::MissingField {
                service: "imgflip",
                field: "data.url",
            }
            .into()
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use anyhow::{anyhow, Result};
    use chatmeme_contracts::MemeCaption;

    use super::RemoteCaptioner;

    pub struct StubCaptioner {
        pub reply: Result<String, String>,
        pub calls: RefCell<Vec<(String, String)>>,
    }

    impl StubCaptioner {
        pub fn hosting(url: &str) -> Self {
            Self {
                reply: Ok(url.to_string()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteCaptioner for StubCaptioner {
        fn name(&self) -> &str {
            "stub-captioner"
        }

        fn caption(&self, template_id: &str, caption: &MemeCaption) -> Result<String> {
            self.calls
                .borrow_mut()
                .push((template_id.to_string(), caption.as_str().to_string()));
            self.reply.clone().map_err(|message| anyhow!(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use chatmeme_contracts::config::ImgflipConfig;
    use chatmeme_contracts::MemeCaption;
    use serde_json::json;

    use super::*;
    use crate::error::FailureKind;
    use crate::http::testing::serve_once;

    fn config(base: String) -> ImgflipConfig {
        ImgflipConfig {
            api_base: base,
            username: "memer".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn posts_form_fields_and_returns_hosted_url() -> anyhow::Result<()> {
        let body = json!({
            "success": true,
            "data": {"url": "https://i.imgflip.com/8x2k1q.jpg", "page_url": "https://imgflip.com/i/8x2k1q"}
        });
        let (base, captured) = serve_once(200, "application/json", body.to_string().into_bytes());
        let captioner = ImgflipCaptioner::new(&config(base));
        let url = captioner.caption("181913649", &MemeCaption::literal("When the tests pass"))?;
        assert_eq!(url, "https://i.imgflip.com/8x2k1q.jpg");

        let request = captured.recv()?;
        assert_eq!(request.request_line, "POST /caption_image HTTP/1.1");
        assert_eq!(
            request.body,
            "template_id=181913649&username=memer&password=hunter2&text0=When+the+tests+pass&text1="
        );
        Ok(())
    }

    #[test]
    fn api_reported_failure_is_an_error() {
        let body = json!({"success": false, "error_message": "Invalid username/password"});
        let (base, _captured) = serve_once(200, "application/json", body.to_string().into_bytes());
        let err = ImgflipCaptioner::new(&config(base))
            .caption("1", &MemeCaption::literal("x"))
            .unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::Malformed);
        assert!(err.to_string().contains("Invalid username/password"));
    }

    #[test]
    fn success_without_url_is_missing_field() {
        let err = hosted_url(&json!({"success": true, "data": {}})).unwrap_err();
        assert_eq!(err.to_string(), "imgflip response is missing `data.url`");
    }
}
