//! Generic external-API tool adapter.
//!
//! `spec.md`'s Non-goals explicitly keep "individual tool implementations
//! (image generation, transcription, sandboxed code execution, etc.)" out
//! of scope — described only at their interfaces, reachable over "individual
//! HTTPS APIs" (`spec.md` §Outbound). `HttpTool` is that interface: it POSTs
//! the model's input JSON to a configured endpoint and shapes the response
//! into a `ToolResult`, either as text or — when the response carries an
//! image/PDF content type — a `FileDelivery`. One instance of this, pointed
//! at a different endpoint, backs `generate_image`, `render_latex`,
//! `web_search`, and `execute_python`.

use async_trait::async_trait;
use serde_json::Value;

use crate::display::FileDelivery;
use crate::registry::{Tool, ToolContext, ToolResult};

pub struct HttpTool {
    client: reqwest::Client,
    name: String,
    description: String,
    input_schema: Value,
    endpoint: String,
    source_tool: String,
}

impl HttpTool {
    pub fn new(
        client: reqwest::Client,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        endpoint: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            client,
            source_tool: name.clone(),
            name,
            description: description.into(),
            input_schema,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext<'_>) -> ToolResult {
        let resp = match self.client.post(&self.endpoint).json(&input).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("{} request failed: {e}", self.name)),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return ToolResult::error(format!("{} returned {status}: {body}", self.name));
        }

        let mime = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        if mime.starts_with("image/") || mime == "application/pdf" {
            let bytes = match resp.bytes().await {
                Ok(b) => b.to_vec(),
                Err(e) => return ToolResult::error(format!("{} body read failed: {e}", self.name)),
            };
            let filename = format!("{}.{}", self.name, extension_for(&mime));
            return ToolResult::with_file(
                format!("{} produced a file", self.name),
                FileDelivery {
                    filename,
                    content_bytes: bytes,
                    mime,
                    source_tool: self.source_tool.clone(),
                    deliver_before_response: false,
                },
            );
        }

        match resp.text().await {
            Ok(text) => ToolResult::success(text),
            Err(e) => ToolResult::error(format!("{} body read failed: {e}", self.name)),
        }
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }
}
