//! Parser for OpenAI-style streamed chat completions.
//!
//! Each SSE `data:` payload is a JSON chunk whose `choices[0].delta.content` carries the next
//! piece of text. The literal payload `[DONE]` ends the stream.

use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::StreamExt;
use serde::Deserialize;

use super::{ProviderError, Result, TokenStream};

const DONE: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

/// Text carried by one chunk, if any. Role-only and empty deltas yield `None`.
fn parse_chunk(data: &str) -> Result<Option<String>> {
    let chunk: ChunkBody =
        serde_json::from_str(data).map_err(|e| ProviderError::InvalidResponse(format!("malformed stream chunk: {e}")))?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::Stream(error.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

/// Turn a streaming completion response into a stream of text tokens.
pub fn parse_chat_stream(response: reqwest::Response) -> TokenStream {
    let tokens = response
        .bytes_stream()
        .eventsource()
        .take_while(|event| future::ready(!matches!(event, Ok(event) if event.data.trim() == DONE)))
        .filter_map(|event| async move {
            match event {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => parse_chunk(&event.data).transpose(),
                Err(e) => Some(Err(ProviderError::Stream(e.to_string()))),
            }
        });

    Box::pin(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn sse_response(body: &str) -> reqwest::Response {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body.to_string()),
            )
            .mount(&server)
            .await;
        crate::install_crypto_provider();
        reqwest::get(server.uri()).await.unwrap()
    }

    #[tokio::test]
    async fn test_tokens_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let tokens: Vec<String> = parse_chat_stream(sse_response(body).await)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_error_chunk_ends_with_error() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        );
        let items: Vec<Result<String>> = parse_chat_stream(sse_response(body).await).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(&items[1], Err(ProviderError::Stream(msg)) if msg == "overloaded"));
    }

    #[test]
    fn test_malformed_chunk_is_invalid_response() {
        assert!(matches!(parse_chunk("not json"), Err(ProviderError::InvalidResponse(_))));
    }
}
