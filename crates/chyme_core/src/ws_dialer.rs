/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::SignalingError;
use crate::signaling::{DialRequest, Dialer, WireChannel};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

/// Production dialer: a websocket over tokio-tungstenite (rustls, webpki roots).
#[derive(Clone, Copy, Debug, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, request: &DialRequest) -> Result<WireChannel, SignalingError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SignalingError::InvalidEndpoint(e.to_string()))?;
        if let Some(token) = request.bearer.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SignalingError::InvalidEndpoint(format!("auth header: {e}")))?;
            upgrade.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (ws, response) = tokio_tungstenite::connect_async(upgrade)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(resp) => SignalingError::Rejected {
                    status: resp.status().as_u16(),
                },
                other => SignalingError::Connect(other.to_string()),
            })?;
        info!(status = response.status().as_u16(), "signaling websocket upgraded");

        let (writer, reader) = ws.split();
        let sink = writer
            .sink_map_err(|e| SignalingError::Closed(e.to_string()))
            .with(|text: String| futures_util::future::ready(Ok::<_, SignalingError>(Message::Text(text))));

        // Pings are answered by tungstenite on the next read; only text reaches the client.
        let stream = futures_util::stream::unfold(reader, |mut reader| async move {
            loop {
                match reader.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text), reader)),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => return Some((Ok(text), reader)),
                        Err(_) => debug!("ignoring non-utf8 binary frame"),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "signaling close frame");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(tungstenite::Error::ConnectionClosed) => return None,
                    Err(e) => return Some((Err(SignalingError::Closed(e.to_string())), reader)),
                }
            }
        });

        Ok(WireChannel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_an_invalid_endpoint() {
        let request = DialRequest {
            url: "not a url".to_string(),
            bearer: None,
        };
        let err = WsDialer.dial(&request).await.err().unwrap();
        assert!(matches!(err, SignalingError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Nothing listens on the loopback discard port.
        let request = DialRequest {
            url: "ws://127.0.0.1:9/ws?roomId=r1".to_string(),
            bearer: Some("tok".to_string()),
        };
        let err = WsDialer.dial(&request).await.err().unwrap();
        assert!(matches!(err, SignalingError::Connect(_)));
    }
}
