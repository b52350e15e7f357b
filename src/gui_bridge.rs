use crate::config::Config;
use crate::status::TurnEvent;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast::{self, error::RecvError};

/// Forwards turn events to the display process.
pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.gui_local_ip, config.gui_local_port),
            format!("{}:{}", config.gui_remote_ip, config.gui_remote_port),
        )
        .await
    }

    pub async fn bind(local_addr: &str, target_addr: impl Into<String>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: target_addr.into(),
        })
    }

    /// Relay every event from `rx` as a JSON datagram until the status bus closes.
    pub async fn forward_status(&self, mut rx: broadcast::Receiver<TurnEvent>) {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Display forwarding fell behind, {} events lost", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let msg = match serde_json::to_string(&event) {
                Ok(msg) => msg,
                Err(e) => {
                    log::error!("Failed to encode status event: {}", e);
                    continue;
                }
            };
            if let Err(e) = self.send_message(&msg).await {
                log::warn!("Failed to send to GUI: {}", e);
            }
        }
        log::debug!("Status bus closed, display forwarding stopped");
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusSignal;

    #[tokio::test]
    async fn forwards_events_as_json() {
        let display = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = display.local_addr().unwrap().to_string();
        let bridge = Arc::new(GuiBridge::bind("127.0.0.1:0", target).await.unwrap());

        let status = StatusSignal::new(10);
        let rx = status.subscribe();
        let forwarder = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.forward_status(rx).await })
        };

        status.emit(TurnEvent::EndOfUtterance);
        status.emit(TurnEvent::Error("no network".into()));

        let mut buf = [0u8; 256];
        let len = display.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], br#"{"event":"end_of_utterance"}"#);
        let len = display.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], br#"{"event":"error","detail":"no network"}"#);

        drop(status);
        forwarder.await.unwrap();
    }
}
