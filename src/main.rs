use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use walle_voice::audio::AudioSystem;
use walle_voice::config::Config;
use walle_voice::gui_bridge::GuiBridge;
use walle_voice::net_link::{resolve_client_id, resolve_device_id, StaticToken, WsConnector};
use walle_voice::{ConversationController, StatusSignal, TurnError};

const CLIENT_ID_FILE: &str = "walle_uuid.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let mut config = Config::new().map_err(|e| anyhow::anyhow!(e))?;
    config.device_id = resolve_device_id(&config.device_id);
    config.client_id = resolve_client_id(&config.client_id, CLIENT_ID_FILE);
    log::info!("{} {} starting", config.app_name, config.app_version);

    let status = StatusSignal::new(config.status_capacity);

    // 启动GUI桥，把对话状态转发给显示进程
    let gui_bridge = Arc::new(GuiBridge::new(&config).await?);
    {
        let gui_bridge = gui_bridge.clone();
        let rx = status.subscribe();
        tokio::spawn(async move { gui_bridge.forward_status(rx).await });
    }

    // 打开音频设备，失败则直接退出
    let audio_config = config.audio_config();
    let mut audio = AudioSystem::open_alsa(&audio_config, status.clone())?;
    audio.start_playback()?;

    let connector = WsConnector::new(config.ws_url, &config.device_id, &config.client_id);
    let tokens = Arc::new(StaticToken(config.ws_token.to_string()));
    let mut controller = ConversationController::new(connector, tokens, audio, status, config.session_config());

    // Ctrl+C 取消当前对话，对话自己完成收尾后再退出
    let cancel = controller.cancel_token();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::info!("Received Ctrl+C");
                cancel.cancel();
            }
        });
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut follow_on = false;

    loop {
        if !follow_on {
            println!("Press Enter to talk, Ctrl+C to quit");
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = stdin.next_line() => match line {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        break;
                    }
                },
            }
        }

        match controller.converse_turn().await {
            Ok(outcome) => {
                if !outcome.transcript.response.is_empty() {
                    println!("> {}", outcome.transcript.response);
                }
                follow_on = outcome.follow_on;
            }
            Err(TurnError::Cancelled) => break,
            Err(e) => {
                log::error!("Conversation turn failed: {}", e);
                follow_on = false;
            }
        }
    }

    log::info!("Shutting down...");
    if let Err(e) = controller.shutdown().await {
        log::error!("Audio shutdown failed: {}", e);
    }
    Ok(())
}
